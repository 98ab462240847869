//! Saving and loading index artifacts.

use std::fs;

use codeclone::vector::{HEADER_SIZE, similarity_to_distance};
use codeclone::{IndexConfiguration, IndexKind, SharedVectorIndex, VectorError, VectorIndex};
use tempfile::TempDir;

use crate::common::random_unit_vectors;

const DIM: usize = 16;

fn populated(config: IndexConfiguration, n: usize) -> VectorIndex {
    let vectors = random_unit_vectors(n, DIM, 77);
    let mut index = VectorIndex::create(config).unwrap();
    if !index.is_trained() {
        index.train(&vectors).unwrap();
    }
    index.add(&vectors, None).unwrap();
    index
}

#[test]
fn test_round_trip_preserves_results() {
    let temp_dir = TempDir::new().unwrap();
    let queries = random_unit_vectors(4, DIM, 78);
    let radius = similarity_to_distance(0.3).unwrap();

    for config in [
        IndexConfiguration::exact(DIM),
        IndexConfiguration::clustered_exact(DIM, 4),
    ] {
        let kind = config.kind;
        let index = populated(config, 150);
        let before = index.range_search(&queries, radius).unwrap();

        let path = temp_dir.path().join(format!("{}.idx", kind.as_str().replace(',', "_")));
        index.save(&path).unwrap();
        let loaded = VectorIndex::load(&path).unwrap();

        assert_eq!(loaded.len(), 150);
        assert_eq!(loaded.kind(), kind);
        assert_eq!(loaded.config(), index.config());
        assert_eq!(loaded.range_search(&queries, radius).unwrap(), before);
    }
}

#[test]
fn test_quantized_round_trip_preserves_count() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("pq.idx");

    let index = populated(IndexConfiguration::clustered_quantized(DIM, 4, 4, 4), 120);
    index.save(&path).unwrap();

    let loaded = VectorIndex::load(&path).unwrap();
    assert_eq!(loaded.len(), 120);
    assert_eq!(loaded.kind(), IndexKind::ClusteredQuantized);
    assert!(loaded.is_trained());
}

#[test]
fn test_loaded_index_accepts_more_vectors() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("dir").join("clones.idx");

    populated(IndexConfiguration::exact(DIM), 10).save(&path).unwrap();

    let shared = SharedVectorIndex::empty();
    shared.load(&path).unwrap();
    let ids = shared.add(&random_unit_vectors(5, DIM, 3), None).unwrap();
    assert_eq!(ids.first().map(|id| id.get()), Some(10));
    assert_eq!(shared.len().unwrap(), 15);
}

#[test]
fn test_corrupted_artifacts_are_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("clones.idx");
    populated(IndexConfiguration::exact(DIM), 20).save(&path).unwrap();
    let original = fs::read(&path).unwrap();

    // Bad magic
    let mut bytes = original.clone();
    bytes[0] = b'X';
    fs::write(&path, &bytes).unwrap();
    assert!(matches!(
        VectorIndex::load(&path),
        Err(VectorError::CorruptArtifact { .. })
    ));

    // Unknown format version
    let mut bytes = original.clone();
    bytes[4..8].copy_from_slice(&99u32.to_le_bytes());
    fs::write(&path, &bytes).unwrap();
    assert!(matches!(
        VectorIndex::load(&path),
        Err(VectorError::VersionMismatch { actual: 99, .. })
    ));

    // Truncated payload
    fs::write(&path, &original[..original.len() - 7]).unwrap();
    assert!(matches!(
        VectorIndex::load(&path),
        Err(VectorError::CorruptArtifact { .. })
    ));

    // Header only
    fs::write(&path, &original[..HEADER_SIZE - 1]).unwrap();
    assert!(matches!(
        VectorIndex::load(&path),
        Err(VectorError::CorruptArtifact { .. })
    ));

    // Intact file still loads
    fs::write(&path, &original).unwrap();
    assert_eq!(VectorIndex::load(&path).unwrap().len(), 20);
}

#[test]
fn test_missing_artifact_is_an_io_error() {
    let temp_dir = TempDir::new().unwrap();
    let err = VectorIndex::load(temp_dir.path().join("absent.idx")).unwrap_err();
    assert!(matches!(err, VectorError::Storage(_)));
}
