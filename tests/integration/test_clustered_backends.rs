//! Clustered backends: probing, quantization recall and lifecycle.

use codeclone::vector::similarity_to_distance;
use codeclone::{IndexConfiguration, IndexKind, VectorError, VectorId, VectorIndex};

use crate::common::{brute_force_ids, clustered_unit_vectors, random_unit_vectors};

const DIM: usize = 32;

fn sorted_ids(ids: &[VectorId]) -> Vec<i64> {
    let mut ids: Vec<i64> = ids.iter().map(VectorId::get).collect();
    ids.sort_unstable();
    ids
}

#[test]
fn test_probing_every_cluster_equals_exact() {
    let vectors = random_unit_vectors(400, DIM, 3);
    let queries = random_unit_vectors(6, DIM, 4);

    let mut exact = VectorIndex::create(IndexConfiguration::exact(DIM)).unwrap();
    exact.add(&vectors, None).unwrap();

    let mut clustered = VectorIndex::create(IndexConfiguration::clustered_exact(DIM, 8)).unwrap();
    clustered.train(&vectors).unwrap();
    clustered.add(&vectors, None).unwrap();
    clustered.set_probe_count(8).unwrap();

    let radius = similarity_to_distance(0.3).unwrap();
    let expected = exact.range_search(&queries, radius).unwrap();
    let actual = clustered.range_search(&queries, radius).unwrap();

    for q in 0..queries.len() {
        assert_eq!(sorted_ids(actual.ids(q)), sorted_ids(expected.ids(q)));
    }
}

#[test]
fn test_fewer_probes_never_add_hits() {
    let vectors = random_unit_vectors(400, DIM, 8);
    let queries = random_unit_vectors(4, DIM, 9);

    let mut index = VectorIndex::create(IndexConfiguration::clustered_exact(DIM, 8)).unwrap();
    index.train(&vectors).unwrap();
    index.add(&vectors, None).unwrap();

    let radius = similarity_to_distance(0.2).unwrap();
    index.set_probe_count(8).unwrap();
    let all = index.range_search(&queries, radius).unwrap();
    index.set_probe_count(2).unwrap();
    let some = index.range_search(&queries, radius).unwrap();

    for q in 0..queries.len() {
        let full = sorted_ids(all.ids(q));
        assert!(sorted_ids(some.ids(q)).iter().all(|id| full.contains(id)));
    }
}

#[test]
fn test_quantized_recall_on_clustered_data() {
    let (centers, vectors) = clustered_unit_vectors(8, 50, DIM, 0.05, 17);

    let mut index =
        VectorIndex::create(IndexConfiguration::clustered_quantized(DIM, 8, 8, 8)).unwrap();
    index.train(&vectors).unwrap();
    index.add(&vectors, None).unwrap();
    index.set_probe_count(4).unwrap();

    let threshold = 0.9;
    let result = index
        .range_search(&centers, similarity_to_distance(threshold).unwrap())
        .unwrap();

    let mut expected_total = 0;
    let mut recalled = 0;
    for (q, center) in centers.iter().enumerate() {
        let expected = brute_force_ids(&vectors, center, threshold);
        let found = sorted_ids(result.ids(q));
        expected_total += expected.len();
        recalled += expected.iter().filter(|id| found.contains(id)).count();
    }

    assert!(expected_total > 0);
    let recall = recalled as f32 / expected_total as f32;
    assert!(recall >= 0.9, "recall {recall} below 0.9");
}

#[test]
fn test_add_before_train_is_a_state_error() {
    for config in [
        IndexConfiguration::clustered_exact(DIM, 4),
        IndexConfiguration::clustered_quantized(DIM, 4, 8, 4),
    ] {
        let mut index = VectorIndex::create(config).unwrap();
        let err = index.add(&random_unit_vectors(3, DIM, 1), None).unwrap_err();
        assert!(matches!(err, VectorError::State { operation: "add", .. }));
    }
}

#[test]
fn test_second_train_is_a_no_op() {
    let vectors = random_unit_vectors(120, DIM, 31);
    let mut index = VectorIndex::create(IndexConfiguration::clustered_exact(DIM, 4)).unwrap();
    index.train(&vectors).unwrap();
    index.add(&vectors[..50], None).unwrap();

    index.train(&random_unit_vectors(120, DIM, 32)).unwrap();
    assert_eq!(index.len(), 50);
    assert_eq!(index.kind(), IndexKind::ClusteredExact);
}

#[test]
fn test_untrained_clustered_search_is_empty() {
    let index = VectorIndex::create(IndexConfiguration::clustered_exact(DIM, 4)).unwrap();
    let result = index.range_search(&random_unit_vectors(2, DIM, 2), 2.0).unwrap();
    assert_eq!(result.num_queries(), 2);
    assert_eq!(result.total_hits(), 0);
}
