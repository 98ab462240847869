//! End-to-end ingestion and clone search over a SQLite metadata store.

use std::sync::Arc;

use codeclone::{
    CloneIndexer, CloneMatch, CloneSearcher, EmbeddingGenerator, IndexConfiguration,
    MetadataStore, Settings, SharedVectorIndex, SnippetMetadata, SqliteMetadataStore, VectorId,
};
use tempfile::TempDir;

use crate::common::{HashEmbedder, dot, sample_snippets};

const DIM: usize = 64;

struct Fixture {
    _dir: TempDir,
    indexer: CloneIndexer,
    store: Arc<SqliteMetadataStore>,
}

fn fixture() -> Fixture {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(SqliteMetadataStore::open(dir.path().join("metadata.db")).unwrap());

    let index = SharedVectorIndex::empty();
    index.create(IndexConfiguration::exact(DIM)).unwrap();

    let mut settings = Settings::default();
    settings.embedding.batch_size = 3;
    settings.indexing.parallel_threads = 2;

    let indexer = CloneIndexer::new(
        &settings,
        index,
        Arc::new(HashEmbedder::new(DIM)),
        store.clone(),
    );
    indexer.ingest(&sample_snippets()).unwrap();
    Fixture {
        _dir: dir,
        indexer,
        store,
    }
}

/// Snippet IDs at least `threshold` similar to `query`, self-matches removed,
/// by brute force over the fixture embeddings.
fn expected_clone_ids(query: &str, threshold: f32) -> Vec<i64> {
    let embedder = HashEmbedder::new(DIM);
    let snippets = sample_snippets();
    let texts: Vec<&str> = snippets.iter().map(|s| s.code.as_str()).collect();
    let corpus = embedder.embed_many(&texts).unwrap();
    let query = embedder.embed_one(query).unwrap();

    let mut ids: Vec<i64> = corpus
        .iter()
        .enumerate()
        .map(|(i, v)| (i as i64, dot(v, &query)))
        .filter(|&(_, similarity)| similarity >= threshold && similarity < 0.9999)
        .map(|(i, _)| i)
        .collect();
    ids.sort_unstable();
    ids
}

fn sorted(clones: &[CloneMatch]) -> Vec<i64> {
    let mut ids: Vec<i64> = clones.iter().map(|c| c.snippet_id.get()).collect();
    ids.sort_unstable();
    ids
}

#[test]
fn test_clones_match_brute_force() {
    let fixture = fixture();
    let searcher = fixture.indexer.searcher();
    let query = "def add(a, b):\n    return a + b";

    for threshold in [0.2, 0.5, 0.8] {
        let clones = searcher.find_clones(query, threshold, None, true).unwrap();
        assert_eq!(sorted(&clones), expected_clone_ids(query, threshold));
        assert!(clones.iter().all(|c| c.snippet_id != VectorId::new(0)));
        assert!(clones.windows(2).all(|w| w[0].similarity >= w[1].similarity));
        assert!(clones.iter().all(|c| c.similarity >= threshold - 1e-4 && c.similarity <= 1.0));
    }

    let with_self = searcher.find_clones(query, 0.99, None, false).unwrap();
    assert_eq!(with_self.first().map(|c| c.snippet_id), Some(VectorId::new(0)));
    assert_eq!(with_self[0].file_path, "math/ops.py");
}

#[test]
fn test_batch_of_three_queries() {
    let fixture = fixture();
    let searcher = fixture.indexer.searcher();
    assert_eq!(fixture.indexer.index().len().unwrap(), 10);

    let queries = [
        "def add(a, b):\n    return a + b",
        "fn parse_port(s: &str) -> Option<u16> {\n    s.parse().ok()\n}",
        "def read_config(path):\n    with open(path) as f:\n        return json.load(f)",
    ];
    let batches = searcher.find_clones_batch(&queries, 0.3).unwrap();
    assert_eq!(batches.len(), 3);
    for (batch, query) in batches.iter().zip(queries) {
        assert!(batch.windows(2).all(|w| w[0].similarity >= w[1].similarity));
        assert_eq!(batch, &searcher.find_clones(query, 0.3, None, true).unwrap());
    }
}

#[test]
fn test_search_by_location_and_id() {
    let fixture = fixture();
    let searcher = fixture.indexer.searcher();

    // Line 41 of src/cli.rs lies inside snippet 6
    let by_location = searcher
        .find_clones_by_location("src/cli.rs", 41, 0.3, Some(1))
        .unwrap();
    assert_eq!(by_location.len(), 1);
    assert_ne!(by_location[0].snippet_id, VectorId::new(6));

    let by_id = searcher.find_clones_by_id(VectorId::new(6), 0.3, Some(1)).unwrap();
    assert_eq!(by_id, by_location);

    assert!(searcher
        .find_clones_by_location("src/cli.rs", 99, 0.3, None)
        .unwrap()
        .is_empty());
}

#[test]
fn test_statistics_reflect_ingestion() {
    let fixture = fixture();
    let stats = fixture.indexer.searcher().statistics().unwrap();
    assert_eq!(stats.index_size, 10);
    assert_eq!(stats.metadata_count, 10);
    assert_eq!(stats.languages, vec!["javascript", "python", "rust", "sql"]);
    assert_eq!(stats.embedding_dimension, DIM);
}

#[test]
fn test_metadata_location_lookup() {
    let store = SqliteMetadataStore::open_in_memory().unwrap();
    store
        .upsert_one(&SnippetMetadata {
            id: VectorId::new(7),
            code: "def f(): pass".to_string(),
            file_path: "a.py".to_string(),
            start_line: 1,
            end_line: 1,
            language: "python".to_string(),
            function_name: None,
        })
        .unwrap();

    let found = store.find_by_location("a.py", 1).unwrap().unwrap();
    assert_eq!(found.id, VectorId::new(7));
    assert_eq!(found.code, "def f(): pass");
    assert!(store.find_by_location("a.py", 2).unwrap().is_none());
}

#[test]
fn test_overlapping_upserts_keep_one_record_per_id() {
    let fixture = fixture();
    let replacement: Vec<SnippetMetadata> = sample_snippets()
        .into_iter()
        .take(4)
        .enumerate()
        .map(|(i, mut snippet)| {
            snippet.language = "patched".to_string();
            snippet.with_id(VectorId::new(i as i64 + 8))
        })
        .collect();
    fixture.store.upsert_many(&replacement).unwrap();

    assert_eq!(fixture.store.count().unwrap(), 12);
    assert_eq!(
        fixture.store.get(VectorId::new(9)).unwrap().unwrap().language,
        "patched"
    );
}

#[test]
fn test_search_after_persist_and_reload() {
    let fixture = fixture();
    let query = "def add(x, y):\n    return x + y";
    let before = fixture.indexer.searcher().find_clones(query, 0.2, None, true).unwrap();

    let path = fixture._dir.path().join("clones.idx");
    fixture.indexer.persist(&path).unwrap();

    let reloaded = SharedVectorIndex::empty();
    reloaded.load(&path).unwrap();
    assert_eq!(reloaded.len().unwrap(), 10);

    let searcher = CloneSearcher::new(
        reloaded,
        Arc::new(HashEmbedder::new(DIM)),
        fixture.store.clone(),
    );
    assert_eq!(searcher.find_clones(query, 0.2, None, true).unwrap(), before);
}
