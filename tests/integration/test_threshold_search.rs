//! Threshold range search against brute-force ground truth.

use std::sync::Arc;

use codeclone::vector::similarity_to_distance;
use codeclone::{
    IndexConfiguration, InMemoryMetadataStore, MetadataStore, ResultHydrator, SnippetMetadata,
    VectorId, VectorIndex,
};

use crate::common::{brute_force_ids, random_unit_vectors};

const DIM: usize = 24;

fn exact_index(vectors: &[Vec<f32>]) -> VectorIndex {
    let mut index = VectorIndex::create(IndexConfiguration::exact(DIM)).unwrap();
    index.add(vectors, None).unwrap();
    index
}

#[test]
fn test_exact_matches_brute_force() {
    let vectors = random_unit_vectors(300, DIM, 11);
    let index = exact_index(&vectors);
    let queries = random_unit_vectors(5, DIM, 12);

    for threshold in [0.0, 0.2, 0.4, 0.6] {
        let radius = similarity_to_distance(threshold).unwrap();
        let result = index.range_search(&queries, radius).unwrap();
        assert_eq!(result.num_queries(), queries.len());

        for (q, query) in queries.iter().enumerate() {
            let mut found: Vec<i64> = result.ids(q).iter().map(VectorId::get).collect();
            found.sort_unstable();
            let expected = brute_force_ids(&vectors, query, threshold);

            // Hits whose similarity sits on the threshold may flip either
            // way under float rounding
            let disagreements: Vec<&i64> = found
                .iter()
                .filter(|id| !expected.contains(id))
                .chain(expected.iter().filter(|id| !found.contains(id)))
                .collect();
            for id in disagreements {
                let similarity = crate::common::dot(&vectors[*id as usize], query);
                assert!(
                    (similarity - threshold).abs() < 1e-4,
                    "id {id} with similarity {similarity} misclassified at threshold {threshold}"
                );
            }
        }
    }
}

#[test]
fn test_self_query_excludes_its_own_id() {
    let vectors = random_unit_vectors(100, DIM, 5);
    let index = exact_index(&vectors);

    let store = InMemoryMetadataStore::new();
    let records: Vec<SnippetMetadata> = (0..100)
        .map(|i| SnippetMetadata {
            id: VectorId::new(i),
            code: format!("snippet {i}"),
            file_path: "corpus.py".to_string(),
            start_line: 1,
            end_line: 1,
            language: "python".to_string(),
            function_name: None,
        })
        .collect();
    store.upsert_many(&records).unwrap();
    let hydrator = ResultHydrator::new(Arc::new(store));

    let radius = similarity_to_distance(0.99).unwrap();
    let result = index.range_search(&[vectors[5].clone()], radius).unwrap();
    assert!(result.ids(0).contains(&VectorId::new(5)));

    let similarities: Vec<f32> = result
        .distances(0)
        .iter()
        .map(|&d| codeclone::vector::distance_to_similarity(d))
        .collect();

    let excluded = hydrator.hydrate(result.ids(0), &similarities, true).unwrap();
    assert!(excluded.iter().all(|m| m.snippet_id != VectorId::new(5)));

    let included = hydrator.hydrate(result.ids(0), &similarities, false).unwrap();
    assert_eq!(included[0].snippet_id, VectorId::new(5));
}

#[test]
fn test_results_sorted_by_distance() {
    let vectors = random_unit_vectors(200, DIM, 21);
    let index = exact_index(&vectors);
    let result = index
        .range_search(&random_unit_vectors(3, DIM, 22), similarity_to_distance(0.1).unwrap())
        .unwrap();
    for q in 0..3 {
        let distances = result.distances(q);
        assert!(distances.windows(2).all(|w| w[0] <= w[1]));
    }
}

#[test]
fn test_caller_buffers_are_not_mutated() {
    // Deliberately not unit length
    let vectors: Vec<Vec<f32>> = (0..10)
        .map(|i| (0..DIM).map(|j| (i * DIM + j) as f32 + 1.0).collect())
        .collect();
    let before = vectors.clone();

    let index = exact_index(&vectors);
    assert_eq!(vectors, before);

    let queries = vec![vec![3.0; DIM]];
    let queries_before = queries.clone();
    index.range_search(&queries, 1.0).unwrap();
    assert_eq!(queries, queries_before);
}

#[test]
fn test_bad_inputs_are_rejected() {
    let index = exact_index(&random_unit_vectors(4, DIM, 1));
    assert!(index.range_search(&[vec![0.5; DIM]], -1.0).is_err());
    assert!(index.range_search(&[vec![0.5; DIM + 1]], 0.5).is_err());
    assert!(similarity_to_distance(1.2).is_err());
}
