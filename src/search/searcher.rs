//! Threshold-based clone search over a shared index.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;

use crate::config::{QueryConfig, Settings};
use crate::error::{CloneError, CloneResult};
use crate::metadata::MetadataStore;
use crate::search::hydrate::{CloneMatch, ResultHydrator};
use crate::vector::{
    EmbeddingGenerator, RangeSearchResult, SharedVectorIndex, VectorError, VectorId,
    distance_to_similarity, similarity_to_distance,
};

/// Summary of what a searcher can see.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchStatistics {
    pub index_size: usize,
    pub metadata_count: usize,
    pub languages: Vec<String>,
    pub embedding_dimension: usize,
}

/// Finds code clones of query text above a similarity threshold.
///
/// The searcher owns no data. It embeds the query, turns the similarity
/// threshold into an L2 radius, asks the index for every vector inside it
/// and joins the hits with their metadata.
#[derive(Clone)]
pub struct CloneSearcher {
    index: SharedVectorIndex,
    embedder: Arc<dyn EmbeddingGenerator>,
    store: Arc<dyn MetadataStore>,
    hydrator: ResultHydrator,
    defaults: QueryConfig,
}

impl CloneSearcher {
    pub fn new(
        index: SharedVectorIndex,
        embedder: Arc<dyn EmbeddingGenerator>,
        store: Arc<dyn MetadataStore>,
    ) -> Self {
        Self::with_defaults(index, embedder, store, QueryConfig::default())
    }

    /// Builds a searcher whose defaults come from `settings.query`.
    pub fn from_settings(
        settings: &Settings,
        index: SharedVectorIndex,
        embedder: Arc<dyn EmbeddingGenerator>,
        store: Arc<dyn MetadataStore>,
    ) -> Self {
        Self::with_defaults(index, embedder, store, settings.query.clone())
    }

    fn with_defaults(
        index: SharedVectorIndex,
        embedder: Arc<dyn EmbeddingGenerator>,
        store: Arc<dyn MetadataStore>,
        defaults: QueryConfig,
    ) -> Self {
        let hydrator = ResultHydrator::new(Arc::clone(&store));
        Self {
            index,
            embedder,
            store,
            hydrator,
            defaults,
        }
    }

    pub fn defaults(&self) -> &QueryConfig {
        &self.defaults
    }

    pub fn index(&self) -> &SharedVectorIndex {
        &self.index
    }

    /// Every stored snippet at least `threshold` similar to `query_text`.
    ///
    /// Results are sorted by similarity descending, then by snippet ID, and
    /// truncated to `max_results` when given.
    pub fn find_clones(
        &self,
        query_text: &str,
        threshold: f32,
        max_results: Option<usize>,
        exclude_self: bool,
    ) -> CloneResult<Vec<CloneMatch>> {
        let radius = similarity_to_distance(threshold)?;
        let started = Instant::now();

        let embedding = self.embedder.embed_one(query_text)?;
        let result = self.index.range_search(&[embedding], radius)?;

        let mut clones = self.hydrate_query(&result, 0, exclude_self)?;
        if let Some(limit) = max_results {
            clones.truncate(limit);
        }

        tracing::debug!(
            threshold,
            hits = result.total_hits(),
            returned = clones.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "clone search complete"
        );
        Ok(clones)
    }

    /// [`find_clones`](Self::find_clones) with the configured threshold,
    /// result cap and self-exclusion.
    pub fn find_clones_with_defaults(&self, query_text: &str) -> CloneResult<Vec<CloneMatch>> {
        self.find_clones(
            query_text,
            self.defaults.default_similarity,
            Some(self.defaults.max_results),
            self.defaults.exclude_self,
        )
    }

    /// Searches many texts with one embedding call and one index call.
    ///
    /// Returns one list per input, in input order. Self-matches are always
    /// excluded and no result cap is applied.
    pub fn find_clones_batch(
        &self,
        query_texts: &[&str],
        threshold: f32,
    ) -> CloneResult<Vec<Vec<CloneMatch>>> {
        let radius = similarity_to_distance(threshold)?;
        if query_texts.is_empty() {
            return Ok(Vec::new());
        }

        let embeddings = self.embedder.embed_many(query_texts)?;
        if embeddings.len() != query_texts.len() {
            return Err(VectorError::LengthMismatch {
                left_name: "query_texts",
                left: query_texts.len(),
                right_name: "embeddings",
                right: embeddings.len(),
            }
            .into());
        }

        let result = self.index.range_search(&embeddings, radius)?;
        let batches = (0..result.num_queries())
            .map(|query| self.hydrate_query(&result, query, true))
            .collect::<CloneResult<Vec<_>>>()?;

        tracing::debug!(
            queries = query_texts.len(),
            hits = result.total_hits(),
            threshold,
            "batch clone search complete"
        );
        Ok(batches)
    }

    /// Clones of whichever stored snippet covers `line` in `file_path`.
    ///
    /// A position with no snippet yields an empty list.
    pub fn find_clones_by_location(
        &self,
        file_path: &str,
        line: u32,
        threshold: f32,
        max_results: Option<usize>,
    ) -> CloneResult<Vec<CloneMatch>> {
        let Some(snippet) = self.store.find_by_location(file_path, line)? else {
            tracing::warn!(file_path, line, "no snippet found at location");
            return Ok(Vec::new());
        };
        tracing::debug!(snippet_id = %snippet.id, file_path, line, "resolved location to snippet");
        self.find_clones(&snippet.code, threshold, max_results, true)
    }

    /// Clones of the stored snippet `id`.
    pub fn find_clones_by_id(
        &self,
        id: VectorId,
        threshold: f32,
        max_results: Option<usize>,
    ) -> CloneResult<Vec<CloneMatch>> {
        let snippet = self
            .store
            .get(id)?
            .ok_or(CloneError::SnippetNotFound { id })?;
        self.find_clones(&snippet.code, threshold, max_results, true)
    }

    pub fn statistics(&self) -> CloneResult<SearchStatistics> {
        Ok(SearchStatistics {
            index_size: self.index.len()?,
            metadata_count: self.store.count()?,
            languages: self.store.distinct_languages()?,
            embedding_dimension: self.embedder.dimension().get(),
        })
    }

    fn hydrate_query(
        &self,
        result: &RangeSearchResult,
        query: usize,
        exclude_self: bool,
    ) -> CloneResult<Vec<CloneMatch>> {
        let similarities: Vec<f32> = result
            .distances(query)
            .iter()
            .map(|&distance| distance_to_similarity(distance))
            .collect();
        self.hydrator.hydrate(result.ids(query), &similarities, exclude_self)
    }
}

impl std::fmt::Debug for CloneSearcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloneSearcher")
            .field("index", &self.index)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}
