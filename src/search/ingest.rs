//! Ingestion: embed snippets, train the index on first use, store vectors
//! and metadata under the same IDs.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::Serialize;

use crate::config::{QueryConfig, Settings};
use crate::error::{CloneResult, ErrorContext};
use crate::metadata::{CodeSnippet, MetadataStore, SnippetMetadata};
use crate::search::searcher::CloneSearcher;
use crate::vector::{
    EmbeddingGenerator, SharedVectorIndex, VectorDimension, VectorError, VectorId, VectorIndex,
};

/// Outcome of one [`CloneIndexer::ingest`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Snippets received
    pub snippets: usize,
    /// Embeddings produced and added to the index
    pub embedded: usize,
    /// Vectors in the index afterwards
    pub index_size: usize,
}

/// Builds and grows a clone index from code snippets.
#[derive(Clone)]
pub struct CloneIndexer {
    index: SharedVectorIndex,
    embedder: Arc<dyn EmbeddingGenerator>,
    store: Arc<dyn MetadataStore>,
    batch_size: usize,
    training_sample_size: usize,
    seed: u64,
    parallel_threads: usize,
    query: QueryConfig,
}

impl CloneIndexer {
    pub fn new(
        settings: &Settings,
        index: SharedVectorIndex,
        embedder: Arc<dyn EmbeddingGenerator>,
        store: Arc<dyn MetadataStore>,
    ) -> Self {
        Self {
            index,
            embedder,
            store,
            batch_size: settings.embedding.batch_size.max(1),
            training_sample_size: settings.index.training_sample_size.max(1),
            seed: settings.index.seed,
            parallel_threads: settings.indexing.parallel_threads,
            query: settings.query.clone(),
        }
    }

    pub fn index(&self) -> &SharedVectorIndex {
        &self.index
    }

    /// A searcher over the same index, embedder and metadata.
    pub fn searcher(&self) -> CloneSearcher {
        let mut settings = Settings::default();
        settings.query = self.query.clone();
        CloneSearcher::from_settings(
            &settings,
            self.index.clone(),
            Arc::clone(&self.embedder),
            Arc::clone(&self.store),
        )
    }

    /// Embeds and stores `snippets`.
    ///
    /// IDs continue from the index's next free ID. An untrained index is
    /// first trained on a random sample of the new embeddings. Vectors and
    /// metadata are written under one exclusive index lock, metadata first:
    /// a vector is only searchable once its record exists.
    pub fn ingest(&self, snippets: &[CodeSnippet]) -> CloneResult<IngestReport> {
        if snippets.is_empty() {
            return Ok(IngestReport {
                snippets: 0,
                embedded: 0,
                index_size: self.index.len()?,
            });
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.parallel_threads)
            .build()
            .context("Failed to build ingestion thread pool")?;

        let started = Instant::now();
        let vectors = pool.install(|| self.embed_snippets(snippets))?;
        let embedded = vectors.len();

        let ids = self.index.write("ingest", |index| {
            Ok(pool.install(|| self.populate(index, snippets, &vectors)))
        })??;

        let report = IngestReport {
            snippets: snippets.len(),
            embedded,
            index_size: self.index.len()?,
        };
        tracing::info!(
            snippets = report.snippets,
            first_id = %ids[0],
            index_size = report.index_size,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "ingested snippets"
        );
        Ok(report)
    }

    /// Saves the index artifact to `path`.
    pub fn persist(&self, path: impl AsRef<Path>) -> CloneResult<()> {
        self.index.save(path)?;
        Ok(())
    }

    fn embed_snippets(&self, snippets: &[CodeSnippet]) -> CloneResult<Vec<Vec<f32>>> {
        let batches = snippets
            .par_chunks(self.batch_size)
            .map(|chunk| {
                let texts: Vec<&str> = chunk.iter().map(|snippet| snippet.code.as_str()).collect();
                let embeddings = self.embedder.embed_many(&texts)?;
                if embeddings.len() != texts.len() {
                    return Err(VectorError::LengthMismatch {
                        left_name: "texts",
                        left: texts.len(),
                        right_name: "embeddings",
                        right: embeddings.len(),
                    });
                }
                Ok(embeddings)
            })
            .collect::<Result<Vec<_>, VectorError>>()?;

        tracing::debug!(
            snippets = snippets.len(),
            batches = batches.len(),
            batch_size = self.batch_size,
            "embedded snippets"
        );
        Ok(batches.into_iter().flatten().collect())
    }

    fn populate(
        &self,
        index: &mut VectorIndex,
        snippets: &[CodeSnippet],
        vectors: &[Vec<f32>],
    ) -> CloneResult<Vec<VectorId>> {
        let start = index.next_id().get();
        let ids: Vec<VectorId> = (start..start + vectors.len() as i64)
            .map(VectorId::new)
            .collect();

        let records: Vec<SnippetMetadata> = snippets
            .iter()
            .cloned()
            .zip(&ids)
            .map(|(snippet, &id)| snippet.with_id(id))
            .collect();
        // Reject bad input before anything is written
        records.iter().try_for_each(SnippetMetadata::validate)?;
        VectorDimension::new(index.dimension())?.validate_batch(vectors)?;

        if !index.is_trained() {
            let sample = self.training_sample(vectors);
            tracing::info!(
                sample_size = sample.len(),
                available = vectors.len(),
                "training index on ingested embeddings"
            );
            index.train(&sample)?;
        }

        self.store.upsert_many(&records)?;
        index.add(vectors, Some(&ids))?;
        Ok(ids)
    }

    fn training_sample(&self, vectors: &[Vec<f32>]) -> Vec<Vec<f32>> {
        if vectors.len() <= self.training_sample_size {
            return vectors.to_vec();
        }
        let mut rng = StdRng::seed_from_u64(self.seed);
        rand::seq::index::sample(&mut rng, vectors.len(), self.training_sample_size)
            .into_iter()
            .map(|i| vectors[i].clone())
            .collect()
    }
}

impl std::fmt::Debug for CloneIndexer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloneIndexer")
            .field("index", &self.index)
            .field("batch_size", &self.batch_size)
            .field("training_sample_size", &self.training_sample_size)
            .field("parallel_threads", &self.parallel_threads)
            .finish_non_exhaustive()
    }
}
