//! Turning raw `(id, similarity)` hits into caller-facing clone records.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::CloneResult;
use crate::metadata::{MetadataStore, SnippetMetadata};
use crate::vector::{SELF_MATCH_SIMILARITY, VectorError, VectorId, clamp_similarity};

/// A detected clone of the query code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloneMatch {
    pub snippet_id: VectorId,
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub language: String,
    pub function_name: Option<String>,
    /// Cosine similarity to the query, within [0, 1]
    pub similarity: f32,
    pub code: String,
}

impl CloneMatch {
    fn from_metadata(metadata: SnippetMetadata, similarity: f32) -> Self {
        Self {
            snippet_id: metadata.id,
            file_path: metadata.file_path,
            start_line: metadata.start_line,
            end_line: metadata.end_line,
            language: metadata.language,
            function_name: metadata.function_name,
            similarity: clamp_similarity(similarity),
            code: metadata.code,
        }
    }
}

impl fmt::Display for CloneMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}-{} (similarity {:.3})",
            self.file_path, self.start_line, self.end_line, self.similarity
        )
    }
}

/// Joins index hits with their stored metadata.
#[derive(Clone)]
pub struct ResultHydrator {
    store: Arc<dyn MetadataStore>,
}

impl ResultHydrator {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    /// Builds clone records for parallel `ids` / `similarities` slices.
    ///
    /// IDs without metadata are logged and skipped. With `exclude_self`,
    /// hits at or above the self-match similarity are dropped. The result is
    /// ordered by similarity descending, then by ID.
    pub fn hydrate(
        &self,
        ids: &[VectorId],
        similarities: &[f32],
        exclude_self: bool,
    ) -> CloneResult<Vec<CloneMatch>> {
        if ids.len() != similarities.len() {
            return Err(VectorError::LengthMismatch {
                left_name: "ids",
                left: ids.len(),
                right_name: "similarities",
                right: similarities.len(),
            }
            .into());
        }
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut metadata = self.store.get_many(ids)?;

        let mut clones = Vec::with_capacity(ids.len());
        for (&id, &similarity) in ids.iter().zip(similarities) {
            let Some(record) = metadata.remove(&id) else {
                tracing::warn!(snippet_id = %id, "metadata not found for snippet; dropping hit");
                continue;
            };
            if exclude_self && similarity >= SELF_MATCH_SIMILARITY {
                continue;
            }
            clones.push(CloneMatch::from_metadata(record, similarity));
        }

        clones.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.snippet_id.cmp(&b.snippet_id))
        });
        Ok(clones)
    }
}

impl fmt::Debug for ResultHydrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultHydrator").finish_non_exhaustive()
    }
}
