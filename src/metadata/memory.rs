use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use dashmap::DashMap;

use super::{MetadataResult, MetadataStore, SnippetMetadata};
use crate::vector::VectorId;

/// Metadata store kept entirely in memory.
///
/// Useful for tests and for short-lived indexes that never touch disk.
#[derive(Clone, Debug, Default)]
pub struct InMemoryMetadataStore {
    snippets: Arc<DashMap<VectorId, SnippetMetadata>>,
    by_file: Arc<DashMap<String, Vec<VectorId>>>,
}

impl InMemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&self, snippet: SnippetMetadata) {
        let id = snippet.id;
        let file_path = snippet.file_path.clone();

        if let Some(previous) = self.snippets.insert(id, snippet) {
            if let Some(mut ids) = self.by_file.get_mut(&previous.file_path) {
                ids.retain(|&existing| existing != id);
            }
        }
        self.by_file.entry(file_path).or_default().push(id);
    }
}

impl MetadataStore for InMemoryMetadataStore {
    fn upsert_one(&self, snippet: &SnippetMetadata) -> MetadataResult<()> {
        snippet.validate()?;
        self.insert(snippet.clone());
        Ok(())
    }

    fn upsert_many(&self, snippets: &[SnippetMetadata]) -> MetadataResult<()> {
        snippets.iter().try_for_each(SnippetMetadata::validate)?;
        for snippet in snippets {
            self.insert(snippet.clone());
        }
        Ok(())
    }

    fn get(&self, id: VectorId) -> MetadataResult<Option<SnippetMetadata>> {
        Ok(self.snippets.get(&id).map(|entry| entry.clone()))
    }

    fn get_many(&self, ids: &[VectorId]) -> MetadataResult<HashMap<VectorId, SnippetMetadata>> {
        Ok(ids
            .iter()
            .filter_map(|id| self.snippets.get(id).map(|entry| (*id, entry.clone())))
            .collect())
    }

    fn find_by_location(
        &self,
        file_path: &str,
        line: u32,
    ) -> MetadataResult<Option<SnippetMetadata>> {
        let Some(ids) = self.by_file.get(file_path).map(|ids| ids.clone()) else {
            return Ok(None);
        };
        Ok(ids
            .into_iter()
            .filter_map(|id| self.snippets.get(&id).map(|entry| entry.clone()))
            // The file index may briefly lag a concurrent move
            .filter(|snippet| snippet.file_path == file_path && snippet.contains_line(line))
            .min_by_key(|snippet| snippet.id))
    }

    fn count(&self) -> MetadataResult<usize> {
        Ok(self.snippets.len())
    }

    fn distinct_languages(&self) -> MetadataResult<Vec<String>> {
        let languages: BTreeSet<String> = self
            .snippets
            .iter()
            .map(|entry| entry.language.clone())
            .collect();
        Ok(languages.into_iter().collect())
    }
}
