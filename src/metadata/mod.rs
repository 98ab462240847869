//! Snippet metadata: the records behind each vector ID.
//!
//! The vector index only knows IDs and distances. Everything a caller wants
//! to see about a match (file, line range, language, source text) lives in a
//! [`MetadataStore`] keyed by the same [`VectorId`].

mod memory;
mod sqlite;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::vector::VectorId;

pub use memory::InMemoryMetadataStore;
pub use sqlite::SqliteMetadataStore;

/// A function-level code fragment as produced by a source parser.
///
/// Lines are 1-indexed and inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeSnippet {
    pub code: String,
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
}

impl CodeSnippet {
    /// Attaches the vector ID this snippet is stored under.
    #[must_use]
    pub fn with_id(self, id: VectorId) -> SnippetMetadata {
        SnippetMetadata {
            id,
            code: self.code,
            file_path: self.file_path,
            start_line: self.start_line,
            end_line: self.end_line,
            language: self.language,
            function_name: self.function_name,
        }
    }

    /// Whether `line` falls inside this snippet.
    #[must_use]
    pub fn contains_line(&self, line: u32) -> bool {
        self.start_line <= line && line <= self.end_line
    }
}

/// A stored snippet together with its vector ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnippetMetadata {
    pub id: VectorId,
    pub code: String,
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_name: Option<String>,
}

impl SnippetMetadata {
    /// Rejects records whose line range is inverted or starts at zero.
    pub fn validate(&self) -> MetadataResult<()> {
        if self.start_line == 0 || self.start_line > self.end_line {
            return Err(MetadataError::InvalidRange {
                id: self.id,
                start_line: self.start_line,
                end_line: self.end_line,
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn contains_line(&self, line: u32) -> bool {
        self.start_line <= line && line <= self.end_line
    }
}

/// Errors raised by metadata stores.
#[derive(Error, Debug)]
pub enum MetadataError {
    #[error("sqlite error: {0}\nSuggestion: Check that the metadata database is not locked or corrupted")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}\nSuggestion: Check that the metadata directory exists and is writable")]
    Io(#[from] std::io::Error),

    #[error(
        "Snippet {id} has an invalid line range {start_line}..={end_line}\nSuggestion: Lines are 1-indexed and start_line must not exceed end_line"
    )]
    InvalidRange {
        id: VectorId,
        start_line: u32,
        end_line: u32,
    },

    #[error("integer conversion overflow for field: {0}")]
    IntegerOverflow(&'static str),
}

/// Result type alias for metadata operations.
pub type MetadataResult<T> = Result<T, MetadataError>;

/// Persistent mapping from vector ID to snippet record.
pub trait MetadataStore: Send + Sync {
    /// Inserts or replaces one record.
    fn upsert_one(&self, snippet: &SnippetMetadata) -> MetadataResult<()>;

    /// Inserts or replaces a batch of records atomically.
    fn upsert_many(&self, snippets: &[SnippetMetadata]) -> MetadataResult<()>;

    fn get(&self, id: VectorId) -> MetadataResult<Option<SnippetMetadata>>;

    /// Looks up many IDs at once. Unknown IDs are simply absent.
    fn get_many(&self, ids: &[VectorId])
    -> MetadataResult<HashMap<VectorId, SnippetMetadata>>;

    /// The snippet of `file_path` whose range contains `line`.
    ///
    /// When ranges overlap the snippet with the lowest ID wins.
    fn find_by_location(
        &self,
        file_path: &str,
        line: u32,
    ) -> MetadataResult<Option<SnippetMetadata>>;

    fn count(&self) -> MetadataResult<usize>;

    /// Distinct languages, sorted.
    fn distinct_languages(&self) -> MetadataResult<Vec<String>>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snippet_with_id_and_range() {
        let snippet = CodeSnippet {
            code: "fn a() {}".to_string(),
            file_path: "src/a.rs".to_string(),
            start_line: 3,
            end_line: 5,
            language: "rust".to_string(),
            function_name: None,
        };
        assert!(snippet.contains_line(3));
        assert!(snippet.contains_line(5));
        assert!(!snippet.contains_line(6));

        let metadata = snippet.with_id(VectorId::new(8));
        assert_eq!(metadata.id.get(), 8);
        assert!(metadata.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_start() {
        let metadata = test_support::snippet(1, "x.py", 0, 4, "python");
        assert!(matches!(
            metadata.validate(),
            Err(MetadataError::InvalidRange { start_line: 0, .. })
        ));
    }
}
