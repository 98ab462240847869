//! SQLite-backed metadata store.

use std::collections::HashMap;
use std::path::Path;

use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, params, params_from_iter};

use super::{MetadataError, MetadataResult, MetadataStore, SnippetMetadata};
use crate::vector::VectorId;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS snippets (
    id INTEGER PRIMARY KEY,
    code TEXT NOT NULL,
    file_path TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    language TEXT NOT NULL,
    function_name TEXT
);
CREATE INDEX IF NOT EXISTS idx_file_path ON snippets(file_path);
CREATE INDEX IF NOT EXISTS idx_language ON snippets(language);
";

const SELECT_COLUMNS: &str =
    "SELECT id, code, file_path, start_line, end_line, language, function_name FROM snippets";

const UPSERT_SQL: &str = "INSERT OR REPLACE INTO snippets
    (id, code, file_path, start_line, end_line, language, function_name)
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)";

/// Bound parameters per `IN (...)` lookup; stays under SQLite's variable limit.
const LOOKUP_CHUNK: usize = 500;

/// Metadata store persisted in a single SQLite file.
pub struct SqliteMetadataStore {
    conn: Mutex<Connection>,
}

impl SqliteMetadataStore {
    /// Open or create the store at the provided sqlite path.
    pub fn open(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        tracing::debug!(path = %path.display(), "opened metadata database");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// A private store that lives only as long as this value.
    pub fn open_in_memory() -> MetadataResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

fn upsert(conn: &Connection, snippet: &SnippetMetadata) -> MetadataResult<()> {
    conn.execute(
        UPSERT_SQL,
        params![
            snippet.id.get(),
            snippet.code,
            snippet.file_path,
            i64::from(snippet.start_line),
            i64::from(snippet.end_line),
            snippet.language,
            snippet.function_name,
        ],
    )?;
    Ok(())
}

fn decode_snippet_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<SnippetMetadata> {
    let start_line: i64 = row.get(3)?;
    let end_line: i64 = row.get(4)?;
    Ok(SnippetMetadata {
        id: VectorId::new(row.get(0)?),
        code: row.get(1)?,
        file_path: row.get(2)?,
        start_line: u32::try_from(start_line)
            .map_err(|_| rusqlite::Error::IntegralValueOutOfRange(3, start_line))?,
        end_line: u32::try_from(end_line)
            .map_err(|_| rusqlite::Error::IntegralValueOutOfRange(4, end_line))?,
        language: row.get(5)?,
        function_name: row.get(6)?,
    })
}

impl MetadataStore for SqliteMetadataStore {
    fn upsert_one(&self, snippet: &SnippetMetadata) -> MetadataResult<()> {
        snippet.validate()?;
        upsert(&self.conn.lock(), snippet)
    }

    fn upsert_many(&self, snippets: &[SnippetMetadata]) -> MetadataResult<()> {
        snippets.iter().try_for_each(SnippetMetadata::validate)?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(UPSERT_SQL)?;
            for snippet in snippets {
                stmt.execute(params![
                    snippet.id.get(),
                    snippet.code,
                    snippet.file_path,
                    i64::from(snippet.start_line),
                    i64::from(snippet.end_line),
                    snippet.language,
                    snippet.function_name,
                ])?;
            }
        }
        tx.commit()?;
        tracing::debug!(count = snippets.len(), "upserted snippet metadata");
        Ok(())
    }

    fn get(&self, id: VectorId) -> MetadataResult<Option<SnippetMetadata>> {
        self.conn
            .lock()
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                params![id.get()],
                decode_snippet_row,
            )
            .optional()
            .map_err(MetadataError::from)
    }

    fn get_many(&self, ids: &[VectorId]) -> MetadataResult<HashMap<VectorId, SnippetMetadata>> {
        let mut found = HashMap::with_capacity(ids.len());
        if ids.is_empty() {
            return Ok(found);
        }

        let conn = self.conn.lock();
        for chunk in ids.chunks(LOOKUP_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(",");
            let mut stmt =
                conn.prepare(&format!("{SELECT_COLUMNS} WHERE id IN ({placeholders})"))?;
            let rows = stmt.query_map(
                params_from_iter(chunk.iter().map(VectorId::get)),
                decode_snippet_row,
            )?;
            for row in rows {
                let snippet = row?;
                found.insert(snippet.id, snippet);
            }
        }
        Ok(found)
    }

    fn find_by_location(
        &self,
        file_path: &str,
        line: u32,
    ) -> MetadataResult<Option<SnippetMetadata>> {
        self.conn
            .lock()
            .query_row(
                &format!(
                    "{SELECT_COLUMNS} WHERE file_path = ?1 AND start_line <= ?2 \
                     AND end_line >= ?2 ORDER BY id ASC LIMIT 1"
                ),
                params![file_path, i64::from(line)],
                decode_snippet_row,
            )
            .optional()
            .map_err(MetadataError::from)
    }

    fn count(&self) -> MetadataResult<usize> {
        let count: i64 = self
            .conn
            .lock()
            .query_row("SELECT COUNT(*) FROM snippets", [], |row| row.get(0))?;
        usize::try_from(count).map_err(|_| MetadataError::IntegerOverflow("snippet count"))
    }

    fn distinct_languages(&self) -> MetadataResult<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt =
            conn.prepare("SELECT DISTINCT language FROM snippets ORDER BY language ASC")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        rows.collect::<Result<Vec<_>, _>>().map_err(MetadataError::from)
    }
}

impl std::fmt::Debug for SqliteMetadataStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteMetadataStore").finish_non_exhaustive()
    }
}
