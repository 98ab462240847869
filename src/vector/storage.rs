//! Single-file persistence for a [`crate::vector::VectorIndex`].
//!
//! # Storage Format
//!
//! - Header (16 bytes): magic `CCLX`, format version (u32 LE), payload length (u64 LE)
//! - Payload: `bincode` (standard config) encoding of [`IndexArtifact`]
//!
//! Decoding is bounded by [`MAX_ARTIFACT_BYTES`], so a corrupted length
//! prefix fails with an error instead of a huge allocation.
//!
//! Loading memory-maps the file and decodes the payload straight from the
//! mapping. Saving writes a temporary file in the target directory and
//! renames it over the destination, so readers never observe a partial file.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use memmap2::MmapOptions;
use tempfile::NamedTempFile;

use crate::vector::backend::Backend;
use crate::vector::index::IndexConfiguration;
use crate::vector::types::{IndexState, VectorError, VectorId, VectorResult};

/// Current artifact format version.
pub const STORAGE_VERSION: u32 = 1;

/// Magic bytes identifying clone index artifacts.
pub const MAGIC_BYTES: &[u8; 4] = b"CCLX";

/// Size of the artifact header in bytes.
pub const HEADER_SIZE: usize = 16;

/// Upper bound on the memory a decoded artifact may claim (16 GiB).
pub const MAX_ARTIFACT_BYTES: usize = 1 << 34;

fn decode_config() -> impl bincode::config::Config {
    bincode::config::standard().with_limit::<MAX_ARTIFACT_BYTES>()
}

/// Everything needed to answer queries without retraining.
#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct IndexArtifact {
    pub config: IndexConfiguration,
    pub state: IndexState,
    pub backend: Backend,
    pub next_id: i64,
    pub zero_ids: BTreeSet<VectorId>,
}

impl IndexArtifact {
    fn check_consistency(&self) -> Result<(), String> {
        let backend = self.backend.as_backend();
        backend.check_consistency()?;
        if backend.kind() != self.config.kind || backend.dimension() != self.config.dimension {
            return Err("backend does not match the stored configuration".to_string());
        }

        let ids = backend.ids();
        if ids.iter().any(|id| id.get() >= self.next_id) {
            return Err(format!("stored id at or above next id {}", self.next_id));
        }
        if self.zero_ids.iter().any(|&id| !backend.contains(id)) {
            return Err("zero-vector id is not stored in the backend".to_string());
        }
        Ok(())
    }
}

/// Atomically writes an artifact to `path`, creating parent directories.
///
/// Returns the number of bytes written.
pub fn write_artifact(path: &Path, artifact: &IndexArtifact) -> VectorResult<u64> {
    let payload = bincode::encode_to_vec(artifact, bincode::config::standard())
        .map_err(|e| VectorError::Serialization(e.to_string()))?;

    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut temp_file = NamedTempFile::new_in(parent)?;
    temp_file.write_all(MAGIC_BYTES)?;
    temp_file.write_all(&STORAGE_VERSION.to_le_bytes())?;
    temp_file.write_all(&(payload.len() as u64).to_le_bytes())?;
    temp_file.write_all(&payload)?;
    temp_file.flush()?;
    temp_file.as_file().sync_all()?;

    temp_file.persist(path).map_err(|e| e.error)?;

    Ok((HEADER_SIZE + payload.len()) as u64)
}

/// Reads and validates an artifact previously written by [`write_artifact`].
pub fn read_artifact(path: &Path) -> VectorResult<IndexArtifact> {
    let corrupt = |reason: &str| VectorError::CorruptArtifact {
        path: path.display().to_string(),
        reason: reason.to_string(),
    };

    let file = File::open(path)?;
    let file_len = file.metadata()?.len();
    if file_len < HEADER_SIZE as u64 {
        return Err(corrupt("file too small to contain header"));
    }

    // SAFETY: the mapping is read-only and dropped before this function
    // returns; artifacts are replaced by rename, never rewritten in place.
    let mmap = unsafe { MmapOptions::new().map(&file)? };

    if &mmap[0..4] != MAGIC_BYTES {
        return Err(corrupt("invalid magic bytes"));
    }

    let version = u32::from_le_bytes([mmap[4], mmap[5], mmap[6], mmap[7]]);
    if version != STORAGE_VERSION {
        return Err(VectorError::VersionMismatch {
            expected: STORAGE_VERSION,
            actual: version,
        });
    }

    let mut length_bytes = [0u8; 8];
    length_bytes.copy_from_slice(&mmap[8..16]);
    let payload_len = u64::from_le_bytes(length_bytes);
    if payload_len != (mmap.len() - HEADER_SIZE) as u64 {
        return Err(corrupt("payload length does not match file size"));
    }
    if payload_len > MAX_ARTIFACT_BYTES as u64 {
        return Err(corrupt("payload exceeds the maximum artifact size"));
    }

    let (artifact, consumed): (IndexArtifact, usize) =
        bincode::decode_from_slice(&mmap[HEADER_SIZE..], decode_config())
            .map_err(|e| corrupt(&e.to_string()))?;
    if consumed != mmap.len() - HEADER_SIZE {
        return Err(corrupt("trailing bytes after payload"));
    }

    artifact
        .check_consistency()
        .map_err(|reason| corrupt(&reason))?;
    Ok(artifact)
}

/// Size of an artifact on disk, if it exists.
pub fn artifact_size(path: &Path) -> io::Result<u64> {
    Ok(std::fs::metadata(path)?.len())
}
