//! Content-addressed storage for clipboard images
//!
//! Images live as PNG files under `images/<sha256>.png`; the database only
//! stores the key. Writes go through a temp file and a rename so a valid key
//! never points at a truncated file.

use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum BlobError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid blob key: {0}")]
    InvalidKey(String),
    #[error("Blob not found: {0}")]
    NotFound(String),
}

pub type BlobResult<T> = Result<T, BlobError>;

const BLOB_EXTENSION: &str = "png";

/// Compute the key for a blob: lowercase SHA-256 hex of its bytes
pub fn compute_blob_key(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Keys are exactly 64 lowercase hex characters
pub fn is_valid_key(key: &str) -> bool {
    key.len() == 64 && key.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

pub struct BlobStore {
    dir: PathBuf,
}

impl BlobStore {
    /// Open the blob directory, creating it if needed
    pub fn new<P: AsRef<Path>>(dir: P) -> BlobResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path for a key (validated)
    pub fn path_for(&self, key: &str) -> BlobResult<PathBuf> {
        if !is_valid_key(key) {
            return Err(BlobError::InvalidKey(key.to_string()));
        }
        Ok(self.dir.join(format!("{}.{}", key, BLOB_EXTENSION)))
    }

    /// Store bytes and return their key. Storing the same bytes twice is a no-op.
    pub fn put(&self, bytes: &[u8]) -> BlobResult<String> {
        let key = compute_blob_key(bytes);
        let path = self.path_for(&key)?;

        if path.exists() {
            debug!(key = %key, "Blob already exists, skipping write");
            return Ok(key);
        }

        let tmp_path = self.dir.join(format!(".{}.{}.tmp", key, uuid::Uuid::new_v4().simple()));
        let write_result = (|| -> std::io::Result<()> {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            fs::rename(&tmp_path, &path)
        })();

        if let Err(e) = write_result {
            let _ = fs::remove_file(&tmp_path);
            return Err(e.into());
        }

        debug!(key = %key, size = bytes.len(), "Stored new blob");
        Ok(key)
    }

    pub fn get(&self, key: &str) -> BlobResult<Vec<u8>> {
        let path = self.path_for(key)?;
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BlobError::NotFound(key.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.path_for(key).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Remove a blob. Returns whether a file was removed; a missing file is not an error.
    pub fn delete(&self, key: &str) -> BlobResult<bool> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(key = %key, "Deleted blob file");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete every blob file whose key is not in `valid_keys`, plus stale temp files.
    /// Returns the number of files removed.
    pub fn retain(&self, valid_keys: &HashSet<String>) -> BlobResult<usize> {
        let mut deleted = 0;

        for dir_entry in fs::read_dir(&self.dir)?.flatten() {
            let path = dir_entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            let orphaned = if name.starts_with('.') && name.ends_with(".tmp") {
                true
            } else if path.extension().is_some_and(|ext| ext == BLOB_EXTENSION) {
                path.file_stem()
                    .and_then(|s| s.to_str())
                    .is_some_and(|stem| !valid_keys.contains(stem))
            } else {
                false
            };

            if !orphaned {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => deleted += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove orphaned blob"),
            }
        }

        if deleted > 0 {
            debug!(deleted, "Garbage collected orphaned blobs");
        }
        Ok(deleted)
    }
}
