//! Content-addressed blob store under `<repo>/data`.
//!
//! Blobs live at `data/<algo>/<hash>` and are immutable once written; a
//! second put of the same digest is a no-op. Writes go through a temp file
//! and a rename so a crash never leaves a half-written blob at its final
//! path.

use crate::error::EfsError;
use crate::uri::ContentUri;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn open(root: &Path) -> Result<Self, EfsError> {
        fs::create_dir_all(root)?;
        Ok(Self { root: root.to_path_buf() })
    }

    pub fn path_for(&self, uri: &ContentUri) -> PathBuf {
        self.root.join(&uri.algo).join(&uri.hash)
    }

    pub fn contains(&self, uri: &ContentUri) -> bool {
        self.path_for(uri).is_file()
    }

    /// Store `bytes` under `uri`. Returns `false` when the blob was already
    /// present (the store is append-only; existing content is never touched).
    pub fn put(&self, uri: &ContentUri, bytes: &[u8]) -> Result<bool, EfsError> {
        let path = self.path_for(uri);
        if path.is_file() {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        // The temp name must be unique per call, not per digest: concurrent
        // puts of the same URI (two pull writers, or a pull racing a local
        // add) would otherwise truncate each other's in-flight write before
        // the rename.
        let tmp_dir = self.root.join("tmp");
        fs::create_dir_all(&tmp_dir)?;
        let mut tmp = NamedTempFile::new_in(&tmp_dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&path).map_err(|e| EfsError::Io(e.error))?;
        Ok(true)
    }

    pub fn get(&self, uri: &ContentUri) -> Result<Option<Vec<u8>>, EfsError> {
        match fs::read(self.path_for(uri)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Canonical content address of a byte string.
pub fn sha256_uri(bytes: &[u8]) -> ContentUri {
    let digest = Sha256::digest(bytes);
    ContentUri {
        algo: "sha256".to_string(),
        hash: hex::encode(digest),
    }
}
