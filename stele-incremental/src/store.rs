//! Versioned store persistence
//!
//! Every persisted store is a JSON envelope `{ version, data }` under a
//! store root scoped to one output location. Loading tolerates every
//! kind of damage the same way: missing file, version mismatch, or
//! unparseable body all degrade to cold (default) data. Saving writes a
//! temp file and renames it into place so a crashed run never leaves a
//! half-written store behind.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while saving a store
///
/// Loading never errors; damaged state degrades to a cold store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure while writing
    #[error("failed to write store {}: {source}", .path.display())]
    Write {
        /// Store file being written
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Serialization failure
    #[error("failed to serialize store {}: {source}", .path.display())]
    Serialize {
        /// Store file being written
        path: PathBuf,
        /// Underlying serde error
        source: serde_json::Error,
    },
}

#[derive(Serialize, Deserialize)]
struct Envelope<T> {
    version: u32,
    data: T,
}

/// The directory a run's stores live under
///
/// Scoped per output location (`<output_dir>/.stele`), so switching
/// output directories cold-starts every store instead of
/// cross-contaminating caches.
#[derive(Debug, Clone)]
pub struct StoreLocation {
    root: PathBuf,
}

impl StoreLocation {
    /// Store root for the given output directory
    pub fn for_output_dir(output_dir: impl AsRef<Path>) -> Self {
        Self {
            root: output_dir.as_ref().join(".stele"),
        }
    }

    /// Use `root` directly as the store root
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a named store file
    pub fn file(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// Path of a named store subdirectory
    pub fn dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

/// Load a store's data, degrading to `T::default()` on any damage
pub fn load<T: DeserializeOwned + Default>(path: &Path, version: u32) -> T {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(_) => return T::default(),
    };

    match serde_json::from_slice::<Envelope<T>>(&bytes) {
        Ok(envelope) if envelope.version == version => envelope.data,
        Ok(envelope) => {
            tracing::warn!(
                path = %path.display(),
                found = envelope.version,
                expected = version,
                "discarding store written by incompatible version"
            );
            T::default()
        }
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "discarding unreadable store");
            T::default()
        }
    }
}

/// Save a store's data atomically (temp file + rename)
pub fn save<T: Serialize>(path: &Path, version: u32, data: &T) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| StoreError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    }

    let envelope = Envelope { version, data };
    let bytes = serde_json::to_vec(&envelope).map_err(|source| StoreError::Serialize {
        path: path.to_path_buf(),
        source,
    })?;

    let tmp = path.with_extension("tmp");
    fs::write(&tmp, &bytes).map_err(|source| StoreError::Write {
        path: tmp.clone(),
        source,
    })?;
    fs::rename(&tmp, path).map_err(|source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    })
}
