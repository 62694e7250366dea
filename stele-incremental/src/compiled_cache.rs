//! Cross-run compiled content cache
//!
//! Persists each rep's per-snapshot content between runs. Textual
//! snapshots live inline in the store file; binary snapshots are copied
//! to blob files under a path derived from the rep reference digest,
//! and loading copies them back out to a staging area so no file is
//! ever aliased across store lifetimes.
//!
//! An entry is only trusted when its snapshot names *and* kinds exactly
//! match the rep's current snapshot defs. Any mismatch invalidates the
//! whole entry: partial reuse against a stale shape would be unsound.

use crate::content_store::CompiledContent;
use crate::store::{self, StoreError, StoreLocation};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use stele_types::{ItemRep, RepRef, SnapshotName};
use thiserror::Error;

const STORE_VERSION: u32 = 1;
const STORE_FILE: &str = "compiled_content.json";
const BLOBS_DIR: &str = "blobs";
const STAGE_DIR: &str = "stage";

/// Errors raised while moving cache content
#[derive(Debug, Error)]
pub enum CacheError {
    /// Filesystem failure while copying a blob
    #[error("failed to copy cached content {}: {source}", .path.display())]
    Blob {
        /// File being copied
        path: PathBuf,
        /// Underlying I/O error
        source: std::io::Error,
    },

    /// Store file could not be written
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
enum CachedSnapshot {
    Textual { name: SnapshotName, content: String },
    Binary { name: SnapshotName, blob: PathBuf },
}

impl CachedSnapshot {
    fn name(&self) -> &SnapshotName {
        match self {
            CachedSnapshot::Textual { name, .. } | CachedSnapshot::Binary { name, .. } => name,
        }
    }

    fn is_binary(&self) -> bool {
        matches!(self, CachedSnapshot::Binary { .. })
    }
}

type CacheData = Vec<(RepRef, Vec<CachedSnapshot>)>;

/// The persisted compiled-content cache
#[derive(Debug)]
pub struct CompiledContentCache {
    location: StoreLocation,
    entries: RwLock<HashMap<RepRef, Vec<CachedSnapshot>>>,
}

impl CompiledContentCache {
    /// Load the cache under `location`, clearing the staging area
    pub fn load(location: &StoreLocation) -> Self {
        let data: CacheData = store::load(&location.file(STORE_FILE), STORE_VERSION);
        let stage = location.dir(STAGE_DIR);
        if stage.exists() {
            if let Err(err) = fs::remove_dir_all(&stage) {
                tracing::warn!(path = %stage.display(), error = %err, "failed to clear cache staging area");
            }
        }
        Self {
            location: location.clone(),
            entries: RwLock::new(data.into_iter().collect()),
        }
    }

    /// Persist the cache index
    pub fn save(&self) -> Result<(), StoreError> {
        let mut data: CacheData = self
            .entries
            .read()
            .iter()
            .map(|(rep, snapshots)| (rep.clone(), snapshots.clone()))
            .collect();
        data.sort_by(|a, b| a.0.cmp(&b.0));
        store::save(&self.location.file(STORE_FILE), STORE_VERSION, &data)
    }

    fn rep_digest(rep: &RepRef) -> String {
        blake3::hash(rep.to_string().as_bytes()).to_hex().to_string()
    }

    fn blob_path(&self, rep: &RepRef, snapshot: &SnapshotName) -> PathBuf {
        self.location
            .dir(BLOBS_DIR)
            .join(Self::rep_digest(rep))
            .join(snapshot.as_str())
    }

    fn stage_path(&self, rep: &RepRef, snapshot: &SnapshotName) -> PathBuf {
        self.location
            .dir(STAGE_DIR)
            .join(format!("{}-{}", Self::rep_digest(rep), snapshot))
    }

    /// Whether a valid entry exists for the rep's current shape
    ///
    /// Valid means: the cached snapshot set and each snapshot's
    /// binary/textual kind exactly match the rep's `snapshot_defs`.
    pub fn full_cache_available(&self, rep: &ItemRep) -> bool {
        let entries = self.entries.read();
        let Some(snapshots) = entries.get(&rep.reference()) else {
            return false;
        };

        let cached: BTreeSet<(&SnapshotName, bool)> = snapshots
            .iter()
            .map(|s| (s.name(), s.is_binary()))
            .collect();
        let defs = rep.snapshot_defs();
        let wanted: BTreeSet<(&SnapshotName, bool)> =
            defs.iter().map(|d| (&d.name, d.binary)).collect();

        !wanted.is_empty() && cached == wanted
    }

    /// Load a rep's cached snapshot map, copying binary blobs out
    ///
    /// Returns `None` when the entry is unusable (absent, or a blob
    /// file has gone missing); a missing blob invalidates the whole
    /// entry rather than producing a partial result.
    pub fn get_all(&self, rep: &RepRef) -> Option<BTreeMap<SnapshotName, CompiledContent>> {
        let entries = self.entries.read();
        let snapshots = entries.get(rep)?;

        let mut out = BTreeMap::new();
        for snapshot in snapshots {
            match snapshot {
                CachedSnapshot::Textual { name, content } => {
                    out.insert(name.clone(), CompiledContent::Textual(content.clone()));
                }
                CachedSnapshot::Binary { name, blob } => {
                    let staged = self.stage_path(rep, name);
                    if let Some(parent) = staged.parent() {
                        if fs::create_dir_all(parent).is_err() {
                            return None;
                        }
                    }
                    if let Err(err) = fs::copy(blob, &staged) {
                        tracing::warn!(
                            rep = %rep,
                            path = %blob.display(),
                            error = %err,
                            "cached blob unusable; invalidating entry"
                        );
                        return None;
                    }
                    out.insert(name.clone(), CompiledContent::Binary(staged));
                }
            }
        }
        Some(out)
    }

    /// Record a rep's full snapshot map, copying binary content in
    pub fn store(
        &self,
        rep: &RepRef,
        contents: &BTreeMap<SnapshotName, CompiledContent>,
    ) -> Result<(), CacheError> {
        let mut snapshots = Vec::with_capacity(contents.len());
        for (name, content) in contents {
            match content {
                CompiledContent::Textual(string) => {
                    snapshots.push(CachedSnapshot::Textual {
                        name: name.clone(),
                        content: string.clone(),
                    });
                }
                CompiledContent::Binary(path) => {
                    let blob = self.blob_path(rep, name);
                    if let Some(parent) = blob.parent() {
                        fs::create_dir_all(parent).map_err(|source| CacheError::Blob {
                            path: blob.clone(),
                            source,
                        })?;
                    }
                    fs::copy(path, &blob).map_err(|source| CacheError::Blob {
                        path: path.clone(),
                        source,
                    })?;
                    snapshots.push(CachedSnapshot::Binary {
                        name: name.clone(),
                        blob,
                    });
                }
            }
        }
        self.entries.write().insert(rep.clone(), snapshots);
        Ok(())
    }

    /// Drop entries (and their blobs) for reps not in `known`
    pub fn prune(&self, known: &HashSet<RepRef>) {
        let mut entries = self.entries.write();
        let stale: Vec<RepRef> = entries
            .keys()
            .filter(|rep| !known.contains(*rep))
            .cloned()
            .collect();
        for rep in stale {
            entries.remove(&rep);
            let blob_dir = self.location.dir(BLOBS_DIR).join(Self::rep_digest(&rep));
            if blob_dir.exists() {
                if let Err(err) = fs::remove_dir_all(&blob_dir) {
                    tracing::warn!(rep = %rep, error = %err, "failed to remove pruned cache blobs");
                }
            }
        }
    }

    /// Number of cached reps
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache has no entries
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
