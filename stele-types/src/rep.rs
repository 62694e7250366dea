//! Item reps and snapshot declarations
//!
//! A rep is one named compilation variant of an item. Its shape (which
//! snapshots exist, which output paths they map to) is fixed while reps
//! are built, before compilation starts; the `compiled` flag flips to
//! true exactly once per run, after the rep's action sequence finishes
//! without unresolved suspensions.

use crate::document::Item;
use crate::reference::RepRef;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

/// Name of a snapshot checkpoint (`last`, `pre`, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotName(String);

impl SnapshotName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The conventional final snapshot
    pub fn last() -> Self {
        Self("last".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SnapshotName {
    fn from(name: &str) -> Self {
        SnapshotName::new(name)
    }
}

/// Declares that a named snapshot of a rep exists and its content kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotDef {
    pub name: SnapshotName,
    pub binary: bool,
}

impl SnapshotDef {
    pub fn new(name: impl Into<SnapshotName>, binary: bool) -> Self {
        Self {
            name: name.into(),
            binary,
        }
    }
}

/// The mutable shape of a rep, fixed during rep building
#[derive(Debug, Default, Clone)]
pub struct RepShape {
    /// Ordered snapshot declarations
    pub snapshot_defs: Vec<SnapshotDef>,
    /// Output paths per snapshot, as supplied by the action plan
    pub raw_paths: BTreeMap<SnapshotName, Vec<PathBuf>>,
    /// Output paths per snapshot, resolved against the output directory
    pub paths: BTreeMap<SnapshotName, Vec<PathBuf>>,
}

/// One named compilation variant of an item
#[derive(Debug)]
pub struct ItemRep {
    item: Item,
    name: String,
    compiled: AtomicBool,
    shape: RwLock<RepShape>,
}

impl ItemRep {
    pub fn new(item: Item, name: impl Into<String>) -> Self {
        Self {
            item,
            name: name.into(),
            compiled: AtomicBool::new(false),
            shape: RwLock::new(RepShape::default()),
        }
    }

    pub fn item(&self) -> &Item {
        &self.item
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reference(&self) -> RepRef {
        RepRef::new(self.item.identifier().clone(), self.name.clone())
    }

    /// Whether the rep's source item is binary
    pub fn binary(&self) -> bool {
        self.item.content().is_binary()
    }

    pub fn compiled(&self) -> bool {
        self.compiled.load(Ordering::Acquire)
    }

    /// Flip the compiled flag; returns false if it was already set
    ///
    /// The flag flips at most once per run; callers treat a second flip
    /// as an internal inconsistency.
    pub fn mark_compiled(&self) -> bool {
        !self.compiled.swap(true, Ordering::AcqRel)
    }

    pub fn snapshot_defs(&self) -> Vec<SnapshotDef> {
        self.shape.read().snapshot_defs.clone()
    }

    pub fn snapshot_def(&self, name: &SnapshotName) -> Option<SnapshotDef> {
        self.shape
            .read()
            .snapshot_defs
            .iter()
            .find(|def| &def.name == name)
            .cloned()
    }

    pub fn has_snapshot(&self, name: &SnapshotName) -> bool {
        self.snapshot_def(name).is_some()
    }

    /// Output paths for a snapshot (resolved)
    pub fn paths_for(&self, snapshot: &SnapshotName) -> Vec<PathBuf> {
        self.shape
            .read()
            .paths
            .get(snapshot)
            .cloned()
            .unwrap_or_default()
    }

    /// All resolved output paths across snapshots
    pub fn all_paths(&self) -> Vec<PathBuf> {
        let shape = self.shape.read();
        shape.paths.values().flatten().cloned().collect()
    }

    pub fn set_shape(&self, shape: RepShape) {
        *self.shape.write() = shape;
    }

    pub fn with_shape<R>(&self, f: impl FnOnce(&RepShape) -> R) -> R {
        f(&self.shape.read())
    }
}

impl fmt::Display for ItemRep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.reference())
    }
}
