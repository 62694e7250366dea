//! In-run compiled content store
//!
//! Holds, per `(rep, snapshot)`, the content produced so far this run.
//! This store is also the synchronization point for suspension: a
//! reader that finds a key absent subscribes itself as a waiter, and
//! the eventual `set` drains the waiter list under the same lock, so
//! publication and wake-up are atomic with respect to reads: no reader
//! can observe a half-published value or miss its wake-up.

use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use stele_types::{RepRef, SnapshotName};
use thiserror::Error;

/// Compiled content of one snapshot
///
/// Binary content points at a file owned by whichever store currently
/// holds it; moving content between the in-run store and the cross-run
/// cache copies the file, never aliases it across store lifetimes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompiledContent {
    /// Textual result
    Textual(String),
    /// Path to the file holding a binary result
    Binary(PathBuf),
}

impl CompiledContent {
    /// Whether this content is binary
    pub fn is_binary(&self) -> bool {
        matches!(self, CompiledContent::Binary(_))
    }

    /// The textual string, if any
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CompiledContent::Textual(s) => Some(s),
            CompiledContent::Binary(_) => None,
        }
    }
}

/// Errors raised by the in-run store
#[derive(Debug, Error)]
pub enum ContentStoreError {
    /// Two writers attempted to publish the same key
    ///
    /// At most one writer may publish a given `(rep, snapshot)` per
    /// run; a second set is a logic error, not silently accepted.
    #[error("snapshot {snapshot} of {rep} was published twice")]
    DoublePublish {
        /// The rep being published
        rep: RepRef,
        /// The snapshot name
        snapshot: SnapshotName,
    },
}

#[derive(Debug, Default)]
struct Inner {
    contents: HashMap<RepRef, BTreeMap<SnapshotName, CompiledContent>>,
    waiters: HashMap<(RepRef, SnapshotName), Vec<RepRef>>,
}

/// Per-run published snapshot content
#[derive(Debug, Default)]
pub struct CompiledContentStore {
    inner: Mutex<Inner>,
}

impl CompiledContentStore {
    /// An empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Published content for `(rep, snapshot)`, if any
    pub fn get(&self, rep: &RepRef, snapshot: &SnapshotName) -> Option<CompiledContent> {
        self.inner
            .lock()
            .contents
            .get(rep)
            .and_then(|snapshots| snapshots.get(snapshot))
            .cloned()
    }

    /// Content if published; otherwise register `waiter` for wake-up
    ///
    /// Subscribe-or-read is atomic: a concurrent `set` either happens
    /// before (the content is returned) or after (the waiter is in the
    /// list that `set` drains).
    pub fn get_or_subscribe(
        &self,
        rep: &RepRef,
        snapshot: &SnapshotName,
        waiter: RepRef,
    ) -> Option<CompiledContent> {
        let mut inner = self.inner.lock();
        if let Some(content) = inner
            .contents
            .get(rep)
            .and_then(|snapshots| snapshots.get(snapshot))
        {
            return Some(content.clone());
        }
        let key = (rep.clone(), snapshot.clone());
        let waiters = inner.waiters.entry(key).or_default();
        if !waiters.contains(&waiter) {
            waiters.push(waiter);
        }
        None
    }

    /// Publish content; returns the waiters released by it
    pub fn set(
        &self,
        rep: &RepRef,
        snapshot: &SnapshotName,
        content: CompiledContent,
    ) -> Result<Vec<RepRef>, ContentStoreError> {
        let mut inner = self.inner.lock();
        let snapshots = inner.contents.entry(rep.clone()).or_default();
        if snapshots.contains_key(snapshot) {
            return Err(ContentStoreError::DoublePublish {
                rep: rep.clone(),
                snapshot: snapshot.clone(),
            });
        }
        snapshots.insert(snapshot.clone(), content);

        let released = inner
            .waiters
            .remove(&(rep.clone(), snapshot.clone()))
            .unwrap_or_default();
        Ok(released)
    }

    /// All published snapshots of `rep`
    pub fn get_all(&self, rep: &RepRef) -> BTreeMap<SnapshotName, CompiledContent> {
        self.inner
            .lock()
            .contents
            .get(rep)
            .cloned()
            .unwrap_or_default()
    }

    /// Publish a whole snapshot map at once (cache load)
    ///
    /// Each key obeys the same single-writer rule as [`set`], and the
    /// combined released-waiter list is returned.
    ///
    /// [`set`]: CompiledContentStore::set
    pub fn set_all(
        &self,
        rep: &RepRef,
        contents: BTreeMap<SnapshotName, CompiledContent>,
    ) -> Result<Vec<RepRef>, ContentStoreError> {
        let mut released = Vec::new();
        for (snapshot, content) in contents {
            released.extend(self.set(rep, &snapshot, content)?);
        }
        Ok(released)
    }

    /// Whether `(rep, snapshot)` has been published
    pub fn contains(&self, rep: &RepRef, snapshot: &SnapshotName) -> bool {
        self.inner
            .lock()
            .contents
            .get(rep)
            .is_some_and(|snapshots| snapshots.contains_key(snapshot))
    }
}
