//! Persisted action-plan digests
//!
//! Outdatedness rule "plan changed" compares the action sequence a rep
//! (or layout) was compiled with on the previous run against the one
//! the provider supplies now. Only the digest is persisted; the plan
//! itself is opaque input.

use crate::checksum::Checksummer;
use crate::store::{self, StoreError, StoreLocation};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use stele_types::{ActionSequence, Checksum, Identifier, RepRef};

const STORE_VERSION: u32 = 1;
const STORE_FILE: &str = "action_plans.json";

/// What a plan digest is keyed by
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PlanKey {
    /// An item rep's plan
    Rep(RepRef),
    /// A layout's plan
    Layout(Identifier),
}

/// Previous-run plan digests plus this run's recordings
#[derive(Debug, Default)]
pub struct ActionSequenceStore {
    previous: HashMap<PlanKey, Checksum>,
    current: DashMap<PlanKey, Checksum>,
}

impl ActionSequenceStore {
    /// An empty store (no previous run)
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the previous run's digests from `location`
    pub fn load(location: &StoreLocation) -> Self {
        let data: Vec<(PlanKey, Checksum)> = store::load(&location.file(STORE_FILE), STORE_VERSION);
        Self {
            previous: data.into_iter().collect(),
            current: DashMap::new(),
        }
    }

    /// Persist this run's digests to `location`
    pub fn save(&self, location: &StoreLocation) -> Result<(), StoreError> {
        let mut data: Vec<(PlanKey, Checksum)> = self
            .current
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        data.sort_by(|a, b| a.0.cmp(&b.0));
        store::save(&location.file(STORE_FILE), STORE_VERSION, &data)
    }

    /// Digest of an action sequence
    pub fn digest(sequence: &ActionSequence) -> Checksum {
        let bytes = serde_json::to_vec(sequence).unwrap_or_default();
        Checksummer::digest_bytes(&bytes)
    }

    /// Record the plan a subject is being compiled with this run
    pub fn record(&self, key: PlanKey, sequence: &ActionSequence) {
        self.current.insert(key, Self::digest(sequence));
    }

    /// Whether the subject's plan differs from the one recorded at the
    /// end of the previous run
    ///
    /// A subject with no recorded plan is changed (it is new).
    pub fn plan_changed(&self, key: &PlanKey, sequence: &ActionSequence) -> bool {
        match self.previous.get(key) {
            Some(previous) => *previous != Self::digest(sequence),
            None => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stele_types::ProcessingAction;

    fn plan(filter: &str) -> ActionSequence {
        ActionSequence::new(vec![
            ProcessingAction::filter(filter, Default::default()),
            ProcessingAction::snapshot(["last"]),
        ])
    }

    #[test]
    fn test_new_subject_counts_as_changed() {
        let plans = ActionSequenceStore::new();
        let key = PlanKey::Rep(RepRef::new("/a.md", "default"));
        assert!(plans.plan_changed(&key, &plan("erb")));
    }

    #[test]
    fn test_plan_change_detection_across_runs() {
        let dir = tempfile::tempdir().unwrap();
        let location = StoreLocation::at(dir.path());
        let key = PlanKey::Rep(RepRef::new("/a.md", "default"));

        let first = ActionSequenceStore::new();
        first.record(key.clone(), &plan("erb"));
        first.save(&location).unwrap();

        let second = ActionSequenceStore::load(&location);
        assert!(!second.plan_changed(&key, &plan("erb")));
        assert!(second.plan_changed(&key, &plan("markdown")));
    }
}
