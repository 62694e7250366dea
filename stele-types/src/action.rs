//! Processing actions and action sequences
//!
//! An action sequence is the ordered plan for compiling one rep (or one
//! layout): filters to apply, layouts to wrap with, snapshots to take.
//! The engine treats plans as opaque, deterministic input from the
//! action provider and only iterates them; sequences serialize so the
//! plan itself can be digested for change detection.

use crate::identifier::Identifier;
use crate::rep::SnapshotName;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Arguments passed to a filter
pub type FilterArgs = BTreeMap<String, Value>;

/// One step of an action sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ProcessingAction {
    /// Apply a named filter to the current content
    Filter { name: String, args: FilterArgs },

    /// Wrap the current content in a layout, filtered by `filter`
    Layout {
        layout: Identifier,
        filter: Option<(String, FilterArgs)>,
    },

    /// Publish the current content under the given snapshot names
    Snapshot {
        names: Vec<SnapshotName>,
        paths: Vec<PathBuf>,
    },
}

impl ProcessingAction {
    pub fn filter(name: impl Into<String>, args: FilterArgs) -> Self {
        ProcessingAction::Filter {
            name: name.into(),
            args,
        }
    }

    pub fn layout(layout: impl Into<Identifier>) -> Self {
        ProcessingAction::Layout {
            layout: layout.into(),
            filter: None,
        }
    }

    pub fn layout_with_filter(
        layout: impl Into<Identifier>,
        filter: impl Into<String>,
        args: FilterArgs,
    ) -> Self {
        ProcessingAction::Layout {
            layout: layout.into(),
            filter: Some((filter.into(), args)),
        }
    }

    pub fn snapshot(names: impl IntoIterator<Item = impl Into<SnapshotName>>) -> Self {
        ProcessingAction::Snapshot {
            names: names.into_iter().map(Into::into).collect(),
            paths: Vec::new(),
        }
    }

    pub fn snapshot_with_paths(
        names: impl IntoIterator<Item = impl Into<SnapshotName>>,
        paths: impl IntoIterator<Item = PathBuf>,
    ) -> Self {
        ProcessingAction::Snapshot {
            names: names.into_iter().map(Into::into).collect(),
            paths: paths.into_iter().collect(),
        }
    }
}

impl fmt::Display for ProcessingAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessingAction::Filter { name, .. } => write!(f, "filter {name}"),
            ProcessingAction::Layout { layout, .. } => write!(f, "layout {layout}"),
            ProcessingAction::Snapshot { names, .. } => {
                let names: Vec<_> = names.iter().map(|n| n.as_str()).collect();
                write!(f, "snapshot {}", names.join(","))
            }
        }
    }
}

/// Ordered plan for one rep or layout
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ActionSequence {
    actions: Vec<ProcessingAction>,
}

impl ActionSequence {
    pub fn new(actions: Vec<ProcessingAction>) -> Self {
        Self { actions }
    }

    pub fn actions(&self) -> &[ProcessingAction] {
        &self.actions
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Snapshot names declared anywhere in the sequence, in order
    pub fn snapshot_names(&self) -> Vec<SnapshotName> {
        let mut out = Vec::new();
        for action in &self.actions {
            if let ProcessingAction::Snapshot { names, .. } = action {
                for name in names {
                    if !out.contains(name) {
                        out.push(name.clone());
                    }
                }
            }
        }
        out
    }
}

impl<'a> IntoIterator for &'a ActionSequence {
    type Item = &'a ProcessingAction;
    type IntoIter = std::slice::Iter<'a, ProcessingAction>;

    fn into_iter(self) -> Self::IntoIter {
        self.actions.iter()
    }
}
