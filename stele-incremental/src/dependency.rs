//! Dependency graph store and tracker
//!
//! Every access a compiling document makes to another document (raw
//! content, attributes, compiled content, path) records a props-
//! annotated edge. Edges point from the depended-upon object to the
//! dependent one, so the edges into a document name exactly the objects
//! whose changes can outdate it.
//!
//! The store is persisted across runs keyed by object reference:
//! "nothing touched X yet this run" does not erase knowledge of X's
//! historical dependents. Persisted edges may reference objects that no
//! longer exist; consumers must treat those as dangling and skippable.

use crate::store::{self, StoreError, StoreLocation};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use stele_types::{DependencyProps, ObjectRef};

const STORE_VERSION: u32 = 1;
const STORE_FILE: &str = "dependencies.json";

/// A recorded dependency edge
///
/// `to` depends on `from`: when `from` changes in a way that intersects
/// `props`, `to` is outdated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dependency {
    /// The object depended upon
    pub from: ObjectRef,
    /// The dependent object
    pub to: ObjectRef,
    /// Which kinds of access `to` made to `from`
    pub props: DependencyProps,
}

#[derive(Debug, Default)]
struct Graph {
    /// (from, to) → merged props
    edges: HashMap<(ObjectRef, ObjectRef), DependencyProps>,
    /// to → set of from
    inbound: HashMap<ObjectRef, BTreeSet<ObjectRef>>,
}

impl Graph {
    fn record(&mut self, from: ObjectRef, to: ObjectRef, props: &DependencyProps) {
        self.inbound
            .entry(to.clone())
            .or_default()
            .insert(from.clone());
        self.edges
            .entry((from, to))
            .or_default()
            .merge(props);
    }

    fn remove_inbound_of(&mut self, to: &ObjectRef) {
        if let Some(froms) = self.inbound.remove(to) {
            for from in froms {
                self.edges.remove(&(from, to.clone()));
            }
        }
    }
}

/// The persisted dependency graph
#[derive(Debug, Default)]
pub struct DependencyStore {
    graph: RwLock<Graph>,
}

impl DependencyStore {
    /// An empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the previous run's graph from `location`
    pub fn load(location: &StoreLocation) -> Self {
        let edges: Vec<Dependency> = store::load(&location.file(STORE_FILE), STORE_VERSION);
        let store = Self::new();
        {
            let mut graph = store.graph.write();
            for edge in edges {
                graph.record(edge.from, edge.to, &edge.props);
            }
        }
        store
    }

    /// Persist the graph to `location`
    pub fn save(&self, location: &StoreLocation) -> Result<(), StoreError> {
        let graph = self.graph.read();
        let mut edges: Vec<Dependency> = graph
            .edges
            .iter()
            .map(|((from, to), props)| Dependency {
                from: from.clone(),
                to: to.clone(),
                props: props.clone(),
            })
            .collect();
        edges.sort_by(|a, b| (&a.from, &a.to).cmp(&(&b.from, &b.to)));
        store::save(&location.file(STORE_FILE), STORE_VERSION, &edges)
    }

    /// Record that `to` accessed `from` with the given props
    ///
    /// Repeated accesses merge props by union.
    pub fn record(&self, from: ObjectRef, to: ObjectRef, props: DependencyProps) {
        if !props.is_active() {
            return;
        }
        self.graph.write().record(from, to, &props);
    }

    /// All edges into `to`: the dependencies that can outdate it
    pub fn dependencies_causing_outdatedness_of(&self, to: &ObjectRef) -> Vec<Dependency> {
        let graph = self.graph.read();
        let Some(froms) = graph.inbound.get(to) else {
            return Vec::new();
        };
        froms
            .iter()
            .filter_map(|from| {
                graph
                    .edges
                    .get(&(from.clone(), to.clone()))
                    .map(|props| Dependency {
                        from: from.clone(),
                        to: to.clone(),
                        props: props.clone(),
                    })
            })
            .collect()
    }

    /// The distinct objects that can outdate `to`
    pub fn objects_causing_outdatedness_of(&self, to: &ObjectRef) -> Vec<ObjectRef> {
        let graph = self.graph.read();
        graph
            .inbound
            .get(to)
            .map(|froms| froms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop everything known about what `to` depends on
    ///
    /// Called before recompiling a document so stale edges from earlier
    /// runs do not accumulate; compilation re-records the live set.
    pub fn forget_dependencies_for(&self, to: &ObjectRef) {
        self.graph.write().remove_inbound_of(to);
    }

    /// Drop edges whose endpoints refer to objects not in `known`
    ///
    /// Dangling `from` endpoints are kept: an edge from a removed object
    /// still carries the information that its dependent must recompile.
    /// Only edges whose *dependent* is gone are dropped, since nothing
    /// can consume them again.
    pub fn prune(&self, known: &HashSet<ObjectRef>) {
        let mut graph = self.graph.write();
        let stale: Vec<ObjectRef> = graph
            .inbound
            .keys()
            .filter(|to| !known.contains(*to))
            .cloned()
            .collect();
        for to in stale {
            graph.remove_inbound_of(&to);
        }
    }

    /// Number of recorded edges
    pub fn len(&self) -> usize {
        self.graph.read().edges.len()
    }

    /// Whether the graph has no edges
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Per-compilation dependency tracker
///
/// Holds the explicit stack of "currently compiling" documents for one
/// compilation job; the top of the stack is who is asking. `bounce` is
/// a no-op with an empty stack (global/shell context) and otherwise
/// records an edge into the shared store.
#[derive(Debug)]
pub struct DependencyTracker {
    store: Arc<DependencyStore>,
    stack: RwLock<Vec<ObjectRef>>,
}

impl DependencyTracker {
    /// Tracker writing into `store`
    pub fn new(store: Arc<DependencyStore>) -> Self {
        Self {
            store,
            stack: RwLock::new(Vec::new()),
        }
    }

    /// Push a document onto the compiling stack
    pub fn enter(&self, obj: ObjectRef) {
        tracing::trace!(obj = %obj, "dependency tracker enter");
        self.stack.write().push(obj);
    }

    /// Pop the top of the compiling stack
    pub fn exit(&self) {
        let popped = self.stack.write().pop();
        if let Some(obj) = popped {
            tracing::trace!(obj = %obj, "dependency tracker exit");
        }
    }

    /// The document on top of the stack accessed `target`
    pub fn bounce(&self, target: ObjectRef, props: DependencyProps) {
        let stack = self.stack.read();
        let Some(top) = stack.last() else {
            return;
        };
        tracing::trace!(from = %target, to = %top, props = %props, "dependency recorded");
        self.store.record(target, top.clone(), props);
    }

    /// Snapshot of the live compilation stack, bottom first
    pub fn stack(&self) -> Vec<ObjectRef> {
        self.stack.read().clone()
    }

    /// The shared store this tracker writes into
    pub fn store(&self) -> &Arc<DependencyStore> {
        &self.store
    }
}
