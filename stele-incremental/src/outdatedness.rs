//! Outdatedness store, rules, and checker
//!
//! A rep is outdated when any rule in a fixed priority battery matches:
//! never written, code snippets changed, its document's content or
//! attributes changed, its action plan changed, it is flagged always
//! outdated, or something it depends on is itself outdated in a way
//! that intersects the recorded access props. The last rule cascades
//! transitively through the dependency graph; the checker follows
//! compiled-content edges to a fixed point while staying cycle-safe.
//!
//! Only membership is persisted: the store carries the set of reps
//! known to need recompilation. Reps are removed as they complete, so
//! entries surviving a run are exactly the reps that failed and must be
//! retried next run.

use crate::checksum::{ChecksumStore, ChecksumSubject};
use crate::dependency::{Dependency, DependencyStore};
use crate::plans::{ActionSequenceStore, PlanKey};
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use stele_types::{
    ActionSequence, AttributesProp, CodeSnippet, Configuration, DependencyProps, Identifier,
    Item, ItemRep, Layout, ObjectRef, RepRef,
};

const STORE_VERSION: u32 = 1;
const STORE_FILE: &str = "outdatedness.json";

/// Why an object is outdated
#[derive(Debug, Clone, PartialEq)]
pub enum OutdatednessReason {
    /// The rep's output paths have never been produced
    NotWritten,
    /// Some code snippet changed since the last run
    CodeSnippetsModified,
    /// The document's content digest changed
    ContentModified,
    /// Attribute digests changed; carries the changed keys when known
    AttributesModified(AttributesProp),
    /// The recorded action plan differs from the current one
    RulesModified,
    /// Configuration flags the identifier as always outdated
    AlwaysOutdated,
    /// Something this object depends on is itself outdated
    DependenciesOutdated,
}

impl OutdatednessReason {
    /// Short name for diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            OutdatednessReason::NotWritten => "not_written",
            OutdatednessReason::CodeSnippetsModified => "code_snippets_modified",
            OutdatednessReason::ContentModified => "content_modified",
            OutdatednessReason::AttributesModified(_) => "attributes_modified",
            OutdatednessReason::RulesModified => "rules_modified",
            OutdatednessReason::AlwaysOutdated => "always_outdated",
            OutdatednessReason::DependenciesOutdated => "dependencies_outdated",
        }
    }

    /// The access kinds this reason invalidates in dependents
    pub fn props(&self) -> DependencyProps {
        match self {
            OutdatednessReason::NotWritten => DependencyProps::all(),
            OutdatednessReason::CodeSnippetsModified => DependencyProps::all(),
            OutdatednessReason::ContentModified => DependencyProps {
                raw_content: true,
                compiled_content: true,
                ..DependencyProps::default()
            },
            OutdatednessReason::AttributesModified(keys) => DependencyProps {
                attributes: keys.clone(),
                compiled_content: true,
                ..DependencyProps::default()
            },
            OutdatednessReason::RulesModified => DependencyProps {
                compiled_content: true,
                path: true,
                ..DependencyProps::default()
            },
            OutdatednessReason::AlwaysOutdated => DependencyProps::all(),
            // Recompilation can change compiled content, but the
            // object's own sources and paths are untouched.
            OutdatednessReason::DependenciesOutdated => DependencyProps::compiled_content(),
        }
    }
}

/// Accumulated outdatedness of one object during checking
///
/// Transient: computed per object per run, never persisted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutdatednessStatus {
    /// Matched reasons, in rule order
    pub reasons: Vec<OutdatednessReason>,
    /// Union of the matched reasons' props
    pub props: DependencyProps,
}

impl OutdatednessStatus {
    /// Record a matched reason
    pub fn add(&mut self, reason: OutdatednessReason) {
        self.props.merge(&reason.props());
        self.reasons.push(reason);
    }

    /// Whether a rule contributing `props` could still add anything
    pub fn useful_to_apply(&self, props: &DependencyProps) -> bool {
        !props.subsumed_by(&self.props)
    }

    /// Whether any reason matched
    pub fn is_outdated(&self) -> bool {
        !self.reasons.is_empty()
    }

    fn merge(&mut self, other: &OutdatednessStatus) {
        for reason in &other.reasons {
            if !self.reasons.contains(reason) {
                self.reasons.push(reason.clone());
            }
        }
        self.props.merge(&other.props);
    }
}

/// Persisted set of reps known to need recompilation
#[derive(Debug, Default)]
pub struct OutdatednessStore {
    reps: RwLock<HashSet<RepRef>>,
}

impl OutdatednessStore {
    /// An empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the previous run's membership from `location`
    pub fn load(location: &crate::store::StoreLocation) -> Self {
        let reps: Vec<RepRef> = crate::store::load(&location.file(STORE_FILE), STORE_VERSION);
        Self {
            reps: RwLock::new(reps.into_iter().collect()),
        }
    }

    /// Persist the membership to `location`
    pub fn save(&self, location: &crate::store::StoreLocation) -> Result<(), crate::store::StoreError> {
        let mut reps: Vec<RepRef> = self.reps.read().iter().cloned().collect();
        reps.sort();
        crate::store::save(&location.file(STORE_FILE), STORE_VERSION, &reps)
    }

    /// Mark a rep outdated
    pub fn add(&self, rep: RepRef) {
        self.reps.write().insert(rep);
    }

    /// Clear a rep (it completed compilation)
    pub fn remove(&self, rep: &RepRef) {
        self.reps.write().remove(rep);
    }

    /// Whether a rep is marked outdated
    pub fn contains(&self, rep: &RepRef) -> bool {
        self.reps.read().contains(rep)
    }

    /// Drop reps no longer known to the document model
    pub fn purge(&self, known: &HashSet<RepRef>) {
        self.reps.write().retain(|rep| known.contains(rep));
    }

    /// Snapshot of the current membership
    pub fn reps(&self) -> Vec<RepRef> {
        self.reps.read().iter().cloned().collect()
    }

    /// Number of outdated reps
    pub fn len(&self) -> usize {
        self.reps.read().len()
    }

    /// Whether nothing is outdated
    pub fn is_empty(&self) -> bool {
        self.reps.read().is_empty()
    }
}

/// Everything the checker consults
///
/// Built by the compiler once documents, reps, and plans are known.
#[derive(Debug)]
pub struct CheckerContext<'a> {
    /// Previous + current digests
    pub checksums: &'a ChecksumStore,
    /// Previous-run plan digests
    pub plan_store: &'a ActionSequenceStore,
    /// Current plans per rep/layout
    pub plans: &'a HashMap<PlanKey, ActionSequence>,
    /// The dependency graph
    pub deps: &'a DependencyStore,
    /// Site configuration
    pub config: &'a Configuration,
    /// Current code snippets
    pub snippets: &'a [CodeSnippet],
    /// Current items by identifier
    pub items: &'a HashMap<Identifier, Item>,
    /// Current layouts by identifier
    pub layouts: &'a HashMap<Identifier, Layout>,
    /// Current reps per item identifier
    pub reps: &'a HashMap<Identifier, Vec<Arc<ItemRep>>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum BasicKey {
    Rep(RepRef),
    Layout(Identifier),
    Config,
}

/// The outdatedness decision procedure
#[derive(Debug)]
pub struct OutdatednessChecker<'a> {
    ctx: CheckerContext<'a>,
    snippets_changed: bool,
    basic_cache: Mutex<HashMap<BasicKey, OutdatednessStatus>>,
}

impl<'a> OutdatednessChecker<'a> {
    /// Build a checker over `ctx`
    pub fn new(ctx: CheckerContext<'a>) -> Self {
        let snippets_changed = Self::any_snippet_changed(&ctx);
        Self {
            ctx,
            snippets_changed,
            basic_cache: Mutex::new(HashMap::new()),
        }
    }

    fn any_snippet_changed(ctx: &CheckerContext<'_>) -> bool {
        let current: HashSet<ObjectRef> = ctx
            .snippets
            .iter()
            .map(|s| ObjectRef::CodeSnippet(s.name().to_string()))
            .collect();

        // A snippet removed since last run counts as a change
        let removed = ctx
            .checksums
            .previous_refs()
            .into_iter()
            .any(|r| matches!(r, ObjectRef::CodeSnippet(_)) && !current.contains(&r));
        if removed {
            return true;
        }

        ctx.snippets
            .iter()
            .any(|s| ctx.checksums.changed(ChecksumSubject::Snippet(s)))
    }

    /// Reasons a rep must recompile this run; empty when fresh
    pub fn outdatedness_reasons_for_rep(&self, rep: &ItemRep) -> Vec<OutdatednessReason> {
        let mut status = self.basic_status_for_rep(rep);

        let item_ref = ObjectRef::Item(rep.item().identifier().clone());
        let mut visited = HashSet::from([item_ref.clone()]);
        if self.outdated_due_to_dependencies(&item_ref, &mut visited) {
            status.add(OutdatednessReason::DependenciesOutdated);
        }

        status.reasons
    }

    /// Reasons a layout must be considered changed this run
    pub fn outdatedness_reasons_for_layout(&self, layout: &Layout) -> Vec<OutdatednessReason> {
        let mut status = self.basic_status_for_layout(layout);

        let layout_ref = layout.reference();
        let mut visited = HashSet::from([layout_ref.clone()]);
        if self.outdated_due_to_dependencies(&layout_ref, &mut visited) {
            status.add(OutdatednessReason::DependenciesOutdated);
        }

        status.reasons
    }

    /// Populate `store` with every outdated rep and purge unknown refs
    ///
    /// Reps already in the store (left over from a failed run) stay
    /// outdated; reps whose items no longer exist are dropped.
    pub fn populate_store(&self, store: &OutdatednessStore) {
        let known: HashSet<RepRef> = self
            .ctx
            .reps
            .values()
            .flatten()
            .map(|rep| rep.reference())
            .collect();
        store.purge(&known);

        for rep in self.ctx.reps.values().flatten() {
            let reasons = self.outdatedness_reasons_for_rep(rep);
            if !reasons.is_empty() {
                tracing::debug!(
                    rep = %rep.reference(),
                    reasons = ?reasons.iter().map(|r| r.name()).collect::<Vec<_>>(),
                    "rep outdated"
                );
                store.add(rep.reference());
            }
        }
    }

    // ---- basic rules (1)–(5) ------------------------------------------

    fn basic_status_for_rep(&self, rep: &ItemRep) -> OutdatednessStatus {
        let key = BasicKey::Rep(rep.reference());
        if let Some(found) = self.basic_cache.lock().get(&key) {
            return found.clone();
        }

        let mut status = OutdatednessStatus::default();

        // (1) never written to disk
        let paths = rep.all_paths();
        if !paths.is_empty() && paths.iter().any(|p| !p.exists()) {
            status.add(OutdatednessReason::NotWritten);
        }

        // (2) code snippets changed
        if self.snippets_changed && status.useful_to_apply(&DependencyProps::all()) {
            status.add(OutdatednessReason::CodeSnippetsModified);
        }

        // (3) the document's own digests changed
        self.apply_document_rules(rep.item(), &mut status);

        // (4) the action plan changed
        let plan_key = PlanKey::Rep(rep.reference());
        self.apply_plan_rule(&plan_key, &mut status);

        // (5) flagged always outdated
        if self.ctx.config.always_outdated(rep.item().identifier())
            && status.useful_to_apply(&DependencyProps::all())
        {
            status.add(OutdatednessReason::AlwaysOutdated);
        }

        self.basic_cache.lock().insert(key, status.clone());
        status
    }

    fn basic_status_for_layout(&self, layout: &Layout) -> OutdatednessStatus {
        let key = BasicKey::Layout(layout.identifier().clone());
        if let Some(found) = self.basic_cache.lock().get(&key) {
            return found.clone();
        }

        let mut status = OutdatednessStatus::default();

        if self.snippets_changed {
            status.add(OutdatednessReason::CodeSnippetsModified);
        }
        self.apply_document_rules(layout, &mut status);
        let plan_key = PlanKey::Layout(layout.identifier().clone());
        self.apply_plan_rule(&plan_key, &mut status);
        if self.ctx.config.always_outdated(layout.identifier())
            && status.useful_to_apply(&DependencyProps::all())
        {
            status.add(OutdatednessReason::AlwaysOutdated);
        }

        self.basic_cache.lock().insert(key, status.clone());
        status
    }

    fn basic_status_for_config(&self) -> OutdatednessStatus {
        let key = BasicKey::Config;
        if let Some(found) = self.basic_cache.lock().get(&key) {
            return found.clone();
        }

        let mut status = OutdatednessStatus::default();
        let subject = ChecksumSubject::Config(self.ctx.config);
        if self.ctx.checksums.attributes_changed(subject) {
            let keys = match self.ctx.checksums.changed_attributes_of(subject) {
                Some(keys) => AttributesProp::Keys(keys),
                None => AttributesProp::All,
            };
            status.add(OutdatednessReason::AttributesModified(keys));
        }

        self.basic_cache.lock().insert(key, status.clone());
        status
    }

    fn apply_document_rules(&self, document: &stele_types::Document, status: &mut OutdatednessStatus) {
        let content_props = OutdatednessReason::ContentModified.props();
        if status.useful_to_apply(&content_props) && self.ctx.checksums.content_changed(document) {
            status.add(OutdatednessReason::ContentModified);
        }

        let subject = ChecksumSubject::Document(document);
        if self.ctx.checksums.attributes_changed(subject) {
            let keys = match self.ctx.checksums.changed_attributes_of(subject) {
                Some(keys) => AttributesProp::Keys(keys),
                None => AttributesProp::All,
            };
            let props = OutdatednessReason::AttributesModified(keys.clone()).props();
            if status.useful_to_apply(&props) {
                status.add(OutdatednessReason::AttributesModified(keys));
            }
        }
    }

    fn apply_plan_rule(&self, key: &PlanKey, status: &mut OutdatednessStatus) {
        let props = OutdatednessReason::RulesModified.props();
        if !status.useful_to_apply(&props) {
            return;
        }
        match self.ctx.plans.get(key) {
            Some(sequence) => {
                if self.ctx.plan_store.plan_changed(key, sequence) {
                    status.add(OutdatednessReason::RulesModified);
                }
            }
            // No current plan recorded: treat as a changed plan
            None => status.add(OutdatednessReason::RulesModified),
        }
    }

    // ---- rule (6): dependency propagation -----------------------------

    fn outdated_due_to_dependencies(
        &self,
        obj: &ObjectRef,
        visited: &mut HashSet<ObjectRef>,
    ) -> bool {
        self.ctx
            .deps
            .dependencies_causing_outdatedness_of(obj)
            .iter()
            .any(|dep| self.dependency_causes_outdatedness(dep, visited))
    }

    fn dependency_causes_outdatedness(
        &self,
        dep: &Dependency,
        visited: &mut HashSet<ObjectRef>,
    ) -> bool {
        // A dependency on a removed object always causes outdatedness
        if !self.object_exists(&dep.from) {
            return true;
        }

        let status = self.basic_status_for_object(&dep.from);
        if status.props.intersects(&dep.props) {
            return true;
        }

        // Compiled content cascades: the source may itself be compiled
        // from something outdated further up the graph.
        if dep.props.compiled_content && visited.insert(dep.from.clone()) {
            return self.outdated_due_to_dependencies(&dep.from, visited);
        }

        false
    }

    fn object_exists(&self, obj: &ObjectRef) -> bool {
        match obj {
            ObjectRef::Item(id) => self.ctx.items.contains_key(id),
            ObjectRef::Layout(id) => self.ctx.layouts.contains_key(id),
            ObjectRef::Config => true,
            ObjectRef::CodeSnippet(name) => {
                self.ctx.snippets.iter().any(|s| s.name() == name)
            }
        }
    }

    fn basic_status_for_object(&self, obj: &ObjectRef) -> OutdatednessStatus {
        match obj {
            ObjectRef::Item(id) => {
                let mut status = OutdatednessStatus::default();
                if let Some(reps) = self.ctx.reps.get(id) {
                    for rep in reps {
                        status.merge(&self.basic_status_for_rep(rep));
                    }
                }
                status
            }
            ObjectRef::Layout(id) => match self.ctx.layouts.get(id) {
                Some(layout) => self.basic_status_for_layout(layout),
                None => OutdatednessStatus::default(),
            },
            ObjectRef::Config => self.basic_status_for_config(),
            ObjectRef::CodeSnippet(name) => {
                let mut status = OutdatednessStatus::default();
                let changed = self
                    .ctx
                    .snippets
                    .iter()
                    .find(|s| s.name() == name)
                    .is_some_and(|s| self.ctx.checksums.changed(ChecksumSubject::Snippet(s)));
                if changed {
                    status.add(OutdatednessReason::CodeSnippetsModified);
                }
                status
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreLocation;
    use serde_json::json;
    use stele_types::{Attributes, Content, ProcessingAction};

    struct World {
        items: HashMap<Identifier, Item>,
        layouts: HashMap<Identifier, Layout>,
        reps: HashMap<Identifier, Vec<Arc<ItemRep>>>,
        plans: HashMap<PlanKey, ActionSequence>,
        config: Configuration,
        snippets: Vec<CodeSnippet>,
        deps: DependencyStore,
    }

    impl World {
        fn new() -> Self {
            Self {
                items: HashMap::new(),
                layouts: HashMap::new(),
                reps: HashMap::new(),
                plans: HashMap::new(),
                config: Configuration::new("out"),
                snippets: Vec::new(),
                deps: DependencyStore::new(),
            }
        }

        fn add_item(&mut self, id: &str, content: &str) -> Arc<ItemRep> {
            let item = Item::new(id, Content::textual(content), Attributes::empty());
            let rep = Arc::new(ItemRep::new(item.clone(), "default"));
            let identifier: Identifier = id.into();
            self.items.insert(identifier.clone(), item);
            self.reps.insert(identifier, vec![rep.clone()]);
            self.plans.insert(
                PlanKey::Rep(rep.reference()),
                ActionSequence::new(vec![ProcessingAction::snapshot(["last"])]),
            );
            rep
        }

        fn record_everything(&self, checksums: &ChecksumStore, plans: &ActionSequenceStore) {
            for item in self.items.values() {
                checksums.calc(ChecksumSubject::Document(item));
                checksums.calc_for_content_of(item);
                checksums.calc_for_each_attribute_of(ChecksumSubject::Document(item));
            }
            for layout in self.layouts.values() {
                checksums.calc(ChecksumSubject::Document(layout));
                checksums.calc_for_content_of(layout);
                checksums.calc_for_each_attribute_of(ChecksumSubject::Document(layout));
            }
            checksums.calc_for_each_attribute_of(ChecksumSubject::Config(&self.config));
            for snippet in &self.snippets {
                checksums.calc(ChecksumSubject::Snippet(snippet));
            }
            for (key, sequence) in &self.plans {
                plans.record(key.clone(), sequence);
            }
        }

        fn checker<'a>(
            &'a self,
            checksums: &'a ChecksumStore,
            plan_store: &'a ActionSequenceStore,
        ) -> OutdatednessChecker<'a> {
            OutdatednessChecker::new(CheckerContext {
                checksums,
                plan_store,
                plans: &self.plans,
                deps: &self.deps,
                config: &self.config,
                snippets: &self.snippets,
                items: &self.items,
                layouts: &self.layouts,
                reps: &self.reps,
            })
        }
    }

    /// Run one world to completion and reload its stores for the next
    fn persisted_stores(world: &World) -> (ChecksumStore, ActionSequenceStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let location = StoreLocation::at(dir.path());

        let checksums = ChecksumStore::empty();
        let plans = ActionSequenceStore::new();
        world.record_everything(&checksums, &plans);
        checksums.save(&location).unwrap();
        plans.save(&location).unwrap();

        (
            ChecksumStore::load(&location),
            ActionSequenceStore::load(&location),
            dir,
        )
    }

    #[test]
    fn test_everything_outdated_on_cold_start() {
        let mut world = World::new();
        let rep = world.add_item("/a.md", "hello");

        let checksums = ChecksumStore::empty();
        let plan_store = ActionSequenceStore::new();
        let checker = world.checker(&checksums, &plan_store);

        let reasons = checker.outdatedness_reasons_for_rep(&rep);
        assert!(reasons.contains(&OutdatednessReason::ContentModified));
        assert!(reasons.contains(&OutdatednessReason::RulesModified));
    }

    #[test]
    fn test_unchanged_world_is_fresh() {
        let mut world = World::new();
        let rep = world.add_item("/a.md", "hello");

        let (checksums, plan_store, _dir) = persisted_stores(&world);
        let checker = world.checker(&checksums, &plan_store);

        assert!(checker.outdatedness_reasons_for_rep(&rep).is_empty());
    }

    #[test]
    fn test_content_change_outdates_only_that_item() {
        let mut world = World::new();
        world.add_item("/a.md", "hello");
        world.add_item("/b.md", "other");

        let (checksums, plan_store, _dir) = persisted_stores(&world);

        // Second run: /a.md edited
        let mut next = World::new();
        let a = next.add_item("/a.md", "edited");
        let b = next.add_item("/b.md", "other");

        let checker = next.checker(&checksums, &plan_store);
        assert_eq!(
            checker.outdatedness_reasons_for_rep(&a),
            vec![OutdatednessReason::ContentModified]
        );
        assert!(checker.outdatedness_reasons_for_rep(&b).is_empty());
    }

    #[test]
    fn test_snippet_change_outdates_everything() {
        let mut world = World::new();
        world.add_item("/a.md", "hello");
        world.snippets.push(CodeSnippet::new("rules", "v1"));

        let (checksums, plan_store, _dir) = persisted_stores(&world);

        let mut next = World::new();
        let a = next.add_item("/a.md", "hello");
        next.snippets.push(CodeSnippet::new("rules", "v2"));

        let checker = next.checker(&checksums, &plan_store);
        assert_eq!(
            checker.outdatedness_reasons_for_rep(&a),
            vec![OutdatednessReason::CodeSnippetsModified]
        );
    }

    #[test]
    fn test_attribute_dependency_is_key_precise() {
        let mut world = World::new();
        let a = world.add_item("/a.md", "a");
        world.add_item("/b.md", "b");
        a.item().set_attribute("title", json!("old")).unwrap();

        // /b.md read only /a.md's "date" attribute
        world.deps.record(
            ObjectRef::Item("/a.md".into()),
            ObjectRef::Item("/b.md".into()),
            DependencyProps::attributes(AttributesProp::keys(["date"])),
        );

        let (checksums, plan_store, _dir) = persisted_stores(&world);

        // Second run: only "title" changed on /a.md
        let mut next = World::new();
        let a2 = next.add_item("/a.md", "a");
        let b2 = next.add_item("/b.md", "b");
        a2.item().set_attribute("title", json!("new")).unwrap();
        next.deps.record(
            ObjectRef::Item("/a.md".into()),
            ObjectRef::Item("/b.md".into()),
            DependencyProps::attributes(AttributesProp::keys(["date"])),
        );

        let checker = next.checker(&checksums, &plan_store);
        assert!(!checker.outdatedness_reasons_for_rep(&a2).is_empty());
        assert!(checker.outdatedness_reasons_for_rep(&b2).is_empty());
    }

    #[test]
    fn test_path_reader_untouched_by_content_change() {
        let mut world = World::new();
        world.add_item("/a.md", "a");
        world.add_item("/b.md", "b");
        world.deps.record(
            ObjectRef::Item("/a.md".into()),
            ObjectRef::Item("/b.md".into()),
            DependencyProps::path(),
        );

        let (checksums, plan_store, _dir) = persisted_stores(&world);

        let mut next = World::new();
        next.add_item("/a.md", "edited");
        let b = next.add_item("/b.md", "b");
        next.deps.record(
            ObjectRef::Item("/a.md".into()),
            ObjectRef::Item("/b.md".into()),
            DependencyProps::path(),
        );

        let checker = next.checker(&checksums, &plan_store);
        assert!(checker.outdatedness_reasons_for_rep(&b).is_empty());
    }

    #[test]
    fn test_compiled_content_cascades_transitively() {
        let mut world = World::new();
        world.add_item("/a.md", "a");
        world.add_item("/b.md", "b");
        world.add_item("/c.md", "c");

        let record_deps = |deps: &DependencyStore| {
            // b reads a's compiled content; c reads b's compiled content
            deps.record(
                ObjectRef::Item("/a.md".into()),
                ObjectRef::Item("/b.md".into()),
                DependencyProps::compiled_content(),
            );
            deps.record(
                ObjectRef::Item("/b.md".into()),
                ObjectRef::Item("/c.md".into()),
                DependencyProps::compiled_content(),
            );
        };
        record_deps(&world.deps);

        let (checksums, plan_store, _dir) = persisted_stores(&world);

        let mut next = World::new();
        next.add_item("/a.md", "edited");
        next.add_item("/b.md", "b");
        let c = next.add_item("/c.md", "c");
        record_deps(&next.deps);

        let checker = next.checker(&checksums, &plan_store);
        assert_eq!(
            checker.outdatedness_reasons_for_rep(&c),
            vec![OutdatednessReason::DependenciesOutdated]
        );
    }

    #[test]
    fn test_dependency_cycles_do_not_loop() {
        let mut world = World::new();
        world.add_item("/a.md", "a");
        world.add_item("/b.md", "b");
        let record_deps = |deps: &DependencyStore| {
            deps.record(
                ObjectRef::Item("/a.md".into()),
                ObjectRef::Item("/b.md".into()),
                DependencyProps::compiled_content(),
            );
            deps.record(
                ObjectRef::Item("/b.md".into()),
                ObjectRef::Item("/a.md".into()),
                DependencyProps::compiled_content(),
            );
        };
        record_deps(&world.deps);

        let (checksums, plan_store, _dir) = persisted_stores(&world);

        let mut next = World::new();
        let a = next.add_item("/a.md", "a");
        next.add_item("/b.md", "b");
        record_deps(&next.deps);

        let checker = next.checker(&checksums, &plan_store);
        // Terminates, and nothing changed, so nothing is outdated
        assert!(checker.outdatedness_reasons_for_rep(&a).is_empty());
    }

    #[test]
    fn test_dependency_on_removed_document_outdates() {
        let mut world = World::new();
        world.add_item("/a.md", "a");
        world.add_item("/gone.md", "g");
        world.deps.record(
            ObjectRef::Item("/gone.md".into()),
            ObjectRef::Item("/a.md".into()),
            DependencyProps::raw_content(),
        );

        let (checksums, plan_store, _dir) = persisted_stores(&world);

        let mut next = World::new();
        let a = next.add_item("/a.md", "a");
        next.deps.record(
            ObjectRef::Item("/gone.md".into()),
            ObjectRef::Item("/a.md".into()),
            DependencyProps::raw_content(),
        );

        let checker = next.checker(&checksums, &plan_store);
        assert_eq!(
            checker.outdatedness_reasons_for_rep(&a),
            vec![OutdatednessReason::DependenciesOutdated]
        );
    }

    #[test]
    fn test_populate_store_purges_unknown_reps() {
        let mut world = World::new();
        world.add_item("/a.md", "a");

        let store = OutdatednessStore::new();
        store.add(RepRef::new("/removed.md", "default"));

        let checksums = ChecksumStore::empty();
        let plan_store = ActionSequenceStore::new();
        let checker = world.checker(&checksums, &plan_store);
        checker.populate_store(&store);

        assert!(!store.contains(&RepRef::new("/removed.md", "default")));
        assert!(store.contains(&RepRef::new("/a.md", "default")));
    }
}
