//! Run orchestration
//!
//! A run: load documents, preprocess and freeze, build reps and plans,
//! load the persisted stores, decide what is outdated, drop stale
//! store state, compile everything through the scheduler, and persist
//! the stores for the next run.

use crate::errors::{CompilationError, CompilerError};
use crate::events::{EventSink, NullSink};
use crate::exec::RunContext;
use crate::interfaces::{ActionProvider, DataSource, FilterRegistry, Writer};
use crate::metrics::{MetricsSnapshot, RunMetrics};
use crate::scheduler;
use crate::stages;
use std::collections::HashMap;
use std::sync::Arc;
use stele_incremental::{
    outdatedness::CheckerContext, ActionSequenceStore, ChecksumStore, CompiledContentCache,
    CompiledContentStore, DependencyStore, OutdatednessChecker, OutdatednessStore, StoreLocation,
};
use stele_types::{Identifier, Item, Layout, ObjectRef, RepRef};

/// What one run produced
#[derive(Debug)]
pub struct RunSummary {
    /// Reps compiled by executing their plans
    pub compiled: Vec<RepRef>,
    /// Reps satisfied from the cross-run cache
    pub cached: Vec<RepRef>,
    /// Per-rep failures; these reps stay outdated and retry next run
    pub failures: Vec<CompilationError>,
    /// Run counters
    pub metrics: MetricsSnapshot,
}

/// The incremental compiler
pub struct Compiler {
    data_source: Arc<dyn DataSource>,
    provider: Arc<dyn ActionProvider>,
    filters: FilterRegistry,
    writer: Arc<dyn Writer>,
    events: Arc<dyn EventSink>,
    workers: usize,
}

impl Compiler {
    /// Build a compiler from its collaborators
    pub fn new(
        data_source: Arc<dyn DataSource>,
        provider: Arc<dyn ActionProvider>,
        filters: FilterRegistry,
        writer: Arc<dyn Writer>,
    ) -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            data_source,
            provider,
            filters,
            writer,
            events: Arc::new(NullSink),
            workers,
        }
    }

    /// Report run events to `sink`
    pub fn with_events(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    /// Use a fixed worker count
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Execute one run
    pub fn run(&self) -> Result<RunSummary, CompilerError> {
        let mut site = self.data_source.load().map_err(CompilerError::Load)?;

        self.provider.preprocess(&mut site);
        site.freeze();

        let location = StoreLocation::for_output_dir(site.config.output_dir());
        tracing::info!(
            items = site.items.len(),
            layouts = site.layouts.len(),
            store_root = %location.root().display(),
            "starting run"
        );

        let items: HashMap<Identifier, Item> = site
            .items
            .iter()
            .map(|item| (item.identifier().clone(), item.clone()))
            .collect();
        let layouts: HashMap<Identifier, Layout> = site
            .layouts
            .iter()
            .map(|layout| (layout.identifier().clone(), layout.clone()))
            .collect();

        let built = stages::build_reps(&site, &*self.provider, &self.filters)?;

        let checksums = ChecksumStore::load(&location);
        let plan_store = ActionSequenceStore::load(&location);
        let deps = Arc::new(DependencyStore::load(&location));
        let outdatedness = Arc::new(OutdatednessStore::load(&location));
        let cache = Arc::new(CompiledContentCache::load(&location));

        stages::record_checksums(&checksums, &site);
        stages::record_plans(&plan_store, &built.plans);

        {
            let checker = OutdatednessChecker::new(CheckerContext {
                checksums: &checksums,
                plan_store: &plan_store,
                plans: &built.plans,
                deps: &deps,
                config: &site.config,
                snippets: &site.snippets,
                items: &items,
                layouts: &layouts,
                reps: &built.by_item,
            });
            checker.populate_store(&outdatedness);
        }
        tracing::info!(outdated = outdatedness.len(), total = built.by_ref.len(), "outdatedness determined");

        // Outdated items recompile and re-record their dependencies;
        // drop the stale inbound knowledge first.
        for rep_ref in outdatedness.reps() {
            deps.forget_dependencies_for(&ObjectRef::Item(rep_ref.item.clone()));
        }

        deps.prune(&stages::known_objects(&site));
        let known_reps = built.by_ref.keys().cloned().collect();
        cache.prune(&known_reps);

        let metrics = Arc::new(RunMetrics::new());
        let ctx = RunContext {
            items,
            layouts,
            config: Arc::new(site.config),
            reps_by_item: built.by_item,
            reps_by_ref: built.by_ref,
            plans: built.plans,
            filters: self.filters.clone(),
            deps: deps.clone(),
            content_store: Arc::new(CompiledContentStore::new()),
            cache: cache.clone(),
            outdatedness: outdatedness.clone(),
            writer: self.writer.clone(),
            events: self.events.clone(),
            metrics: metrics.clone(),
        };

        let outcome = scheduler::compile_reps(&ctx, self.workers)?;

        checksums.save(&location)?;
        plan_store.save(&location)?;
        deps.save(&location)?;
        outdatedness.save(&location)?;
        cache.save()?;

        let summary = RunSummary {
            compiled: outcome.compiled,
            cached: outcome.cached,
            failures: outcome.failures,
            metrics: metrics.snapshot(),
        };
        tracing::info!(
            compiled = summary.compiled.len(),
            cached = summary.cached.len(),
            failed = summary.failures.len(),
            "run finished"
        );
        Ok(summary)
    }
}
