//! Resumable rep execution
//!
//! A rep's action sequence runs as an explicit state machine: the index
//! of the next action plus the working content accumulated so far. When
//! a filter needs compiled content that is not yet published, execution
//! returns a suspension outcome instead of blocking; the scheduler
//! resumes it later by calling [`RepExecution::step`] again. Actions
//! already executed (filters run, snapshots taken) are never redone;
//! only the action that suspended re-runs from its start.

use crate::errors::{CompilationError, FilterError};
use crate::events::EventSink;
use crate::interfaces::{
    CompilationContext, FilterInput, FilterRegistry, Writer,
};
use crate::metrics::RunMetrics;
use std::collections::HashMap;
use std::sync::Arc;
use stele_incremental::{
    CompiledContent, CompiledContentCache, CompiledContentStore, DependencyStore,
    DependencyTracker, OutdatednessStore, PlanKey,
};
use stele_types::{
    ActionSequence, AttributesProp, Configuration, Content, DependencyProps, FilterArgs,
    Identifier, Item, ItemRep, Layout, ObjectRef, ProcessingAction, RepRef, SnapshotName,
};

/// Shared state for one compilation run
///
/// Built by the compiler after rep building and outdatedness checking;
/// read concurrently by every worker.
pub struct RunContext {
    /// Items by identifier
    pub items: HashMap<Identifier, Item>,
    /// Layouts by identifier
    pub layouts: HashMap<Identifier, Layout>,
    /// Site configuration
    pub config: Arc<Configuration>,
    /// Reps per item identifier
    pub reps_by_item: HashMap<Identifier, Vec<Arc<ItemRep>>>,
    /// Reps by identity
    pub reps_by_ref: HashMap<RepRef, Arc<ItemRep>>,
    /// Current action plans
    pub plans: HashMap<PlanKey, ActionSequence>,
    /// Registered filters
    pub filters: FilterRegistry,
    /// Shared dependency graph
    pub deps: Arc<DependencyStore>,
    /// In-run published content (and suspension point)
    pub content_store: Arc<CompiledContentStore>,
    /// Cross-run content cache
    pub cache: Arc<CompiledContentCache>,
    /// Reps known to need recompilation
    pub outdatedness: Arc<OutdatednessStore>,
    /// Snapshot writer
    pub writer: Arc<dyn Writer>,
    /// Event sink
    pub events: Arc<dyn EventSink>,
    /// Run counters
    pub metrics: Arc<RunMetrics>,
}

impl RunContext {
    /// The rep reads of `identifier` resolve to: the rep named
    /// `default`, or the item's first rep
    pub fn default_rep_of(&self, identifier: &Identifier) -> Option<&Arc<ItemRep>> {
        let reps = self.reps_by_item.get(identifier)?;
        reps.iter()
            .find(|rep| rep.name() == "default")
            .or_else(|| reps.first())
    }
}

/// The engine view handed to running filters
///
/// Every read bounces the dependency tracker, so the document on top of
/// the compilation stack picks up a props-annotated edge.
pub struct CompilationView<'a> {
    ctx: &'a RunContext,
    tracker: &'a DependencyTracker,
    rep: RepRef,
}

impl<'a> CompilationView<'a> {
    fn new(ctx: &'a RunContext, tracker: &'a DependencyTracker, rep: RepRef) -> Self {
        Self { ctx, tracker, rep }
    }

    fn document_ref(&self, identifier: &Identifier) -> Result<ObjectRef, FilterError> {
        if self.ctx.items.contains_key(identifier) {
            Ok(ObjectRef::Item(identifier.clone()))
        } else if self.ctx.layouts.contains_key(identifier) {
            Ok(ObjectRef::Layout(identifier.clone()))
        } else {
            Err(FilterError::UnknownDocument(identifier.clone()))
        }
    }

    fn document_attributes(
        &self,
        identifier: &Identifier,
    ) -> Result<&stele_types::Attributes, FilterError> {
        if let Some(item) = self.ctx.items.get(identifier) {
            Ok(item.attributes())
        } else if let Some(layout) = self.ctx.layouts.get(identifier) {
            Ok(layout.attributes())
        } else {
            Err(FilterError::UnknownDocument(identifier.clone()))
        }
    }
}

impl CompilationContext for CompilationView<'_> {
    fn compiled_content_of(
        &self,
        identifier: &Identifier,
        snapshot: Option<&SnapshotName>,
    ) -> Result<CompiledContent, FilterError> {
        let target = self
            .ctx
            .default_rep_of(identifier)
            .ok_or_else(|| FilterError::UnknownDocument(identifier.clone()))?;

        self.tracker.bounce(
            ObjectRef::Item(identifier.clone()),
            DependencyProps::compiled_content(),
        );

        let snapshot = snapshot.cloned().unwrap_or_else(SnapshotName::last);
        if !target.has_snapshot(&snapshot) {
            return Err(FilterError::NoSuchSnapshot {
                rep: target.reference(),
                snapshot,
            });
        }

        self.ctx
            .content_store
            .get_or_subscribe(&target.reference(), &snapshot, self.rep.clone())
            .ok_or(FilterError::UnmetDependency {
                rep: target.reference(),
                snapshot,
            })
    }

    fn attribute_of(
        &self,
        identifier: &Identifier,
        key: &str,
    ) -> Result<Option<serde_json::Value>, FilterError> {
        let reference = self.document_ref(identifier)?;
        self.tracker.bounce(
            reference,
            DependencyProps::attributes(AttributesProp::keys([key])),
        );
        Ok(self.document_attributes(identifier)?.get(key))
    }

    fn raw_content_of(&self, identifier: &Identifier) -> Result<String, FilterError> {
        let reference = self.document_ref(identifier)?;
        self.tracker.bounce(reference, DependencyProps::raw_content());

        let content = if let Some(item) = self.ctx.items.get(identifier) {
            item.content()
        } else if let Some(layout) = self.ctx.layouts.get(identifier) {
            layout.content()
        } else {
            return Err(FilterError::UnknownDocument(identifier.clone()));
        };
        match content {
            Content::Textual(text) => text
                .string()
                .map(str::to_string)
                .map_err(|err| FilterError::Message(err.to_string())),
            Content::Binary(_) => Err(FilterError::ContentKindMismatch {
                name: "raw_content".into(),
                kind: "binary",
            }),
        }
    }

    fn path_of(&self, identifier: &Identifier) -> Result<Option<std::path::PathBuf>, FilterError> {
        let target = self
            .ctx
            .default_rep_of(identifier)
            .ok_or_else(|| FilterError::UnknownDocument(identifier.clone()))?;

        self.tracker
            .bounce(ObjectRef::Item(identifier.clone()), DependencyProps::path());

        let last = target.paths_for(&SnapshotName::last());
        Ok(last
            .first()
            .cloned()
            .or_else(|| target.all_paths().first().cloned()))
    }

    fn config_setting(&self, key: &str) -> Option<serde_json::Value> {
        self.tracker.bounce(
            ObjectRef::Config,
            DependencyProps::attributes(AttributesProp::keys([key])),
        );
        self.ctx.config.get(key)
    }
}

/// What one `step` call produced
#[derive(Debug)]
pub enum StepOutcome {
    /// The action sequence finished
    Completed,
    /// Execution paused on unavailable compiled content
    Suspended {
        /// The rep whose content is needed
        target: RepRef,
        /// The snapshot being waited on
        snapshot: SnapshotName,
    },
    /// The rep failed; it stays non-compiled
    Failed(CompilationError),
}

/// The resumable computation for one rep
pub struct RepExecution {
    rep: Arc<ItemRep>,
    tracker: DependencyTracker,
    next_action: usize,
    content: CompiledContent,
    entries: u32,
    last_wait: Option<(RepRef, SnapshotName)>,
    wait_repeats: u32,
    released: Vec<RepRef>,
}

impl RepExecution {
    /// Start an execution positioned before the first action
    pub fn new(ctx: &RunContext, rep: Arc<ItemRep>) -> Result<Self, CompilationError> {
        let content = match rep.item().content() {
            Content::Textual(text) => match text.string() {
                Ok(s) => CompiledContent::Textual(s.to_string()),
                Err(err) => {
                    return Err(CompilationError {
                        rep: rep.reference(),
                        stack: Vec::new(),
                        source: FilterError::Message(err.to_string()),
                    })
                }
            },
            Content::Binary(binary) => CompiledContent::Binary(binary.path().to_path_buf()),
        };

        let tracker = DependencyTracker::new(ctx.deps.clone());
        tracker.enter(ObjectRef::Item(rep.item().identifier().clone()));

        Ok(Self {
            rep,
            tracker,
            next_action: 0,
            content,
            entries: 0,
            last_wait: None,
            wait_repeats: 0,
            released: Vec::new(),
        })
    }

    /// The rep being executed
    pub fn rep(&self) -> &Arc<ItemRep> {
        &self.rep
    }

    /// How many times this execution has been entered
    pub fn entries(&self) -> u32 {
        self.entries
    }

    /// Record a suspension; returns how often this exact dependency has
    /// recurred without the execution advancing
    ///
    /// A recurring identical wait means no forward progress: the
    /// scheduler uses the count to conclude deadlock.
    pub fn note_suspension(&mut self, target: &RepRef, snapshot: &SnapshotName) -> u32 {
        let key = (target.clone(), snapshot.clone());
        if self.last_wait.as_ref() == Some(&key) {
            self.wait_repeats += 1;
        } else {
            self.last_wait = Some(key);
            self.wait_repeats = 0;
        }
        self.wait_repeats
    }

    /// Reps released by snapshots published since the last drain
    pub fn drain_released(&mut self) -> Vec<RepRef> {
        std::mem::take(&mut self.released)
    }

    /// Run actions until completion, suspension, or failure
    pub fn step(&mut self, ctx: &RunContext) -> StepOutcome {
        self.entries += 1;

        let rep_ref = self.rep.reference();
        let Some(plan) = ctx.plans.get(&PlanKey::Rep(rep_ref.clone())) else {
            return StepOutcome::Failed(self.fail(FilterError::Message(format!(
                "no action sequence for {rep_ref}"
            ))));
        };
        let actions = plan.actions().to_vec();

        while let Some(action) = actions.get(self.next_action) {
            tracing::trace!(rep = %rep_ref, action = %action, index = self.next_action, "executing");
            match action {
                ProcessingAction::Filter { name, args } => {
                    match self.apply_filter(ctx, name, args, None) {
                        Ok(content) => {
                            self.content = content;
                            self.next_action += 1;
                        }
                        Err(FilterError::UnmetDependency { rep, snapshot }) => {
                            return StepOutcome::Suspended {
                                target: rep,
                                snapshot,
                            };
                        }
                        Err(err) => return StepOutcome::Failed(self.fail(err)),
                    }
                }

                ProcessingAction::Layout { layout, filter } => {
                    let Some(layout_doc) = ctx.layouts.get(layout) else {
                        return StepOutcome::Failed(
                            self.fail(FilterError::UnknownDocument(layout.clone())),
                        );
                    };
                    let Some((filter_name, args)) = filter else {
                        return StepOutcome::Failed(self.fail(FilterError::Message(format!(
                            "layout action for {layout} carries no filter"
                        ))));
                    };

                    // Using a layout means depending on its content and
                    // on how it renders.
                    self.tracker.bounce(
                        layout_doc.reference(),
                        DependencyProps {
                            raw_content: true,
                            compiled_content: true,
                            ..DependencyProps::default()
                        },
                    );

                    self.tracker.enter(layout_doc.reference());
                    let result = self.apply_filter(ctx, filter_name, args, Some(layout_doc));

                    match result {
                        Ok(content) => {
                            self.tracker.exit();
                            self.content = content;
                            self.next_action += 1;
                        }
                        Err(FilterError::UnmetDependency { rep, snapshot }) => {
                            self.tracker.exit();
                            return StepOutcome::Suspended {
                                target: rep,
                                snapshot,
                            };
                        }
                        Err(err) => {
                            // Snapshot the stack while the layout is
                            // still on it
                            let failure = self.fail(err);
                            self.tracker.exit();
                            return StepOutcome::Failed(failure);
                        }
                    }
                }

                ProcessingAction::Snapshot { names, .. } => {
                    for name in names {
                        if let Err(err) = self.publish(ctx, name) {
                            return StepOutcome::Failed(self.fail(err));
                        }
                    }
                    self.next_action += 1;
                }
            }
        }

        self.tracker.exit();
        StepOutcome::Completed
    }

    fn apply_filter(
        &self,
        ctx: &RunContext,
        name: &str,
        args: &FilterArgs,
        layout: Option<&Layout>,
    ) -> Result<CompiledContent, FilterError> {
        let filter = ctx.filters.get(name)?;

        let io = filter.io();
        if io.binary_input != self.content.is_binary() {
            return Err(FilterError::ContentKindMismatch {
                name: name.to_string(),
                kind: if self.content.is_binary() {
                    "binary"
                } else {
                    "textual"
                },
            });
        }

        let view = CompilationView::new(ctx, &self.tracker, self.rep.reference());
        let input = FilterInput {
            content: &self.content,
            args,
            layout,
            item: self.rep.item(),
            rep: self.rep.reference(),
        };
        filter.run(input, &view).map(Into::into)
    }

    /// Publish the working content under `name` and write it out
    fn publish(&mut self, ctx: &RunContext, name: &SnapshotName) -> Result<(), FilterError> {
        let rep_ref = self.rep.reference();
        let released = ctx
            .content_store
            .set(&rep_ref, name, self.content.clone())
            .map_err(|err| FilterError::Message(err.to_string()))?;
        self.released.extend(released);

        for path in self.rep.paths_for(name) {
            let outcome = ctx
                .writer
                .write(&self.content, &path)
                .map_err(|source| FilterError::Io {
                    path: path.clone(),
                    source,
                })?;
            ctx.metrics.record_write(outcome);
            ctx.events.emit(&crate::events::CompilerEvent::Written {
                rep: rep_ref.clone(),
                path,
                outcome,
            });
        }
        Ok(())
    }

    fn fail(&self, source: FilterError) -> CompilationError {
        CompilationError {
            rep: self.rep.reference(),
            stack: self.tracker.stack(),
            source,
        }
    }
}
