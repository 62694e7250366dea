//! Compilation scheduler
//!
//! Drives every rep through the phase stack: cache lookup, resumable
//! action execution, and completion (cache write + bookkeeping). A
//! fixed pool of workers pulls reps from a shared queue. A rep that
//! suspends on an unmet dependency does not hold a worker: its
//! execution parks in a wait table, the blocking target is promoted to
//! the front of the queue, and publication of the awaited snapshot
//! requeues the parked rep.
//!
//! A suspension that closes a cycle in the wait-for graph aborts the
//! run with the implicated reps; a bound on identical re-suspensions
//! backstops the detection. Per-rep failures are collected and do not
//! abort sibling reps.

use crate::errors::{CompilationError, CompilerError, FilterError};
use crate::events::CompilerEvent;
use crate::exec::{RepExecution, RunContext, StepOutcome};
use parking_lot::{Condvar, Mutex};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use stele_types::{ItemRep, RepRef, SnapshotName};

/// How often one rep may re-suspend on the same unmet dependency
/// before the run is declared stuck (backstop behind the wait-for
/// graph check)
const MAX_WAIT_REPEATS: u32 = 3;

/// What one run of the scheduler produced
#[derive(Debug, Default)]
pub struct SchedulerOutcome {
    /// Reps compiled by executing their plans
    pub compiled: Vec<RepRef>,
    /// Reps satisfied from the cross-run cache
    pub cached: Vec<RepRef>,
    /// Per-rep failures (the reps stay non-compiled)
    pub failures: Vec<CompilationError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RepStatus {
    /// Waiting in the queue
    Pending,
    /// A worker is driving it
    Running,
    /// Running, and its awaited content arrived meanwhile
    WakePending,
    /// Suspended, waiting for a snapshot
    Parked,
    Done,
    Failed,
}

struct SchedState {
    queue: VecDeque<RepRef>,
    status: HashMap<RepRef, RepStatus>,
    executions: HashMap<RepRef, RepExecution>,
    /// parked rep → (target rep, awaited snapshot)
    wait_on: HashMap<RepRef, (RepRef, SnapshotName)>,
    remaining: usize,
    outcome: SchedulerOutcome,
    fatal: Option<CompilerError>,
}

impl SchedState {
    fn requeue(&mut self, rep: &RepRef, front: bool) {
        match self.status.get(rep) {
            Some(RepStatus::Parked) => {
                self.status.insert(rep.clone(), RepStatus::Pending);
                self.wait_on.remove(rep);
                // Resumed reps go to the front: someone is waiting on
                // their output
                self.queue.push_front(rep.clone());
            }
            Some(RepStatus::Running) => {
                self.status.insert(rep.clone(), RepStatus::WakePending);
            }
            Some(RepStatus::Pending) if front => {
                self.queue.retain(|r| r != rep);
                self.queue.push_front(rep.clone());
            }
            _ => {}
        }
    }

    /// Walk the wait-for graph from `start`; returns the chain if it
    /// leads back to `origin`
    fn find_cycle(&self, origin: &RepRef, start: &RepRef) -> Option<Vec<RepRef>> {
        let mut chain = vec![origin.clone()];
        let mut current = start.clone();
        loop {
            chain.push(current.clone());
            if current == *origin {
                return Some(chain);
            }
            match self.wait_on.get(&current) {
                Some((next, _)) => current = next.clone(),
                None => return None,
            }
        }
    }

    fn finish(&mut self, rep: &RepRef, status: RepStatus) {
        self.status.insert(rep.clone(), status);
        self.executions.remove(rep);
        self.wait_on.remove(rep);
        self.remaining -= 1;
    }
}

/// Compile every rep in the run context
///
/// Returns per-rep results; `Err` only for run-fatal conditions
/// (circular dependencies, internal inconsistencies).
pub fn compile_reps(ctx: &RunContext, workers: usize) -> Result<SchedulerOutcome, CompilerError> {
    let mut reps: Vec<&Arc<ItemRep>> = ctx.reps_by_ref.values().collect();
    reps.sort_by_key(|rep| rep.reference());

    let state = Mutex::new(SchedState {
        queue: reps.iter().map(|rep| rep.reference()).collect(),
        status: reps
            .iter()
            .map(|rep| (rep.reference(), RepStatus::Pending))
            .collect(),
        executions: HashMap::new(),
        wait_on: HashMap::new(),
        remaining: reps.len(),
        outcome: SchedulerOutcome::default(),
        fatal: None,
    });
    let work_ready = Condvar::new();

    let workers = workers.max(1);
    std::thread::scope(|scope| {
        for index in 0..workers {
            let state = &state;
            let work_ready = &work_ready;
            scope.spawn(move || {
                tracing::debug!(worker = index, "compilation worker started");
                worker_loop(ctx, state, work_ready);
            });
        }
    });

    let mut state = state.into_inner();
    if let Some(fatal) = state.fatal.take() {
        return Err(fatal);
    }
    state.outcome.failures.sort_by(|a, b| a.rep.cmp(&b.rep));
    state.outcome.compiled.sort();
    state.outcome.cached.sort();
    Ok(state.outcome)
}

fn worker_loop(ctx: &RunContext, state: &Mutex<SchedState>, work_ready: &Condvar) {
    loop {
        // Claim a rep to drive
        let (rep_ref, execution) = {
            let mut guard = state.lock();
            let claimed = loop {
                if guard.fatal.is_some() || guard.remaining == 0 {
                    work_ready.notify_all();
                    return;
                }
                match pop_runnable(&mut guard) {
                    Some(claimed) => break claimed,
                    None => work_ready.wait(&mut guard),
                }
            };
            claimed
        };

        let Some(rep) = ctx.reps_by_ref.get(&rep_ref) else {
            let mut guard = state.lock();
            guard.fatal = Some(CompilerError::Internal(format!(
                "scheduled rep {rep_ref} is unknown"
            )));
            work_ready.notify_all();
            return;
        };

        let resuming = execution.is_some();
        if resuming {
            ctx.events.emit(&CompilerEvent::Resumed { rep: rep_ref.clone() });
            ctx.metrics.record_resume();
        } else {
            ctx.events.emit(&CompilerEvent::CompilationStarted { rep: rep_ref.clone() });
        }

        drive(ctx, state, work_ready, rep.clone(), execution);
    }
}

fn pop_runnable(state: &mut SchedState) -> Option<(RepRef, Option<RepExecution>)> {
    while let Some(rep) = state.queue.pop_front() {
        if state.status.get(&rep) != Some(&RepStatus::Pending) {
            continue; // stale queue entry
        }
        state.status.insert(rep.clone(), RepStatus::Running);
        let execution = state.executions.remove(&rep);
        return Some((rep, execution));
    }
    None
}

/// Run one rep through the phase stack until it completes, suspends,
/// or fails
fn drive(
    ctx: &RunContext,
    state: &Mutex<SchedState>,
    work_ready: &Condvar,
    rep: Arc<ItemRep>,
    execution: Option<RepExecution>,
) {
    let rep_ref = rep.reference();

    let mut execution = match execution {
        Some(execution) => execution,
        None => {
            // Cache phase: only reps not judged outdated may reuse the
            // previous run's content, and only with an exactly matching
            // snapshot shape.
            match cache_phase(ctx, &rep) {
                Ok(Some(released)) => {
                    let mut guard = state.lock();
                    guard.finish(&rep_ref, RepStatus::Done);
                    guard.outcome.cached.push(rep_ref.clone());
                    for waiter in released {
                        guard.requeue(&waiter, false);
                    }
                    drop(guard);
                    ctx.events.emit(&CompilerEvent::CacheUsed { rep: rep_ref });
                    ctx.metrics.record_cache_hit();
                    work_ready.notify_all();
                    return;
                }
                Ok(None) => {}
                Err(fatal) => {
                    let mut guard = state.lock();
                    guard.fatal = Some(fatal);
                    drop(guard);
                    work_ready.notify_all();
                    return;
                }
            }

            match RepExecution::new(ctx, rep.clone()) {
                Ok(execution) => execution,
                Err(err) => {
                    fail_rep(ctx, state, &rep_ref, err);
                    work_ready.notify_all();
                    return;
                }
            }
        }
    };

    let span = tracing::debug_span!("compile", rep = %rep_ref);
    let outcome = span.in_scope(|| execution.step(ctx));
    let released = execution.drain_released();

    match outcome {
        StepOutcome::Completed => {
            if !rep.mark_compiled() {
                let mut guard = state.lock();
                guard.fatal = Some(CompilerError::Internal(format!(
                    "{rep_ref} was marked compiled twice"
                )));
                drop(guard);
                work_ready.notify_all();
                return;
            }

            completion_phase(ctx, &rep_ref);

            let mut guard = state.lock();
            guard.finish(&rep_ref, RepStatus::Done);
            guard.outcome.compiled.push(rep_ref.clone());
            for waiter in &released {
                guard.requeue(waiter, false);
            }
            drop(guard);
            ctx.events.emit(&CompilerEvent::Compiled { rep: rep_ref });
            ctx.metrics.record_compiled();
        }

        StepOutcome::Suspended { target, snapshot } => {
            ctx.events.emit(&CompilerEvent::Suspended {
                rep: rep_ref.clone(),
                target: target.clone(),
                snapshot: snapshot.clone(),
            });
            ctx.metrics.record_suspension();

            let repeats = execution.note_suspension(&target, &snapshot);

            let mut guard = state.lock();
            if repeats >= MAX_WAIT_REPEATS {
                guard.fatal = Some(CompilerError::CircularDependency {
                    cycle: vec![rep_ref, target],
                });
                drop(guard);
                work_ready.notify_all();
                return;
            }
            for waiter in &released {
                guard.requeue(waiter, false);
            }

            let woken = guard.status.get(&rep_ref) == Some(&RepStatus::WakePending);
            if woken || ctx.content_store.contains(&target, &snapshot) {
                // The awaited content arrived while we were stepping
                guard.status.insert(rep_ref.clone(), RepStatus::Pending);
                guard.executions.insert(rep_ref.clone(), execution);
                guard.queue.push_front(rep_ref);
            } else if guard.status.get(&target) == Some(&RepStatus::Failed) {
                drop(guard);
                fail_rep(
                    ctx,
                    state,
                    &rep_ref,
                    CompilationError {
                        rep: rep_ref.clone(),
                        stack: Vec::new(),
                        source: FilterError::Message(format!(
                            "dependency {target} failed to compile"
                        )),
                    },
                );
                work_ready.notify_all();
                return;
            } else if let Some(cycle) = guard.find_cycle(&rep_ref, &target) {
                guard.fatal = Some(CompilerError::CircularDependency { cycle });
            } else {
                guard.status.insert(rep_ref.clone(), RepStatus::Parked);
                guard.executions.insert(rep_ref.clone(), execution);
                guard.wait_on.insert(rep_ref, (target.clone(), snapshot));
                // Hand the blocking target to the fast path
                guard.requeue(&target, true);
            }
            drop(guard);
        }

        StepOutcome::Failed(err) => {
            let mut guard = state.lock();
            for waiter in &released {
                guard.requeue(waiter, false);
            }
            drop(guard);
            fail_rep(ctx, state, &rep_ref, err);
        }
    }

    work_ready.notify_all();
}

/// Phase 1: satisfy a non-outdated rep from the cross-run cache
fn cache_phase(
    ctx: &RunContext,
    rep: &Arc<ItemRep>,
) -> Result<Option<Vec<RepRef>>, CompilerError> {
    let rep_ref = rep.reference();
    if ctx.outdatedness.contains(&rep_ref) {
        return Ok(None);
    }
    if !ctx.cache.full_cache_available(rep) {
        return Ok(None);
    }
    let Some(contents) = ctx.cache.get_all(&rep_ref) else {
        return Ok(None);
    };

    let released = ctx
        .content_store
        .set_all(&rep_ref, contents)
        .map_err(|err| CompilerError::Internal(err.to_string()))?;

    if !rep.mark_compiled() {
        return Err(CompilerError::Internal(format!(
            "{rep_ref} was marked compiled twice"
        )));
    }
    Ok(Some(released))
}

/// Phase 4: persist a freshly compiled rep's content for the next run
fn completion_phase(ctx: &RunContext, rep_ref: &RepRef) {
    let contents = ctx.content_store.get_all(rep_ref);
    if let Err(err) = ctx.cache.store(rep_ref, &contents) {
        // Best effort: a rep that compiled and wrote its outputs is not
        // failed because the cache could not keep its content.
        tracing::warn!(rep = %rep_ref, error = %err, "failed to cache compiled content");
    }
    ctx.outdatedness.remove(rep_ref);
}

/// Record a failure and cascade it to reps parked on this one
fn fail_rep(ctx: &RunContext, state: &Mutex<SchedState>, rep_ref: &RepRef, err: CompilationError) {
    tracing::warn!(rep = %rep_ref, error = %err, "rep failed");

    let mut guard = state.lock();
    guard.finish(rep_ref, RepStatus::Failed);
    guard.outcome.failures.push(err);
    drop(guard);
    ctx.events.emit(&CompilerEvent::Failed { rep: rep_ref.clone() });
    ctx.metrics.record_failure();

    // Anything parked on this rep can never resume
    loop {
        let orphan = {
            let guard = state.lock();
            guard
                .wait_on
                .iter()
                .find(|(_, (target, _))| target == rep_ref)
                .map(|(waiter, _)| waiter.clone())
        };
        let Some(waiter) = orphan else { break };
        fail_rep(
            ctx,
            state,
            &waiter,
            CompilationError {
                rep: waiter.clone(),
                stack: Vec::new(),
                source: FilterError::Message(format!("dependency {rep_ref} failed to compile")),
            },
        );
    }
}
