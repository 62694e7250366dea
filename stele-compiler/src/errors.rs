//! Error taxonomy
//!
//! `FilterError::UnmetDependency` is a control-flow signal: it triggers
//! suspension inside the scheduler and must never escape it. Everything
//! else is a real error. A `CompilationError` is recoverable at the run
//! level (the rep stays non-compiled, siblings continue); circular
//! dependencies and internal inconsistencies abort the run.

use std::path::PathBuf;
use stele_incremental::{CacheError, StoreError};
use stele_types::{Identifier, ObjectRef, RepRef, SnapshotName};
use thiserror::Error;

/// Errors a filter or the compilation context can raise
#[derive(Debug, Error)]
pub enum FilterError {
    /// Needed compiled content is not yet published (suspension signal)
    #[error("content of {rep} at snapshot {snapshot} is not yet available")]
    UnmetDependency {
        /// The rep whose content is needed
        rep: RepRef,
        /// The snapshot being read
        snapshot: SnapshotName,
    },

    /// A snapshot was requested that the rep never declares
    #[error("{rep} has no snapshot named {snapshot}")]
    NoSuchSnapshot { rep: RepRef, snapshot: SnapshotName },

    /// A referenced document does not exist
    #[error("no document with identifier {0}")]
    UnknownDocument(Identifier),

    /// A named filter is not registered
    #[error("no filter named {0}")]
    UnknownFilter(String),

    /// A filter was handed content of the wrong kind
    #[error("filter {name} cannot process {kind} content")]
    ContentKindMismatch { name: String, kind: &'static str },

    /// The filter itself failed
    #[error("{0}")]
    Message(String),

    /// I/O failure inside a filter or write step
    #[error("i/o error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A rep's action execution failed
///
/// Carries the offending rep and the live compilation call-stack at the
/// point of failure.
#[derive(Debug, Error)]
#[error("compilation of {rep} failed (stack: {})", format_stack(.stack))]
pub struct CompilationError {
    /// The rep whose compilation failed
    pub rep: RepRef,
    /// Documents being compiled at the point of failure, bottom first
    pub stack: Vec<ObjectRef>,
    /// The wrapped original error
    #[source]
    pub source: FilterError,
}

fn format_stack(stack: &[ObjectRef]) -> String {
    if stack.is_empty() {
        return "empty".to_string();
    }
    stack
        .iter()
        .map(|obj| obj.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

fn format_cycle(cycle: &[RepRef]) -> String {
    cycle
        .iter()
        .map(|rep| rep.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Fatal and run-level errors
#[derive(Debug, Error)]
pub enum CompilerError {
    /// Reps form a hard compiled-content cycle
    #[error("circular dependency between reps: {}", format_cycle(.cycle))]
    CircularDependency {
        /// The implicated reps, in wait order
        cycle: Vec<RepRef>,
    },

    /// Invariant violation; never silently recovered
    #[error("internal inconsistency: {0}")]
    Internal(String),

    /// The data source could not produce the document set
    #[error("failed to load site data: {0}")]
    Load(String),

    /// An action plan is not executable as supplied
    #[error("invalid action plan for {subject}: {message}")]
    InvalidPlan {
        /// The rep or layout the plan belongs to
        subject: String,
        /// What is wrong with it
        message: String,
    },

    /// A persisted store could not be written
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The compiled content cache could not be written
    #[error(transparent)]
    Cache(#[from] CacheError),
}
