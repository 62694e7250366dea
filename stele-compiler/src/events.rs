//! Run event sink
//!
//! The scheduler reports progress through an explicit sink handed in by
//! the caller, not through ambient global state. Sinks must be cheap
//! and non-blocking; they run on worker threads.

use crate::interfaces::WriteOutcome;
use std::fmt;
use std::path::PathBuf;
use stele_types::{RepRef, SnapshotName};

/// Something that happened during a run
#[derive(Debug, Clone)]
pub enum CompilerEvent {
    /// A rep entered the scheduler
    CompilationStarted { rep: RepRef },
    /// A rep was satisfied from the cross-run cache
    CacheUsed { rep: RepRef },
    /// A rep paused on unavailable compiled content
    Suspended {
        rep: RepRef,
        target: RepRef,
        snapshot: SnapshotName,
    },
    /// A previously suspended rep continued
    Resumed { rep: RepRef },
    /// A rep finished compiling
    Compiled { rep: RepRef },
    /// A rep's compilation failed
    Failed { rep: RepRef },
    /// A final snapshot was written out
    Written {
        rep: RepRef,
        path: PathBuf,
        outcome: WriteOutcome,
    },
}

impl fmt::Display for CompilerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompilerEvent::CompilationStarted { rep } => write!(f, "started {rep}"),
            CompilerEvent::CacheUsed { rep } => write!(f, "cached {rep}"),
            CompilerEvent::Suspended { rep, target, snapshot } => {
                write!(f, "suspended {rep} on {target}:{snapshot}")
            }
            CompilerEvent::Resumed { rep } => write!(f, "resumed {rep}"),
            CompilerEvent::Compiled { rep } => write!(f, "compiled {rep}"),
            CompilerEvent::Failed { rep } => write!(f, "failed {rep}"),
            CompilerEvent::Written { path, outcome, .. } => {
                write!(f, "wrote {} ({outcome})", path.display())
            }
        }
    }
}

/// Receiver for run events
pub trait EventSink: Send + Sync {
    /// Handle one event
    fn emit(&self, event: &CompilerEvent);
}

/// Sink that drops everything
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &CompilerEvent) {}
}

/// Sink that forwards events to `tracing` at debug level
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: &CompilerEvent) {
        tracing::debug!(event = %event, "compiler event");
    }
}
