//! Stele compilation scheduler
//!
//! Drives the incremental compilation of item reps: decides nothing
//! itself about *what* is outdated (that is `stele-incremental`'s
//! job) but executes exactly the required work, resolving forward
//! references between documents by suspending and resuming the exact
//! point of computation that requested unavailable content.
//!
//! # Shape of a run
//!
//! ```text
//! load → preprocess → freeze → build reps/plans → load stores
//!      → checksums → outdatedness → prune → compile → persist
//! ```
//!
//! Compilation itself runs per rep through a phase stack: a cache
//! lookup for reps that are not outdated, then resumable execution of
//! the rep's action sequence on a bounded worker pool, then persistence
//! of the produced snapshots into the cross-run cache.
//!
//! The crate's boundary is the set of collaborator traits in
//! [`interfaces`]: the action provider, data source, filters, and
//! writer are all supplied by the caller.

pub mod compiler;
pub mod errors;
pub mod events;
pub mod exec;
pub mod interfaces;
pub mod metrics;
pub mod scheduler;
pub mod stages;

pub use compiler::{Compiler, RunSummary};
pub use errors::{CompilationError, CompilerError, FilterError};
pub use events::{CompilerEvent, EventSink, NullSink, TracingSink};
pub use exec::{CompilationView, RepExecution, RunContext, StepOutcome};
pub use interfaces::{
    ActionProvider, CompilationContext, DataSource, Filter, FilterInput, FilterIo, FilterOutput,
    FilterRegistry, SiteData, WriteOutcome, Writer,
};
pub use metrics::{MetricsSnapshot, RunMetrics};
pub use scheduler::{compile_reps, SchedulerOutcome};
