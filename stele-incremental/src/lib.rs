//! Stele incremental state
//!
//! This crate holds the persisted state that makes stele incremental:
//! what each object's content hashed to on the previous run, which
//! documents depend on which, which reps are known to be outdated, and
//! what their compiled content was. The compilation scheduler in
//! `stele-compiler` consults these stores to decide what to recompute
//! and to skip everything else.
//!
//! # Stores
//!
//! - [`ChecksumStore`]: previous-run digests per object and per
//!   attribute; change detection is hash inequality, never mtime.
//! - [`DependencyStore`] + [`DependencyTracker`]: props-annotated edges
//!   recording which kinds of access one document made to another.
//! - [`OutdatednessStore`] + [`OutdatednessChecker`]: the persisted
//!   "known outdated" set and the ordered rule battery that populates
//!   it.
//! - [`CompiledContentStore`]: in-run published snapshot content, also
//!   the suspension/resumption synchronization point.
//! - [`CompiledContentCache`]: cross-run snapshot content, only trusted
//!   when its shape exactly matches the rep's current snapshot defs.
//!
//! All stores are versioned on disk; an envelope written by an
//! incompatible version is discarded (cold start) rather than
//! misinterpreted. Stores are scoped per output location.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

pub mod checksum;
pub mod compiled_cache;
pub mod content_store;
pub mod dependency;
pub mod outdatedness;
pub mod plans;
pub mod store;

pub use checksum::{ChecksumStore, Checksummer};
pub use compiled_cache::{CacheError, CompiledContentCache};
pub use content_store::{CompiledContent, CompiledContentStore, ContentStoreError};
pub use dependency::{Dependency, DependencyStore, DependencyTracker};
pub use outdatedness::{
    OutdatednessChecker, OutdatednessReason, OutdatednessStatus, OutdatednessStore,
};
pub use plans::{ActionSequenceStore, PlanKey};
pub use store::{StoreError, StoreLocation};
