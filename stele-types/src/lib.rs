//! Shared types for stele
//!
//! This crate provides the document model used across the stele engine:
//! identifiers, items and layouts, compilation variants ("reps") with
//! their snapshot declarations, processing actions, and the dependency
//! props that record why one document depends on another.
//!
//! Everything here is data with invariants; behavior (checksumming,
//! dependency tracking, scheduling) lives in `stele-incremental` and
//! `stele-compiler`.

pub mod action;
pub mod content;
pub mod document;
pub mod identifier;
pub mod props;
pub mod reference;
pub mod rep;
pub mod snippet;

mod config;

pub use action::{ActionSequence, FilterArgs, ProcessingAction};
pub use config::Configuration;
pub use content::{BinaryContent, Content, ContentError, TextualContent};
pub use document::{AttributeMap, Attributes, Document, DocumentKind, Item, Layout, ModelError};
pub use identifier::Identifier;
pub use props::{AttributesProp, DependencyProps};
pub use reference::{Checksum, ObjectRef, RepRef};
pub use rep::{ItemRep, RepShape, SnapshotDef, SnapshotName};
pub use snippet::CodeSnippet;
