//! Stable references to engine objects
//!
//! The persisted stores cannot hold live documents across runs; they key
//! everything by these reference types instead. A reference that no
//! longer resolves against the current document set is dangling, and
//! every consumer must be able to skip it.

use crate::identifier::Identifier;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Reference to a checksummable / dependable object
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectRef {
    Item(Identifier),
    Layout(Identifier),
    Config,
    CodeSnippet(String),
}

impl ObjectRef {
    pub fn identifier(&self) -> Option<&Identifier> {
        match self {
            ObjectRef::Item(id) | ObjectRef::Layout(id) => Some(id),
            ObjectRef::Config | ObjectRef::CodeSnippet(_) => None,
        }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectRef::Item(id) => write!(f, "item:{id}"),
            ObjectRef::Layout(id) => write!(f, "layout:{id}"),
            ObjectRef::Config => write!(f, "config"),
            ObjectRef::CodeSnippet(name) => write!(f, "snippet:{name}"),
        }
    }
}

/// Identity of an item rep: `(item identifier, rep name)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RepRef {
    pub item: Identifier,
    pub name: String,
}

impl RepRef {
    pub fn new(item: impl Into<Identifier>, name: impl Into<String>) -> Self {
        Self {
            item: item.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for RepRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.item, self.name)
    }
}

/// Hex-encoded content digest
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Checksum(String);

impl Checksum {
    pub fn new(hex: impl Into<String>) -> Self {
        Self(hex.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
