//! Dependency props
//!
//! Props record *why* one document depends on another: which kinds of
//! access occurred. Outdatedness only propagates along a dependency edge
//! when the props of the change intersect the props recorded on the
//! edge, so a path-only dependency is untouched by a content-only
//! change.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Attribute access recorded on a dependency
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AttributesProp {
    /// No attribute access
    #[default]
    None,
    /// Only these keys were read
    Keys(BTreeSet<String>),
    /// All attributes (whole-map access)
    All,
}

impl AttributesProp {
    pub fn keys(keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        AttributesProp::Keys(keys.into_iter().map(Into::into).collect())
    }

    pub fn is_active(&self) -> bool {
        !matches!(self, AttributesProp::None)
    }

    /// Union; key sets accumulate and escalate to `All`
    pub fn merge(&mut self, other: &AttributesProp) {
        match other {
            AttributesProp::None => {}
            AttributesProp::All => *self = AttributesProp::All,
            AttributesProp::Keys(theirs) => match self {
                AttributesProp::All => {}
                AttributesProp::Keys(mine) => mine.extend(theirs.iter().cloned()),
                AttributesProp::None => *self = AttributesProp::Keys(theirs.clone()),
            },
        }
    }

    /// Whether an access described by `self` overlaps one described by `other`
    pub fn intersects(&self, other: &AttributesProp) -> bool {
        match (self, other) {
            (AttributesProp::None, _) | (_, AttributesProp::None) => false,
            (AttributesProp::All, other) => other.is_active(),
            (mine, AttributesProp::All) => mine.is_active(),
            (AttributesProp::Keys(mine), AttributesProp::Keys(theirs)) => {
                mine.intersection(theirs).next().is_some()
            }
        }
    }
}

/// The kinds of access one document made to another
///
/// Props accumulate monotonically within one dependency-tracking scope:
/// repeated accesses merge by union.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct DependencyProps {
    pub raw_content: bool,
    pub attributes: AttributesProp,
    pub compiled_content: bool,
    pub path: bool,
}

impl DependencyProps {
    pub fn raw_content() -> Self {
        Self {
            raw_content: true,
            ..Self::default()
        }
    }

    pub fn attributes(prop: AttributesProp) -> Self {
        Self {
            attributes: prop,
            ..Self::default()
        }
    }

    pub fn compiled_content() -> Self {
        Self {
            compiled_content: true,
            ..Self::default()
        }
    }

    pub fn path() -> Self {
        Self {
            path: true,
            ..Self::default()
        }
    }

    /// All access kinds at once
    pub fn all() -> Self {
        Self {
            raw_content: true,
            attributes: AttributesProp::All,
            compiled_content: true,
            path: true,
        }
    }

    pub fn is_active(&self) -> bool {
        self.raw_content || self.attributes.is_active() || self.compiled_content || self.path
    }

    /// Union with `other`
    pub fn merge(&mut self, other: &DependencyProps) {
        self.raw_content |= other.raw_content;
        self.attributes.merge(&other.attributes);
        self.compiled_content |= other.compiled_content;
        self.path |= other.path;
    }

    /// Whether any access kind is shared with `other`
    pub fn intersects(&self, other: &DependencyProps) -> bool {
        (self.raw_content && other.raw_content)
            || self.attributes.intersects(&other.attributes)
            || (self.compiled_content && other.compiled_content)
            || (self.path && other.path)
    }

    /// True when every access kind active in `self` is already active in
    /// `other` (used to skip rules whose props would add nothing)
    pub fn subsumed_by(&self, other: &DependencyProps) -> bool {
        if self.raw_content && !other.raw_content {
            return false;
        }
        if self.compiled_content && !other.compiled_content {
            return false;
        }
        if self.path && !other.path {
            return false;
        }
        match (&self.attributes, &other.attributes) {
            (AttributesProp::None, _) => true,
            (_, AttributesProp::All) => true,
            (AttributesProp::All, _) => false,
            (AttributesProp::Keys(_), AttributesProp::None) => false,
            (AttributesProp::Keys(mine), AttributesProp::Keys(theirs)) => {
                mine.is_subset(theirs)
            }
        }
    }
}

impl fmt::Display for DependencyProps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if self.raw_content {
            parts.push("raw_content".to_string());
        }
        match &self.attributes {
            AttributesProp::None => {}
            AttributesProp::All => parts.push("attributes".to_string()),
            AttributesProp::Keys(keys) => {
                parts.push(format!("attributes({})", keys.iter().cloned().collect::<Vec<_>>().join(",")));
            }
        }
        if self.compiled_content {
            parts.push("compiled_content".to_string());
        }
        if self.path {
            parts.push("path".to_string());
        }
        write!(f, "[{}]", parts.join(" "))
    }
}
