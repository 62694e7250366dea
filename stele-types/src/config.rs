//! Site configuration

use crate::document::{AttributeMap, ModelError};
use crate::identifier::Identifier;
use parking_lot::RwLock;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Site-wide settings
///
/// A document-like singleton: a key → value map with the same checksum
/// and dependency semantics as a document's attributes, plus the output
/// directory and the set of identifier patterns flagged always-outdated.
/// Frozen alongside the documents once preprocessing completes.
#[derive(Debug)]
pub struct Configuration {
    settings: RwLock<AttributeMap>,
    output_dir: PathBuf,
    always_outdated: Vec<String>,
    frozen: AtomicBool,
}

impl Configuration {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            settings: RwLock::new(AttributeMap::new()),
            output_dir: output_dir.into(),
            always_outdated: Vec::new(),
            frozen: AtomicBool::new(false),
        }
    }

    pub fn with_settings(output_dir: impl Into<PathBuf>, settings: AttributeMap) -> Self {
        Self {
            settings: RwLock::new(settings),
            output_dir: output_dir.into(),
            always_outdated: Vec::new(),
            frozen: AtomicBool::new(false),
        }
    }

    /// Flag identifiers as always outdated
    ///
    /// Patterns are exact identifiers, or prefixes ending in `*`.
    pub fn with_always_outdated(mut self, patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.always_outdated = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.settings.read().get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) -> Result<(), ModelError> {
        if self.frozen.load(Ordering::Acquire) {
            return Err(ModelError::FrozenConfiguration);
        }
        self.settings.write().insert(key.into(), value);
        Ok(())
    }

    pub fn with_map<R>(&self, f: impl FnOnce(&AttributeMap) -> R) -> R {
        f(&self.settings.read())
    }

    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    /// Whether `identifier` matches an always-outdated pattern
    pub fn always_outdated(&self, identifier: &Identifier) -> bool {
        self.always_outdated.iter().any(|pattern| {
            match pattern.strip_suffix('*') {
                Some(prefix) => identifier.as_str().starts_with(prefix),
                None => identifier.as_str() == pattern,
            }
        })
    }
}
