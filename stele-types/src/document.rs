//! Items, layouts, and their attribute maps

use crate::content::Content;
use crate::identifier::Identifier;
use crate::reference::ObjectRef;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Deref;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;

/// Ordered attribute key → value map
pub type AttributeMap = BTreeMap<String, Value>;

type AttributesThunk = Box<dyn FnOnce() -> AttributeMap + Send>;

/// Errors raised by the document model
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("document {0} is frozen and can no longer be modified")]
    Frozen(Identifier),

    #[error("configuration is frozen and can no longer be modified")]
    FrozenConfiguration,
}

/// A document's attributes
///
/// Attributes may be supplied eagerly or as a deferred computation that
/// is evaluated once, on first access, and memoized. After freezing,
/// mutation is rejected.
pub struct Attributes {
    thunk: Mutex<Option<AttributesThunk>>,
    map: RwLock<Option<AttributeMap>>,
    frozen: AtomicBool,
}

impl Attributes {
    pub fn from_map(map: AttributeMap) -> Self {
        Self {
            thunk: Mutex::new(None),
            map: RwLock::new(Some(map)),
            frozen: AtomicBool::new(false),
        }
    }

    pub fn empty() -> Self {
        Self::from_map(AttributeMap::new())
    }

    /// Attributes computed on first access
    pub fn deferred(f: impl FnOnce() -> AttributeMap + Send + 'static) -> Self {
        Self {
            thunk: Mutex::new(Some(Box::new(f))),
            map: RwLock::new(None),
            frozen: AtomicBool::new(false),
        }
    }

    /// Whether the map has been materialized yet
    pub fn forced(&self) -> bool {
        self.map.read().is_some()
    }

    fn force(&self) {
        if self.map.read().is_some() {
            return;
        }
        let mut thunk = self.thunk.lock();
        let mut map = self.map.write();
        if map.is_some() {
            return;
        }
        *map = Some(match thunk.take() {
            Some(f) => f(),
            None => AttributeMap::new(),
        });
    }

    /// Run `f` against the materialized map, forcing it if needed
    pub fn with<R>(&self, f: impl FnOnce(&AttributeMap) -> R) -> R {
        self.force();
        let guard = self.map.read();
        f(guard.as_ref().expect("attributes just forced"))
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.with(|map| map.get(key).cloned())
    }

    /// Set one attribute; fails once frozen
    pub fn set(&self, key: impl Into<String>, value: Value) -> Result<(), FrozenAttributes> {
        if self.frozen.load(Ordering::Acquire) {
            return Err(FrozenAttributes);
        }
        self.force();
        let mut guard = self.map.write();
        guard
            .as_mut()
            .expect("attributes just forced")
            .insert(key.into(), value);
        Ok(())
    }

    pub fn freeze(&self) {
        self.frozen.store(true, Ordering::Release);
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Attributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attributes")
            .field("forced", &self.forced())
            .field("frozen", &self.is_frozen())
            .finish()
    }
}

/// Mutation attempted after freeze
#[derive(Debug)]
pub struct FrozenAttributes;

/// Whether a document is an item or a layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    /// Produces output
    Item,
    /// Wraps/templates other content
    Layout,
}

/// A source document: identifier, content, attributes
///
/// Identity is `(kind, identifier)`. Content is immutable; attributes
/// are mutable until the document is frozen at the end of preprocessing.
#[derive(Debug)]
pub struct Document {
    kind: DocumentKind,
    identifier: Identifier,
    content: Content,
    attributes: Attributes,
}

impl Document {
    pub fn new(
        kind: DocumentKind,
        identifier: Identifier,
        content: Content,
        attributes: Attributes,
    ) -> Self {
        Self {
            kind,
            identifier,
            content,
            attributes,
        }
    }

    pub fn kind(&self) -> DocumentKind {
        self.kind
    }

    pub fn identifier(&self) -> &Identifier {
        &self.identifier
    }

    pub fn content(&self) -> &Content {
        &self.content
    }

    pub fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    pub fn reference(&self) -> ObjectRef {
        match self.kind {
            DocumentKind::Item => ObjectRef::Item(self.identifier.clone()),
            DocumentKind::Layout => ObjectRef::Layout(self.identifier.clone()),
        }
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: Value) -> Result<(), ModelError> {
        self.attributes
            .set(key, value)
            .map_err(|_| ModelError::Frozen(self.identifier.clone()))
    }

    pub fn freeze(&self) {
        self.attributes.freeze();
    }
}

impl PartialEq for Document {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind && self.identifier == other.identifier
    }
}

impl Eq for Document {}

/// An item: a document that produces output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item(Arc<Document>);

impl Item {
    pub fn new(identifier: impl Into<Identifier>, content: Content, attributes: Attributes) -> Self {
        Self(Arc::new(Document::new(
            DocumentKind::Item,
            identifier.into(),
            content,
            attributes,
        )))
    }
}

impl Deref for Item {
    type Target = Document;

    fn deref(&self) -> &Document {
        &self.0
    }
}

/// A layout: a document that wraps other content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout(Arc<Document>);

impl Layout {
    pub fn new(identifier: impl Into<Identifier>, content: Content, attributes: Attributes) -> Self {
        Self(Arc::new(Document::new(
            DocumentKind::Layout,
            identifier.into(),
            content,
            attributes,
        )))
    }
}

impl Deref for Layout {
    type Target = Document;

    fn deref(&self) -> &Document {
        &self.0
    }
}
