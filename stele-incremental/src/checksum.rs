//! Checksumming and the checksum store
//!
//! Change detection is hash inequality against the previous run,
//! never mtime. Digests are blake3 over a canonical byte encoding of
//! the object's current content and attributes; computing a document's
//! whole-object digest forces its attributes.

use crate::store::{self, StoreError, StoreLocation};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use stele_types::{
    AttributeMap, Checksum, CodeSnippet, Configuration, Content, Document, ObjectRef,
};

const STORE_VERSION: u32 = 1;
const STORE_FILE: &str = "checksums.json";

/// Digest computation over engine objects
#[derive(Debug)]
pub struct Checksummer;

impl Checksummer {
    /// Digest of raw bytes
    pub fn digest_bytes(bytes: &[u8]) -> Checksum {
        Checksum::new(blake3::hash(bytes).to_hex().to_string())
    }

    /// Digest of several components, length-prefixed so boundaries are
    /// unambiguous
    pub fn digest_components(components: &[&[u8]]) -> Checksum {
        let mut hasher = blake3::Hasher::new();
        for component in components {
            hasher.update(&(component.len() as u64).to_le_bytes());
            hasher.update(component);
        }
        Checksum::new(hasher.finalize().to_hex().to_string())
    }

    /// Digest of a document's content
    ///
    /// Binary content digests the backing file's bytes. An unreadable
    /// backing file digests to a marker value (and is therefore seen as
    /// changed) rather than failing the whole run.
    pub fn content_of(document: &Document) -> Checksum {
        match document.content() {
            Content::Textual(text) => match text.string() {
                Ok(s) => Self::digest_components(&[b"textual", s.as_bytes()]),
                Err(err) => {
                    tracing::warn!(
                        identifier = %document.identifier(),
                        error = %err,
                        "content unreadable while checksumming"
                    );
                    Self::digest_components(&[b"unreadable", document.identifier().as_str().as_bytes()])
                }
            },
            Content::Binary(binary) => {
                let mut hasher = blake3::Hasher::new();
                hasher.update(b"binary");
                match std::fs::File::open(binary.path()) {
                    Ok(mut file) => {
                        if let Err(err) = std::io::copy(&mut file, &mut hasher) {
                            tracing::warn!(
                                path = %binary.path().display(),
                                error = %err,
                                "binary content unreadable while checksumming"
                            );
                            hasher.update(b"unreadable");
                        }
                    }
                    Err(err) => {
                        tracing::warn!(
                            path = %binary.path().display(),
                            error = %err,
                            "binary content missing while checksumming"
                        );
                        hasher.update(b"missing");
                    }
                }
                Checksum::new(hasher.finalize().to_hex().to_string())
            }
        }
    }

    /// Per-attribute digests, keyed by attribute name
    pub fn each_attribute_of(attributes: &AttributeMap) -> BTreeMap<String, Checksum> {
        attributes
            .iter()
            .map(|(key, value)| {
                let bytes = serde_json::to_vec(value).unwrap_or_default();
                (key.clone(), Self::digest_components(&[key.as_bytes(), &bytes]))
            })
            .collect()
    }

    /// Combined digest over a set of per-attribute digests
    pub fn attributes_digest(per_attribute: &BTreeMap<String, Checksum>) -> Checksum {
        let components: Vec<&[u8]> = per_attribute
            .values()
            .map(|c| c.as_str().as_bytes())
            .collect();
        Self::digest_components(&components)
    }

    /// Whole-object digest of a document (content + attributes)
    ///
    /// Forces the document's attributes; a document's checksum is
    /// undefined until they have been materialized.
    pub fn document(document: &Document) -> Checksum {
        let content = Self::content_of(document);
        let attrs = document
            .attributes()
            .with(|map| Self::attributes_digest(&Self::each_attribute_of(map)));
        Self::digest_components(&[content.as_str().as_bytes(), attrs.as_str().as_bytes()])
    }

    /// Whole-object digest of the configuration
    pub fn configuration(config: &Configuration) -> Checksum {
        config.with_map(|map| Self::attributes_digest(&Self::each_attribute_of(map)))
    }

    /// Whole-object digest of a code snippet
    pub fn snippet(snippet: &CodeSnippet) -> Checksum {
        Self::digest_components(&[snippet.name().as_bytes(), snippet.content().as_bytes()])
    }
}

/// What is being checksummed
#[derive(Debug, Clone, Copy)]
pub enum ChecksumSubject<'a> {
    /// An item or layout
    Document(&'a Document),
    /// The configuration singleton
    Config(&'a Configuration),
    /// A code snippet
    Snippet(&'a CodeSnippet),
}

impl ChecksumSubject<'_> {
    /// The stable reference this subject is keyed by
    pub fn reference(&self) -> ObjectRef {
        match self {
            ChecksumSubject::Document(doc) => doc.reference(),
            ChecksumSubject::Config(_) => ObjectRef::Config,
            ChecksumSubject::Snippet(s) => ObjectRef::CodeSnippet(s.name().to_string()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ChecksumData {
    whole: Vec<(ObjectRef, Checksum)>,
    content: Vec<(ObjectRef, Checksum)>,
    attributes: Vec<(ObjectRef, BTreeMap<String, Checksum>)>,
}

/// Previous-run digests plus this run's memoized computations
#[derive(Debug)]
pub struct ChecksumStore {
    prev_whole: HashMap<ObjectRef, Checksum>,
    prev_content: HashMap<ObjectRef, Checksum>,
    prev_attributes: HashMap<ObjectRef, BTreeMap<String, Checksum>>,

    cur_whole: DashMap<ObjectRef, Checksum>,
    cur_content: DashMap<ObjectRef, Checksum>,
    cur_attributes: DashMap<ObjectRef, BTreeMap<String, Checksum>>,
}

impl ChecksumStore {
    /// Load the previous run's digests from `location`
    pub fn load(location: &StoreLocation) -> Self {
        let data: ChecksumData = store::load(&location.file(STORE_FILE), STORE_VERSION);
        Self {
            prev_whole: data.whole.into_iter().collect(),
            prev_content: data.content.into_iter().collect(),
            prev_attributes: data.attributes.into_iter().collect(),
            cur_whole: DashMap::new(),
            cur_content: DashMap::new(),
            cur_attributes: DashMap::new(),
        }
    }

    /// An empty store (no previous run)
    pub fn empty() -> Self {
        Self {
            prev_whole: HashMap::new(),
            prev_content: HashMap::new(),
            prev_attributes: HashMap::new(),
            cur_whole: DashMap::new(),
            cur_content: DashMap::new(),
            cur_attributes: DashMap::new(),
        }
    }

    /// Persist this run's digests to `location`
    pub fn save(&self, location: &StoreLocation) -> Result<(), StoreError> {
        let data = ChecksumData {
            whole: self
                .cur_whole
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            content: self
                .cur_content
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            attributes: self
                .cur_attributes
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
        };
        store::save(&location.file(STORE_FILE), STORE_VERSION, &data)
    }

    /// This run's whole-object digest, computed once and memoized
    pub fn calc(&self, subject: ChecksumSubject<'_>) -> Checksum {
        let reference = subject.reference();
        if let Some(found) = self.cur_whole.get(&reference) {
            return found.clone();
        }
        let checksum = match subject {
            ChecksumSubject::Document(doc) => Checksummer::document(doc),
            ChecksumSubject::Config(config) => Checksummer::configuration(config),
            ChecksumSubject::Snippet(snippet) => Checksummer::snippet(snippet),
        };
        self.cur_whole.insert(reference, checksum.clone());
        checksum
    }

    /// This run's content digest of a document, memoized
    pub fn calc_for_content_of(&self, document: &Document) -> Checksum {
        let reference = document.reference();
        if let Some(found) = self.cur_content.get(&reference) {
            return found.clone();
        }
        let checksum = Checksummer::content_of(document);
        self.cur_content.insert(reference, checksum.clone());
        checksum
    }

    /// This run's per-attribute digests of a subject, memoized
    pub fn calc_for_each_attribute_of(
        &self,
        subject: ChecksumSubject<'_>,
    ) -> BTreeMap<String, Checksum> {
        let reference = subject.reference();
        if let Some(found) = self.cur_attributes.get(&reference) {
            return found.clone();
        }
        let checksums = match subject {
            ChecksumSubject::Document(doc) => doc
                .attributes()
                .with(|map| Checksummer::each_attribute_of(map)),
            ChecksumSubject::Config(config) => {
                config.with_map(|map| Checksummer::each_attribute_of(map))
            }
            ChecksumSubject::Snippet(_) => BTreeMap::new(),
        };
        self.cur_attributes.insert(reference, checksums.clone());
        checksums
    }

    /// Whether the subject's whole-object digest differs from last run
    ///
    /// A subject with no previous digest is changed (it is new).
    pub fn changed(&self, subject: ChecksumSubject<'_>) -> bool {
        let current = self.calc(subject);
        match self.prev_whole.get(&subject.reference()) {
            Some(previous) => *previous != current,
            None => true,
        }
    }

    /// Whether a document's content digest differs from last run
    pub fn content_changed(&self, document: &Document) -> bool {
        let current = self.calc_for_content_of(document);
        match self.prev_content.get(&document.reference()) {
            Some(previous) => *previous != current,
            None => true,
        }
    }

    /// Whether any attribute digest of the subject differs from last run
    pub fn attributes_changed(&self, subject: ChecksumSubject<'_>) -> bool {
        let current = self.calc_for_each_attribute_of(subject);
        match self.prev_attributes.get(&subject.reference()) {
            Some(previous) => *previous != current,
            None => true,
        }
    }

    /// Object references the previous run recorded digests for
    pub fn previous_refs(&self) -> Vec<ObjectRef> {
        self.prev_whole.keys().cloned().collect()
    }

    /// The set of attribute keys whose digests differ from last run
    ///
    /// `None` means the previous run recorded nothing for this subject,
    /// so every attribute must be assumed changed.
    pub fn changed_attributes_of(&self, subject: ChecksumSubject<'_>) -> Option<BTreeSet<String>> {
        let current = self.calc_for_each_attribute_of(subject);
        let previous = self.prev_attributes.get(&subject.reference())?;

        let mut changed = BTreeSet::new();
        for (key, checksum) in &current {
            if previous.get(key) != Some(checksum) {
                changed.insert(key.clone());
            }
        }
        for key in previous.keys() {
            if !current.contains_key(key) {
                changed.insert(key.clone());
            }
        }
        Some(changed)
    }
}
