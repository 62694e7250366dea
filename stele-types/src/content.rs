//! Document content variants
//!
//! Content is either textual (an in-memory string, possibly loaded
//! lazily from a backing file) or binary (a path to the file holding the
//! bytes). The engine never reads binary content into memory; it only
//! moves the backing file around.

use once_cell::sync::OnceCell;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while materializing content
#[derive(Debug, Error)]
pub enum ContentError {
    #[error("failed to read content from {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("textual content requested but never given a string or backing path")]
    NoBacking,
}

/// Textual content, lazily loaded when backed by a file
pub struct TextualContent {
    cell: OnceCell<String>,
    source: Option<PathBuf>,
}

impl TextualContent {
    /// Content from an in-memory string
    pub fn from_string(string: impl Into<String>) -> Self {
        let cell = OnceCell::new();
        let _ = cell.set(string.into());
        Self { cell, source: None }
    }

    /// Content read from `path` on first access
    pub fn lazy_from_path(path: impl Into<PathBuf>) -> Self {
        Self {
            cell: OnceCell::new(),
            source: Some(path.into()),
        }
    }

    /// The string value, loading it from the backing file if needed
    pub fn string(&self) -> Result<&str, ContentError> {
        self.cell
            .get_or_try_init(|| {
                let path = self.source.as_ref().ok_or(ContentError::NoBacking)?;
                std::fs::read_to_string(path).map_err(|source| ContentError::Read {
                    path: path.clone(),
                    source,
                })
            })
            .map(|s| s.as_str())
    }

    /// Whether the string has been materialized yet
    pub fn loaded(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl fmt::Debug for TextualContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TextualContent")
            .field("loaded", &self.loaded())
            .field("source", &self.source)
            .finish()
    }
}

/// Binary content: a path to the file holding the bytes
#[derive(Debug, Clone)]
pub struct BinaryContent {
    path: PathBuf,
}

impl BinaryContent {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// A document's content
#[derive(Debug)]
pub enum Content {
    Textual(TextualContent),
    Binary(BinaryContent),
}

impl Content {
    pub fn textual(string: impl Into<String>) -> Self {
        Content::Textual(TextualContent::from_string(string))
    }

    pub fn binary(path: impl Into<PathBuf>) -> Self {
        Content::Binary(BinaryContent::new(path))
    }

    pub fn is_binary(&self) -> bool {
        matches!(self, Content::Binary(_))
    }

    /// The textual string, if this content is textual
    pub fn string(&self) -> Result<Option<&str>, ContentError> {
        match self {
            Content::Textual(t) => t.string().map(Some),
            Content::Binary(_) => Ok(None),
        }
    }
}
