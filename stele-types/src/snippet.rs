//! Code snippets

use std::fmt;

/// A named blob of user-supplied executable configuration text
///
/// The engine checksums snippets to detect change but never interprets
/// them; evaluation is the action provider's business.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeSnippet {
    name: String,
    content: String,
}

impl CodeSnippet {
    pub fn new(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content(&self) -> &str {
        &self.content
    }
}

impl fmt::Display for CodeSnippet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "snippet:{}", self.name)
    }
}
