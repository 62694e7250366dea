//! Document identifiers

use serde::{Deserialize, Serialize};
use std::fmt;

/// Path-like identifier for a document (`/about.md`)
///
/// Identifiers are normalized on construction: exactly one leading
/// slash, no duplicate or trailing slashes. Equality and hashing are by
/// normalized string value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identifier(String);

impl Identifier {
    pub fn new(raw: impl AsRef<str>) -> Self {
        Self(normalize(raw.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last path component, if any (`/posts/a.md` → `a.md`)
    pub fn basename(&self) -> Option<&str> {
        self.0.rsplit('/').next().filter(|s| !s.is_empty())
    }

    /// Extension of the last component, without the dot
    pub fn extension(&self) -> Option<&str> {
        let base = self.basename()?;
        let (stem, ext) = base.rsplit_once('.')?;
        if stem.is_empty() {
            None
        } else {
            Some(ext)
        }
    }
}

fn normalize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 1);
    for component in raw.split('/').filter(|c| !c.is_empty()) {
        out.push('/');
        out.push_str(component);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Identifier {
    fn from(raw: &str) -> Self {
        Identifier::new(raw)
    }
}

impl From<String> for Identifier {
    fn from(raw: String) -> Self {
        Identifier::new(raw)
    }
}
