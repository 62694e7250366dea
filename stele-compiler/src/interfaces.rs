//! Collaborator interfaces
//!
//! The engine's boundary: the action provider that turns documents into
//! plans, the data source that supplies them, filters that transform
//! content, and the writer that materializes final snapshots. All four
//! are implemented outside the engine; the engine only calls them.

use crate::errors::FilterError;
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use stele_incremental::CompiledContent;
use stele_types::{
    ActionSequence, CodeSnippet, Configuration, FilterArgs, Identifier, Item, ItemRep, Layout,
    RepRef, SnapshotName,
};

/// The document set supplied by a data source
#[derive(Debug)]
pub struct SiteData {
    pub items: Vec<Item>,
    pub layouts: Vec<Layout>,
    pub config: Configuration,
    pub snippets: Vec<CodeSnippet>,
}

impl SiteData {
    /// Freeze every document and the configuration
    ///
    /// Called once preprocessing completes; documents stay frozen for
    /// the remainder of the run.
    pub fn freeze(&self) {
        for item in &self.items {
            item.freeze();
        }
        for layout in &self.layouts {
            layout.freeze();
        }
        self.config.freeze();
    }
}

/// Supplies the initial document set
pub trait DataSource: Send + Sync {
    /// Load items, layouts, configuration, and code snippets
    fn load(&self) -> Result<SiteData, String>;
}

/// Turns documents into rep names and action plans
pub trait ActionProvider: Send + Sync {
    /// Names of the reps this item compiles into
    fn rep_names_for(&self, item: &Item) -> Vec<String>;

    /// The plan for one rep
    fn action_sequence_for_rep(&self, rep: &ItemRep) -> ActionSequence;

    /// The plan for one layout
    fn action_sequence_for_layout(&self, layout: &Layout) -> ActionSequence;

    /// Hook invoked once, before outdatedness checking
    ///
    /// May mutate documents and configuration; they are frozen right
    /// after it returns.
    fn preprocess(&self, _site: &mut SiteData) {}
}

/// Content kinds a filter consumes and produces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterIo {
    pub binary_input: bool,
    pub binary_output: bool,
}

impl FilterIo {
    /// Textual in, textual out (the default)
    pub fn textual() -> Self {
        Self {
            binary_input: false,
            binary_output: false,
        }
    }

    /// Binary in, binary out
    pub fn binary() -> Self {
        Self {
            binary_input: true,
            binary_output: true,
        }
    }
}

impl Default for FilterIo {
    fn default() -> Self {
        Self::textual()
    }
}

/// What a filter invocation sees
#[derive(Debug)]
pub struct FilterInput<'a> {
    /// The content being transformed
    pub content: &'a CompiledContent,
    /// Arguments from the action plan
    pub args: &'a FilterArgs,
    /// The layout being applied, for layout steps
    pub layout: Option<&'a Layout>,
    /// The item whose rep is being compiled
    pub item: &'a Item,
    /// The rep being compiled
    pub rep: RepRef,
}

/// Content produced by a filter
#[derive(Debug, Clone)]
pub enum FilterOutput {
    Textual(String),
    Binary(std::path::PathBuf),
}

impl From<FilterOutput> for CompiledContent {
    fn from(output: FilterOutput) -> Self {
        match output {
            FilterOutput::Textual(s) => CompiledContent::Textual(s),
            FilterOutput::Binary(p) => CompiledContent::Binary(p),
        }
    }
}

/// What a running filter may ask of the engine
///
/// Every read records a dependency for the document on top of the
/// compilation stack. Reading compiled content that is not yet
/// published raises [`FilterError::UnmetDependency`], the one and only
/// suspension point; filters must let it propagate.
pub trait CompilationContext {
    /// Compiled content of another item's rep at a snapshot
    ///
    /// `snapshot` defaults to `last`. The target must declare the
    /// snapshot; reading an undeclared one is a usage error, not a
    /// suspension.
    fn compiled_content_of(
        &self,
        identifier: &Identifier,
        snapshot: Option<&SnapshotName>,
    ) -> Result<CompiledContent, FilterError>;

    /// One attribute of another document
    fn attribute_of(
        &self,
        identifier: &Identifier,
        key: &str,
    ) -> Result<Option<serde_json::Value>, FilterError>;

    /// Raw (source) content of another document
    fn raw_content_of(&self, identifier: &Identifier) -> Result<String, FilterError>;

    /// Output path of another item's default rep
    fn path_of(&self, identifier: &Identifier) -> Result<Option<std::path::PathBuf>, FilterError>;

    /// One configuration setting
    fn config_setting(&self, key: &str) -> Option<serde_json::Value>;
}

/// A black-box content transformation
pub trait Filter: Send + Sync {
    /// The content kinds this filter consumes and produces
    fn io(&self) -> FilterIo {
        FilterIo::textual()
    }

    /// Transform `input.content`, possibly reading other documents
    /// through `ctx`
    fn run(
        &self,
        input: FilterInput<'_>,
        ctx: &dyn CompilationContext,
    ) -> Result<FilterOutput, FilterError>;
}

/// Named filters available to action plans
#[derive(Clone, Default)]
pub struct FilterRegistry {
    filters: HashMap<String, Arc<dyn Filter>>,
}

impl FilterRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a filter under `name`, replacing any previous one
    pub fn register(&mut self, name: impl Into<String>, filter: Arc<dyn Filter>) {
        self.filters.insert(name.into(), filter);
    }

    /// Look up a filter
    pub fn get(&self, name: &str) -> Result<Arc<dyn Filter>, FilterError> {
        self.filters
            .get(name)
            .cloned()
            .ok_or_else(|| FilterError::UnknownFilter(name.to_string()))
    }
}

impl fmt::Debug for FilterRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self.filters.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("FilterRegistry").field("filters", &names).finish()
    }
}

/// Result of materializing one snapshot to storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The path did not exist before
    Created,
    /// The path existed with different content
    Updated,
    /// The path already held identical content
    Identical,
    /// The writer chose not to write
    Skipped,
}

impl fmt::Display for WriteOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WriteOutcome::Created => "created",
            WriteOutcome::Updated => "updated",
            WriteOutcome::Identical => "identical",
            WriteOutcome::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

/// Persists final snapshots to storage
pub trait Writer: Send + Sync {
    /// Write `content` to `path` and report what happened
    fn write(&self, content: &CompiledContent, path: &Path) -> Result<WriteOutcome, std::io::Error>;
}
