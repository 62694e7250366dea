//! End-to-end runs against in-memory collaborators
//!
//! The `erb` test filter understands a tiny tag language:
//!
//! ```text
//! <%= 1+2 %>            integer addition
//! <%= yield %>          the wrapped content (layout steps)
//! <%= include /b.md %>  another item's compiled content
//! <%= attr /b.md k %>   another document's attribute
//! <%= path /b.md %>     another item's output path
//! <%= config k %>       a configuration setting
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use stele_compiler::{
    ActionProvider, CompilationContext, Compiler, CompilerError, DataSource, Filter, FilterInput,
    FilterOutput, FilterRegistry, RunSummary, SiteData, WriteOutcome, Writer,
};
use stele_compiler::errors::FilterError;
use stele_incremental::{CompiledContent, OutdatednessStore, StoreLocation};
use stele_types::{
    ActionSequence, AttributeMap, Attributes, CodeSnippet, Configuration, Content, Identifier,
    Item, ItemRep, Layout, ProcessingAction,
};

// ---- collaborators -----------------------------------------------------

#[derive(Clone, Default)]
struct SiteSpec {
    items: Vec<(String, String, AttributeMap)>,
    layouts: Vec<(String, String)>,
    snippets: Vec<(String, String)>,
    settings: AttributeMap,
    plans: HashMap<String, ActionSequence>,
}

impl SiteSpec {
    fn item(mut self, id: &str, content: &str, plan: ActionSequence) -> Self {
        self.items.push((id.into(), content.into(), AttributeMap::new()));
        self.plans.insert(Identifier::new(id).to_string(), plan);
        self
    }

    fn item_with_attrs(
        mut self,
        id: &str,
        content: &str,
        attrs: &[(&str, Value)],
        plan: ActionSequence,
    ) -> Self {
        let map: AttributeMap = attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        self.items.push((id.into(), content.into(), map));
        self.plans.insert(Identifier::new(id).to_string(), plan);
        self
    }

    fn layout(mut self, id: &str, content: &str) -> Self {
        self.layouts.push((id.into(), content.into()));
        self
    }

    fn snippet(mut self, name: &str, content: &str) -> Self {
        self.snippets.push((name.into(), content.into()));
        self
    }

    fn setting(mut self, key: &str, value: Value) -> Self {
        self.settings.insert(key.into(), value);
        self
    }
}

struct MemorySource {
    spec: SiteSpec,
    output_dir: PathBuf,
}

impl DataSource for MemorySource {
    fn load(&self) -> Result<SiteData, String> {
        Ok(SiteData {
            items: self
                .spec
                .items
                .iter()
                .map(|(id, content, attrs)| {
                    Item::new(
                        id.as_str(),
                        Content::textual(content.clone()),
                        Attributes::from_map(attrs.clone()),
                    )
                })
                .collect(),
            layouts: self
                .spec
                .layouts
                .iter()
                .map(|(id, content)| {
                    Layout::new(id.as_str(), Content::textual(content.clone()), Attributes::empty())
                })
                .collect(),
            config: Configuration::with_settings(&self.output_dir, self.spec.settings.clone()),
            snippets: self
                .spec
                .snippets
                .iter()
                .map(|(name, content)| CodeSnippet::new(name.clone(), content.clone()))
                .collect(),
        })
    }
}

struct PlanProvider {
    plans: HashMap<String, ActionSequence>,
}

impl ActionProvider for PlanProvider {
    fn rep_names_for(&self, _item: &Item) -> Vec<String> {
        vec!["default".into()]
    }

    fn action_sequence_for_rep(&self, rep: &ItemRep) -> ActionSequence {
        self.plans
            .get(rep.item().identifier().as_str())
            .cloned()
            .unwrap_or_default()
    }

    fn action_sequence_for_layout(&self, _layout: &Layout) -> ActionSequence {
        ActionSequence::default()
    }
}

/// The tag-language filter; counts invocations
struct Erb {
    calls: Arc<AtomicU64>,
}

impl Filter for Erb {
    fn run(
        &self,
        input: FilterInput<'_>,
        ctx: &dyn CompilationContext,
    ) -> Result<FilterOutput, FilterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let body = input
            .content
            .as_str()
            .ok_or(FilterError::ContentKindMismatch {
                name: "erb".into(),
                kind: "binary",
            })?;
        let template = match input.layout {
            Some(layout) => match layout.content() {
                Content::Textual(text) => text
                    .string()
                    .map_err(|err| FilterError::Message(err.to_string()))?,
                Content::Binary(_) => {
                    return Err(FilterError::ContentKindMismatch {
                        name: "erb".into(),
                        kind: "binary",
                    })
                }
            },
            None => body,
        };

        render(template, body, ctx).map(FilterOutput::Textual)
    }
}

fn render(template: &str, body: &str, ctx: &dyn CompilationContext) -> Result<String, FilterError> {
    let mut out = String::new();
    let mut rest = template;
    while let Some(start) = rest.find("<%=") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 3..];
        let end = after
            .find("%>")
            .ok_or_else(|| FilterError::Message("unterminated tag".into()))?;
        out.push_str(&eval(after[..end].trim(), body, ctx)?);
        rest = &after[end + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

fn eval(expr: &str, body: &str, ctx: &dyn CompilationContext) -> Result<String, FilterError> {
    if expr == "yield" {
        return Ok(body.to_string());
    }
    if let Some(target) = expr.strip_prefix("include ") {
        let content = ctx.compiled_content_of(&Identifier::new(target.trim()), None)?;
        return match content {
            CompiledContent::Textual(s) => Ok(s),
            CompiledContent::Binary(_) => {
                Err(FilterError::Message("cannot include binary content".into()))
            }
        };
    }
    if let Some(rest) = expr.strip_prefix("attr ") {
        let (target, key) = rest
            .trim()
            .split_once(' ')
            .ok_or_else(|| FilterError::Message(format!("bad attr tag: {expr}")))?;
        let value = ctx.attribute_of(&Identifier::new(target), key.trim())?;
        return Ok(match value {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => String::new(),
        });
    }
    if let Some(target) = expr.strip_prefix("path ") {
        let path = ctx.path_of(&Identifier::new(target.trim()))?;
        return Ok(path.map(|p| p.display().to_string()).unwrap_or_default());
    }
    if let Some(key) = expr.strip_prefix("config ") {
        let value = ctx.config_setting(key.trim());
        return Ok(match value {
            Some(Value::String(s)) => s,
            Some(other) => other.to_string(),
            None => String::new(),
        });
    }
    if let Some((a, b)) = expr.split_once('+') {
        let (a, b) = (a.trim(), b.trim());
        if let (Ok(a), Ok(b)) = (a.parse::<i64>(), b.parse::<i64>()) {
            return Ok((a + b).to_string());
        }
    }
    Err(FilterError::Message(format!("cannot evaluate: {expr}")))
}

/// Uppercases content; counts invocations
struct Upcase {
    calls: Arc<AtomicU64>,
}

impl Filter for Upcase {
    fn run(
        &self,
        input: FilterInput<'_>,
        _ctx: &dyn CompilationContext,
    ) -> Result<FilterOutput, FilterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text = input
            .content
            .as_str()
            .ok_or(FilterError::ContentKindMismatch {
                name: "upcase".into(),
                kind: "binary",
            })?;
        Ok(FilterOutput::Textual(text.to_uppercase()))
    }
}

/// Always fails
struct Boom;

impl Filter for Boom {
    fn run(
        &self,
        _input: FilterInput<'_>,
        _ctx: &dyn CompilationContext,
    ) -> Result<FilterOutput, FilterError> {
        Err(FilterError::Message("boom".into()))
    }
}

struct FsWriter;

impl Writer for FsWriter {
    fn write(&self, content: &CompiledContent, path: &Path) -> Result<WriteOutcome, std::io::Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        match content {
            CompiledContent::Textual(s) => {
                if path.exists() {
                    if std::fs::read_to_string(path)? == *s {
                        return Ok(WriteOutcome::Identical);
                    }
                    std::fs::write(path, s)?;
                    Ok(WriteOutcome::Updated)
                } else {
                    std::fs::write(path, s)?;
                    Ok(WriteOutcome::Created)
                }
            }
            CompiledContent::Binary(source) => {
                let existed = path.exists();
                std::fs::copy(source, path)?;
                Ok(if existed {
                    WriteOutcome::Updated
                } else {
                    WriteOutcome::Created
                })
            }
        }
    }
}

// ---- harness -----------------------------------------------------------

struct Harness {
    dir: tempfile::TempDir,
    erb_calls: Arc<AtomicU64>,
    upcase_calls: Arc<AtomicU64>,
}

impl Harness {
    fn new() -> Self {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        Self {
            dir: tempfile::tempdir().unwrap(),
            erb_calls: Arc::new(AtomicU64::new(0)),
            upcase_calls: Arc::new(AtomicU64::new(0)),
        }
    }

    fn output_dir(&self) -> PathBuf {
        self.dir.path().join("out")
    }

    fn registry(&self) -> FilterRegistry {
        let mut filters = FilterRegistry::new();
        filters.register(
            "erb",
            Arc::new(Erb {
                calls: self.erb_calls.clone(),
            }),
        );
        filters.register(
            "upcase",
            Arc::new(Upcase {
                calls: self.upcase_calls.clone(),
            }),
        );
        filters.register("boom", Arc::new(Boom));
        filters
    }

    fn run(&self, spec: &SiteSpec) -> Result<RunSummary, CompilerError> {
        self.run_with_workers(spec, 1)
    }

    fn run_with_workers(&self, spec: &SiteSpec, workers: usize) -> Result<RunSummary, CompilerError> {
        let source = MemorySource {
            spec: spec.clone(),
            output_dir: self.output_dir(),
        };
        let provider = PlanProvider {
            plans: spec.plans.clone(),
        };
        Compiler::new(
            Arc::new(source),
            Arc::new(provider),
            self.registry(),
            Arc::new(FsWriter),
        )
        .with_workers(workers)
        .run()
    }

    fn output(&self, rel: &str) -> String {
        std::fs::read_to_string(self.output_dir().join(rel)).unwrap()
    }

    fn outdatedness_is_empty(&self) -> bool {
        let location = StoreLocation::for_output_dir(self.output_dir());
        OutdatednessStore::load(&location).is_empty()
    }

    fn erb_calls(&self) -> u64 {
        self.erb_calls.load(Ordering::SeqCst)
    }

    fn upcase_calls(&self) -> u64 {
        self.upcase_calls.load(Ordering::SeqCst)
    }
}

fn erb_plan(out: &str) -> ActionSequence {
    ActionSequence::new(vec![
        ProcessingAction::filter("erb", Default::default()),
        ProcessingAction::snapshot_with_paths(["last"], [PathBuf::from(out)]),
    ])
}

fn names(reps: &[stele_types::RepRef]) -> Vec<String> {
    reps.iter().map(|r| r.item.to_string()).collect()
}

// ---- scenarios ---------------------------------------------------------

#[test]
fn test_erb_end_to_end() {
    let harness = Harness::new();
    let spec = SiteSpec::default().item("/a.md", "<%= 1+2 %>", erb_plan("/a/index.html"));

    let summary = harness.run(&spec).unwrap();

    assert_eq!(names(&summary.compiled), ["/a.md"]);
    assert!(summary.failures.is_empty());
    assert_eq!(harness.output("a/index.html"), "3");
}

#[test]
fn test_second_run_hits_cache_without_running_filters() {
    let harness = Harness::new();
    let spec = SiteSpec::default().item("/a.md", "<%= 1+2 %>", erb_plan("/a/index.html"));

    harness.run(&spec).unwrap();
    let calls_after_first = harness.erb_calls();
    assert_eq!(calls_after_first, 1);

    let second = harness.run(&spec).unwrap();

    assert!(second.compiled.is_empty());
    assert_eq!(names(&second.cached), ["/a.md"]);
    assert_eq!(second.metrics.cache_hits, 1);
    assert_eq!(harness.erb_calls(), calls_after_first);
    assert_eq!(harness.output("a/index.html"), "3");
    assert!(harness.outdatedness_is_empty());
}

#[test]
fn test_content_change_recompiles_only_that_item() {
    let harness = Harness::new();
    let spec = SiteSpec::default()
        .item("/a.md", "one", erb_plan("/a/index.html"))
        .item("/b.md", "two", erb_plan("/b/index.html"));

    harness.run(&spec).unwrap();

    let edited = SiteSpec::default()
        .item("/a.md", "one edited", erb_plan("/a/index.html"))
        .item("/b.md", "two", erb_plan("/b/index.html"));
    let second = harness.run(&edited).unwrap();

    assert_eq!(names(&second.compiled), ["/a.md"]);
    assert_eq!(names(&second.cached), ["/b.md"]);
    assert_eq!(harness.output("a/index.html"), "one edited");
}

#[test]
fn test_attribute_dependencies_are_key_precise() {
    let harness = Harness::new();
    let spec = SiteSpec::default()
        .item_with_attrs(
            "/a.md",
            "a",
            &[("title", json!("Old")), ("date", json!("2024"))],
            erb_plan("/a/index.html"),
        )
        .item("/b.md", "<%= attr /a.md title %>", erb_plan("/b/index.html"))
        .item("/c.md", "<%= attr /a.md date %>", erb_plan("/c/index.html"));

    harness.run(&spec).unwrap();
    assert_eq!(harness.output("b/index.html"), "Old");

    // Only the title changes
    let edited = SiteSpec::default()
        .item_with_attrs(
            "/a.md",
            "a",
            &[("title", json!("New")), ("date", json!("2024"))],
            erb_plan("/a/index.html"),
        )
        .item("/b.md", "<%= attr /a.md title %>", erb_plan("/b/index.html"))
        .item("/c.md", "<%= attr /a.md date %>", erb_plan("/c/index.html"));
    let second = harness.run(&edited).unwrap();

    assert_eq!(names(&second.compiled), ["/a.md", "/b.md"]);
    assert_eq!(names(&second.cached), ["/c.md"]);
    assert_eq!(harness.output("b/index.html"), "New");
}

#[test]
fn test_path_reader_survives_content_change() {
    let harness = Harness::new();
    let make = |a_content: &str| {
        SiteSpec::default()
            .item("/a.md", a_content, erb_plan("/a/index.html"))
            .item("/b.md", "<%= path /a.md %>", erb_plan("/b/index.html"))
    };

    harness.run(&make("v1")).unwrap();
    let second = harness.run(&make("v2")).unwrap();

    // /b.md read only /a.md's path; the content change must not touch it
    assert_eq!(names(&second.compiled), ["/a.md"]);
    assert_eq!(names(&second.cached), ["/b.md"]);
}

#[test]
fn test_compiled_content_dependency_propagates() {
    let harness = Harness::new();
    let make = |b_content: &str| {
        SiteSpec::default()
            .item("/a.md", "<%= include /b.md %>!", erb_plan("/a/index.html"))
            .item("/b.md", b_content, erb_plan("/b/index.html"))
    };

    harness.run(&make("body")).unwrap();
    assert_eq!(harness.output("a/index.html"), "body!");

    let second = harness.run(&make("edited")).unwrap();

    // /a.md reads /b.md's compiled content, so both recompile
    assert_eq!(names(&second.compiled), ["/a.md", "/b.md"]);
    assert_eq!(harness.output("a/index.html"), "edited!");
}

#[test]
fn test_suspension_resumes_without_redoing_earlier_filters() {
    let harness = Harness::new();
    let spec = SiteSpec::default()
        .item(
            "/a.md",
            "hello",
            ActionSequence::new(vec![
                ProcessingAction::filter("upcase", Default::default()),
                ProcessingAction::layout_with_filter("/default.html", "erb", Default::default()),
                ProcessingAction::snapshot_with_paths(["last"], [PathBuf::from("/a/index.html")]),
            ]),
        )
        .item("/b.md", "aside", erb_plan("/b/index.html"))
        .layout("/default.html", "[<%= include /b.md %>] <%= yield %>");

    let summary = harness.run(&spec).unwrap();

    // /a.md compiles first, suspends exactly once at the include, and
    // resumes after /b.md publishes; the upcase step is not re-run.
    assert_eq!(summary.metrics.suspensions, 1);
    assert_eq!(summary.metrics.resumes, 1);
    assert_eq!(harness.upcase_calls(), 1);
    assert_eq!(harness.output("a/index.html"), "[aside] HELLO");
}

#[test]
fn test_mutual_compiled_content_cycle_is_fatal() {
    let harness = Harness::new();
    let spec = SiteSpec::default()
        .item("/a.md", "<%= include /b.md %>", erb_plan("/a/index.html"))
        .item("/b.md", "<%= include /a.md %>", erb_plan("/b/index.html"));

    let err = harness.run(&spec).unwrap_err();
    match err {
        CompilerError::CircularDependency { cycle } => {
            let cycle = names(&cycle);
            assert!(cycle.contains(&"/a.md".to_string()));
            assert!(cycle.contains(&"/b.md".to_string()));
        }
        other => panic!("expected circular dependency, got {other}"),
    }
}

#[test]
fn test_snippet_change_outdates_every_rep() {
    let harness = Harness::new();
    let make = |snippet: &str| {
        SiteSpec::default()
            .item("/a.md", "a", erb_plan("/a/index.html"))
            .item("/b.md", "b", erb_plan("/b/index.html"))
            .snippet("rules", snippet)
    };

    harness.run(&make("v1")).unwrap();
    let second = harness.run(&make("v2")).unwrap();

    assert_eq!(names(&second.compiled), ["/a.md", "/b.md"]);
    assert!(second.cached.is_empty());
}

#[test]
fn test_config_setting_reads_are_tracked() {
    let harness = Harness::new();
    let make = |title: &str| {
        SiteSpec::default()
            .item("/a.md", "<%= config title %>", erb_plan("/a/index.html"))
            .item("/b.md", "plain", erb_plan("/b/index.html"))
            .setting("title", json!(title))
            .setting("theme", json!("dark"))
    };

    harness.run(&make("First")).unwrap();
    assert_eq!(harness.output("a/index.html"), "First");

    let second = harness.run(&make("Second")).unwrap();

    assert_eq!(names(&second.compiled), ["/a.md"]);
    assert_eq!(names(&second.cached), ["/b.md"]);
    assert_eq!(harness.output("a/index.html"), "Second");
}

#[test]
fn test_plan_change_defeats_cache() {
    let harness = Harness::new();
    let spec = SiteSpec::default().item("/a.md", "body", erb_plan("/a/index.html"));
    harness.run(&spec).unwrap();

    // Same content, different plan: the cached entry must not be reused
    let replanned = SiteSpec::default().item(
        "/a.md",
        "body",
        ActionSequence::new(vec![
            ProcessingAction::filter("upcase", Default::default()),
            ProcessingAction::snapshot(["pre"]),
            ProcessingAction::filter("erb", Default::default()),
            ProcessingAction::snapshot_with_paths(["last"], [PathBuf::from("/a/index.html")]),
        ]),
    );
    let second = harness.run(&replanned).unwrap();

    assert_eq!(names(&second.compiled), ["/a.md"]);
    assert!(second.cached.is_empty());
    assert_eq!(harness.output("a/index.html"), "BODY");
}

#[test]
fn test_failures_do_not_abort_siblings_and_retry_next_run() {
    let harness = Harness::new();
    let spec = SiteSpec::default()
        .item(
            "/bad.md",
            "x",
            ActionSequence::new(vec![
                ProcessingAction::filter("boom", Default::default()),
                ProcessingAction::snapshot_with_paths(["last"], [PathBuf::from("/bad/index.html")]),
            ]),
        )
        .item("/good.md", "fine", erb_plan("/good/index.html"));

    let first = harness.run(&spec).unwrap();

    assert_eq!(names(&first.compiled), ["/good.md"]);
    assert_eq!(first.failures.len(), 1);
    assert_eq!(first.failures[0].rep.item.to_string(), "/bad.md");
    assert_eq!(harness.output("good/index.html"), "fine");
    assert!(!harness.outdatedness_is_empty());

    // Nothing changed: the failed rep retries, the good one is cached
    let second = harness.run(&spec).unwrap();
    assert_eq!(second.failures.len(), 1);
    assert_eq!(names(&second.cached), ["/good.md"]);
}

#[test]
fn test_failed_dependency_fails_the_waiter() {
    let harness = Harness::new();
    let spec = SiteSpec::default()
        .item("/a.md", "<%= include /bad.md %>", erb_plan("/a/index.html"))
        .item(
            "/bad.md",
            "x",
            ActionSequence::new(vec![
                ProcessingAction::filter("boom", Default::default()),
                ProcessingAction::snapshot(["last"]),
            ]),
        );

    let summary = harness.run(&spec).unwrap();

    assert!(summary.compiled.is_empty());
    assert_eq!(summary.failures.len(), 2);
}

#[test]
fn test_parallel_workers_produce_the_same_outputs() {
    let harness = Harness::new();
    let mut spec = SiteSpec::default()
        .item("/hub.md", "<%= include /s0.md %><%= include /s3.md %>", erb_plan("/hub/index.html"));
    for i in 0..6 {
        let id = format!("/s{i}.md");
        let out = format!("/s{i}/index.html");
        spec = spec.item(&id, &format!("part{i} "), erb_plan(&out));
    }

    let summary = harness.run_with_workers(&spec, 4).unwrap();

    assert_eq!(summary.compiled.len(), 7);
    assert!(summary.failures.is_empty());
    assert_eq!(harness.output("hub/index.html"), "part0 part3 ");
}

#[test]
fn test_removed_item_is_pruned_and_dependent_recompiles() {
    let harness = Harness::new();
    let spec = SiteSpec::default()
        .item("/a.md", "<%= attr /b.md title %>ok", erb_plan("/a/index.html"))
        .item_with_attrs("/b.md", "b", &[("title", json!("T"))], erb_plan("/b/index.html"));

    harness.run(&spec).unwrap();
    assert_eq!(harness.output("a/index.html"), "Tok");

    // /b.md disappears; /a.md depended on it and must recompile (and
    // here fails, since its include target is gone)
    let without = SiteSpec::default().item(
        "/a.md",
        "<%= attr /b.md title %>ok",
        erb_plan("/a/index.html"),
    );
    let second = harness.run(&without).unwrap();

    assert!(second.cached.is_empty());
    assert_eq!(second.failures.len(), 1);
}
