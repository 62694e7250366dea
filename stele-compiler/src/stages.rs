//! Rep building and pre-compilation bookkeeping
//!
//! Turns the provider's plans into concrete rep shapes (snapshot defs
//! with their content kinds, resolved output paths) and records the
//! digests that the next run will compare against.

use crate::errors::CompilerError;
use crate::interfaces::{ActionProvider, FilterRegistry, SiteData};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use stele_incremental::{
    checksum::ChecksumSubject, ActionSequenceStore, ChecksumStore, PlanKey,
};
use stele_types::{
    ActionSequence, Identifier, ItemRep, ObjectRef, ProcessingAction, RepRef, RepShape,
    SnapshotDef,
};

/// Reps and plans for one run
#[derive(Debug, Default)]
pub struct BuiltReps {
    /// Reps per item identifier
    pub by_item: HashMap<Identifier, Vec<Arc<ItemRep>>>,
    /// Reps by identity
    pub by_ref: HashMap<RepRef, Arc<ItemRep>>,
    /// Current plans per rep/layout
    pub plans: HashMap<PlanKey, ActionSequence>,
}

/// Ask the provider for every rep and plan, and fix each rep's shape
pub fn build_reps(
    site: &SiteData,
    provider: &dyn ActionProvider,
    filters: &FilterRegistry,
) -> Result<BuiltReps, CompilerError> {
    let mut built = BuiltReps::default();
    let output_dir = site.config.output_dir().to_path_buf();

    for item in &site.items {
        let mut reps = Vec::new();
        for name in provider.rep_names_for(item) {
            let rep = Arc::new(ItemRep::new(item.clone(), name));
            let sequence = provider.action_sequence_for_rep(&rep);

            let shape = derive_shape(&rep, &sequence, filters, &output_dir)?;
            rep.set_shape(shape);

            built.plans.insert(PlanKey::Rep(rep.reference()), sequence);
            built.by_ref.insert(rep.reference(), rep.clone());
            reps.push(rep);
        }
        if !reps.is_empty() {
            built.by_item.insert(item.identifier().clone(), reps);
        }
    }

    for layout in &site.layouts {
        let sequence = provider.action_sequence_for_layout(layout);
        built
            .plans
            .insert(PlanKey::Layout(layout.identifier().clone()), sequence);
    }

    Ok(built)
}

/// Walk a plan to derive snapshot defs and output paths
///
/// The content kind is threaded through the actions: it starts at the
/// item's own kind and follows each filter's declared output. Snapshots
/// record the kind current at their position.
fn derive_shape(
    rep: &ItemRep,
    sequence: &ActionSequence,
    filters: &FilterRegistry,
    output_dir: &Path,
) -> Result<RepShape, CompilerError> {
    let invalid = |message: String| CompilerError::InvalidPlan {
        subject: rep.reference().to_string(),
        message,
    };

    let mut binary = rep.binary();
    let mut defs: Vec<SnapshotDef> = Vec::new();
    let mut raw_paths = BTreeMap::new();
    let mut paths = BTreeMap::new();

    for action in sequence {
        match action {
            ProcessingAction::Filter { name, .. } => {
                let io = filters
                    .get(name)
                    .map_err(|err| invalid(err.to_string()))?
                    .io();
                if io.binary_input != binary {
                    return Err(invalid(format!(
                        "filter {name} cannot take {} content",
                        if binary { "binary" } else { "textual" }
                    )));
                }
                binary = io.binary_output;
            }

            ProcessingAction::Layout { layout, .. } => {
                if binary {
                    return Err(invalid(format!(
                        "layout {layout} cannot wrap binary content"
                    )));
                }
            }

            ProcessingAction::Snapshot { names, paths: declared } => {
                for name in names {
                    if defs.iter().any(|def| &def.name == name) {
                        return Err(invalid(format!("snapshot {name} is declared twice")));
                    }
                    defs.push(SnapshotDef::new(name.clone(), binary));
                    if !declared.is_empty() {
                        raw_paths.insert(name.clone(), declared.clone());
                        paths.insert(
                            name.clone(),
                            declared.iter().map(|p| resolve(output_dir, p)).collect(),
                        );
                    }
                }
            }
        }
    }

    Ok(RepShape {
        snapshot_defs: defs,
        raw_paths,
        paths,
    })
}

fn resolve(output_dir: &Path, raw: &Path) -> PathBuf {
    match raw.strip_prefix("/") {
        Ok(relative) => output_dir.join(relative),
        Err(_) => output_dir.join(raw),
    }
}

/// Record this run's digests for every current object
///
/// Persisting these at the end of the run is what lets the next run
/// answer "changed since last time?" by hash inequality alone.
pub fn record_checksums(checksums: &ChecksumStore, site: &SiteData) {
    for item in &site.items {
        checksums.calc(ChecksumSubject::Document(item));
        checksums.calc_for_content_of(item);
        checksums.calc_for_each_attribute_of(ChecksumSubject::Document(item));
    }
    for layout in &site.layouts {
        checksums.calc(ChecksumSubject::Document(layout));
        checksums.calc_for_content_of(layout);
        checksums.calc_for_each_attribute_of(ChecksumSubject::Document(layout));
    }
    checksums.calc(ChecksumSubject::Config(&site.config));
    checksums.calc_for_each_attribute_of(ChecksumSubject::Config(&site.config));
    for snippet in &site.snippets {
        checksums.calc(ChecksumSubject::Snippet(snippet));
    }
}

/// Record the current plans for the next run's comparisons
pub fn record_plans(plan_store: &ActionSequenceStore, plans: &HashMap<PlanKey, ActionSequence>) {
    for (key, sequence) in plans {
        plan_store.record(key.clone(), sequence);
    }
}

/// Every object reference present in the current document set
pub fn known_objects(site: &SiteData) -> HashSet<ObjectRef> {
    let mut known = HashSet::new();
    for item in &site.items {
        known.insert(item.reference());
    }
    for layout in &site.layouts {
        known.insert(layout.reference());
    }
    known.insert(ObjectRef::Config);
    for snippet in &site.snippets {
        known.insert(ObjectRef::CodeSnippet(snippet.name().to_string()));
    }
    known
}
