//! Loads a step registry directory into a validated [`RegistryBundle`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use resolver_cache_config::decode::{load_strict, read_text_maybe_gzip};
use resolver_cache_config::walk::walk_tree;
use resolver_cache_types::{
    Chain, LiteralTestStep, LoadError, Observer, RegistryBundle, RegistryInfo, StepRef, Workflow,
};
use serde::Deserialize;

use crate::graph::Graph;

/// Flags controlling registry-loader behavior (spec §4.3, §9).
#[derive(Debug, Clone, Copy, Default)]
pub struct LoaderOptions {
    /// Disables the directory-path-must-match-declared-name constraint.
    pub flat: bool,
    pub include_documentation: bool,
    pub include_metadata: bool,
}

/// Per-reference/observer structural validation; a property of the
/// external schema, executed here as an extension point (spec §4.3 step 4).
pub trait EntryValidator: Send + Sync {
    fn validate_reference(&self, entry: &LiteralTestStep) -> Result<(), String>;
    fn validate_observer(&self, entry: &Observer) -> Result<(), String>;
}

pub struct NoopValidator;

impl EntryValidator for NoopValidator {
    fn validate_reference(&self, _entry: &LiteralTestStep) -> Result<(), String> {
        Ok(())
    }
    fn validate_observer(&self, _entry: &Observer) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRef {
    name: String,
    commands: String,
    #[serde(default)]
    extra: serde_json::Value,
    #[serde(default)]
    documentation: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawChain {
    name: String,
    steps: Vec<StepRef>,
    #[serde(default)]
    parameter_defaults: HashMap<String, String>,
    #[serde(default)]
    documentation: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawWorkflow {
    name: String,
    #[serde(default)]
    pre: Vec<StepRef>,
    #[serde(default)]
    test: Vec<StepRef>,
    #[serde(default)]
    post: Vec<StepRef>,
    #[serde(default)]
    observers: resolver_cache_types::ObserverPolicy,
    #[serde(default)]
    documentation: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawObserver {
    name: String,
    commands: String,
    #[serde(default)]
    documentation: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawMetadata {
    path: String,
    #[serde(default)]
    owners: Vec<String>,
}

enum Classified {
    Reference,
    Chain,
    Workflow,
    Observer,
    Metadata,
    Commands,
    Ignored,
    VersionMarker,
}

fn classify(path: &Path) -> Option<Classified> {
    let name = path.file_name()?.to_str()?;
    if name == "OWNERS" {
        return Some(Classified::Ignored);
    }
    if name == "VERSION" {
        return Some(Classified::VersionMarker);
    }
    if name.ends_with(".md") {
        return Some(Classified::Ignored);
    }
    if name.ends_with(".metadata.json") {
        return Some(Classified::Metadata);
    }
    if name.ends_with("-ref.yaml") {
        return Some(Classified::Reference);
    }
    if name.ends_with("-chain.yaml") {
        return Some(Classified::Chain);
    }
    if name.ends_with("-workflow.yaml") {
        return Some(Classified::Workflow);
    }
    if name.ends_with("-observer.yaml") {
        return Some(Classified::Observer);
    }
    if name.contains("-commands.") {
        return Some(Classified::Commands);
    }
    None
}

fn prefix_for<'a>(name: &'a str, suffix: &str) -> Option<&'a str> {
    name.strip_suffix(suffix)
}

/// `<root>/a/b/c/a-b-c-ref.yaml` -> expected prefix `a-b-c`.
fn expected_prefix(root: &Path, path: &Path) -> Option<String> {
    let dir = path.parent()?;
    let rel = dir.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("-"))
    }
}

fn check_name_matches_path(
    root: &Path,
    path: &Path,
    declared_name: &str,
    flat: bool,
) -> Result<(), LoadError> {
    if flat {
        return Ok(());
    }
    let Some(expected) = expected_prefix(root, path) else {
        return Ok(());
    };
    if declared_name != expected {
        return Err(LoadError::NameMismatch {
            path: path.display().to_string(),
            expected,
            actual: declared_name.to_string(),
        });
    }
    Ok(())
}

fn commands_path_for(entry_path: &Path, declared_commands: &str) -> Result<PathBuf, LoadError> {
    let file_name = entry_path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let prefix = prefix_for(file_name, "-ref.yaml")
        .or_else(|| prefix_for(file_name, "-observer.yaml"))
        .ok_or_else(|| LoadError::UnrecognizedSuffix {
            path: entry_path.display().to_string(),
        })?;

    let expected_prefix = format!("{prefix}-commands.");
    if !declared_commands.starts_with(&expected_prefix) {
        return Err(LoadError::InvalidConfiguration {
            path: entry_path.display().to_string(),
            reason: format!(
                "commands field {declared_commands:?} does not match expected prefix {expected_prefix:?}"
            ),
        });
    }

    Ok(entry_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join(declared_commands))
}

fn to_anyhow(err: anyhow::Error, path: &Path) -> LoadError {
    LoadError::Decode {
        path: path.display().to_string(),
        source: err,
    }
}

/// Load and validate a registry bundle rooted at `root`.
pub fn load_registry(
    root: &Path,
    options: LoaderOptions,
    validator: &dyn EntryValidator,
) -> Result<RegistryBundle, LoadError> {
    let files = walk_tree(root)?;

    let mut bundle = RegistryBundle::default();
    let mut seen: HashMap<String, String> = HashMap::new();

    let mark_seen =
        |name: &str, path: &Path, seen: &mut HashMap<String, String>| -> Result<(), LoadError> {
            if let Some(first) = seen.get(name) {
                return Err(LoadError::DuplicateName {
                    name: name.to_string(),
                    first: first.clone(),
                    second: path.display().to_string(),
                });
            }
            seen.insert(name.to_string(), path.display().to_string());
            Ok(())
        };

    for path in &files {
        let Some(kind) = classify(path) else {
            return Err(LoadError::UnrecognizedSuffix {
                path: path.display().to_string(),
            });
        };

        match kind {
            Classified::Ignored | Classified::Commands => continue,
            Classified::VersionMarker => {
                tracing::info!(path = %path.display(), "registry version marker");
                continue;
            }
            Classified::Reference => {
                let raw: RawRef = load_strict(path).map_err(|e| to_anyhow(e, path))?;
                check_name_matches_path(root, path, &raw.name, options.flat)?;
                let commands_path = commands_path_for(path, &raw.commands)?;
                let commands = read_text_maybe_gzip(&commands_path)
                    .map_err(|e| to_anyhow(e, &commands_path))?;
                let entry = LiteralTestStep {
                    name: raw.name.clone(),
                    commands,
                    extra: raw.extra,
                };
                validator.validate_reference(&entry).map_err(|reason| {
                    LoadError::InvalidConfiguration {
                        path: path.display().to_string(),
                        reason,
                    }
                })?;
                mark_seen(&entry.name, path, &mut seen)?;
                if options.include_documentation {
                    if let Some(doc) = raw.documentation {
                        bundle.documentation.insert(entry.name.clone(), doc);
                    }
                }
                bundle.references.insert(entry.name.clone(), entry);
            }
            Classified::Chain => {
                let raw: RawChain = load_strict(path).map_err(|e| to_anyhow(e, path))?;
                check_name_matches_path(root, path, &raw.name, options.flat)?;
                let chain = Chain {
                    name: raw.name.clone(),
                    steps: raw.steps,
                    parameter_defaults: raw.parameter_defaults,
                };
                mark_seen(&chain.name, path, &mut seen)?;
                if options.include_documentation {
                    if let Some(doc) = raw.documentation {
                        bundle.documentation.insert(chain.name.clone(), doc);
                    }
                }
                bundle.chains.insert(chain.name.clone(), chain);
            }
            Classified::Workflow => {
                let raw: RawWorkflow = load_strict(path).map_err(|e| to_anyhow(e, path))?;
                check_name_matches_path(root, path, &raw.name, options.flat)?;
                let workflow = Workflow {
                    name: raw.name.clone(),
                    pre: raw.pre,
                    test: raw.test,
                    post: raw.post,
                    observers: raw.observers,
                };
                mark_seen(&workflow.name, path, &mut seen)?;
                if options.include_documentation {
                    if let Some(doc) = raw.documentation {
                        bundle.documentation.insert(workflow.name.clone(), doc);
                    }
                }
                bundle.workflows.insert(workflow.name.clone(), workflow);
            }
            Classified::Observer => {
                let raw: RawObserver = load_strict(path).map_err(|e| to_anyhow(e, path))?;
                check_name_matches_path(root, path, &raw.name, options.flat)?;
                let commands_path = commands_path_for(path, &raw.commands)?;
                let commands = read_text_maybe_gzip(&commands_path)
                    .map_err(|e| to_anyhow(e, &commands_path))?;
                let entry = Observer {
                    name: raw.name.clone(),
                    commands,
                };
                validator.validate_observer(&entry).map_err(|reason| {
                    LoadError::InvalidConfiguration {
                        path: path.display().to_string(),
                        reason,
                    }
                })?;
                mark_seen(&entry.name, path, &mut seen)?;
                if options.include_documentation {
                    if let Some(doc) = raw.documentation {
                        bundle.documentation.insert(entry.name.clone(), doc);
                    }
                }
                bundle.observers.insert(entry.name.clone(), entry);
            }
            Classified::Metadata => {
                if !options.include_metadata {
                    continue;
                }
                let raw: RawMetadata = load_strict(path).map_err(|e| to_anyhow(e, path))?;
                let key = Path::new(&raw.path)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| raw.path.clone());
                bundle.metadata.insert(
                    key,
                    RegistryInfo {
                        path: raw.path,
                        owners: raw.owners,
                    },
                );
            }
        }
    }

    check_referential_integrity(&bundle)?;
    check_acyclic(&bundle)?;

    Ok(bundle)
}

fn step_refs(steps: &[StepRef]) -> impl Iterator<Item = (&'static str, &str)> {
    steps.iter().filter_map(|s| match s {
        StepRef::Reference { reference } => Some(("reference", reference.as_str())),
        StepRef::Chain { chain } => Some(("chain", chain.as_str())),
        StepRef::Literal(_) => None,
    })
}

fn check_referential_integrity(bundle: &RegistryBundle) -> Result<(), LoadError> {
    for chain in bundle.chains.values() {
        for (kind, target) in step_refs(&chain.steps) {
            let exists = match kind {
                "reference" => bundle.references.contains_key(target),
                "chain" => bundle.chains.contains_key(target),
                _ => unreachable!(),
            };
            if !exists {
                return Err(LoadError::UnknownReference {
                    kind: "chain",
                    name: chain.name.clone(),
                    target: target.to_string(),
                });
            }
        }
    }

    for workflow in bundle.workflows.values() {
        for steps in [&workflow.pre, &workflow.test, &workflow.post] {
            for (kind, target) in step_refs(steps) {
                let exists = match kind {
                    "reference" => bundle.references.contains_key(target),
                    "chain" => bundle.chains.contains_key(target),
                    _ => unreachable!(),
                };
                if !exists {
                    return Err(LoadError::UnknownReference {
                        kind: "workflow",
                        name: workflow.name.clone(),
                        target: target.to_string(),
                    });
                }
            }
        }
        for name in workflow
            .observers
            .enable
            .iter()
            .chain(workflow.observers.disable.iter())
        {
            if !bundle.observers.contains_key(name) {
                return Err(LoadError::UnknownReference {
                    kind: "workflow observer policy",
                    name: workflow.name.clone(),
                    target: name.clone(),
                });
            }
        }
    }

    Ok(())
}

fn check_acyclic(bundle: &RegistryBundle) -> Result<(), LoadError> {
    let mut graph = Graph::new();
    for name in bundle.entry_names() {
        graph.add_node(name);
    }
    for chain in bundle.chains.values() {
        for (_, target) in step_refs(&chain.steps) {
            graph.add_edge(&chain.name, target);
        }
    }
    for workflow in bundle.workflows.values() {
        for steps in [&workflow.pre, &workflow.test, &workflow.post] {
            for (_, target) in step_refs(steps) {
                graph.add_edge(&workflow.name, target);
            }
        }
        for name in workflow
            .observers
            .enable
            .iter()
            .chain(workflow.observers.disable.iter())
        {
            graph.add_edge(&workflow.name, name);
        }
    }

    if let Some(cycle) = graph.find_cycle() {
        return Err(LoadError::CycleDetected { cycle });
    }
    Ok(())
}
