//! Shared data model for the CI configuration resolver cache.
//!
//! The schema of build configurations and registry entries is deliberately
//! opaque here — validation and the concrete fields live with the external
//! collaborator that owns them. This crate only carries the identity,
//! partitioning, and composition structure the cache itself must reason
//! about.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Monotonically increasing snapshot identifier for a cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Generation(pub u64);

impl Generation {
    pub const INITIAL: Generation = Generation(0);

    pub fn next(self) -> Generation {
        Generation(self.0 + 1)
    }
}

/// Identity and partitioning fields carried by every build configuration.
///
/// `branch` is a regex *pattern*, matched against a query branch at lookup
/// time rather than compiled at load time — a malformed pattern is only a
/// failure for the lookups that would have used it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Metadata {
    pub org: String,
    pub repo: String,
    pub branch: String,
    #[serde(default)]
    pub variant: String,
}

/// An opaque build configuration. The schema beyond `Metadata` and identity
/// is a validated JSON document owned by an external collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildConfiguration {
    /// Base filename the configuration was loaded from; its identity within
    /// a directory walk.
    pub base_name: String,
    pub metadata: Metadata,
    #[serde(default)]
    pub content: Value,
}

pub type RepoConfigs = HashMap<String, Vec<Arc<BuildConfiguration>>>;

/// `org -> repo -> ordered list of configurations`.
#[derive(Debug, Clone, Default)]
pub struct ByOrgRepo(pub HashMap<String, RepoConfigs>);

impl ByOrgRepo {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn insert(&mut self, config: Arc<BuildConfiguration>) {
        self.0
            .entry(config.metadata.org.clone())
            .or_default()
            .entry(config.metadata.repo.clone())
            .or_default()
            .push(config);
    }

    pub fn get(&self, org: &str, repo: &str) -> Option<&[Arc<BuildConfiguration>]> {
        self.0.get(org)?.get(repo).map(Vec::as_slice)
    }

    pub fn iter_all(&self) -> impl Iterator<Item = &Arc<BuildConfiguration>> {
        self.0
            .values()
            .flat_map(|repos| repos.values())
            .flat_map(|v| v.iter())
    }
}

/// A user-supplied function that projects a configuration onto zero or more
/// index keys.
pub type IndexFn = Arc<dyn Fn(&BuildConfiguration) -> Vec<String> + Send + Sync>;

/// A named secondary index: key -> matching configurations.
#[derive(Debug, Clone, Default)]
pub struct Index(pub HashMap<String, Vec<Arc<BuildConfiguration>>>);

impl Index {
    pub fn build(by_org_repo: &ByOrgRepo, f: &IndexFn) -> Self {
        let mut map: HashMap<String, Vec<Arc<BuildConfiguration>>> = HashMap::new();
        for config in by_org_repo.iter_all() {
            for key in f(config) {
                map.entry(key).or_default().push(Arc::clone(config));
            }
        }
        Self(map)
    }
}

/// Added/removed diff for a single index key between two generations.
#[derive(Debug, Clone)]
pub struct IndexDelta {
    pub index_key: String,
    pub added: Vec<Arc<BuildConfiguration>>,
    pub removed: Vec<Arc<BuildConfiguration>>,
}

impl IndexDelta {
    fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Compute per-key deltas between two generations of one named index.
///
/// Equality is by `(index_key, Metadata)`: a value that moved from one key
/// to another shows up as a removal under the old key and an addition under
/// the new one.
pub fn diff_index(old: &Index, new: &Index) -> Vec<IndexDelta> {
    let mut keys: Vec<&String> = old.0.keys().chain(new.0.keys()).collect();
    keys.sort();
    keys.dedup();

    let mut deltas = Vec::new();
    for key in keys {
        let old_by_meta: HashMap<&Metadata, &Arc<BuildConfiguration>> = old
            .0
            .get(key)
            .into_iter()
            .flatten()
            .map(|c| (&c.metadata, c))
            .collect();
        let new_by_meta: HashMap<&Metadata, &Arc<BuildConfiguration>> = new
            .0
            .get(key)
            .into_iter()
            .flatten()
            .map(|c| (&c.metadata, c))
            .collect();

        let mut meta_keys: Vec<&Metadata> = old_by_meta
            .keys()
            .chain(new_by_meta.keys())
            .copied()
            .collect();
        meta_keys.sort_by_key(|m| {
            (
                m.org.clone(),
                m.repo.clone(),
                m.branch.clone(),
                m.variant.clone(),
            )
        });
        meta_keys.dedup();

        let mut added = Vec::new();
        let mut removed = Vec::new();
        for meta in meta_keys {
            match (old_by_meta.get(meta), new_by_meta.get(meta)) {
                (Some(o), Some(n)) => {
                    if o.content != n.content {
                        removed.push(Arc::clone(o));
                        added.push(Arc::clone(n));
                    }
                }
                (Some(o), None) => removed.push(Arc::clone(o)),
                (None, Some(n)) => added.push(Arc::clone(n)),
                (None, None) => unreachable!(),
            }
        }

        let delta = IndexDelta {
            index_key: key.clone(),
            added,
            removed,
        };
        if !delta.is_empty() {
            deltas.push(delta);
        }
    }
    deltas
}

// --- Registry bundle -------------------------------------------------------

/// A leaf step with its commands already inlined from its sibling
/// `*-commands.*` file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LiteralTestStep {
    pub name: String,
    pub commands: String,
    #[serde(default)]
    pub extra: Value,
}

/// One entry in an ordered composition: either a named reference/chain, or
/// inline literal content. Untagged because the wire format is a plain
/// YAML/JSON map keyed by `reference`/`chain`, or the literal step's own
/// fields directly — never an enum tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StepRef {
    Reference { reference: String },
    Chain { chain: String },
    Literal(LiteralTestStep),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Chain {
    pub name: String,
    pub steps: Vec<StepRef>,
    #[serde(default)]
    pub parameter_defaults: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObserverPolicy {
    #[serde(default)]
    pub enable: Vec<String>,
    #[serde(default)]
    pub disable: Vec<String>,
}

impl ObserverPolicy {
    /// Merge `other` into `self`, with `disable` winning over `enable` on
    /// conflict (spec §4.7).
    pub fn merge(&self, other: &ObserverPolicy) -> ObserverPolicy {
        let mut enable: Vec<String> = self
            .enable
            .iter()
            .chain(other.enable.iter())
            .cloned()
            .collect();
        let mut disable: Vec<String> = self
            .disable
            .iter()
            .chain(other.disable.iter())
            .cloned()
            .collect();
        disable.sort();
        disable.dedup();
        enable.retain(|name| !disable.contains(name));
        enable.sort();
        enable.dedup();
        ObserverPolicy { enable, disable }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Workflow {
    pub name: String,
    #[serde(default)]
    pub pre: Vec<StepRef>,
    #[serde(default)]
    pub test: Vec<StepRef>,
    #[serde(default)]
    pub post: Vec<StepRef>,
    #[serde(default)]
    pub observers: ObserverPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Observer {
    pub name: String,
    pub commands: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistryInfo {
    pub path: String,
    #[serde(default)]
    pub owners: Vec<String>,
}

/// The loaded registry: references/chains/workflows/observers plus optional
/// documentation and metadata, keyed by entry name.
#[derive(Debug, Clone, Default)]
pub struct RegistryBundle {
    pub references: HashMap<String, LiteralTestStep>,
    pub chains: HashMap<String, Chain>,
    pub workflows: HashMap<String, Workflow>,
    pub observers: HashMap<String, Observer>,
    pub documentation: HashMap<String, String>,
    pub metadata: HashMap<String, RegistryInfo>,
}

impl RegistryBundle {
    /// Every distinct entry name across references/chains/workflows/observers.
    pub fn entry_names(&self) -> impl Iterator<Item = &str> {
        self.references
            .keys()
            .chain(self.chains.keys())
            .chain(self.workflows.keys())
            .chain(self.observers.keys())
            .map(String::as_str)
    }
}

// --- Error taxonomy ---------------------------------------------------------

/// Failures surfaced by the config cache's query-time operations.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("no configuration matches {org}/{repo} branch={branch:?} variant={variant:?}")]
    NotFound {
        org: String,
        repo: String,
        branch: String,
        variant: String,
    },
    #[error("{count} configurations match {org}/{repo} branch={branch:?} variant={variant:?}")]
    Ambiguous {
        org: String,
        repo: String,
        branch: String,
        variant: String,
        count: usize,
    },
    #[error("stored branch pattern {pattern:?} does not compile: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("no such index: {0}")]
    NoSuchIndex(String),
    #[error("index already registered: {0}")]
    DuplicateIndex(String),
}

/// Failures surfaced by a reload (walk, decode, validate, cycle-check).
/// The prior cache state is always retained on any `LoadError`.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to walk {path}: {source}")]
    Walk {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("invalid configuration in {path}: {reason}")]
    InvalidConfiguration { path: String, reason: String },
    #[error("composition cycle detected: {cycle}")]
    CycleDetected { cycle: String },
    #[error("{name} is defined more than once ({first} and {second})")]
    DuplicateName {
        name: String,
        first: String,
        second: String,
    },
    #[error("{kind} {name} references unknown entry {target}")]
    UnknownReference {
        kind: &'static str,
        name: String,
        target: String,
    },
    #[error("file name {actual} at {path} does not match declared name {expected}")]
    NameMismatch {
        path: String,
        expected: String,
        actual: String,
    },
    #[error("unrecognized file suffix at {path}")]
    UnrecognizedSuffix { path: String },
}

impl Clone for LoadError {
    fn clone(&self) -> Self {
        // `LoadError` must be shareable across coalescer waiters; render
        // once and carry the message forward rather than requiring every
        // source error to implement `Clone`.
        match self {
            LoadError::Decode { path, source } => LoadError::Decode {
                path: path.clone(),
                source: anyhow::anyhow!(source.to_string()),
            },
            LoadError::Walk { path, source } => LoadError::Decode {
                path: path.clone(),
                source: anyhow::anyhow!(source.to_string()),
            },
            LoadError::InvalidConfiguration { path, reason } => LoadError::InvalidConfiguration {
                path: path.clone(),
                reason: reason.clone(),
            },
            LoadError::CycleDetected { cycle } => LoadError::CycleDetected {
                cycle: cycle.clone(),
            },
            LoadError::DuplicateName {
                name,
                first,
                second,
            } => LoadError::DuplicateName {
                name: name.clone(),
                first: first.clone(),
                second: second.clone(),
            },
            LoadError::UnknownReference { kind, name, target } => LoadError::UnknownReference {
                kind,
                name: name.clone(),
                target: target.clone(),
            },
            LoadError::NameMismatch {
                path,
                expected,
                actual,
            } => LoadError::NameMismatch {
                path: path.clone(),
                expected: expected.clone(),
                actual: actual.clone(),
            },
            LoadError::UnrecognizedSuffix { path } => {
                LoadError::UnrecognizedSuffix { path: path.clone() }
            }
        }
    }
}

/// Failures surfaced by the structural resolver.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("unknown reference: {0}")]
    UnknownReference(String),
    #[error("unknown chain: {0}")]
    UnknownChain(String),
    #[error("unknown workflow: {0}")]
    UnknownWorkflow(String),
    #[error("unknown observer: {0}")]
    UnknownObserver(String),
    #[error("cycle encountered while resolving: {0}")]
    CycleDetected(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(
        org: &str,
        repo: &str,
        branch: &str,
        variant: &str,
        content: Value,
    ) -> Arc<BuildConfiguration> {
        Arc::new(BuildConfiguration {
            base_name: format!("{org}-{repo}-{branch}-{variant}.yaml"),
            metadata: Metadata {
                org: org.into(),
                repo: repo.into(),
                branch: branch.into(),
                variant: variant.into(),
            },
            content,
        })
    }

    #[test]
    fn by_org_repo_partitions_correctly() {
        let mut m = ByOrgRepo::new();
        m.insert(cfg("openshift", "release", "main", "", Value::Null));
        m.insert(cfg("openshift", "origin", "main", "", Value::Null));
        assert_eq!(m.get("openshift", "release").unwrap().len(), 1);
        assert_eq!(m.get("openshift", "origin").unwrap().len(), 1);
        assert!(m.get("openshift", "nope").is_none());
    }

    #[test]
    fn diff_index_reports_added_and_removed_for_edited_value() {
        let a = cfg("o", "r", "main", "", serde_json::json!({"image": "old"}));
        let b = cfg("o", "r", "main", "", serde_json::json!({"image": "new"}));

        let old = Index(HashMap::from([("by-image".to_string(), vec![a])]));
        let new = Index(HashMap::from([("by-image".to_string(), vec![b])]));

        let deltas = diff_index(&old, &new);
        assert_eq!(deltas.len(), 1);
        assert_eq!(deltas[0].added.len(), 1);
        assert_eq!(deltas[0].removed.len(), 1);
    }

    #[test]
    fn diff_index_is_empty_when_unchanged() {
        let a = cfg("o", "r", "main", "", serde_json::json!({"image": "same"}));
        let old = Index(HashMap::from([("k".to_string(), vec![a.clone()])]));
        let new = Index(HashMap::from([("k".to_string(), vec![a])]));
        assert!(diff_index(&old, &new).is_empty());
    }

    #[test]
    fn diff_index_tracks_key_moves() {
        let a = cfg("o", "r", "main", "", Value::Null);
        let old = Index(HashMap::from([("k1".to_string(), vec![a.clone()])]));
        let new = Index(HashMap::from([("k2".to_string(), vec![a])]));

        let mut deltas = diff_index(&old, &new);
        deltas.sort_by(|a, b| a.index_key.cmp(&b.index_key));
        assert_eq!(deltas.len(), 2);
        assert_eq!(deltas[0].index_key, "k1");
        assert_eq!(deltas[0].removed.len(), 1);
        assert_eq!(deltas[1].index_key, "k2");
        assert_eq!(deltas[1].added.len(), 1);
    }

    #[test]
    fn observer_policy_disable_overrides_enable() {
        let base = ObserverPolicy {
            enable: vec!["a".into(), "b".into()],
            disable: vec![],
        };
        let override_ = ObserverPolicy {
            enable: vec![],
            disable: vec!["b".into()],
        };
        let merged = base.merge(&override_);
        assert_eq!(merged.enable, vec!["a".to_string()]);
        assert_eq!(merged.disable, vec!["b".to_string()]);
    }
}
