//! Read-many/write-rare cache fronting [`ByOrgRepo`] (spec §4.5).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, RwLock};
use std::thread;

use regex::Regex;
use resolver_cache_coalesce::Coalescer;
use resolver_cache_config::ConfigValidator;
use resolver_cache_types::{
    diff_index, BuildConfiguration, ByOrgRepo, Generation, Index, IndexDelta, IndexFn, LoadError,
    QueryError,
};

use crate::metrics::{error_label, Metrics};

struct IndexEntry {
    f: IndexFn,
    current: Index,
}

struct State {
    by_org_repo: ByOrgRepo,
    generation: Generation,
    indexes: HashMap<String, IndexEntry>,
}

/// The config cache. Readers call the `get_*` methods directly under a read
/// lock; reloads run through the coalescer so that concurrent disk-change
/// notifications collapse into at most one in-flight reload plus one
/// trailing one.
pub struct ConfigCache {
    root: PathBuf,
    validator: Arc<dyn ConfigValidator>,
    metrics: Arc<Metrics>,
    state: RwLock<State>,
    coalescer: Coalescer<(), LoadError>,
    subscribers: std::sync::Mutex<HashMap<String, Vec<Sender<IndexDelta>>>>,
}

impl ConfigCache {
    /// Perform the initial load. Per spec §7, a failure here is fatal to
    /// startup rather than something the cache can retain a prior state
    /// against — there is no prior state yet.
    pub fn open(
        root: impl Into<PathBuf>,
        validator: Arc<dyn ConfigValidator>,
    ) -> Result<Self, LoadError> {
        Self::open_with_metrics(root, validator, Metrics::default())
    }

    pub fn open_with_metrics(
        root: impl Into<PathBuf>,
        validator: Arc<dyn ConfigValidator>,
        metrics: Metrics,
    ) -> Result<Self, LoadError> {
        let root = root.into();
        let by_org_repo =
            resolver_cache_config::load_configs_with_validator(&root, validator.as_ref())?;
        Ok(Self {
            root,
            validator,
            metrics: Arc::new(metrics),
            state: RwLock::new(State {
                by_org_repo,
                generation: Generation::INITIAL.next(),
                indexes: HashMap::new(),
            }),
            coalescer: Coalescer::new(),
            subscribers: std::sync::Mutex::new(HashMap::new()),
        })
    }

    /// Re-run the walk/decode/validate pipeline and atomically swap in the
    /// result. Coalesced: concurrent callers share one execution.
    pub fn reload(&self) -> Result<(), LoadError> {
        self.coalescer.run(|| self.perform_reload())
    }

    fn perform_reload(&self) -> Result<(), LoadError> {
        let root = self.root.clone();
        let validator = Arc::clone(&self.validator);
        let result = self.metrics.time_reload(|| {
            resolver_cache_config::load_configs_with_validator(&root, validator.as_ref())
        });

        let by_org_repo = match result {
            Ok(by_org_repo) => by_org_repo,
            Err(err) => {
                let label = match &err {
                    LoadError::InvalidConfiguration { .. } => error_label::INVALID_CONFIG,
                    _ => error_label::FAILED_TO_LOAD_CONFIG,
                };
                self.metrics.counter.increment(label);
                return Err(err);
            }
        };

        let mut state = self.state.write().unwrap();
        state.by_org_repo = by_org_repo;

        let by_org_repo = state.by_org_repo.clone();
        let mut deltas_by_index = Vec::new();
        for (name, entry) in state.indexes.iter_mut() {
            let prior = std::mem::take(&mut entry.current);
            entry.current = Index::build(&by_org_repo, &entry.f);
            deltas_by_index.push((name.clone(), prior, entry.current.clone()));
        }
        state.generation = state.generation.next();
        drop(state);

        self.dispatch_deltas(deltas_by_index);
        Ok(())
    }

    fn dispatch_deltas(&self, deltas_by_index: Vec<(String, Index, Index)>) {
        let subscribers = self.subscribers.lock().unwrap();
        for (name, prior, current) in deltas_by_index {
            let Some(subs) = subscribers.get(&name) else {
                continue;
            };
            if subs.is_empty() {
                continue;
            }
            let deltas = diff_index(&prior, &current);
            if deltas.is_empty() {
                continue;
            }
            for sub in subs {
                let sub = sub.clone();
                let deltas = deltas.clone();
                thread::spawn(move || {
                    for delta in deltas {
                        // A closed channel means the subscriber is gone;
                        // silently drop the rest of its deltas (spec §7).
                        if sub.send(delta).is_err() {
                            break;
                        }
                    }
                });
            }
        }
    }

    pub fn get_matching(
        &self,
        org: &str,
        repo: &str,
        branch: &str,
        variant: &str,
    ) -> Result<Arc<BuildConfiguration>, QueryError> {
        let state = self.state.read().unwrap();
        let candidates = state
            .by_org_repo
            .get(org, repo)
            .ok_or_else(|| QueryError::NotFound {
                org: org.to_string(),
                repo: repo.to_string(),
                branch: branch.to_string(),
                variant: variant.to_string(),
            })?;

        let mut matches = Vec::new();
        for config in candidates {
            if config.metadata.variant != variant {
                continue;
            }
            let pattern = Regex::new(&config.metadata.branch).map_err(|source| {
                QueryError::InvalidPattern {
                    pattern: config.metadata.branch.clone(),
                    source,
                }
            })?;
            if pattern.is_match(branch) {
                matches.push(Arc::clone(config));
            }
        }

        match matches.len() {
            0 => Err(QueryError::NotFound {
                org: org.to_string(),
                repo: repo.to_string(),
                branch: branch.to_string(),
                variant: variant.to_string(),
            }),
            1 => Ok(matches.into_iter().next().unwrap()),
            count => Err(QueryError::Ambiguous {
                org: org.to_string(),
                repo: repo.to_string(),
                branch: branch.to_string(),
                variant: variant.to_string(),
                count,
            }),
        }
    }

    /// A consistent `(ByOrgRepo, Generation)` snapshot pair, both read under
    /// the same read-lock span (spec §5 ordering guarantees).
    pub fn get_all(&self) -> (ByOrgRepo, Generation) {
        let state = self.state.read().unwrap();
        (state.by_org_repo.clone(), state.generation)
    }

    pub fn get_generation(&self) -> Generation {
        self.state.read().unwrap().generation
    }

    pub fn add_index(&self, name: impl Into<String>, f: IndexFn) -> Result<(), QueryError> {
        let name = name.into();
        let mut state = self.state.write().unwrap();
        if state.indexes.contains_key(&name) {
            return Err(QueryError::DuplicateIndex(name));
        }
        let current = Index::build(&state.by_org_repo, &f);
        state.indexes.insert(name, IndexEntry { f, current });
        Ok(())
    }

    pub fn get_from_index(
        &self,
        name: &str,
        key: &str,
    ) -> Result<Vec<Arc<BuildConfiguration>>, QueryError> {
        let state = self.state.read().unwrap();
        let entry = state
            .indexes
            .get(name)
            .ok_or_else(|| QueryError::NoSuchIndex(name.to_string()))?;
        Ok(entry.current.0.get(key).cloned().unwrap_or_default())
    }

    /// Subscribing before an index of this name exists is legal; deltas
    /// begin flowing once it is first built.
    pub fn subscribe_to_index_changes(&self, name: impl Into<String>) -> Receiver<IndexDelta> {
        let (tx, rx) = channel();
        self.subscribers
            .lock()
            .unwrap()
            .entry(name.into())
            .or_default()
            .push(tx);
        rx
    }

    pub fn config_path(&self) -> &Path {
        &self.root
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }
}

/// Construct an [`IndexFn`] from a plain closure, for callers that don't
/// want to write the `Arc<dyn Fn(...) + Send + Sync>` boilerplate by hand.
pub fn index_fn(f: impl Fn(&BuildConfiguration) -> Vec<String> + Send + Sync + 'static) -> IndexFn {
    Arc::new(f)
}

#[cfg(test)]
mod tests {
    use super::*;
    use resolver_cache_config::NoopValidator;
    use std::fs;
    use std::time::Duration;

    fn write(dir: &Path, name: &str, org: &str, repo: &str, branch: &str, content: &str) {
        fs::write(
            dir.join(name),
            format!(
                "metadata:\n  org: {org}\n  repo: {repo}\n  branch: {branch}\n  variant: \"\"\n{content}\n"
            ),
        )
        .unwrap();
    }

    #[test]
    fn cold_start_matches_by_org_repo_and_branch() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "a.yaml",
            "openshift",
            "release",
            "main",
            "image: x",
        );

        let cache = ConfigCache::open(dir.path(), Arc::new(NoopValidator)).unwrap();
        let config = cache
            .get_matching("openshift", "release", "main", "")
            .unwrap();
        assert_eq!(config.metadata.branch, "main");
        assert_eq!(cache.get_generation(), Generation::INITIAL.next());
    }

    #[test]
    fn ambiguous_branch_patterns_fail_the_query() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yaml", "o", "r", "main", "");
        write(dir.path(), "b.yaml", "o", "r", "ma.n", "");

        let cache = ConfigCache::open(dir.path(), Arc::new(NoopValidator)).unwrap();
        let result = cache.get_matching("o", "r", "main", "");
        assert!(matches!(result, Err(QueryError::Ambiguous { .. })));
    }

    #[test]
    fn branch_regex_matching_follows_spec_example() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yaml", "o", "r", r"release-4\.1[0-9]", "");

        let cache = ConfigCache::open(dir.path(), Arc::new(NoopValidator)).unwrap();
        assert!(cache.get_matching("o", "r", "release-4.15", "").is_ok());
        assert!(matches!(
            cache.get_matching("o", "r", "release-5.0", ""),
            Err(QueryError::NotFound { .. })
        ));
    }

    #[test]
    fn index_delta_on_edit_reports_one_added_and_one_removed() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yaml", "o", "r", "main", "image: old");

        let cache = ConfigCache::open(dir.path(), Arc::new(NoopValidator)).unwrap();
        cache
            .add_index("by-repo", index_fn(|c| vec![c.metadata.repo.clone()]))
            .unwrap();
        let rx = cache.subscribe_to_index_changes("by-repo");

        write(dir.path(), "a.yaml", "o", "r", "main", "image: new");
        cache.reload().unwrap();

        let delta = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(delta.added.len(), 1);
        assert_eq!(delta.removed.len(), 1);
    }

    #[test]
    fn duplicate_index_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yaml", "o", "r", "main", "");
        let cache = ConfigCache::open(dir.path(), Arc::new(NoopValidator)).unwrap();
        cache.add_index("x", index_fn(|_| vec![])).unwrap();
        assert!(matches!(
            cache.add_index("x", index_fn(|_| vec![])),
            Err(QueryError::DuplicateIndex(_))
        ));
    }

    #[test]
    fn unknown_index_lookup_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.yaml", "o", "r", "main", "");
        let cache = ConfigCache::open(dir.path(), Arc::new(NoopValidator)).unwrap();
        assert!(matches!(
            cache.get_from_index("nope", "k"),
            Err(QueryError::NoSuchIndex(_))
        ));
    }
}
