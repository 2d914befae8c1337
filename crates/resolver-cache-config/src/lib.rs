//! Loads the per-project build-configuration catalog into a [`ByOrgRepo`].
//!
//! ```no_run
//! use resolver_cache_config::load_configs;
//! use std::path::Path;
//!
//! let by_org_repo = load_configs(Path::new("/etc/ci-configs")).expect("load");
//! ```

pub mod decode;
pub mod walk;

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;

use resolver_cache_types::{BuildConfiguration, ByOrgRepo, LoadError, Metadata};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct RawConfigFile {
    metadata: Metadata,
    #[serde(flatten)]
    content: Value,
}

/// Runtime validation of a decoded build configuration. The concrete rules
/// are an external collaborator's concern (spec §1); this crate only
/// provides the extension point and a permissive default.
pub trait ConfigValidator: Send + Sync {
    fn validate(&self, config: &BuildConfiguration) -> Result<(), String>;
}

pub struct NoopValidator;

impl ConfigValidator for NoopValidator {
    fn validate(&self, _config: &BuildConfiguration) -> Result<(), String> {
        Ok(())
    }
}

fn is_config_candidate(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some(ext) if ext.eq_ignore_ascii_case("yaml") || ext.eq_ignore_ascii_case("yml")
    )
}

/// Load every `.yaml`/`.yml` file under `root` as a build configuration and
/// partition the result by org/repo. Files with any other extension at a
/// non-hidden path are silently ignored (spec §6).
pub fn load_configs(root: &Path) -> Result<ByOrgRepo, LoadError> {
    load_configs_with_validator(root, &NoopValidator)
}

/// As [`load_configs`], but with a caller-supplied runtime validator run
/// after strict decoding (spec §4.4 step 1).
pub fn load_configs_with_validator(
    root: &Path,
    validator: &dyn ConfigValidator,
) -> Result<ByOrgRepo, LoadError> {
    let all_files = walk::walk_tree(root)?;
    let candidates: Vec<PathBuf> = all_files
        .into_iter()
        .filter(|p| is_config_candidate(p))
        .collect();

    let worker_count = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(candidates.len().max(1));

    let results: Mutex<Vec<Arc<BuildConfiguration>>> =
        Mutex::new(Vec::with_capacity(candidates.len()));
    let errors: Mutex<Vec<LoadError>> = Mutex::new(Vec::new());

    thread::scope(|scope| {
        for chunk in chunk_evenly(&candidates, worker_count) {
            let results = &results;
            let errors = &errors;
            let validator = &validator;
            scope.spawn(move || {
                for path in chunk {
                    match load_one(path).and_then(|config| {
                        validator
                            .validate(&config)
                            .map(|()| config)
                            .map_err(|reason| LoadError::InvalidConfiguration {
                                path: path.display().to_string(),
                                reason,
                            })
                    }) {
                        Ok(config) => results.lock().unwrap().push(Arc::new(config)),
                        Err(err) => errors.lock().unwrap().push(err),
                    }
                }
            });
        }
    });

    let mut errors = errors.into_inner().unwrap();
    if let Some(first) = errors.pop() {
        return Err(first);
    }

    let mut by_org_repo = ByOrgRepo::new();
    for config in results.into_inner().unwrap() {
        by_org_repo.insert(config);
    }
    Ok(by_org_repo)
}

fn load_one(path: &Path) -> Result<BuildConfiguration, LoadError> {
    let raw: RawConfigFile = decode::load_strict(path).map_err(|source| LoadError::Decode {
        path: path.display().to_string(),
        source,
    })?;

    let base_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string());

    Ok(BuildConfiguration {
        base_name,
        metadata: raw.metadata,
        content: raw.content,
    })
}

fn chunk_evenly<T>(items: &[T], worker_count: usize) -> Vec<&[T]> {
    if items.is_empty() || worker_count == 0 {
        return Vec::new();
    }
    let chunk_size = items.len().div_ceil(worker_count).max(1);
    items.chunks(chunk_size).collect()
}
