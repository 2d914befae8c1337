//! Read-many/write-rare cache fronting the step registry bundle and its
//! derived structural resolver (spec §4.6).

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use resolver_cache_coalesce::Coalescer;
use resolver_cache_registry::{
    load_registry, resolve_workflow, EntryValidator, LoaderOptions, ResolvedWorkflow,
};
use resolver_cache_types::{Generation, LoadError, ObserverPolicy, ResolveError};

use crate::metrics::{error_label, Metrics};

struct State {
    bundle: resolver_cache_types::RegistryBundle,
    generation: Generation,
}

pub struct RegistryCache {
    root: PathBuf,
    options: LoaderOptions,
    validator: Box<dyn EntryValidator>,
    metrics: Arc<Metrics>,
    state: RwLock<State>,
    coalescer: Coalescer<(), LoadError>,
}

impl RegistryCache {
    pub fn open(
        root: impl Into<PathBuf>,
        options: LoaderOptions,
        validator: Box<dyn EntryValidator>,
    ) -> Result<Self, LoadError> {
        Self::open_with_metrics(root, options, validator, Metrics::default())
    }

    pub fn open_with_metrics(
        root: impl Into<PathBuf>,
        options: LoaderOptions,
        validator: Box<dyn EntryValidator>,
        metrics: Metrics,
    ) -> Result<Self, LoadError> {
        let root = root.into();
        let bundle = load_registry(&root, options, validator.as_ref())?;
        Ok(Self {
            root,
            options,
            validator,
            metrics: Arc::new(metrics),
            state: RwLock::new(State {
                bundle,
                generation: Generation::INITIAL.next(),
            }),
            coalescer: Coalescer::new(),
        })
    }

    pub fn reload(&self) -> Result<(), LoadError> {
        self.coalescer.run(|| self.perform_reload())
    }

    fn perform_reload(&self) -> Result<(), LoadError> {
        let root = self.root.clone();
        let options = self.options;
        let validator = self.validator.as_ref();
        let result = self
            .metrics
            .time_reload(|| load_registry(&root, options, validator));

        let bundle = match result {
            Ok(bundle) => bundle,
            Err(err) => {
                self.metrics
                    .counter
                    .increment(error_label::FAILED_TO_LOAD_REGISTRY);
                return Err(err);
            }
        };

        let mut state = self.state.write().unwrap();
        state.bundle = bundle;
        state.generation = state.generation.next();
        Ok(())
    }

    pub fn get_generation(&self) -> Generation {
        self.state.read().unwrap().generation
    }

    /// The bundle's distinct entry names, as a point-in-time snapshot.
    pub fn get_components(&self) -> Vec<String> {
        let state = self.state.read().unwrap();
        state.bundle.entry_names().map(str::to_string).collect()
    }

    pub fn resolve(
        &self,
        workflow_name: &str,
        overrides: &HashMap<String, String>,
        config_observers: &ObserverPolicy,
    ) -> Result<ResolvedWorkflow, ResolveError> {
        let state = self.state.read().unwrap();
        resolve_workflow(&state.bundle, workflow_name, overrides, config_observers)
    }

    /// Resolve a full configuration, i.e. a named workflow with its
    /// parameter overrides and the configuration's own observer
    /// enable/disable set (spec §4.6 `resolve-config`, §4.7 observer merge).
    pub fn resolve_config(
        &self,
        workflow_name: &str,
        overrides: &HashMap<String, String>,
        config_observers: &ObserverPolicy,
    ) -> Result<ResolvedWorkflow, ResolveError> {
        self.resolve(workflow_name, overrides, config_observers)
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        Arc::clone(&self.metrics)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use resolver_cache_registry::NoopValidator;
    use std::fs;

    fn write(dir: &std::path::Path, rel: &str, contents: &str) {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn cold_start_then_resolve_a_workflow() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "build-ref.yaml",
            "name: build\ncommands: build-commands.sh\n",
        );
        write(dir.path(), "build-commands.sh", "make build\n");
        write(
            dir.path(),
            "ci-workflow.yaml",
            "name: ci\ntest:\n  - reference: build\n",
        );

        let cache = RegistryCache::open(
            dir.path(),
            LoaderOptions {
                flat: true,
                ..Default::default()
            },
            Box::new(NoopValidator),
        )
        .unwrap();

        assert_eq!(cache.get_generation(), Generation::INITIAL.next());
        let resolved = cache
            .resolve("ci", &HashMap::new(), &ObserverPolicy::default())
            .unwrap();
        assert_eq!(resolved.test.len(), 1);
        assert_eq!(resolved.test[0].name, "build");
    }

    #[test]
    fn cycle_is_rejected_and_prior_bundle_is_kept_on_reload_failure() {
        use crate::metrics::{error_label, CounterSink, HistogramSink, Metrics};
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        struct CountingCounter(Arc<AtomicUsize>);
        impl CounterSink for CountingCounter {
            fn increment(&self, label: &str) {
                assert_eq!(label, error_label::FAILED_TO_LOAD_REGISTRY);
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }
        struct NoopHistogram;
        impl HistogramSink for NoopHistogram {
            fn observe(&self, _seconds: f64) {}
        }

        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "build-ref.yaml",
            "name: build\ncommands: build-commands.sh\n",
        );
        write(dir.path(), "build-commands.sh", "make build\n");

        let options = LoaderOptions {
            flat: true,
            ..Default::default()
        };
        let error_count = Arc::new(AtomicUsize::new(0));
        let metrics = Metrics::new(CountingCounter(Arc::clone(&error_count)), NoopHistogram);
        let cache =
            RegistryCache::open_with_metrics(dir.path(), options, Box::new(NoopValidator), metrics)
                .unwrap();
        let generation_before = cache.get_generation();
        assert_eq!(error_count.load(Ordering::SeqCst), 0);

        write(
            dir.path(),
            "ipi-install-chain.yaml",
            "name: ipi-install\nsteps:\n  - chain: ipi-install\n",
        );

        let result = cache.reload();
        assert!(matches!(result, Err(LoadError::CycleDetected { .. })));
        assert_eq!(cache.get_generation(), generation_before);
        assert_eq!(error_count.load(Ordering::SeqCst), 1);
    }
}
