//! Wires the config cache, registry cache, and watch orchestrator together
//! (spec §2 control/data flow: watch orchestrator -> coalescer -> loader ->
//! validate/cycle-check -> atomic swap -> generation++ -> fan-out).

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use resolver_cache_config::ConfigValidator;
use resolver_cache_registry::{EntryValidator, LoaderOptions};
use resolver_cache_types::LoadError;
use resolver_cache_watch::WatchOrchestrator;

use crate::cache_config::CacheConfig;
use crate::config_cache::ConfigCache;
use crate::metrics::{error_label, Metrics};
use crate::registry_cache::RegistryCache;

/// The fully wired cache pair plus their watchers. Dropping this stops both
/// watch tasks.
pub struct ResolverCache {
    pub config: Arc<ConfigCache>,
    pub registry: Arc<RegistryCache>,
    _config_watch: WatchOrchestrator,
    _registry_watch: WatchOrchestrator,
}

impl ResolverCache {
    /// Cold-start both catalogs and install watchers over their roots. A
    /// failure here is fatal per spec §7 — there is no prior cache state to
    /// retain.
    pub fn open(
        cache_config: &CacheConfig,
        config_validator: Arc<dyn ConfigValidator>,
        registry_validator: Box<dyn EntryValidator>,
    ) -> Result<Self, LoadError> {
        Self::open_with_metrics(
            cache_config,
            config_validator,
            registry_validator,
            Metrics::default(),
            Metrics::default(),
        )
    }

    pub fn open_with_metrics(
        cache_config: &CacheConfig,
        config_validator: Arc<dyn ConfigValidator>,
        registry_validator: Box<dyn EntryValidator>,
        config_metrics: Metrics,
        registry_metrics: Metrics,
    ) -> Result<Self, LoadError> {
        let config = Arc::new(ConfigCache::open_with_metrics(
            &cache_config.config_root,
            config_validator,
            config_metrics,
        )?);

        let options = LoaderOptions {
            flat: cache_config.flat_registry,
            include_documentation: cache_config.include_documentation,
            include_metadata: cache_config.include_metadata,
        };
        let registry = Arc::new(RegistryCache::open_with_metrics(
            &cache_config.registry_root,
            options,
            registry_validator,
            registry_metrics,
        )?);

        let config_watch = install_watch(
            &cache_config.config_root,
            cache_config.symlink_poll_interval,
            {
                let config = Arc::clone(&config);
                move || {
                    if let Err(err) = config.reload() {
                        tracing::warn!(error = %err, "config reload failed");
                    }
                }
            },
            config.metrics(),
        );

        let registry_watch = install_watch(
            &cache_config.registry_root,
            cache_config.symlink_poll_interval,
            {
                let registry = Arc::clone(&registry);
                move || {
                    if let Err(err) = registry.reload() {
                        tracing::warn!(error = %err, "registry reload failed");
                    }
                }
            },
            registry.metrics(),
        );

        Ok(Self {
            config,
            registry,
            _config_watch: config_watch,
            _registry_watch: registry_watch,
        })
    }
}

fn install_watch(
    root: &Path,
    poll_interval: Duration,
    on_changed: impl Fn() + Send + Sync + 'static,
    metrics: Arc<Metrics>,
) -> WatchOrchestrator {
    let metrics_for_errors = Arc::clone(&metrics);
    WatchOrchestrator::spawn_for_root(root, poll_interval, on_changed, move |msg| {
        metrics_for_errors
            .counter
            .increment(error_label::RECEIVED_FSNOTIFY_ERROR);
        tracing::warn!(error = %msg, "watcher error");
    })
    .unwrap_or_else(|err| {
        // `notify`'s directory watcher can fail to install (e.g. inotify
        // instance limits); log and run without live reload rather than
        // refusing to start, since the initial catalogs already loaded.
        metrics
            .counter
            .increment(error_label::FAILED_TO_UPDATE_WATCHER);
        tracing::warn!(error = %err, "failed to install watcher");
        WatchOrchestrator::spawn(NeverEventBus, || {}, |_| {})
    })
}

struct NeverEventBus;
impl resolver_cache_watch::EventBus for NeverEventBus {
    fn recv_timeout(&self, timeout: Duration) -> resolver_cache_watch::RecvOutcome {
        std::thread::sleep(timeout);
        resolver_cache_watch::RecvOutcome::TimedOut
    }
}
