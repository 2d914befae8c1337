//! In-memory, continuously-refreshed cache of CI build configurations and
//! step registries, kept warm by background filesystem watchers and served
//! to readers without blocking on reload (see [`orchestration::ResolverCache`]
//! for the top-level entry point).

pub mod cache_config;
pub mod config_cache;
pub mod logging;
pub mod metrics;
pub mod orchestration;
pub mod registry_cache;

pub use cache_config::CacheConfig;
pub use config_cache::{index_fn, ConfigCache};
pub use metrics::{CounterSink, HistogramSink, Metrics, NoopMetrics};
pub use orchestration::ResolverCache;
pub use registry_cache::RegistryCache;

pub use resolver_cache_types::{
    diff_index, BuildConfiguration, ByOrgRepo, Generation, Index, IndexDelta, IndexFn, LoadError,
    Metadata, QueryError, ResolveError,
};
