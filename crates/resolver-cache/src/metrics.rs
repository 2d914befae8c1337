//! Injectable metric sinks (Design Note: "Global registries" — the source
//! registers prometheus histograms at process scope; sinks are injected via
//! construction here instead).

/// The reload-duration histogram's fixed bucket boundaries, in seconds.
pub const RELOAD_DURATION_BUCKETS: [f64; 11] =
    [0.5, 0.75, 1.0, 1.25, 1.5, 2.0, 2.5, 3.0, 4.0, 5.0, 6.0];

/// Short, human-readable error categories (spec §6 "Error metric").
pub mod error_label {
    pub const FAILED_TO_LOAD_REGISTRY: &str = "failed to load ci-operator registry";
    pub const RECEIVED_FSNOTIFY_ERROR: &str = "received fsnotify error";
    pub const FAILED_TO_UPDATE_WATCHER: &str = "failed to update watcher";
    pub const FAILED_TO_LOAD_CONFIG: &str = "failed to load config";
    pub const INVALID_CONFIG: &str = "invalid config";
}

/// A counter indexed by a single string label.
pub trait CounterSink: Send + Sync {
    fn increment(&self, label: &str);
}

/// A histogram of reload durations, in seconds.
pub trait HistogramSink: Send + Sync {
    fn observe(&self, seconds: f64);
}

/// Discards every observation. The default sink when none is injected.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl CounterSink for NoopMetrics {
    fn increment(&self, _label: &str) {}
}

impl HistogramSink for NoopMetrics {
    fn observe(&self, _seconds: f64) {}
}

/// The pair of sinks a cache reports to.
pub struct Metrics {
    pub counter: Box<dyn CounterSink>,
    pub histogram: Box<dyn HistogramSink>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            counter: Box::new(NoopMetrics),
            histogram: Box::new(NoopMetrics),
        }
    }
}

impl Metrics {
    pub fn new(
        counter: impl CounterSink + 'static,
        histogram: impl HistogramSink + 'static,
    ) -> Self {
        Self {
            counter: Box::new(counter),
            histogram: Box::new(histogram),
        }
    }

    pub fn time_reload<T, E>(&self, f: impl FnOnce() -> Result<T, E>) -> Result<T, E> {
        let start = std::time::Instant::now();
        let result = f();
        if result.is_ok() {
            self.histogram.observe(start.elapsed().as_secs_f64());
        }
        result
    }
}

#[cfg(feature = "metrics-prometheus")]
pub mod prometheus_backed {
    use super::{CounterSink, HistogramSink, RELOAD_DURATION_BUCKETS};
    use prometheus::{CounterVec, Histogram, HistogramOpts, Opts, Registry};

    /// A prometheus-backed metrics pair, registered against a caller-owned
    /// [`Registry`] rather than the global default registry.
    pub struct PrometheusMetrics {
        errors: CounterVec,
        reload_duration: Histogram,
    }

    impl PrometheusMetrics {
        pub fn new(registry: &Registry, namespace: &str) -> prometheus::Result<Self> {
            let errors = CounterVec::new(
                Opts::new("reload_errors_total", "Reload failures by category")
                    .namespace(namespace),
                &["label"],
            )?;
            let reload_duration = Histogram::with_opts(
                HistogramOpts::new("reload_duration_seconds", "Reload duration")
                    .namespace(namespace)
                    .buckets(RELOAD_DURATION_BUCKETS.to_vec()),
            )?;
            registry.register(Box::new(errors.clone()))?;
            registry.register(Box::new(reload_duration.clone()))?;
            Ok(Self {
                errors,
                reload_duration,
            })
        }
    }

    impl CounterSink for PrometheusMetrics {
        fn increment(&self, label: &str) {
            self.errors.with_label_values(&[label]).inc();
        }
    }

    impl HistogramSink for PrometheusMetrics {
        fn observe(&self, seconds: f64) {
            self.reload_duration.observe(seconds);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSink(Arc<AtomicUsize>);
    impl CounterSink for CountingSink {
        fn increment(&self, _label: &str) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }
    impl HistogramSink for CountingSink {
        fn observe(&self, _seconds: f64) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn time_reload_only_observes_on_success() {
        let hits = Arc::new(AtomicUsize::new(0));
        let metrics = Metrics::new(
            CountingSink(Arc::clone(&hits)),
            CountingSink(Arc::clone(&hits)),
        );

        let _: Result<(), ()> = metrics.time_reload(|| Ok(()));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let _: Result<(), ()> = metrics.time_reload(|| Err(()));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
