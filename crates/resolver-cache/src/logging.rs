//! Structured logging setup via `tracing`/`tracing-subscriber`.

/// Install a process-wide subscriber honoring `RUST_LOG`, defaulting to
/// `info` when unset. Safe to call once at process startup; a second call
/// (e.g. from a test) is a harmless no-op.
pub fn init() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
