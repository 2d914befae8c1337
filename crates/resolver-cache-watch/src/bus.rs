//! The event-bus seam between concrete watcher primitives and the
//! orchestrator (Design Note: registered callbacks for disk events).

use std::time::Duration;

/// One notification from a watcher primitive.
#[derive(Debug, Clone)]
pub enum WatchEvent {
    /// Something under the watched root changed; a reload should run.
    Changed,
    /// The underlying watcher reported a transient error. Logged and
    /// counted by the orchestrator, never fatal to the watch task.
    Error(String),
}

/// The outcome of waiting for the next event up to some deadline.
pub enum RecvOutcome {
    Event(WatchEvent),
    /// No event arrived within the requested window; the source is still
    /// alive and the caller should wait again.
    TimedOut,
    /// The source has shut down and will never produce another event.
    Closed,
}

/// A source of [`WatchEvent`]s. Implemented by the concrete directory and
/// symlink-swap watchers so the orchestrator never depends on either one
/// directly.
///
/// `recv_timeout` rather than a blocking `recv` so the orchestrator's
/// dispatch thread can periodically check for its own shutdown signal
/// instead of blocking forever on a channel nothing will ever close.
pub trait EventBus: Send {
    fn recv_timeout(&self, timeout: Duration) -> RecvOutcome;
}
