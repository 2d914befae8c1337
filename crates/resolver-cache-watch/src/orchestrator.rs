//! Routes watcher events into caller-supplied reload callbacks.
//!
//! Each event spawns a short-lived thread that invokes the reload callback;
//! a burst of events therefore relies on the callback's own coalescer (see
//! `resolver-cache-coalesce`) to collapse down to at most one in-flight
//! execution plus one trailing one, rather than the orchestrator itself
//! tracking in-flight state.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use resolver_cache_config::walk::is_shadow_name;

use crate::bus::{EventBus, RecvOutcome, WatchEvent};
use crate::directory::DirectoryWatcher;
use crate::symlink::SymlinkSwapWatcher;

/// How long the dispatch thread blocks between checks of its own shutdown
/// flag. Bounds how long `Drop` can take to join the thread.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// A long-lived watcher task. Dropping it stops the underlying watch and
/// joins the dispatch thread.
pub struct WatchOrchestrator {
    handle: Option<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WatchOrchestrator {
    /// Drive `bus` for as long as this orchestrator lives, calling
    /// `on_changed` for every [`WatchEvent::Changed`] and `on_error` for
    /// every [`WatchEvent::Error`].
    pub fn spawn<B, F, E>(bus: B, on_changed: F, on_error: E) -> Self
    where
        B: EventBus + 'static,
        F: Fn() + Send + Sync + 'static,
        E: Fn(&str) + Send + Sync + 'static,
    {
        let on_changed = Arc::new(on_changed);
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_loop = Arc::clone(&shutdown);
        let handle = thread::spawn(move || loop {
            if shutdown_loop.load(Ordering::Relaxed) {
                break;
            }
            match bus.recv_timeout(SHUTDOWN_POLL_INTERVAL) {
                RecvOutcome::Event(WatchEvent::Changed) => {
                    let on_changed = Arc::clone(&on_changed);
                    thread::spawn(move || on_changed());
                }
                RecvOutcome::Event(WatchEvent::Error(msg)) => {
                    tracing::warn!(error = %msg, "watcher reported an error");
                    on_error(&msg);
                }
                RecvOutcome::TimedOut => {}
                RecvOutcome::Closed => break,
            }
        });
        Self {
            handle: Some(handle),
            shutdown,
        }
    }

    /// The "universal symlink watcher" variant: a single symlink-swap
    /// source fires both a config-reload and a registry-reload callback,
    /// for a shared mount root containing both catalogs.
    pub fn spawn_dual_symlink<F1, F2, E>(
        path: impl Into<std::path::PathBuf>,
        poll_interval: Duration,
        on_config_changed: F1,
        on_registry_changed: F2,
        on_error: E,
    ) -> Self
    where
        F1: Fn() + Send + Sync + 'static,
        F2: Fn() + Send + Sync + 'static,
        E: Fn(&str) + Send + Sync + 'static,
    {
        let bus = SymlinkSwapWatcher::spawn(path.into(), poll_interval);
        Self::spawn(
            bus,
            move || {
                on_config_changed();
                on_registry_changed();
            },
            on_error,
        )
    }

    /// Classify `root` and install the appropriate watcher: a dedicated
    /// symlink-swap watcher if it contains shadow entries characteristic of
    /// an atomic-swap configuration mount, otherwise a recursive directory
    /// watcher.
    pub fn spawn_for_root<F, E>(
        root: &Path,
        poll_interval: Duration,
        on_changed: F,
        on_error: E,
    ) -> notify::Result<Self>
    where
        F: Fn() + Send + Sync + 'static,
        E: Fn(&str) + Send + Sync + 'static,
    {
        if root_has_shadow_entries(root) {
            Ok(Self::spawn(
                SymlinkSwapWatcher::spawn(root.to_path_buf(), poll_interval),
                on_changed,
                on_error,
            ))
        } else {
            Ok(Self::spawn(
                DirectoryWatcher::new(root)?,
                on_changed,
                on_error,
            ))
        }
    }
}

impl Drop for WatchOrchestrator {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            // The dispatch thread notices the flag within
            // `SHUTDOWN_POLL_INTERVAL` and exits; we join here so tests and
            // callers observe a clean shutdown before the watcher handle is
            // dropped.
            let _ = handle.join();
        }
    }
}

fn root_has_shadow_entries(root: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(root) else {
        return false;
    };
    entries
        .filter_map(Result::ok)
        .any(|entry| is_shadow_name(&entry.file_name().to_string_lossy()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc::{channel, Sender};

    struct FakeBus {
        rx: std::sync::Mutex<std::sync::mpsc::Receiver<WatchEvent>>,
    }

    impl EventBus for FakeBus {
        fn recv_timeout(&self, timeout: Duration) -> RecvOutcome {
            match self.rx.lock().unwrap().recv_timeout(timeout) {
                Ok(event) => RecvOutcome::Event(event),
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => RecvOutcome::TimedOut,
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => RecvOutcome::Closed,
            }
        }
    }

    fn fake_bus() -> (Sender<WatchEvent>, FakeBus) {
        let (tx, rx) = channel();
        (
            tx,
            FakeBus {
                rx: std::sync::Mutex::new(rx),
            },
        )
    }

    #[test]
    fn changed_events_invoke_the_callback() {
        let (tx, bus) = fake_bus();
        let count = Arc::new(AtomicUsize::new(0));
        let count_cb = Arc::clone(&count);

        let orchestrator = WatchOrchestrator::spawn(
            bus,
            move || {
                count_cb.fetch_add(1, Ordering::SeqCst);
            },
            |_| {},
        );

        tx.send(WatchEvent::Changed).unwrap();
        tx.send(WatchEvent::Changed).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while count.load(Ordering::SeqCst) < 2 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(count.load(Ordering::SeqCst), 2);

        drop(tx);
        drop(orchestrator);
    }

    #[test]
    fn error_events_invoke_the_error_callback() {
        let (tx, bus) = fake_bus();
        let errors = Arc::new(std::sync::Mutex::new(Vec::new()));
        let errors_cb = Arc::clone(&errors);

        let orchestrator = WatchOrchestrator::spawn(
            bus,
            || {},
            move |msg| errors_cb.lock().unwrap().push(msg.to_string()),
        );

        tx.send(WatchEvent::Error("boom".to_string())).unwrap();
        drop(tx);
        drop(orchestrator);

        assert_eq!(errors.lock().unwrap().as_slice(), ["boom".to_string()]);
    }

    #[test]
    fn root_with_shadow_entry_is_classified_as_symlink_mount() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("..2024_01_01")).unwrap();
        assert!(root_has_shadow_entries(dir.path()));

        let dir2 = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir2.path().join("plain")).unwrap();
        assert!(!root_has_shadow_entries(dir2.path()));
    }
}
