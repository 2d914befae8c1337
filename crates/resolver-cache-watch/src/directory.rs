//! Recursive directory watcher, backed by `notify`.

use std::path::Path;
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError};
use std::time::Duration;

use notify::{recommended_watcher, RecommendedWatcher, RecursiveMode, Watcher};

use crate::bus::{EventBus, RecvOutcome, WatchEvent};

/// Watches every directory under `root`, recursively. `notify`'s recursive
/// mode maintains the underlying watch set itself as directories are
/// created and removed.
pub struct DirectoryWatcher {
    // Kept alive for as long as the watcher should run; dropping it stops
    // the underlying OS watch.
    _watcher: RecommendedWatcher,
    rx: Receiver<WatchEvent>,
}

impl DirectoryWatcher {
    pub fn new(root: &Path) -> notify::Result<Self> {
        let (tx, rx) = channel();
        let mut watcher = recommended_watcher(move |res: notify::Result<notify::Event>| {
            let event = match res {
                Ok(_) => WatchEvent::Changed,
                Err(err) => WatchEvent::Error(err.to_string()),
            };
            let _ = tx.send(event);
        })?;
        watcher.watch(root, RecursiveMode::Recursive)?;
        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }
}

impl EventBus for DirectoryWatcher {
    fn recv_timeout(&self, timeout: Duration) -> RecvOutcome {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => RecvOutcome::Event(event),
            Err(RecvTimeoutError::Timeout) => RecvOutcome::TimedOut,
            Err(RecvTimeoutError::Disconnected) => RecvOutcome::Closed,
        }
    }
}
