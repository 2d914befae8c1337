//! Polling-based watcher for a configuration-mount symlink swap.
//!
//! The watched path is the stable symlink (e.g. `..data` or the mount root
//! itself); its target changes atomically when the orchestrating volume
//! plugin swaps in new content. `notify` has no portable primitive for
//! "this symlink's target changed", so this watcher polls `read_link`.

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::bus::{EventBus, RecvOutcome, WatchEvent};

pub struct SymlinkSwapWatcher {
    rx: Receiver<WatchEvent>,
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SymlinkSwapWatcher {
    pub fn spawn(path: PathBuf, poll_interval: Duration) -> Self {
        let (tx, rx) = channel();
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_loop = Arc::clone(&shutdown);

        let handle = thread::spawn(move || {
            let mut last_target = fs::read_link(&path).ok();
            while !shutdown_loop.load(Ordering::Relaxed) {
                thread::sleep(poll_interval);
                match fs::read_link(&path) {
                    Ok(target) => {
                        if last_target.as_ref() != Some(&target) {
                            last_target = Some(target);
                            if tx.send(WatchEvent::Changed).is_err() {
                                break;
                            }
                        }
                    }
                    Err(err) => {
                        if tx.send(WatchEvent::Error(err.to_string())).is_err() {
                            break;
                        }
                    }
                }
            }
        });

        Self {
            rx,
            shutdown,
            handle: Some(handle),
        }
    }
}

impl EventBus for SymlinkSwapWatcher {
    fn recv_timeout(&self, timeout: Duration) -> RecvOutcome {
        match self.rx.recv_timeout(timeout) {
            Ok(event) => RecvOutcome::Event(event),
            Err(RecvTimeoutError::Timeout) => RecvOutcome::TimedOut,
            Err(RecvTimeoutError::Disconnected) => RecvOutcome::Closed,
        }
    }
}

impl Drop for SymlinkSwapWatcher {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_a_symlink_retarget() {
        let dir = tempfile::tempdir().unwrap();
        let target_a = dir.path().join("a");
        let target_b = dir.path().join("b");
        fs::create_dir(&target_a).unwrap();
        fs::create_dir(&target_b).unwrap();

        let link = dir.path().join("current");
        std::os::unix::fs::symlink(&target_a, &link).unwrap();

        let watcher = SymlinkSwapWatcher::spawn(link.clone(), Duration::from_millis(10));

        fs::remove_file(&link).unwrap();
        std::os::unix::fs::symlink(&target_b, &link).unwrap();

        let event = watcher.rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(event, WatchEvent::Changed));
    }
}
