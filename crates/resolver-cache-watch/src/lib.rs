//! Watch orchestrator: composes directory watchers and symlink-swap
//! watchers behind a shared [`EventBus`] trait, and dispatches their events
//! into caller-supplied reload callbacks.

mod bus;
mod directory;
mod orchestrator;
mod symlink;

pub use bus::{EventBus, RecvOutcome, WatchEvent};
pub use directory::DirectoryWatcher;
pub use orchestrator::WatchOrchestrator;
pub use symlink::SymlinkSwapWatcher;
