//! Loads a step registry (references, chains, workflows, observers) into a
//! validated bundle and structurally resolves workflows against it.

pub mod graph;
pub mod loader;
pub mod resolver;

pub use loader::{load_registry, EntryValidator, LoaderOptions, NoopValidator};
pub use resolver::{resolve_chain, resolve_workflow, ResolvedStep, ResolvedWorkflow};
