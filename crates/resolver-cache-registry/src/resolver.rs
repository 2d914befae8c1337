//! Structural resolution: expands workflows/chains into a flat, ordered list
//! of executable steps with parameters and observers resolved.

use std::collections::{HashMap, HashSet};

use resolver_cache_types::{Observer, ObserverPolicy, RegistryBundle, ResolveError, StepRef};
use serde::Serialize;

/// A leaf step with its parameters resolved, ready for execution.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedStep {
    pub name: String,
    pub commands: String,
    pub parameters: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResolvedWorkflow {
    pub name: String,
    pub pre: Vec<ResolvedStep>,
    pub test: Vec<ResolvedStep>,
    pub post: Vec<ResolvedStep>,
    pub observers: Vec<Observer>,
}

/// Resolve a named workflow: splice pre/test/post, expand chains
/// recursively, and fold parameter defaults outermost-wins. `overrides` are
/// caller-supplied parameters that outrank any chain's own defaults.
/// `config_observers` is the calling configuration's own enable/disable set,
/// merged with the workflow's with `disable` winning conflicts (spec §4.7).
pub fn resolve_workflow(
    bundle: &RegistryBundle,
    workflow_name: &str,
    overrides: &HashMap<String, String>,
    config_observers: &ObserverPolicy,
) -> Result<ResolvedWorkflow, ResolveError> {
    let workflow = bundle
        .workflows
        .get(workflow_name)
        .ok_or_else(|| ResolveError::UnknownWorkflow(workflow_name.to_string()))?;

    let mut visiting = HashSet::new();
    let pre = resolve_steps(bundle, &workflow.pre, overrides, &mut visiting)?;
    let test = resolve_steps(bundle, &workflow.test, overrides, &mut visiting)?;
    let post = resolve_steps(bundle, &workflow.post, overrides, &mut visiting)?;

    let merged_policy = workflow.observers.merge(config_observers);
    let mut observers = Vec::with_capacity(merged_policy.enable.len());
    for name in &merged_policy.enable {
        let observer = bundle
            .observers
            .get(name)
            .ok_or_else(|| ResolveError::UnknownObserver(name.clone()))?;
        observers.push(observer.clone());
    }

    Ok(ResolvedWorkflow {
        name: workflow.name.clone(),
        pre,
        test,
        post,
        observers,
    })
}

/// Resolve a bare chain by name, outside of any workflow (e.g. for manual
/// inspection or a dry-run query).
pub fn resolve_chain(
    bundle: &RegistryBundle,
    chain_name: &str,
    overrides: &HashMap<String, String>,
) -> Result<Vec<ResolvedStep>, ResolveError> {
    let mut visiting = HashSet::new();
    resolve_steps(
        bundle,
        &[StepRef::Chain {
            chain: chain_name.to_string(),
        }],
        overrides,
        &mut visiting,
    )
}

fn resolve_steps(
    bundle: &RegistryBundle,
    steps: &[StepRef],
    overrides: &HashMap<String, String>,
    visiting: &mut HashSet<String>,
) -> Result<Vec<ResolvedStep>, ResolveError> {
    let mut out = Vec::with_capacity(steps.len());
    for step in steps {
        match step {
            StepRef::Reference { reference: name } => {
                let entry = bundle
                    .references
                    .get(name)
                    .ok_or_else(|| ResolveError::UnknownReference(name.clone()))?;
                out.push(ResolvedStep {
                    name: entry.name.clone(),
                    commands: entry.commands.clone(),
                    parameters: overrides.clone(),
                });
            }
            StepRef::Literal(entry) => {
                out.push(ResolvedStep {
                    name: entry.name.clone(),
                    commands: entry.commands.clone(),
                    parameters: overrides.clone(),
                });
            }
            StepRef::Chain { chain: name } => {
                if !visiting.insert(name.clone()) {
                    return Err(ResolveError::CycleDetected(name.clone()));
                }
                let chain = bundle
                    .chains
                    .get(name)
                    .ok_or_else(|| ResolveError::UnknownChain(name.clone()))?;

                // Outermost wins: the chain's own defaults only fill in
                // parameters the caller didn't already supply.
                let mut merged = chain.parameter_defaults.clone();
                merged.extend(overrides.clone());

                let expanded = resolve_steps(bundle, &chain.steps, &merged, visiting)?;
                out.extend(expanded);
                visiting.remove(name);
            }
        }
    }
    Ok(out)
}
