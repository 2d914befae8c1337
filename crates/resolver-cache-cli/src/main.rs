use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use resolver_cache::{CacheConfig, ResolverCache};
use resolver_cache_config::NoopValidator as ConfigNoopValidator;
use resolver_cache_registry::NoopValidator as RegistryNoopValidator;
use resolver_cache_types::ObserverPolicy;

#[derive(Parser, Debug)]
#[command(name = "resolver-cache", version)]
#[command(about = "Cold-start a resolver cache and query it from the command line")]
struct Cli {
    /// Root of the per-project build-configuration tree.
    #[arg(long)]
    config_root: PathBuf,

    /// Root of the step registry tree.
    #[arg(long)]
    registry_root: PathBuf,

    /// Load the registry in flat mode (no path/name prefix matching).
    #[arg(long)]
    flat_registry: bool,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Look up a build configuration by org/repo/branch/variant.
    Query {
        org: String,
        repo: String,
        branch: String,
        #[arg(default_value = "")]
        variant: String,
    },
    /// Resolve a named workflow into its flattened steps.
    Resolve {
        workflow: String,
        /// Parameter overrides as `key=value`, repeatable.
        #[arg(long = "param")]
        params: Vec<String>,
        /// Additionally enable an observer by name, repeatable.
        #[arg(long = "enable-observer")]
        enable_observers: Vec<String>,
        /// Disable an observer by name, overriding the workflow's own
        /// enable list, repeatable.
        #[arg(long = "disable-observer")]
        disable_observers: Vec<String>,
    },
    /// Print the current generation counters for both catalogs.
    Status,
}

fn main() -> Result<()> {
    resolver_cache::logging::init();
    let cli = Cli::parse();

    let mut cache_config = CacheConfig::new(&cli.config_root, &cli.registry_root);
    cache_config.flat_registry = cli.flat_registry;

    let cache = ResolverCache::open(
        &cache_config,
        Arc::new(ConfigNoopValidator),
        Box::new(RegistryNoopValidator),
    )
    .with_context(|| "failed to cold-start the resolver cache")?;

    match cli.cmd {
        Commands::Query {
            org,
            repo,
            branch,
            variant,
        } => {
            let config = cache
                .config
                .get_matching(&org, &repo, &branch, &variant)
                .with_context(|| format!("no match for {org}/{repo}@{branch} ({variant})"))?;
            println!("{}", serde_json::to_string_pretty(&*config)?);
        }
        Commands::Resolve {
            workflow,
            params,
            enable_observers,
            disable_observers,
        } => {
            let overrides = parse_overrides(&params)?;
            let config_observers = ObserverPolicy {
                enable: enable_observers,
                disable: disable_observers,
            };
            let resolved = cache
                .registry
                .resolve(&workflow, &overrides, &config_observers)
                .with_context(|| format!("failed to resolve workflow {workflow}"))?;
            println!("{}", serde_json::to_string_pretty(&resolved)?);
        }
        Commands::Status => {
            println!("config_generation: {:?}", cache.config.get_generation());
            println!("registry_generation: {:?}", cache.registry.get_generation());
            println!(
                "registry_components: {}",
                cache.registry.get_components().len()
            );
        }
    }

    Ok(())
}

fn parse_overrides(params: &[String]) -> Result<HashMap<String, String>> {
    let mut overrides = HashMap::new();
    for param in params {
        let (key, value) = param
            .split_once('=')
            .with_context(|| format!("invalid --param '{param}', expected key=value"))?;
        overrides.insert(key.to_string(), value.to_string());
    }
    Ok(overrides)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_overrides_splits_key_value_pairs() {
        let overrides = parse_overrides(&["a=1".to_string(), "b=2".to_string()]).unwrap();
        assert_eq!(overrides.get("a"), Some(&"1".to_string()));
        assert_eq!(overrides.get("b"), Some(&"2".to_string()));
    }

    #[test]
    fn parse_overrides_rejects_missing_equals() {
        assert!(parse_overrides(&["nope".to_string()]).is_err());
    }
}
