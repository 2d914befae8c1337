//! Optional project configuration file (`.resolver-cache.toml`), mirroring
//! the watch-debounce and path knobs a deployment needs to tune without a
//! rebuild.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const CONFIG_FILE: &str = ".resolver-cache.toml";

pub fn config_path(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE)
}

/// Deserialize a [`Duration`] from a human-readable string (`"30s"`,
/// `"2m"`) or a bare integer count of milliseconds.
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum DurationHelper {
        String(String),
        Millis(u64),
    }

    match DurationHelper::deserialize(deserializer)? {
        DurationHelper::String(s) => humantime::parse_duration(&s)
            .map_err(|e| serde::de::Error::custom(format!("invalid duration: {e}"))),
        DurationHelper::Millis(ms) => Ok(Duration::from_millis(ms)),
    }
}

fn serialize_duration<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    serializer.serialize_str(&humantime::format_duration(*duration).to_string())
}

/// Top-level configuration for a deployed cache instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Root of the per-project build-configuration tree.
    pub config_root: PathBuf,
    /// Root of the step registry tree.
    pub registry_root: PathBuf,
    /// Registry loader flags.
    #[serde(default)]
    pub flat_registry: bool,
    #[serde(default)]
    pub include_documentation: bool,
    #[serde(default)]
    pub include_metadata: bool,
    /// Poll interval for the symlink-swap watcher, when a watched root is
    /// classified as a configuration-volume mount.
    #[serde(
        default = "default_symlink_poll_interval",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub symlink_poll_interval: Duration,
}

fn default_symlink_poll_interval() -> Duration {
    Duration::from_secs(2)
}

impl CacheConfig {
    pub fn new(config_root: impl Into<PathBuf>, registry_root: impl Into<PathBuf>) -> Self {
        Self {
            config_root: config_root.into(),
            registry_root: registry_root.into(),
            flat_registry: false,
            include_documentation: false,
            include_metadata: false,
            symlink_poll_interval: default_symlink_poll_interval(),
        }
    }

    /// Load from `<dir>/.resolver-cache.toml`, if it exists.
    pub fn load(dir: &Path) -> Result<Option<Self>> {
        let path = config_path(dir);
        if !path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self =
            toml::from_str(&text).with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(Some(config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_human_readable_durations() {
        let text = r#"
            config_root = "/etc/ci/configs"
            registry_root = "/etc/ci/registry"
            symlink_poll_interval = "5s"
        "#;
        let config: CacheConfig = toml::from_str(text).unwrap();
        assert_eq!(config.symlink_poll_interval, Duration::from_secs(5));
    }

    #[test]
    fn missing_file_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CacheConfig::load(dir.path()).unwrap().is_none());
    }

    #[test]
    fn defaults_apply_when_fields_are_omitted() {
        let text = r#"
            config_root = "/a"
            registry_root = "/b"
        "#;
        let config: CacheConfig = toml::from_str(text).unwrap();
        assert_eq!(config.symlink_poll_interval, Duration::from_secs(2));
        assert!(!config.flat_registry);
    }
}
