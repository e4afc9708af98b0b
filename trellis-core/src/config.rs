// Runtime configuration: TOML file plus TRELLIS_* environment overrides

use crate::error::{Error, Result};
use crate::logging::LogConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix of environment variables that override file settings.
pub const ENV_PREFIX: &str = "TRELLIS";

/// Settings for the runtime and its ambient services.
///
/// ```
/// use trellis_core::config::RuntimeConfig;
///
/// let config = RuntimeConfig::from_toml_str(
///     r#"
///     [cache]
///     max_entries = 64
///     "#,
/// )
/// .unwrap();
///
/// assert_eq!(config.cache.max_entries, 64);
/// assert_eq!(config.cache.ttl_secs, 300);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub logging: LogConfig,
    pub cache: CacheConfig,
    pub views: ViewConfig,
}

/// Response store sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub ttl_secs: u64,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1000,
            ttl_secs: 300,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    /// Register a JSON renderer for views named `*.json`.
    pub register_json_views: bool,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            register_json_views: true,
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("invalid TOML: {}", e)))
    }

    /// Load from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        tracing::debug!(path = %path.display(), "Loading runtime configuration");
        Self::from_toml_str(&content)
    }

    /// Load from a TOML file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env()?;
        Ok(config)
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(std::env::vars())
    }

    /// Apply overrides from `TRELLIS_*` pairs. Unknown keys are ignored.
    ///
    /// Recognized keys: `TRELLIS_LOG_LEVEL`, `TRELLIS_LOG_FORMAT`,
    /// `TRELLIS_LOG_FILTER`, `TRELLIS_CACHE_MAX_ENTRIES`,
    /// `TRELLIS_CACHE_TTL_SECS` and `TRELLIS_VIEWS_JSON`.
    pub fn apply_vars<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (key, value) in vars {
            let Some(name) = key
                .as_ref()
                .strip_prefix(ENV_PREFIX)
                .and_then(|rest| rest.strip_prefix('_'))
            else {
                continue;
            };
            let value = value.as_ref();

            match name {
                "LOG_LEVEL" => self.logging.level = value.parse()?,
                "LOG_FORMAT" => self.logging.format = value.parse()?,
                "LOG_FILTER" => self.logging.env_filter = Some(value.to_string()),
                "CACHE_MAX_ENTRIES" => self.cache.max_entries = parse_number(name, value)?,
                "CACHE_TTL_SECS" => self.cache.ttl_secs = parse_number(name, value)?,
                "VIEWS_JSON" => self.views.register_json_views = parse_flag(name, value)?,
                _ => {
                    tracing::trace!(key = name, "Ignoring unknown environment override");
                    continue;
                }
            }
            tracing::debug!(key = name, "Applied environment override");
        }
        Ok(())
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{}_{} must be a number, got '{}'", ENV_PREFIX, name, value)))
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!(
            "{}_{} must be a boolean, got '{}'",
            ENV_PREFIX, name, value
        ))),
    }
}
