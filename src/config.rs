//! Configuration
//!
//! Layers, lowest priority first:
//!
//! 1. built-in defaults,
//! 2. a TOML file (`--config`, `BFA_CONFIG_PATH`, or `bfa.toml` when present),
//! 3. environment variables such as `BFA__WATCHER__POLL_INTERVAL_SECS`,
//! 4. values set on [`ConfigBuilder`].
//!
//! A `.env` file in the working directory is loaded before the environment is read.

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::loader::watcher::DEFAULT_POLL_INTERVAL;

const ENV_PREFIX: &str = "BFA";
const ENV_SEPARATOR: &str = "__";
const CONFIG_PATH_VAR: &str = "BFA_CONFIG_PATH";
const DEFAULT_CONFIG_FILE: &str = "bfa";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub watcher: WatcherConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Repository change watcher
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between two version token checks
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
}

impl WatcherConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: default_poll_interval(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Trace every assignment and condition of script runs
    #[serde(default)]
    pub runtime_debug: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            runtime_debug: false,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_poll_interval() -> u64 {
    DEFAULT_POLL_INTERVAL.as_secs()
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load with no explicit overrides
    pub fn load() -> Result<Self> {
        Self::builder().build()
    }

    /// Effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render configuration")
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    watcher_enabled: Option<bool>,
    poll_interval_secs: Option<u64>,
    log_level: Option<String>,
}

impl ConfigBuilder {
    /// Read this file instead of searching for one. The file must exist.
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn watcher_enabled(mut self, enabled: Option<bool>) -> Self {
        self.watcher_enabled = enabled;
        self
    }

    pub fn poll_interval_secs(mut self, secs: Option<u64>) -> Self {
        self.poll_interval_secs = secs;
        self
    }

    pub fn log_level(mut self, level: Option<String>) -> Self {
        self.log_level = level;
        self
    }

    pub fn build(self) -> Result<Config> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder().add_source(
            config::Config::try_from(&Config::default())
                .context("Failed to prepare default configuration")?,
        );

        let path = self
            .config_path
            .or_else(|| std::env::var(CONFIG_PATH_VAR).ok().map(PathBuf::from));
        builder = match &path {
            Some(path) => builder.add_source(
                config::File::from(path.as_path())
                    .format(config::FileFormat::Toml)
                    .required(true),
            ),
            None => builder.add_source(
                config::File::with_name(DEFAULT_CONFIG_FILE)
                    .format(config::FileFormat::Toml)
                    .required(false),
            ),
        };

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true),
        );

        let mut config: Config = builder
            .build()
            .and_then(|layered| layered.try_deserialize())
            .with_context(|| match &path {
                Some(path) => format!("Failed to load configuration from {}", path.display()),
                None => "Failed to load configuration".to_string(),
            })?;

        if let Some(enabled) = self.watcher_enabled {
            config.watcher.enabled = enabled;
        }
        if let Some(secs) = self.poll_interval_secs {
            config.watcher.poll_interval_secs = secs;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }

        if config.watcher.poll_interval_secs == 0 {
            bail!("watcher.poll_interval_secs must be greater than zero");
        }
        Ok(config)
    }
}
