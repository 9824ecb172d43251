//! Engine configuration with defaults and a TOML file loader.
//!
//! Every field has a default, so a config file only names what it changes:
//!
//! ```toml
//! chunk_size = 10485760
//! max_concurrent = 4
//! retry_attempts = 8
//! ```

use std::env;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::download::constants::{
    CONNECT_TIMEOUT_SECS, DEFAULT_CHECKPOINT_INTERVAL, DEFAULT_CHUNK_SIZE,
    DEFAULT_DOWNLOAD_TIMEOUT_SECS, DEFAULT_MAX_CONCURRENT, READ_TIMEOUT_SECS,
};
use crate::download::{MAX_CONCURRENCY, MIN_CONCURRENCY, OrchestratorSettings, RetryConfig};
use crate::user_agent::default_user_agent;

/// Directory name under the user config home.
const CONFIG_DIR: &str = "chunkdl";

/// File name of the config file.
const CONFIG_FILE: &str = "config.toml";

/// Errors raised while loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The config file exists but could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for [`EngineConfig`].
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// File path.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: toml::de::Error,
    },

    /// A value is out of range.
    #[error("invalid config value for `{field}`: {reason}")]
    Invalid {
        /// Offending key.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
}

/// Engine tunables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Bytes per chunk in ranged mode.
    pub chunk_size: u64,
    /// Downloads running at once.
    pub max_concurrent: usize,
    /// Overall limit for one download run, in seconds.
    pub download_timeout_secs: u64,
    /// Attempts per fetch, the first included.
    pub retry_attempts: u32,
    /// Delay before the second attempt, in milliseconds.
    pub retry_base_delay_ms: u64,
    /// Upper bound on any retry delay, in milliseconds.
    pub retry_max_delay_ms: u64,
    /// Growth factor between attempts.
    pub retry_multiplier: f64,
    /// Bytes written between persisted checkpoints.
    pub checkpoint_interval: u64,
    /// HTTP connect timeout, in seconds.
    pub connect_timeout_secs: u64,
    /// HTTP read timeout, in seconds.
    pub read_timeout_secs: u64,
    /// User-Agent header sent with every request.
    pub user_agent: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let retry = RetryConfig::default();
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            retry_attempts: retry.max_attempts,
            retry_base_delay_ms: duration_ms(retry.base_delay),
            retry_max_delay_ms: duration_ms(retry.max_delay),
            retry_multiplier: retry.multiplier,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
            user_agent: default_user_agent(),
        }
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

impl EngineConfig {
    /// Checks every value against what the engine can run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 {
            return Err(invalid("chunk_size", "must be greater than 0"));
        }
        if !(MIN_CONCURRENCY..=MAX_CONCURRENCY).contains(&self.max_concurrent) {
            return Err(invalid(
                "max_concurrent",
                format!(
                    "{}. Expected range: {MIN_CONCURRENCY}..={MAX_CONCURRENCY}",
                    self.max_concurrent
                ),
            ));
        }
        if self.download_timeout_secs == 0 {
            return Err(invalid("download_timeout_secs", "must be greater than 0"));
        }
        if self.retry_attempts == 0 {
            return Err(invalid("retry_attempts", "must be at least 1"));
        }
        if !self.retry_multiplier.is_finite() || self.retry_multiplier < 1.0 {
            return Err(invalid(
                "retry_multiplier",
                format!("{}. Expected a value >= 1.0", self.retry_multiplier),
            ));
        }
        if self.retry_base_delay_ms > self.retry_max_delay_ms {
            return Err(invalid(
                "retry_base_delay_ms",
                format!(
                    "{} exceeds retry_max_delay_ms ({})",
                    self.retry_base_delay_ms, self.retry_max_delay_ms
                ),
            ));
        }
        if self.checkpoint_interval == 0 {
            return Err(invalid("checkpoint_interval", "must be greater than 0"));
        }
        if self.connect_timeout_secs == 0 {
            return Err(invalid("connect_timeout_secs", "must be greater than 0"));
        }
        if self.read_timeout_secs == 0 {
            return Err(invalid("read_timeout_secs", "must be greater than 0"));
        }
        Ok(())
    }

    /// Retry policy built from the `retry_*` keys.
    #[must_use]
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::new(
            self.retry_attempts,
            Duration::from_millis(self.retry_base_delay_ms),
            Duration::from_millis(self.retry_max_delay_ms),
            self.retry_multiplier,
        )
    }

    /// Overall limit for one download run.
    #[must_use]
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    /// Per-run settings handed to the orchestrator.
    #[must_use]
    pub fn orchestrator_settings(&self) -> OrchestratorSettings {
        OrchestratorSettings {
            chunk_size: self.chunk_size,
            checkpoint_interval: self.checkpoint_interval,
            retry: self.retry_config(),
            download_timeout: self.download_timeout(),
            ..OrchestratorSettings::default()
        }
    }

    /// Loads and validates the config file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file cannot be read, parsed or
    /// validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        debug!(path = %path.display(), "loaded config file");
        Ok(config)
    }

    /// Loads the default config file, or defaults when there is none.
    ///
    /// Returns the path that was read alongside the config.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the file exists but is invalid.
    pub fn load_default() -> Result<(Self, Option<PathBuf>), ConfigError> {
        match resolve_default_config_path() {
            Some(path) if path.exists() => {
                let config = Self::load(&path)?;
                Ok((config, Some(path)))
            }
            _ => Ok((Self::default(), None)),
        }
    }
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/chunkdl/config.toml`
/// 2. `$HOME/.config/chunkdl/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join(CONFIG_DIR).join(CONFIG_FILE));
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join(CONFIG_DIR)
            .join(CONFIG_FILE),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}
