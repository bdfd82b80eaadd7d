//! Daemon configuration.
//!
//! Configuration is optional. Values come from, in order of precedence:
//! 1. the file passed with `--config <FILE>`
//! 2. the file named by the `GPIOCTLD_CONFIG` environment variable
//! 3. built-in defaults
//!
//! ```toml
//! # Upper bound on readiness events handled per epoll_wait() pass.
//! max_events = 64
//! # Wake up at least this often even with no ready descriptors.
//! # Omit to block indefinitely.
//! wait_timeout_ms = 500
//! # Default log level; RUST_LOG takes precedence.
//! log_level = "info"
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;
use tracing::level_filters::LevelFilter;

use crate::error::ConfigError;

// ============================================================================
// Constants
// ============================================================================

/// Environment variable naming a config file.
pub const CONFIG_ENV_VAR: &str = "GPIOCTLD_CONFIG";

/// Default cap on events returned by a single wait.
pub const DEFAULT_MAX_EVENTS: usize = 64;

/// Largest accepted `max_events`.
pub const MAX_EVENTS_LIMIT: usize = 4096;

/// Default log level when neither the config nor `RUST_LOG` set one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

// ============================================================================
// DaemonConfig
// ============================================================================

/// Tunables for the dispatch loop and logging.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// Capacity of the readiness buffer passed to `epoll_wait()`.
    pub max_events: usize,

    /// Wait timeout in milliseconds; `None` blocks indefinitely.
    pub wait_timeout_ms: Option<u64>,

    /// Default log level directive.
    pub log_level: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            max_events: DEFAULT_MAX_EVENTS,
            wait_timeout_ms: None,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
        }
    }
}

impl DaemonConfig {
    /// Resolves the effective configuration.
    ///
    /// An explicit path wins over [`CONFIG_ENV_VAR`]; with neither, the
    /// defaults are returned.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        match env::var_os(CONFIG_ENV_VAR) {
            Some(path) if !path.is_empty() => Self::load(Path::new(&path)),
            _ => Ok(Self::default()),
        }
    }

    /// Loads and validates a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|error| ConfigError::Read {
            path: path.to_path_buf(),
            error,
        })?;

        Self::parse(&contents, path)
    }

    /// Parses and validates TOML text; `origin` is used in error messages.
    pub fn parse(contents: &str, origin: &Path) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents).map_err(|error| ConfigError::Parse {
            path: PathBuf::from(origin),
            error,
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Checks that every field is within range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_events == 0 || self.max_events > MAX_EVENTS_LIMIT {
            return Err(ConfigError::Invalid {
                field: "max_events",
                value: self.max_events.to_string(),
                expected: format!("1..={MAX_EVENTS_LIMIT}"),
            });
        }

        self.level_filter()?;
        Ok(())
    }

    /// The configured wait timeout.
    pub fn wait_timeout(&self) -> Option<Duration> {
        self.wait_timeout_ms.map(Duration::from_millis)
    }

    /// Parses `log_level` into a tracing level filter.
    pub fn level_filter(&self) -> Result<LevelFilter, ConfigError> {
        parse_level_filter(&self.log_level)
    }
}

/// Parses a level name such as `"warn"` into a level filter.
pub fn parse_level_filter(value: &str) -> Result<LevelFilter, ConfigError> {
    LevelFilter::from_str(value.trim()).map_err(|_| ConfigError::Invalid {
        field: "log_level",
        value: value.to_string(),
        expected: "one of off, error, warn, info, debug, trace".to_string(),
    })
}
