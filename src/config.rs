//! Configuration for the session pool and executors.
//!
//! [`ShellConfig`] is deserialized from TOML and optionally overridden from
//! `SHELLPOOL_*` environment variables. It feeds
//! [`ConnectionManagerBuilder::from_config`](crate::connection::ConnectionManagerBuilder::from_config);
//! the values are captured at construction time, so mutating a config after
//! building a manager has no effect on it.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default maximum sessions per (host, user, identity) key.
pub const DEFAULT_MAX_SESSIONS_PER_HOST: usize = 10;

/// Default wait for a free pool slot.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(120);

/// Default TCP connect limit.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(7);

/// Default authentication limit.
pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(30);

/// Tunable settings for pools, connectors, and commands.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ShellConfig {
    /// Pool capacity per (host, user, identity) key.
    pub max_sessions_per_host: usize,
    /// How long an acquire may wait for a free slot.
    #[serde(with = "humantime_serde")]
    pub acquire_timeout: Duration,
    /// TCP connect limit for new sessions.
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    /// Authentication limit for new sessions.
    #[serde(with = "humantime_serde")]
    pub auth_timeout: Duration,
    /// Watchdog timeout applied to commands that do not set one.
    #[serde(with = "humantime_serde")]
    pub default_command_timeout: Duration,
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            max_sessions_per_host: DEFAULT_MAX_SESSIONS_PER_HOST,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
            default_command_timeout: crate::command::DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

impl ShellConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| {
            Error::InvalidConfig(format!("Failed to parse {}: {}", path.display(), e))
        })
    }

    /// Apply `SHELLPOOL_*` environment variable overrides.
    ///
    /// Recognized: `SHELLPOOL_MAX_SESSIONS_PER_HOST` (integer) and
    /// `SHELLPOOL_ACQUIRE_TIMEOUT_SECS` / `SHELLPOOL_CONNECT_TIMEOUT_SECS` /
    /// `SHELLPOOL_AUTH_TIMEOUT_SECS` / `SHELLPOOL_COMMAND_TIMEOUT_SECS`
    /// (whole seconds). Malformed values are ignored with a warning.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(value) = read_env_usize("SHELLPOOL_MAX_SESSIONS_PER_HOST") {
            self.max_sessions_per_host = value.max(1);
        }
        if let Some(secs) = read_env_u64("SHELLPOOL_ACQUIRE_TIMEOUT_SECS") {
            self.acquire_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = read_env_u64("SHELLPOOL_CONNECT_TIMEOUT_SECS") {
            self.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = read_env_u64("SHELLPOOL_AUTH_TIMEOUT_SECS") {
            self.auth_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = read_env_u64("SHELLPOOL_COMMAND_TIMEOUT_SECS") {
            self.default_command_timeout = Duration::from_secs(secs);
        }
        self
    }

    /// Load from an optional file path, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        Ok(config.with_env_overrides())
    }

    /// Build a [`Command`](crate::Command) carrying this config's default
    /// command timeout.
    pub fn command(&self, cmd: impl Into<String>) -> crate::Command {
        crate::Command::new(cmd).with_timeout(self.default_command_timeout)
    }
}

fn read_env_usize(name: &str) -> Option<usize> {
    read_env_parsed(name)
}

fn read_env_u64(name: &str) -> Option<u64> {
    read_env_parsed(name)
}

fn read_env_parsed<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = %name, value = %raw, "Ignoring malformed environment override");
            None
        }
    }
}
