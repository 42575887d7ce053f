//! Registry of session pools.
//!
//! The [`ConnectionManager`] owns one [`SessionPool`] per
//! (host, user, identity) key, created lazily on first use. Pool capacity is
//! an explicit construction parameter (optionally overridden per host) and
//! is captured by each pool at creation time, so reconfiguration can never
//! race with pool use.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tracing::{debug, info};

use super::pool::{PoolConfig, SessionHandle, SessionPool};
use super::{Connector, Credentials, PoolKey};
use crate::config::ShellConfig;
use crate::error::{Error, Result};

/// Statistics for one pool in the registry.
#[derive(Debug, Clone)]
pub struct PoolStats {
    /// The pool's key.
    pub key: PoolKey,
    /// Maximum live sessions for the key.
    pub capacity: usize,
    /// Live sessions (busy + idle).
    pub open: usize,
    /// Sessions currently idle.
    pub idle: usize,
}

/// Process-level registry mapping pool keys to bounded session pools.
pub struct ConnectionManager {
    pools: DashMap<PoolKey, Arc<SessionPool>>,
    max_sessions_per_host: usize,
    capacity_overrides: HashMap<String, usize>,
    acquire_timeout: Duration,
    connector: Option<Arc<dyn Connector>>,
    closed: AtomicBool,
}

impl ConnectionManager {
    /// Start building a manager.
    pub fn builder() -> ConnectionManagerBuilder {
        ConnectionManagerBuilder::new()
    }

    /// Acquire a session for `host` as `user`, creating the pool for the
    /// (host, user, identity) key on first use.
    ///
    /// Blocks (bounded by the acquire timeout) while the key's pool is at
    /// capacity with no idle session. Authentication failures during session
    /// creation surface immediately as errors.
    pub async fn get_connection(
        &self,
        host: &str,
        user: &str,
        credentials: &Credentials,
    ) -> Result<SessionHandle> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ManagerClosed);
        }

        let connector = self.connector()?;

        let key = PoolKey::new(host, user, credentials);
        let pool = self
            .pools
            .entry(key.clone())
            .or_insert_with(|| {
                debug!(key = %key, "Creating pool for new key");
                SessionPool::new(
                    key.clone(),
                    credentials.clone(),
                    PoolConfig {
                        capacity: self.capacity_for(host),
                        acquire_timeout: self.acquire_timeout,
                    },
                    connector,
                )
            })
            .clone();

        pool.acquire().await
    }

    /// The session factory this manager authenticates new sessions with.
    pub fn connector(&self) -> Result<Arc<dyn Connector>> {
        self.connector.clone().ok_or_else(|| {
            Error::InvalidConfig(
                "No transport backend available. Enable the 'russh' feature or supply a connector."
                    .to_string(),
            )
        })
    }

    /// The pool capacity that applies to `host`.
    ///
    /// Per-host overrides take precedence; capacity is captured by each pool
    /// when it is created, so later pools of other keys are unaffected.
    pub fn capacity_for(&self, host: &str) -> usize {
        self.capacity_overrides
            .get(host)
            .copied()
            .unwrap_or(self.max_sessions_per_host)
    }

    /// Statistics for every pool in the registry.
    pub fn stats(&self) -> Vec<PoolStats> {
        self.pools
            .iter()
            .map(|entry| {
                let pool = entry.value();
                PoolStats {
                    key: pool.key().clone(),
                    capacity: pool.capacity(),
                    open: pool.open_sessions(),
                    idle: pool.idle_sessions(),
                }
            })
            .collect()
    }

    /// Shut down: close every pool and refuse further acquisition.
    pub async fn close_all(&self) {
        info!("Closing all session pools");
        self.closed.store(true, Ordering::SeqCst);

        let pools: Vec<Arc<SessionPool>> =
            self.pools.iter().map(|entry| entry.value().clone()).collect();
        self.pools.clear();

        for pool in pools {
            pool.close_all().await;
        }
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("pools", &self.pools.len())
            .field("max_sessions_per_host", &self.max_sessions_per_host)
            .field("acquire_timeout", &self.acquire_timeout)
            .finish()
    }
}

/// Builder for [`ConnectionManager`].
pub struct ConnectionManagerBuilder {
    max_sessions_per_host: usize,
    capacity_overrides: HashMap<String, usize>,
    acquire_timeout: Duration,
    connector: Option<Arc<dyn Connector>>,
}

impl ConnectionManagerBuilder {
    /// Create a builder with default settings.
    pub fn new() -> Self {
        let defaults = ShellConfig::default();
        Self {
            max_sessions_per_host: defaults.max_sessions_per_host,
            capacity_overrides: HashMap::new(),
            acquire_timeout: defaults.acquire_timeout,
            connector: None,
        }
    }

    /// Seed builder settings from a [`ShellConfig`].
    pub fn from_config(config: &ShellConfig) -> Self {
        Self {
            max_sessions_per_host: config.max_sessions_per_host,
            capacity_overrides: HashMap::new(),
            acquire_timeout: config.acquire_timeout,
            connector: None,
        }
    }

    /// Set the default pool capacity per (host, user, identity) key.
    pub fn max_sessions_per_host(mut self, max: usize) -> Self {
        self.max_sessions_per_host = max.max(1);
        self
    }

    /// Override the capacity for pools of a specific host.
    pub fn capacity_for(mut self, host: impl Into<String>, capacity: usize) -> Self {
        self.capacity_overrides.insert(host.into(), capacity.max(1));
        self
    }

    /// Set how long acquires may wait for a free slot.
    pub fn acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Supply the session factory.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Build the manager.
    ///
    /// Falls back to the russh transport when no connector was supplied and
    /// the `russh` feature is enabled.
    pub fn build(self) -> ConnectionManager {
        let connector = self.connector.or_else(default_connector);
        ConnectionManager {
            pools: DashMap::new(),
            max_sessions_per_host: self.max_sessions_per_host,
            capacity_overrides: self.capacity_overrides,
            acquire_timeout: self.acquire_timeout,
            connector,
            closed: AtomicBool::new(false),
        }
    }
}

impl Default for ConnectionManagerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn default_connector() -> Option<Arc<dyn Connector>> {
    #[cfg(feature = "russh")]
    {
        Some(Arc::new(super::russh::RusshConnector::default()))
    }
    #[cfg(not(feature = "russh"))]
    {
        None
    }
}
