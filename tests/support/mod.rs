//! Scripted in-memory transport for exercising the pool and executors
//! without a network.
//!
//! `ScriptedSession` interprets a small command vocabulary:
//! `sleep <secs>` (interruptible by `close`), `whoami`, `hostname`,
//! `echo <text>`, and `exit <rc>`. Shared `TransportStats` track how many
//! sessions a connector created and the high-water mark of concurrently
//! executing commands, which is how capacity bounds are asserted.

// Each integration test binary compiles its own copy of this module and
// uses a different subset of it.
#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use shellpool::{Connector, Credentials, Error, OutputCapture, Result, Session};

/// Initialize test logging once; respects `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Counters shared across every session a `ScriptedConnector` creates.
#[derive(Debug, Default)]
pub struct TransportStats {
    pub sessions_created: AtomicUsize,
    active_execs: AtomicUsize,
    max_active_execs: AtomicUsize,
}

impl TransportStats {
    pub fn sessions_created(&self) -> usize {
        self.sessions_created.load(Ordering::SeqCst)
    }

    /// Highest number of commands that ever executed at the same time.
    pub fn max_active_execs(&self) -> usize {
        self.max_active_execs.load(Ordering::SeqCst)
    }
}

/// An in-memory session interpreting the scripted command vocabulary.
pub struct ScriptedSession {
    identifier: String,
    host: String,
    user: String,
    closed: AtomicBool,
    close_signal: Notify,
    stats: Arc<TransportStats>,
}

impl ScriptedSession {
    fn new(host: &str, user: &str, stats: Arc<TransportStats>) -> Self {
        Self {
            identifier: format!("{}@{}", user, host),
            host: host.to_string(),
            user: user.to_string(),
            closed: AtomicBool::new(false),
            close_signal: Notify::new(),
            stats,
        }
    }

    async fn run(&self, command: &str, capture: &OutputCapture) -> Result<Option<u32>> {
        if let Some(rest) = command.strip_prefix("sleep ") {
            let secs: f64 = rest.trim().parse().unwrap_or(0.0);
            // Register interest in the close signal before re-checking the
            // flag so a concurrent close can never slip between the two.
            let notified = self.close_signal.notified();
            tokio::pin!(notified);
            if self.closed.load(Ordering::SeqCst) {
                return Ok(None);
            }
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs_f64(secs)) => Ok(Some(0)),
                _ = &mut notified => Ok(None),
            }
        } else if command == "whoami" {
            capture.push_stdout(self.user.as_bytes());
            capture.push_stdout(b"\n");
            Ok(Some(0))
        } else if command == "hostname" {
            capture.push_stdout(self.host.as_bytes());
            capture.push_stdout(b"\n");
            Ok(Some(0))
        } else if let Some(rest) = command.strip_prefix("echo ") {
            capture.push_stdout(rest.as_bytes());
            capture.push_stdout(b"\n");
            Ok(Some(0))
        } else if let Some(rest) = command.strip_prefix("exit ") {
            Ok(Some(rest.trim().parse().unwrap_or(1)))
        } else {
            capture.push_stderr(format!("{}: command not found\n", command).as_bytes());
            Ok(Some(127))
        }
    }
}

#[async_trait]
impl Session for ScriptedSession {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn exec(&self, command: &str, capture: &OutputCapture) -> Result<Option<u32>> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::SessionClosed);
        }

        let active = self.stats.active_execs.fetch_add(1, Ordering::SeqCst) + 1;
        self.stats.max_active_execs.fetch_max(active, Ordering::SeqCst);
        let result = self.run(command, capture).await;
        self.stats.active_execs.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn is_alive(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.close_signal.notify_waiters();
        Ok(())
    }
}

/// Connector producing [`ScriptedSession`]s, with optional per-user
/// authentication failures.
#[derive(Default)]
pub struct ScriptedConnector {
    stats: Arc<TransportStats>,
    reject_users: Vec<String>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every authentication attempt for `user`.
    pub fn reject_user(mut self, user: impl Into<String>) -> Self {
        self.reject_users.push(user.into());
        self
    }

    pub fn stats(&self) -> Arc<TransportStats> {
        Arc::clone(&self.stats)
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        host: &str,
        user: &str,
        _credentials: &Credentials,
    ) -> Result<Arc<dyn Session>> {
        if self.reject_users.iter().any(|u| u == user) {
            return Err(Error::AuthenticationFailed {
                host: host.to_string(),
                user: user.to_string(),
                message: "rejected by scripted connector".to_string(),
            });
        }

        self.stats.sessions_created.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(ScriptedSession::new(
            host,
            user,
            Arc::clone(&self.stats),
        )))
    }
}
