//! Connection layer: the session transport seam, pooling, and the manager.
//!
//! A [`Session`] is one authenticated remote session. The trait is the
//! boundary between this crate and the secure-transport implementation: the
//! pool and executors only ever see `exec`/`is_alive`/`close`. The production
//! implementation lives in [`russh`](self::russh) (behind the `russh`
//! feature); tests substitute scripted sessions through the same trait.
//!
//! Sessions are grouped into bounded [`SessionPool`]s keyed by
//! [`PoolKey`] — one pool per (host, user, identity) — and the pools are
//! created lazily by the [`ConnectionManager`].

/// Bounded per-key session pool.
pub mod pool;

/// Registry of session pools.
pub mod manager;

/// Pure Rust SSH transport using russh.
#[cfg(feature = "russh")]
pub mod russh;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::Result;

pub use manager::{ConnectionManager, ConnectionManagerBuilder, PoolStats};
pub use pool::{PoolConfig, SessionHandle, SessionPool};

/// Credential material used to authenticate a new session.
///
/// Secrets are redacted from the `Debug` representation so credential
/// values never end up in logs.
#[derive(Clone)]
pub enum Credentials {
    /// Authenticate through the running SSH agent.
    Agent,
    /// Authenticate with a private key file, optionally passphrase-protected.
    KeyFile {
        /// Path to the private key (`~` is expanded at connect time).
        path: PathBuf,
        /// Passphrase for an encrypted key.
        passphrase: Option<String>,
    },
    /// Authenticate with a password.
    Password(String),
}

impl Credentials {
    /// Agent-based credentials.
    pub fn agent() -> Self {
        Self::Agent
    }

    /// Key-file credentials without a passphrase.
    pub fn key_file(path: impl Into<PathBuf>) -> Self {
        Self::KeyFile {
            path: path.into(),
            passphrase: None,
        }
    }

    /// Key-file credentials with a passphrase.
    pub fn key_file_with_passphrase(
        path: impl Into<PathBuf>,
        passphrase: impl Into<String>,
    ) -> Self {
        Self::KeyFile {
            path: path.into(),
            passphrase: Some(passphrase.into()),
        }
    }

    /// Password credentials.
    pub fn password(password: impl Into<String>) -> Self {
        Self::Password(password.into())
    }

    /// The pool-key component derived from this credential.
    pub fn identity_tag(&self) -> IdentityTag {
        match self {
            Credentials::Agent => IdentityTag::Agent,
            Credentials::KeyFile { path, .. } => IdentityTag::KeyFile(path.clone()),
            Credentials::Password(_) => IdentityTag::Password,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::Agent => write!(f, "Credentials::Agent"),
            Credentials::KeyFile { path, passphrase } => f
                .debug_struct("Credentials::KeyFile")
                .field("path", path)
                .field("passphrase", &passphrase.as_ref().map(|_| "<redacted>"))
                .finish(),
            Credentials::Password(_) => write!(f, "Credentials::Password(<redacted>)"),
        }
    }
}

/// The identity component of a [`PoolKey`].
///
/// Distinguishes logical sessions by the *kind and location* of the
/// credential; secret bytes never participate in equality or hashing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityTag {
    /// SSH agent identity.
    Agent,
    /// A specific private key file.
    KeyFile(PathBuf),
    /// Password-authenticated identity.
    Password,
}

impl fmt::Display for IdentityTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityTag::Agent => write!(f, "agent"),
            IdentityTag::KeyFile(path) => write!(f, "key:{}", path.display()),
            IdentityTag::Password => write!(f, "password"),
        }
    }
}

/// The (host, user, identity) tuple identifying one bounded session pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    /// Remote host name or address.
    pub host: String,
    /// Username sessions are authenticated as.
    pub user: String,
    /// Credential identity tag.
    pub identity: IdentityTag,
}

impl PoolKey {
    /// Compute the pool key for a (host, user, credentials) triple.
    pub fn new(host: &str, user: &str, credentials: &Credentials) -> Self {
        Self {
            host: host.to_string(),
            user: user.to_string(),
            identity: credentials.identity_tag(),
        }
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ssh://{}@{} ({})", self.user, self.host, self.identity)
    }
}

/// Shared output buffers a session streams into while a command runs.
///
/// The executor keeps a handle to the capture so that when the watchdog
/// fires it can salvage whatever partial stdout/stderr arrived before the
/// session was torn down.
#[derive(Debug, Clone, Default)]
pub struct OutputCapture {
    inner: Arc<Mutex<CaptureBuf>>,
}

#[derive(Debug, Default)]
struct CaptureBuf {
    stdout: Vec<u8>,
    stderr: Vec<u8>,
}

impl OutputCapture {
    /// Create an empty capture.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of standard output.
    pub fn push_stdout(&self, data: &[u8]) {
        self.inner.lock().stdout.extend_from_slice(data);
    }

    /// Append a chunk of standard error.
    pub fn push_stderr(&self, data: &[u8]) {
        self.inner.lock().stderr.extend_from_slice(data);
    }

    /// Snapshot the captured output as (stdout, stderr) strings.
    pub fn snapshot(&self) -> (String, String) {
        let buf = self.inner.lock();
        (
            String::from_utf8_lossy(&buf.stdout).to_string(),
            String::from_utf8_lossy(&buf.stderr).to_string(),
        )
    }
}

/// One authenticated remote session.
///
/// Implementations provide the secure transport; the pool and executors
/// drive everything else through this trait.
#[async_trait]
pub trait Session: Send + Sync {
    /// Identifier for logging (typically `user@host`).
    fn identifier(&self) -> &str;

    /// Execute a command, streaming output into `capture` as it arrives.
    ///
    /// Returns `Ok(Some(status))` when the remote process completed and
    /// reported an exit status, and `Ok(None)` when the channel closed
    /// without one — i.e. the execution was interrupted. Transport failures
    /// are `Err`; the executor translates both interruption cases into the
    /// connection-closed response code.
    async fn exec(&self, command: &str, capture: &OutputCapture) -> Result<Option<u32>>;

    /// Check whether the session is still usable.
    async fn is_alive(&self) -> bool;

    /// Close the session. Terminal: a closed session is never reused.
    async fn close(&self) -> Result<()>;
}

/// Factory that authenticates and creates new sessions.
///
/// Authentication failures must be returned immediately; callers (the pool)
/// never retry on their own.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish an authenticated session to `host` as `user`.
    async fn connect(
        &self,
        host: &str,
        user: &str,
        credentials: &Credentials,
    ) -> Result<Arc<dyn Session>>;
}
