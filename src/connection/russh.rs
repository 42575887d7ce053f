//! SSH transport using the russh crate.
//!
//! [`RusshSession`] implements the [`Session`] seam on top of a russh client
//! handle: one channel per command, output streamed into the caller's
//! [`OutputCapture`], close via protocol disconnect. [`RusshConnector`]
//! authenticates new sessions with an identity file, a password, or the
//! running SSH agent.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{Handle, Handler};
use russh::keys::key::PublicKey;
use russh::keys::load_secret_key;
use russh::ChannelMsg;
use russh_keys::agent::client::AgentClient;
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};

use super::{Connector, Credentials, OutputCapture, Session};
use crate::error::{Error, Result};

/// Default SSH port.
const DEFAULT_SSH_PORT: u16 = 22;

/// Russh-related error wrapper for the Handler trait.
#[derive(Debug)]
pub struct RusshError(pub ::russh::Error);

impl From<::russh::Error> for RusshError {
    fn from(err: ::russh::Error) -> Self {
        RusshError(err)
    }
}

impl std::fmt::Display for RusshError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Russh error: {}", self.0)
    }
}

impl std::error::Error for RusshError {}

/// Client handler accepting server keys on first contact.
///
/// Host key verification is the transport collaborator's concern; this
/// handler mirrors `StrictHostKeyChecking=accept-new` and logs the host so
/// operators can audit first connections.
struct ClientHandler {
    host: String,
}

#[async_trait]
impl Handler for ClientHandler {
    type Error = RusshError;

    async fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        debug!(host = %self.host, "Accepting server host key");
        Ok(true)
    }
}

/// One authenticated SSH session backed by russh.
pub struct RusshSession {
    /// `user@host:port`, used in logs.
    identifier: String,
    /// Read lock: channel operations. Write lock: close only.
    handle: Arc<RwLock<Option<Handle<ClientHandler>>>>,
    connected: AtomicBool,
}

impl RusshSession {
    async fn connect(
        host: &str,
        port: u16,
        user: &str,
        credentials: &Credentials,
        timing: &ConnectTiming,
    ) -> Result<Self> {
        let identifier = format!("{}@{}:{}", user, host, port);
        debug!(host = %host, port = %port, user = %user, "Connecting via SSH (russh)");

        let mut config = russh::client::Config::default();
        config.inactivity_timeout = timing.inactivity_timeout;
        let config = Arc::new(config);

        let addr = format!("{}:{}", host, port);
        let socket = tokio::time::timeout(
            timing.connect_timeout,
            tokio::net::TcpStream::connect(&addr),
        )
        .await
        .map_err(|_| {
            Error::ConnectionFailed(format!(
                "TCP connect to {} timed out after {:?}",
                addr, timing.connect_timeout
            ))
        })?
        .map_err(|e| Error::ConnectionFailed(format!("Failed to connect to {}: {}", addr, e)))?;

        socket
            .set_nodelay(true)
            .map_err(|e| Error::ConnectionFailed(format!("Failed to set TCP_NODELAY: {}", e)))?;

        let handler = ClientHandler {
            host: host.to_string(),
        };

        let mut session = russh::client::connect_stream(config, socket, handler)
            .await
            .map_err(|e| Error::ConnectionFailed(format!("SSH handshake failed: {}", e)))?;

        tokio::time::timeout(
            timing.auth_timeout,
            authenticate(&mut session, host, user, credentials),
        )
        .await
        .map_err(|_| Error::AuthenticationFailed {
            host: host.to_string(),
            user: user.to_string(),
            message: format!("authentication timed out after {:?}", timing.auth_timeout),
        })??;

        debug!(identifier = %identifier, "SSH session established");
        Ok(Self {
            identifier,
            handle: Arc::new(RwLock::new(Some(session))),
            connected: AtomicBool::new(true),
        })
    }
}

#[async_trait]
impl Session for RusshSession {
    fn identifier(&self) -> &str {
        &self.identifier
    }

    async fn exec(&self, command: &str, capture: &OutputCapture) -> Result<Option<u32>> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(Error::SessionClosed);
        }

        trace!(identifier = %self.identifier, command = %command, "Opening exec channel");

        // Hold the read lock only long enough to open a channel so a
        // concurrent close is never blocked behind a running command.
        let handle_guard = self.handle.read().await;
        let handle = handle_guard.as_ref().ok_or(Error::SessionClosed)?;

        let mut channel = handle.channel_open_session().await.map_err(|e| {
            if self.connected.load(Ordering::SeqCst) {
                Error::ConnectionFailed(format!("Failed to open channel: {}", e))
            } else {
                Error::SessionClosed
            }
        })?;
        drop(handle_guard);

        channel
            .exec(true, command.to_string())
            .await
            .map_err(|e| Error::ConnectionFailed(format!("Failed to execute command: {}", e)))?;

        let mut exit_code = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => {
                    capture.push_stdout(data);
                }
                ChannelMsg::ExtendedData { ref data, ext } => {
                    // Extended data type 1 is stderr
                    if ext == 1 {
                        capture.push_stderr(data);
                    }
                }
                ChannelMsg::ExitStatus { exit_status } => {
                    exit_code = Some(exit_status);
                }
                ChannelMsg::Eof => {
                    // Keep reading until the channel closes
                }
                ChannelMsg::Close => {
                    break;
                }
                _ => {}
            }
        }

        let _ = channel.eof().await;

        trace!(identifier = %self.identifier, exit_code = ?exit_code, "Channel finished");
        // A channel that closed without reporting an exit status was
        // interrupted: the peer disconnected or the session was closed
        // underneath the command.
        Ok(exit_code)
    }

    async fn is_alive(&self) -> bool {
        if !self.connected.load(Ordering::SeqCst) {
            return false;
        }
        self.handle.read().await.is_some()
    }

    async fn close(&self) -> Result<()> {
        debug!(identifier = %self.identifier, "Closing SSH session");
        self.connected.store(false, Ordering::SeqCst);

        let handle = {
            let mut handle_guard = self.handle.write().await;
            handle_guard.take()
        };

        if let Some(handle) = handle {
            let _ = handle
                .disconnect(
                    russh::Disconnect::ByApplication,
                    "Session closed by client",
                    "en",
                )
                .await;
        }

        Ok(())
    }
}

impl std::fmt::Debug for RusshSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RusshSession")
            .field("identifier", &self.identifier)
            .field("connected", &self.connected.load(Ordering::SeqCst))
            .finish()
    }
}

/// Authenticate `session` with the supplied credentials.
async fn authenticate(
    session: &mut Handle<ClientHandler>,
    host: &str,
    user: &str,
    credentials: &Credentials,
) -> Result<()> {
    let auth_error = |message: String| Error::AuthenticationFailed {
        host: host.to_string(),
        user: user.to_string(),
        message,
    };

    match credentials {
        Credentials::KeyFile { path, passphrase } => {
            let key_path = expand_key_path(path);
            if !key_path.exists() {
                return Err(auth_error(format!(
                    "Key file not found: {}",
                    key_path.display()
                )));
            }

            let key_pair = load_secret_key(&key_path, passphrase.as_deref()).map_err(|e| {
                auth_error(format!("Failed to load key {}: {}", key_path.display(), e))
            })?;

            let authenticated = session
                .authenticate_publickey(user, Arc::new(key_pair))
                .await
                .map_err(|e| auth_error(format!("Key authentication failed: {}", e)))?;

            if authenticated {
                debug!(key = %key_path.display(), "Authenticated using key");
                Ok(())
            } else {
                Err(auth_error(format!(
                    "Key {} rejected by server",
                    key_path.display()
                )))
            }
        }
        Credentials::Password(password) => {
            let authenticated = session
                .authenticate_password(user, password)
                .await
                .map_err(|e| auth_error(format!("Password authentication failed: {}", e)))?;

            if authenticated {
                debug!("Authenticated using password");
                Ok(())
            } else {
                Err(auth_error("Password rejected by server".to_string()))
            }
        }
        Credentials::Agent => {
            let mut agent = AgentClient::connect_env()
                .await
                .map_err(|e| auth_error(format!("Failed to connect to SSH agent: {}", e)))?;

            let identities = agent
                .request_identities()
                .await
                .map_err(|e| auth_error(format!("Failed to get agent identities: {}", e)))?;

            if identities.is_empty() {
                return Err(auth_error("SSH agent has no identities".to_string()));
            }

            debug!(identity_count = %identities.len(), "Trying SSH agent identities");
            for identity in identities {
                let (returned_agent, result) = session
                    .authenticate_future(user, identity.clone(), agent)
                    .await;
                agent = returned_agent;

                match result {
                    Ok(true) => {
                        debug!("SSH agent authentication successful");
                        return Ok(());
                    }
                    Ok(false) => {
                        trace!("Identity rejected, trying next");
                    }
                    Err(e) => {
                        trace!(error = %e, "Agent authentication attempt failed");
                    }
                }
            }

            Err(auth_error("All SSH agent identities rejected".to_string()))
        }
    }
}

/// Expand `~` in an identity file path.
fn expand_key_path(path: &Path) -> std::path::PathBuf {
    let raw = path.to_string_lossy();
    std::path::PathBuf::from(shellexpand::tilde(raw.as_ref()).into_owned())
}

/// Timing limits applied while establishing a session.
#[derive(Debug, Clone)]
pub struct ConnectTiming {
    /// TCP connect limit.
    pub connect_timeout: Duration,
    /// Authentication limit (after the handshake).
    pub auth_timeout: Duration,
    /// Inactivity timeout handed to russh (None = disabled).
    pub inactivity_timeout: Option<Duration>,
}

impl Default for ConnectTiming {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(7),
            auth_timeout: Duration::from_secs(30),
            inactivity_timeout: None,
        }
    }
}

impl From<&crate::config::ShellConfig> for ConnectTiming {
    fn from(config: &crate::config::ShellConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            auth_timeout: config.auth_timeout,
            inactivity_timeout: None,
        }
    }
}

/// [`Connector`] creating [`RusshSession`]s.
#[derive(Debug, Clone)]
pub struct RusshConnector {
    port: u16,
    timing: ConnectTiming,
}

impl RusshConnector {
    /// Connector with default port and timing.
    pub fn new() -> Self {
        Self {
            port: DEFAULT_SSH_PORT,
            timing: ConnectTiming::default(),
        }
    }

    /// Use a non-standard SSH port.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Replace the connect/authentication timing limits.
    pub fn timing(mut self, timing: ConnectTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Connector with timing limits taken from a [`ShellConfig`](crate::config::ShellConfig).
    pub fn from_config(config: &crate::config::ShellConfig) -> Self {
        Self {
            port: DEFAULT_SSH_PORT,
            timing: ConnectTiming::from(config),
        }
    }
}

impl Default for RusshConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for RusshConnector {
    async fn connect(
        &self,
        host: &str,
        user: &str,
        credentials: &Credentials,
    ) -> Result<Arc<dyn Session>> {
        match RusshSession::connect(host, self.port, user, credentials, &self.timing).await {
            Ok(session) => Ok(Arc::new(session)),
            Err(e) => {
                warn!(host = %host, user = %user, error = %e, "SSH connection attempt failed");
                Err(e)
            }
        }
    }
}
