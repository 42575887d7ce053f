//! Error types for shellpool.
//!
//! Only resource acquisition can fail with an [`Error`]: authenticating a new
//! session, waiting for a pool slot, or using a manager that has been shut
//! down. Command execution outcomes (timeout, connection loss, non-zero exit)
//! are never errors — they travel as [`Response`](crate::Response) codes so
//! callers can branch on `rc` uniformly.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for shellpool operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while acquiring or managing sessions.
#[derive(Error, Debug)]
pub enum Error {
    /// Authentication was rejected while creating a new session.
    ///
    /// Surfaced to the caller immediately; the pool never retries
    /// authentication on its own.
    #[error("Authentication failed for {user}@{host}: {message}")]
    AuthenticationFailed {
        /// Target host
        host: String,
        /// Username the authentication was attempted for
        user: String,
        /// Underlying failure description
        message: String,
    },

    /// Failed to establish the transport connection to the host.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The session was closed before or during the requested operation.
    #[error("Session closed")]
    SessionClosed,

    /// No pool slot became free within the acquire timeout.
    #[error("Timed out after {0:?} waiting for a free session slot")]
    AcquireTimeout(Duration),

    /// The connection manager (or one of its pools) has been shut down.
    #[error("Connection manager is shut down")]
    ManagerClosed,

    /// Configuration is invalid or incomplete.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error during connection setup.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
