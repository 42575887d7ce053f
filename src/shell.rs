//! Convenience functions composing the manager and executors.
//!
//! These shield callers from session checkout discipline: every exit path
//! disposes of the session correctly. A session that completed its command
//! normally goes back to the pool's idle set; a session the executor closed
//! (watchdog) or observed broken is discarded and never reused.

use tracing::debug;

use crate::command::{Command, Response};
use crate::connection::{ConnectionManager, Credentials};
use crate::error::Result;
use crate::executor::{
    LocalExecutor, RemoteExecutor, COMMAND_CONNECTION_CLOSED_RC, COMMAND_TIMEOUT_RC,
};

/// Run `command` on `host` as `user` over a pooled session.
///
/// Acquires a session from the manager (blocking while the key's pool is
/// exhausted), executes with the watchdog armed, and guarantees the session
/// is released or discarded on every exit path. Errors only for resource
/// acquisition (authentication, acquire timeout, shutdown manager); timeout
/// and connection loss come back as [`Response`] codes.
pub async fn run_remote_cmd(
    manager: &ConnectionManager,
    command: &Command,
    host: &str,
    user: &str,
    credentials: &Credentials,
) -> Result<Response> {
    let handle = manager.get_connection(host, user, credentials).await?;
    let response = RemoteExecutor::new(handle.session()).execute(command).await;

    if matches!(
        response.rc,
        COMMAND_TIMEOUT_RC | COMMAND_CONNECTION_CLOSED_RC
    ) {
        // The session is closed or in an unknown state; drop it from the
        // pool so the freed slot is filled by a fresh session.
        debug!(host = %host, user = %user, rc = %response.rc, "Discarding session after abnormal execution");
        handle.discard().await;
    } else {
        handle.release();
    }

    Ok(response)
}

/// Run `command` over a dedicated, unpooled session.
///
/// Creates a fresh session outside any pool, executes, and closes it.
/// Useful for one-off maintenance commands that must not compete for pool
/// slots.
pub async fn run_remote_cmd_new_session(
    manager: &ConnectionManager,
    command: &Command,
    host: &str,
    user: &str,
    credentials: &Credentials,
) -> Result<Response> {
    let session = manager
        .connector()?
        .connect(host, user, credentials)
        .await?;
    let response = RemoteExecutor::new(&session).execute(command).await;
    let _ = session.close().await;
    Ok(response)
}

/// Run `command` on the local host. Never errors; inspect `rc`.
pub async fn run_local_cmd(command: &Command) -> Response {
    LocalExecutor::new().execute(command).await
}
