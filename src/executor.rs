//! Command executors enforcing the watchdog timeout.
//!
//! [`RemoteExecutor`] runs a [`Command`] over a pooled [`Session`];
//! [`LocalExecutor`] runs it on the local host via `sh -c`. Both translate
//! the two abnormal endings into reserved response codes instead of errors:
//! [`COMMAND_TIMEOUT_RC`] when the watchdog forcibly terminated the command,
//! [`COMMAND_CONNECTION_CLOSED_RC`] when the session was closed or the
//! transport broke mid-execution. Everything else passes the process's real
//! exit status through.

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::io::AsyncReadExt;
use tokio::process::Command as ProcessCommand;
use tracing::{debug, warn};

use crate::command::{Command, Response};
use crate::connection::{OutputCapture, Session};

/// Return code reported when the watchdog forcibly terminated the command.
pub const COMMAND_TIMEOUT_RC: i32 = 177;

/// Return code reported when the session was closed or the transport broke
/// mid-execution.
pub const COMMAND_CONNECTION_CLOSED_RC: i32 = 255;

/// Return code reported when a local process could not be spawned or awaited.
pub const COMMAND_ABORTED_RC: i32 = 211;

/// Upper bound for the randomized pause between local retry attempts.
const RETRY_PAUSE_MAX: Duration = Duration::from_secs(4);

/// Executes commands over one checked-out remote session.
pub struct RemoteExecutor<'a> {
    session: &'a Arc<dyn Session>,
}

impl<'a> RemoteExecutor<'a> {
    /// Create an executor for `session`.
    pub fn new(session: &'a Arc<dyn Session>) -> Self {
        Self { session }
    }

    /// Run `command` on the session, enforcing its timeout.
    ///
    /// Always returns a [`Response`]:
    /// - normal completion → the remote exit status and full output;
    /// - watchdog expiry → the session is force-closed (terminating the
    ///   remote process) and `rc` is [`COMMAND_TIMEOUT_RC`] with whatever
    ///   partial output was captured;
    /// - session closed or transport broken mid-execution → `rc` is
    ///   [`COMMAND_CONNECTION_CLOSED_RC`] with empty output.
    ///
    /// Remote commands are never retried.
    pub async fn execute(&self, command: &Command) -> Response {
        let started = Instant::now();
        let capture = OutputCapture::new();

        debug!(
            host = %self.session.identifier(),
            command = %command.cmd,
            timeout = ?command.timeout,
            "Executing remote command"
        );

        let outcome =
            tokio::time::timeout(command.timeout, self.session.exec(&command.cmd, &capture)).await;

        match outcome {
            // Watchdog fired: terminate the remote process by closing the
            // session, then salvage whatever output already arrived.
            Err(_) => {
                warn!(
                    host = %self.session.identifier(),
                    command = %command.cmd,
                    timeout = ?command.timeout,
                    "Command exceeded timeout; closing session"
                );
                let _ = self.session.close().await;
                let (stdout, stderr) = capture.snapshot();
                Response::new(COMMAND_TIMEOUT_RC, stdout, stderr, started.elapsed())
            }
            Ok(Ok(Some(status))) => {
                let (stdout, stderr) = capture.snapshot();
                debug!(
                    host = %self.session.identifier(),
                    rc = %status,
                    elapsed = ?started.elapsed(),
                    "Remote command completed"
                );
                Response::new(status as i32, stdout, stderr, started.elapsed())
            }
            // No exit status or a transport error: the command was
            // interrupted underneath us.
            Ok(Ok(None)) | Ok(Err(_)) => {
                debug!(
                    host = %self.session.identifier(),
                    command = %command.cmd,
                    "Session closed during execution"
                );
                Response::new(
                    COMMAND_CONNECTION_CLOSED_RC,
                    String::new(),
                    String::new(),
                    started.elapsed(),
                )
            }
        }
    }
}

/// Executes commands on the local host.
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    identifier: String,
}

impl LocalExecutor {
    /// Create a local executor identified by the current hostname.
    pub fn new() -> Self {
        let identifier = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "localhost".to_string());
        Self { identifier }
    }

    /// Identifier used in logs.
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Run `command` locally under its timeout and retry policy.
    ///
    /// A timed-out attempt kills the child process and, when the command
    /// allows retries, is re-run with a doubled timeout after a short
    /// randomized pause. A process that cannot be spawned yields
    /// [`COMMAND_ABORTED_RC`] with the failure on stderr.
    pub async fn execute(&self, command: &Command) -> Response {
        let attempts = command.attempts();
        let mut current_timeout = command.timeout;
        let mut response = self.execute_once(command, current_timeout).await;

        for attempt in 2..=attempts {
            if response.rc != COMMAND_TIMEOUT_RC {
                break;
            }
            current_timeout *= 2;
            let pause = Duration::from_secs_f64(
                rand::thread_rng().gen_range(0.0..RETRY_PAUSE_MAX.as_secs_f64()),
            );
            debug!(
                command = %command.cmd,
                attempt = %attempt,
                attempts = %attempts,
                next_timeout = ?current_timeout,
                pause = ?pause,
                "Local command timed out; retrying"
            );
            tokio::time::sleep(pause).await;
            response = self.execute_once(command, current_timeout).await;
        }

        response
    }

    async fn execute_once(&self, command: &Command, timeout: Duration) -> Response {
        let started = Instant::now();
        debug!(
            host = %self.identifier,
            command = %command.cmd,
            timeout = ?timeout,
            "Executing local command"
        );

        let mut cmd = ProcessCommand::new("sh");
        cmd.arg("-c").arg(&command.cmd);
        if let Some(cwd) = &command.cwd {
            cmd.current_dir(cwd);
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(command = %command.cmd, error = %e, "Failed to spawn process");
                return Response::new(
                    COMMAND_ABORTED_RC,
                    String::new(),
                    format!("Failed to spawn process: {}", e),
                    started.elapsed(),
                );
            }
        };

        let capture = OutputCapture::new();
        let stdout_task = child.stdout.take().map(|pipe| {
            let capture = capture.clone();
            tokio::spawn(async move { drain_pipe(pipe, move |chunk| capture.push_stdout(chunk)).await })
        });
        let stderr_task = child.stderr.take().map(|pipe| {
            let capture = capture.clone();
            tokio::spawn(async move { drain_pipe(pipe, move |chunk| capture.push_stderr(chunk)).await })
        });

        let status = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                warn!(command = %command.cmd, error = %e, "Failed to wait for process");
                return Response::new(
                    COMMAND_ABORTED_RC,
                    String::new(),
                    format!("Failed to wait for process: {}", e),
                    started.elapsed(),
                );
            }
            Err(_) => {
                // Watchdog fired: kill the process, then salvage partial output.
                warn!(
                    command = %command.cmd,
                    timeout = ?timeout,
                    "Local command exceeded timeout; killing process"
                );
                let _ = child.kill().await;
                // Orphaned grandchildren can keep the pipes open past the
                // kill; don't let them delay the timeout response.
                let _ = tokio::time::timeout(
                    Duration::from_secs(1),
                    join_readers(stdout_task, stderr_task),
                )
                .await;
                let (stdout, stderr) = capture.snapshot();
                return Response::new(COMMAND_TIMEOUT_RC, stdout, stderr, started.elapsed());
            }
        };

        join_readers(stdout_task, stderr_task).await;
        let (stdout, stderr) = capture.snapshot();
        // A signal-terminated process has no exit code to pass through.
        let rc = status.code().unwrap_or(COMMAND_ABORTED_RC);

        debug!(
            host = %self.identifier,
            rc = %rc,
            elapsed = ?started.elapsed(),
            "Local command completed"
        );
        Response::new(rc, stdout, stderr, started.elapsed())
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

/// Read a child pipe to EOF, feeding chunks to `push`.
async fn drain_pipe<R, F>(mut pipe: R, push: F)
where
    R: AsyncReadExt + Unpin,
    F: Fn(&[u8]),
{
    let mut buf = [0u8; 8192];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(n) => push(&buf[..n]),
        }
    }
}

async fn join_readers(
    stdout_task: Option<tokio::task::JoinHandle<()>>,
    stderr_task: Option<tokio::task::JoinHandle<()>>,
) {
    futures::future::join_all(stdout_task.into_iter().chain(stderr_task)).await;
}
