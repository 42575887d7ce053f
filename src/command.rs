//! Command and response value objects.
//!
//! A [`Command`] describes *what* to run and for how long it is allowed to
//! run; a [`Response`] is the immutable record of one execution. Both are
//! plain data: a single `Command` can be cloned across many concurrent work
//! items, and a `Response` is never mutated after the executor returns it.

use std::path::PathBuf;
use std::time::Duration;

use serde::de::DeserializeOwned;

/// Wall-clock timeout applied when a command does not specify one.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Default number of execution attempts when retries are enabled.
pub const DEFAULT_RETRY_LIMIT: u32 = 2;

/// A shell command with its execution policy.
#[derive(Debug, Clone)]
pub struct Command {
    /// The shell command text to execute.
    pub cmd: String,
    /// Wall-clock limit for one execution attempt.
    pub timeout: Duration,
    /// Whether a timed-out local execution may be attempted again.
    /// Remote executions never retry regardless of this flag.
    pub allow_retries: bool,
    /// Maximum number of attempts (including the first).
    pub retry_limit: u32,
    /// Working directory for local execution.
    pub cwd: Option<PathBuf>,
}

impl Command {
    /// Create a command with the default timeout and retry policy.
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            timeout: DEFAULT_COMMAND_TIMEOUT,
            allow_retries: true,
            retry_limit: DEFAULT_RETRY_LIMIT,
            cwd: None,
        }
    }

    /// Set the wall-clock timeout for one execution attempt.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Allow up to `limit` attempts for timed-out local executions.
    pub fn with_retries(mut self, limit: u32) -> Self {
        self.allow_retries = true;
        self.retry_limit = limit.max(1);
        self
    }

    /// Disable retries; the command runs exactly once.
    pub fn without_retries(mut self) -> Self {
        self.allow_retries = false;
        self
    }

    /// Set the working directory for local execution.
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// Number of execution attempts this command is entitled to.
    pub(crate) fn attempts(&self) -> u32 {
        if self.allow_retries {
            self.retry_limit.max(1)
        } else {
            1
        }
    }
}

/// The immutable result of one command execution.
///
/// `rc` carries the remote process's real exit status on normal completion.
/// The reserved values [`COMMAND_TIMEOUT_RC`](crate::executor::COMMAND_TIMEOUT_RC)
/// and [`COMMAND_CONNECTION_CLOSED_RC`](crate::executor::COMMAND_CONNECTION_CLOSED_RC)
/// mark watchdog termination and mid-execution connection loss.
#[derive(Debug, Clone)]
pub struct Response {
    /// Return code of the execution.
    pub rc: i32,
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
    /// Wall-clock time the execution took.
    pub elapsed: Duration,
}

impl Response {
    /// Create a response from execution results.
    pub fn new(rc: i32, stdout: String, stderr: String, elapsed: Duration) -> Self {
        Self {
            rc,
            stdout,
            stderr,
            elapsed,
        }
    }

    /// `true` if the command exited with status 0.
    pub fn ok(&self) -> bool {
        self.rc == 0
    }

    /// Parse stdout as JSON into the requested type.
    pub fn json<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_str(&self.stdout)
    }

    /// Get the combined output (stdout + stderr).
    pub fn combined_output(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else if self.stdout.is_empty() {
            self.stderr.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_defaults() {
        let cmd = Command::new("uptime");
        assert_eq!(cmd.cmd, "uptime");
        assert_eq!(cmd.timeout, DEFAULT_COMMAND_TIMEOUT);
        assert!(cmd.allow_retries);
        assert_eq!(cmd.attempts(), DEFAULT_RETRY_LIMIT);
    }

    #[test]
    fn test_command_builder() {
        let cmd = Command::new("ls")
            .with_timeout(Duration::from_secs(5))
            .with_retries(4)
            .with_cwd("/tmp");

        assert_eq!(cmd.timeout, Duration::from_secs(5));
        assert_eq!(cmd.attempts(), 4);
        assert_eq!(cmd.cwd, Some(PathBuf::from("/tmp")));
    }

    #[test]
    fn test_command_without_retries_runs_once() {
        let cmd = Command::new("ls").with_retries(5).without_retries();
        assert_eq!(cmd.attempts(), 1);
    }

    #[test]
    fn test_response_ok() {
        let response = Response::new(0, "done".into(), String::new(), Duration::from_millis(3));
        assert!(response.ok());

        let failed = Response::new(1, String::new(), "boom".into(), Duration::from_millis(3));
        assert!(!failed.ok());
    }

    #[test]
    fn test_response_json() {
        let response = Response::new(
            0,
            r#"{"state": "running", "nodes": 3}"#.into(),
            String::new(),
            Duration::from_millis(1),
        );
        let value: serde_json::Value = response.json().unwrap();
        assert_eq!(value["nodes"], 3);
    }

    #[test]
    fn test_response_combined_output() {
        let both = Response::new(1, "out".into(), "err".into(), Duration::ZERO);
        assert_eq!(both.combined_output(), "out\nerr");

        let stdout_only = Response::new(0, "out".into(), String::new(), Duration::ZERO);
        assert_eq!(stdout_only.combined_output(), "out");
    }
}
