//! # Shellpool - Bounded-Concurrency Remote Command Execution
//!
//! Shellpool drives shell commands across a fleet of remote hosts with a
//! fixed concurrency budget: authenticated SSH sessions are pooled and
//! reused per (host, user, identity) key, command execution is guarded by a
//! wall-clock watchdog, and batches of work fan out through a bounded worker
//! queue with per-item failure isolation.
//!
//! ## Core Concepts
//!
//! - **Command / Response**: immutable value objects; a `Response` carries
//!   the real remote exit status, or one of two reserved codes — `177`
//!   (watchdog terminated the command) and `255` (connection lost
//!   mid-execution) — so callers branch on `rc` instead of catching errors
//! - **Session**: one authenticated remote session behind a transport trait
//!   (production implementation on `russh`)
//! - **SessionPool**: a bounded, semaphore-guarded set of sessions for one
//!   pool key; acquisition blocks until a slot frees
//! - **ConnectionManager**: lazily-created registry of pools with explicit
//!   capacity configuration
//! - **Executors**: `RemoteExecutor` / `LocalExecutor` enforce the timeout
//!   and translate transport failures into response codes
//! - **WorkQueue**: runs an async function over N work items with W workers;
//!   one item's failure never aborts the batch
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            Caller                               │
//! │         (work items + command text + worker budget)             │
//! └─────────────────────────────────────────────────────────────────┘
//!                                 │
//!                                 ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                           WorkQueue                             │
//! │        (W-permit semaphore, one task per work item)             │
//! └─────────────────────────────────────────────────────────────────┘
//!                                 │  per item: run_remote_cmd
//!                                 ▼
//! ┌───────────────────────┐   ┌─────────────────────────────────────┐
//! │   ConnectionManager   │──▶│  SessionPool (per host/user/identity)│
//! │  (pool registry)      │   │  capacity-bounded, blocking acquire │
//! └───────────────────────┘   └─────────────────────────────────────┘
//!                                 │  checked-out Session
//!                                 ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │              RemoteExecutor (watchdog + rc mapping)             │
//! │        normal → rc passthrough │ timeout → 177 │ lost → 255     │
//! └─────────────────────────────────────────────────────────────────┘
//!                                 │  Response
//!                                 ▼
//!                     release / discard session
//! ```
//!
//! ## Quick Example
//!
//! ```rust,ignore
//! use std::time::Duration;
//! use shellpool::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> shellpool::Result<()> {
//!     let manager = ConnectionManager::builder()
//!         .max_sessions_per_host(5)
//!         .build();
//!
//!     let hosts: Vec<String> = (1..=50).map(|n| format!("netsim{:02}", n)).collect();
//!     let command = Command::new("hostname").with_timeout(Duration::from_secs(10));
//!     let credentials = Credentials::key_file("/root/.ssh/vm_private_key");
//!
//!     let manager = std::sync::Arc::new(manager);
//!     let queue = WorkQueue::new(10);
//!     let entries = {
//!         let manager = std::sync::Arc::clone(&manager);
//!         let command = command.clone();
//!         let credentials = credentials.clone();
//!         queue
//!             .execute(hosts, move |host: String| {
//!                 let manager = std::sync::Arc::clone(&manager);
//!                 let command = command.clone();
//!                 let credentials = credentials.clone();
//!                 async move {
//!                     run_remote_cmd(&manager, &command, &host, "netsim", &credentials).await
//!                 }
//!             })
//!             .await
//!     };
//!
//!     for entry in &entries {
//!         match entry.result() {
//!             Some(response) if response.ok() => {
//!                 println!("{}: {}", entry.item, response.stdout.trim())
//!             }
//!             Some(response) => println!("{}: rc={}", entry.item, response.rc),
//!             None => println!("{}: {}", entry.item, entry.error().unwrap()),
//!         }
//!     }
//!     Ok(())
//! }
//! ```

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

/// Command and response value objects.
pub mod command;

/// Configuration types.
pub mod config;

/// Connection layer: session trait, pooling, and the manager.
pub mod connection;

/// Error types.
pub mod error;

/// Command executors enforcing the watchdog timeout.
pub mod executor;

/// Bounded worker-pool fan-out.
pub mod queue;

/// Convenience composition of manager + executors.
pub mod shell;

pub use command::{Command, Response, DEFAULT_COMMAND_TIMEOUT};
pub use config::ShellConfig;
pub use connection::{
    ConnectionManager, ConnectionManagerBuilder, Connector, Credentials, IdentityTag,
    OutputCapture, PoolConfig, PoolKey, PoolStats, Session, SessionHandle, SessionPool,
};
pub use error::{Error, Result};
pub use executor::{
    LocalExecutor, RemoteExecutor, COMMAND_ABORTED_RC, COMMAND_CONNECTION_CLOSED_RC,
    COMMAND_TIMEOUT_RC,
};
pub use queue::{WorkEntry, WorkError, WorkQueue};
pub use shell::{run_local_cmd, run_remote_cmd, run_remote_cmd_new_session};

/// Convenient re-exports of commonly used types.
pub mod prelude {
    //! Quick access to the types most callers need.

    pub use crate::command::{Command, Response};
    pub use crate::config::ShellConfig;
    pub use crate::connection::{ConnectionManager, Credentials, Session, SessionHandle};
    pub use crate::error::{Error, Result};
    pub use crate::executor::{
        LocalExecutor, RemoteExecutor, COMMAND_CONNECTION_CLOSED_RC, COMMAND_TIMEOUT_RC,
    };
    pub use crate::queue::{WorkEntry, WorkQueue};
    pub use crate::shell::{run_local_cmd, run_remote_cmd};
}
