//! Integration tests for the session pool, manager, and remote executor,
//! running against the scripted in-memory transport.

mod support;

use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio_test::assert_ok;

use shellpool::{
    run_remote_cmd, Command, ConnectionManager, Credentials, Error, RemoteExecutor,
    COMMAND_CONNECTION_CLOSED_RC, COMMAND_TIMEOUT_RC,
};
use support::ScriptedConnector;

fn manager_with(connector: ScriptedConnector, capacity: usize) -> ConnectionManager {
    ConnectionManager::builder()
        .max_sessions_per_host(capacity)
        .connector(Arc::new(connector))
        .build()
}

fn netsim_credentials() -> Credentials {
    Credentials::key_file("/root/.ssh/vm_private_key")
}

#[tokio::test]
async fn test_remote_timeout_yields_reserved_rc() {
    let manager = manager_with(ScriptedConnector::new(), 2);
    let command = Command::new("sleep 1").with_timeout(Duration::from_millis(100));

    let response = run_remote_cmd(&manager, &command, "netsim01", "netsim", &netsim_credentials())
        .await
        .unwrap();

    assert_eq!(response.rc, COMMAND_TIMEOUT_RC);
    // The timed-out session was discarded, not returned to the idle set.
    let stats = manager.stats();
    assert_eq!(stats.len(), 1);
    assert_eq!(stats[0].open, 0);
    assert_eq!(stats[0].idle, 0);
}

#[tokio::test]
async fn test_close_during_execution_yields_connection_closed_rc() {
    let manager = manager_with(ScriptedConnector::new(), 2);
    let handle = manager
        .get_connection("netsim01", "netsim", &netsim_credentials())
        .await
        .unwrap();

    // Another task forces the session closed ~200ms into a 5s command.
    let session = Arc::clone(handle.session());
    let closer = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        session.close().await
    });

    let command = Command::new("sleep 5").with_timeout(Duration::from_secs(10));
    let response = RemoteExecutor::new(handle.session()).execute(&command).await;

    assert_eq!(response.rc, COMMAND_CONNECTION_CLOSED_RC);
    assert_eq!(response.stdout, "");
    assert!(response.elapsed < Duration::from_secs(4));

    closer.await.unwrap().unwrap();
    handle.discard().await;
}

#[tokio::test]
async fn test_stdout_reflects_session_identity() {
    let manager = manager_with(ScriptedConnector::new(), 2);
    let command = Command::new("whoami");
    let creds = netsim_credentials();

    let as_netsim = run_remote_cmd(&manager, &command, "host", "netsim", &creds)
        .await
        .unwrap();
    let as_root = run_remote_cmd(&manager, &command, "host", "root", &creds)
        .await
        .unwrap();

    assert_eq!(as_netsim.stdout.trim(), "netsim");
    assert_eq!(as_root.stdout.trim(), "root");
}

#[tokio::test]
async fn test_users_get_independent_pools() {
    // Capacity 1 per key: sequential sessions as two different users must
    // both succeed because each user keys its own pool.
    let connector = ScriptedConnector::new();
    let stats = connector.stats();
    let manager = manager_with(connector, 1);
    let command = Command::new("echo ready");
    let creds = netsim_credentials();

    let first = run_remote_cmd(&manager, &command, "host", "netsim", &creds)
        .await
        .unwrap();
    let second = run_remote_cmd(&manager, &command, "host", "root", &creds)
        .await
        .unwrap();

    assert!(first.ok());
    assert!(second.ok());
    assert_eq!(manager.stats().len(), 2);
    assert_eq!(stats.sessions_created(), 2);
}

#[tokio::test]
async fn test_idle_session_is_reused() {
    let connector = ScriptedConnector::new();
    let stats = connector.stats();
    let manager = manager_with(connector, 5);
    let command = Command::new("echo ping");
    let creds = netsim_credentials();

    for _ in 0..4 {
        let response = run_remote_cmd(&manager, &command, "host", "netsim", &creds)
            .await
            .unwrap();
        assert!(response.ok());
    }

    // Release-then-reacquire on the same key keeps using the one session.
    assert_eq!(stats.sessions_created(), 1);
    let pool_stats = manager.stats();
    assert_eq!(pool_stats[0].open, 1);
    assert_eq!(pool_stats[0].idle, 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_capacity_respected_under_saturation() {
    // 10 concurrent 2x-capacity commands against a capacity-5 pool: all
    // complete, and the transport never sees more than 5 in flight.
    support::init_tracing();
    let connector = ScriptedConnector::new();
    let stats = connector.stats();
    let manager = Arc::new(manager_with(connector, 5));
    let creds = netsim_credentials();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let manager = Arc::clone(&manager);
        let creds = creds.clone();
        handles.push(tokio::spawn(async move {
            let command = Command::new("sleep 0.2").with_timeout(Duration::from_secs(5));
            run_remote_cmd(&manager, &command, "host", "netsim", &creds).await
        }));
    }

    for handle in handles {
        let response = handle.await.unwrap().unwrap();
        assert!(response.ok());
    }

    assert!(stats.max_active_execs() <= 5, "pool capacity exceeded");
    assert!(stats.sessions_created() <= 5);

    // A subsequent unrelated command on the same host still succeeds.
    let after = run_remote_cmd(
        &manager,
        &Command::new("echo still-alive"),
        "host",
        "netsim",
        &creds,
    )
    .await
    .unwrap();
    assert!(after.ok());
}

#[tokio::test]
async fn test_auth_failure_surfaces_immediately() {
    let manager = manager_with(ScriptedConnector::new().reject_user("intruder"), 2);

    let result = run_remote_cmd(
        &manager,
        &Command::new("whoami"),
        "host",
        "intruder",
        &netsim_credentials(),
    )
    .await;

    assert!(matches!(result, Err(Error::AuthenticationFailed { .. })));
    // The failed attempt must not leak a pool slot.
    tokio_test::assert_ok!(
        manager
            .get_connection("host", "netsim", &netsim_credentials())
            .await
    );
}

#[tokio::test]
async fn test_acquire_times_out_when_pool_exhausted() {
    let connector = ScriptedConnector::new();
    let manager = ConnectionManager::builder()
        .max_sessions_per_host(1)
        .acquire_timeout(Duration::from_millis(100))
        .connector(Arc::new(connector))
        .build();
    let creds = netsim_credentials();

    let held = manager.get_connection("host", "netsim", &creds).await.unwrap();

    let starved = manager.get_connection("host", "netsim", &creds).await;
    assert!(matches!(starved, Err(Error::AcquireTimeout(_))));

    // Releasing the held session unblocks the key again.
    held.release();
    tokio_test::assert_ok!(manager.get_connection("host", "netsim", &creds).await);
}

#[tokio::test]
async fn test_discarded_session_frees_capacity() {
    let connector = ScriptedConnector::new();
    let stats = connector.stats();
    let manager = ConnectionManager::builder()
        .max_sessions_per_host(1)
        .acquire_timeout(Duration::from_secs(5))
        .connector(Arc::new(connector))
        .build();
    let creds = netsim_credentials();

    let first = manager.get_connection("host", "netsim", &creds).await.unwrap();
    first.discard().await;

    // The slot freed by the discard admits a brand-new session.
    let second = manager.get_connection("host", "netsim", &creds).await.unwrap();
    assert!(second.session().is_alive().await);
    assert_eq!(stats.sessions_created(), 2);
}

#[tokio::test]
async fn test_blocked_acquire_proceeds_after_release() {
    let connector = ScriptedConnector::new();
    let manager = Arc::new(
        ConnectionManager::builder()
            .max_sessions_per_host(1)
            .acquire_timeout(Duration::from_secs(5))
            .connector(Arc::new(connector))
            .build(),
    );
    let creds = netsim_credentials();

    let held = manager.get_connection("host", "netsim", &creds).await.unwrap();

    let waiter = {
        let manager = Arc::clone(&manager);
        let creds = creds.clone();
        tokio::spawn(async move { manager.get_connection("host", "netsim", &creds).await })
    };

    // Give the waiter time to block on the pool, then free the slot.
    tokio::time::sleep(Duration::from_millis(100)).await;
    held.release();

    let handle = waiter.await.unwrap().unwrap();
    assert!(handle.session().is_alive().await);
}

#[tokio::test]
async fn test_capacity_override_applies_per_host() {
    let manager = ConnectionManager::builder()
        .max_sessions_per_host(10)
        .capacity_for("small-host", 2)
        .connector(Arc::new(ScriptedConnector::new()))
        .build();

    assert_eq!(manager.capacity_for("small-host"), 2);
    assert_eq!(manager.capacity_for("any-other-host"), 10);
}

#[tokio::test]
async fn test_manager_refuses_after_close_all() {
    let manager = manager_with(ScriptedConnector::new(), 2);
    let creds = netsim_credentials();

    let response = run_remote_cmd(&manager, &Command::new("echo hi"), "host", "netsim", &creds)
        .await
        .unwrap();
    assert!(response.ok());

    manager.close_all().await;

    let result = manager.get_connection("host", "netsim", &creds).await;
    assert!(matches!(result, Err(Error::ManagerClosed)));
}
