//! Bounded session pool for one (host, user, identity) key.
//!
//! Slot accounting is a `tokio::sync::Semaphore` with `capacity` permits:
//! acquire takes a permit (waiting, bounded by the acquire timeout, until a
//! holder releases or discards), then either pops a live idle session or
//! authenticates a new one. The permit travels inside the returned
//! [`SessionHandle`], so a slot is freed on every exit path — including
//! panics — when the handle drops.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use super::{Connector, Credentials, PoolKey, Session};
use crate::error::{Error, Result};

/// Configuration for one session pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of live sessions (busy + idle) for the key.
    pub capacity: usize,
    /// How long an acquire may wait for a slot before giving up.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            acquire_timeout: Duration::from_secs(120),
        }
    }
}

/// A bounded set of authenticated sessions for one pool key.
pub struct SessionPool {
    key: PoolKey,
    credentials: Credentials,
    capacity: usize,
    acquire_timeout: Duration,
    /// capacity - busy permits remain available; waiters queue here.
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<Arc<dyn Session>>>,
    /// Live sessions (busy + idle). Always <= capacity.
    open: AtomicUsize,
    connector: Arc<dyn Connector>,
    closed: AtomicBool,
}

impl SessionPool {
    /// Create a pool for `key`. Capacity is fixed for the pool's lifetime.
    pub fn new(
        key: PoolKey,
        credentials: Credentials,
        config: PoolConfig,
        connector: Arc<dyn Connector>,
    ) -> Arc<Self> {
        let capacity = config.capacity.max(1);
        debug!(key = %key, capacity = %capacity, "Creating session pool");
        Arc::new(Self {
            key,
            credentials,
            capacity,
            acquire_timeout: config.acquire_timeout,
            permits: Arc::new(Semaphore::new(capacity)),
            idle: Mutex::new(Vec::new()),
            open: AtomicUsize::new(0),
            connector,
            closed: AtomicBool::new(false),
        })
    }

    /// The key this pool serves.
    pub fn key(&self) -> &PoolKey {
        &self.key
    }

    /// Maximum number of live sessions.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of live sessions (busy + idle).
    pub fn open_sessions(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }

    /// Number of sessions currently idle.
    pub fn idle_sessions(&self) -> usize {
        self.idle.lock().len()
    }

    /// Acquire a session, blocking until a slot frees or the timeout elapses.
    ///
    /// Prefers an idle session; dead idle sessions found during checkout are
    /// closed out and replaced. Creating a session that fails to
    /// authenticate is a hard error surfaced immediately — the slot is
    /// released and no retry is attempted.
    pub async fn acquire(self: &Arc<Self>) -> Result<SessionHandle> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::ManagerClosed);
        }

        let permit = match tokio::time::timeout(
            self.acquire_timeout,
            Arc::clone(&self.permits).acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(Error::ManagerClosed),
            Err(_) => {
                warn!(key = %self.key, timeout = ?self.acquire_timeout, "No session slot freed in time");
                return Err(Error::AcquireTimeout(self.acquire_timeout));
            }
        };

        // Reuse an idle session if a live one is available.
        loop {
            let candidate = self.idle.lock().pop();
            let Some(session) = candidate else { break };

            if session.is_alive().await {
                debug!(key = %self.key, "Reusing idle session from pool");
                return Ok(SessionHandle::new(session, permit, Arc::clone(self)));
            }

            // Dead connection found in the idle set: close it out and keep looking.
            self.open.fetch_sub(1, Ordering::SeqCst);
            let _ = session.close().await;
            warn!(key = %self.key, "Dropped dead idle session");
        }

        // Holding a permit with no idle session means open < capacity,
        // so there is room to create one.
        debug!(key = %self.key, "Creating new session");
        let session = self
            .connector
            .connect(&self.key.host, &self.key.user, &self.credentials)
            .await?;

        self.open.fetch_add(1, Ordering::SeqCst);
        info!(
            key = %self.key,
            open = %self.open.load(Ordering::SeqCst),
            capacity = %self.capacity,
            "Session created and checked out"
        );
        Ok(SessionHandle::new(session, permit, Arc::clone(self)))
    }

    /// Close every idle session and refuse further acquires.
    ///
    /// Sessions currently checked out are closed when their handles are
    /// discarded or dropped back into the (now closed) pool.
    pub async fn close_all(&self) {
        self.closed.store(true, Ordering::SeqCst);

        let drained: Vec<Arc<dyn Session>> = {
            let mut idle = self.idle.lock();
            idle.drain(..).collect()
        };

        for session in drained {
            self.open.fetch_sub(1, Ordering::SeqCst);
            if let Err(e) = session.close().await {
                warn!(key = %self.key, error = %e, "Error closing pooled session");
            }
        }
        info!(key = %self.key, "Session pool closed");
    }

    fn return_to_idle(&self, session: Arc<dyn Session>) {
        if self.closed.load(Ordering::SeqCst) {
            // Pool already shut down; count the session out. Closing the
            // transport is left to the session's own drop.
            self.open.fetch_sub(1, Ordering::SeqCst);
            return;
        }
        debug!(key = %self.key, "Session released back to pool");
        self.idle.lock().push(session);
    }
}

impl std::fmt::Debug for SessionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionPool")
            .field("key", &self.key)
            .field("capacity", &self.capacity)
            .field("open", &self.open.load(Ordering::SeqCst))
            .field("idle", &self.idle.lock().len())
            .finish()
    }
}

/// An exclusively-owned checkout of one pooled session.
///
/// Dropping the handle returns the session to the idle set and frees the
/// slot, waking one waiter. Call [`discard`](SessionHandle::discard) instead
/// when the session must not be reused (closed, broken, or timed out).
pub struct SessionHandle {
    session: Arc<dyn Session>,
    pool: Arc<SessionPool>,
    // Present until the handle is disposed; dropping it frees the slot.
    _permit: OwnedSemaphorePermit,
    disposed: bool,
}

impl SessionHandle {
    fn new(session: Arc<dyn Session>, permit: OwnedSemaphorePermit, pool: Arc<SessionPool>) -> Self {
        Self {
            session,
            pool,
            _permit: permit,
            disposed: false,
        }
    }

    /// The checked-out session.
    pub fn session(&self) -> &Arc<dyn Session> {
        &self.session
    }

    /// Return the session to the pool's idle set.
    ///
    /// Equivalent to dropping the handle; provided for explicitness at call
    /// sites that branch between release and discard.
    pub fn release(self) {
        drop(self);
    }

    /// Close the session and remove it from the pool permanently.
    ///
    /// The freed slot wakes one waiter, which will authenticate a
    /// replacement session on demand.
    pub async fn discard(mut self) {
        self.disposed = true;
        self.pool.open.fetch_sub(1, Ordering::SeqCst);
        debug!(key = %self.pool.key, "Discarding session");
        let _ = self.session.close().await;
        // Permit drops with self, freeing the slot.
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if !self.disposed {
            self.pool.return_to_idle(Arc::clone(&self.session));
        }
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session", &self.session.identifier())
            .field("pool", &self.pool.key)
            .finish()
    }
}
