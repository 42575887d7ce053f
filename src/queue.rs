//! Bounded worker-pool fan-out over a batch of work items.
//!
//! A [`WorkQueue`] runs a caller-supplied async function over N work items
//! with at most W invocations in flight, one tokio task per item gated by a
//! semaphore. Each item's outcome is recorded on its [`WorkEntry`] as a
//! `Result` — an error return or a panic in the work function marks that
//! entry failed and never aborts the batch or other in-flight items.
//!
//! Entries preserve input order for post-hoc inspection regardless of
//! completion order; there is no ordering guarantee between items assigned
//! to different workers.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Grace period given to aborted tasks after the batch wait timeout.
const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// How one work item failed.
#[derive(Debug)]
pub enum WorkError<E> {
    /// The work function returned an error.
    Task(E),
    /// The work function panicked; the payload is the panic message.
    Panic(String),
}

impl<E: std::fmt::Display> std::fmt::Display for WorkError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkError::Task(e) => write!(f, "task failed: {}", e),
            WorkError::Panic(msg) => write!(f, "task panicked: {}", msg),
        }
    }
}

impl<E: std::fmt::Display + std::fmt::Debug> std::error::Error for WorkError<E> {}

/// One work item paired with its eventual outcome.
#[derive(Debug)]
pub struct WorkEntry<I, T, E> {
    /// The input item.
    pub item: I,
    outcome: Option<Result<T, WorkError<E>>>,
}

impl<I, T, E> WorkEntry<I, T, E> {
    /// `true` once a worker has recorded an outcome for this item.
    ///
    /// Only `false` when the batch wait timeout elapsed before the item's
    /// task completed.
    pub fn finished(&self) -> bool {
        self.outcome.is_some()
    }

    /// The success value, if the item succeeded.
    pub fn result(&self) -> Option<&T> {
        match &self.outcome {
            Some(Ok(value)) => Some(value),
            _ => None,
        }
    }

    /// The failure, if the item failed.
    pub fn error(&self) -> Option<&WorkError<E>> {
        match &self.outcome {
            Some(Err(error)) => Some(error),
            _ => None,
        }
    }

    /// The full outcome.
    pub fn outcome(&self) -> Option<&Result<T, WorkError<E>>> {
        self.outcome.as_ref()
    }

    /// Consume the entry, yielding the item and its outcome.
    pub fn into_parts(self) -> (I, Option<Result<T, WorkError<E>>>) {
        (self.item, self.outcome)
    }
}

/// A reusable bounded worker pool.
///
/// The queue itself is just policy (worker count and timeouts);
/// [`execute`](WorkQueue::execute) may be called repeatedly with different
/// item sets.
#[derive(Debug, Clone)]
pub struct WorkQueue {
    num_workers: usize,
    wait_timeout: Option<Duration>,
    join_timeout: Duration,
}

impl WorkQueue {
    /// Create a queue running at most `num_workers` items concurrently.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers: num_workers.max(1),
            wait_timeout: None,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
        }
    }

    /// Bound the total wall-clock time of one `execute` call. Items still
    /// running at the deadline are aborted and left unfinished.
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = Some(timeout);
        self
    }

    /// Grace period given to aborted tasks to settle after the wait timeout.
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Configured worker count.
    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Run `func` over `items` with bounded concurrency.
    ///
    /// Returns one entry per item, in input order, each carrying the item's
    /// outcome. Failures are per-item: an `Err` or panic from `func` is
    /// recorded on that entry and the rest of the batch proceeds.
    pub async fn execute<I, T, E, F, Fut>(&self, items: Vec<I>, func: F) -> Vec<WorkEntry<I, T, E>>
    where
        I: Clone + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        if items.is_empty() {
            return Vec::new();
        }

        // No point holding more permits than there are items.
        let workers = self.num_workers.min(items.len());
        let semaphore = Arc::new(Semaphore::new(workers));
        let func = Arc::new(func);

        debug!(
            items = %items.len(),
            workers = %workers,
            wait_timeout = ?self.wait_timeout,
            "Dispatching work batch"
        );

        let slots: Vec<Arc<Mutex<Option<Result<T, WorkError<E>>>>>> =
            (0..items.len()).map(|_| Arc::new(Mutex::new(None))).collect();

        let mut handles = Vec::with_capacity(items.len());
        for (item, slot) in items.iter().cloned().zip(slots.iter().cloned()) {
            let func = Arc::clone(&func);
            let semaphore = Arc::clone(&semaphore);
            handles.push(tokio::spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("Semaphore should not be closed");
                let outcome = func(item).await.map_err(WorkError::Task);
                *slot.lock() = Some(outcome);
            }));
        }

        let deadline = self
            .wait_timeout
            .map(|timeout| tokio::time::Instant::now() + timeout);

        for (index, mut handle) in handles.into_iter().enumerate() {
            let joined = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, &mut handle).await {
                    Ok(joined) => joined,
                    Err(_) => {
                        handle.abort();
                        let _ = tokio::time::timeout(self.join_timeout, &mut handle).await;
                        warn!(index = %index, "Work item unfinished at wait timeout; aborted");
                        continue;
                    }
                },
                None => (&mut handle).await,
            };

            if let Err(join_error) = joined {
                if join_error.is_panic() {
                    // The work function blew up before recording an outcome;
                    // pin the panic on this entry instead of propagating it.
                    *slots[index].lock() = Some(Err(WorkError::Panic(join_error.to_string())));
                }
            }
        }

        items
            .into_iter()
            .zip(slots)
            .map(|(item, slot)| WorkEntry {
                item,
                outcome: slot.lock().take(),
            })
            .collect()
    }
}
