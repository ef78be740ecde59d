//! Request context and the bounded worker pool.
//!
//! - `RequestContext` carries a correlation id and a cancellation token across
//!   port calls.
//! - `WorkerPool` runs fire-and-forget background work with bounded
//!   concurrency; the index scheduler drains its per-entity-type lanes on it.

use crate::{ErrorClass, ErrorCode, ErrorEnvelope, Result};
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use tokio::sync::{Semaphore, oneshot};
use tokio_util::task::TaskTracker;

/// A correlation identifier used for logging and telemetry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(Arc<str>);

impl CorrelationId {
    /// Parse a correlation identifier, trimming whitespace.
    pub fn parse(value: impl AsRef<str>) -> Result<Self> {
        let trimmed = value.as_ref().trim();
        if trimmed.is_empty() {
            return Err(ErrorEnvelope::expected(
                ErrorCode::invalid_input(),
                "correlationId must be non-empty",
            ));
        }
        Ok(Self(Arc::from(trimmed)))
    }

    /// Process-unique `req_N` identifier.
    #[must_use]
    pub fn new_request_id() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        let n = NEXT.fetch_add(1, Ordering::Relaxed);
        Self(Arc::from(format!("req_{n}")))
    }

    /// Borrow the identifier as a string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

/// A clonable cancellation token that can be awaited.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(tokio_util::sync::CancellationToken);

impl CancellationToken {
    /// Create a token in the non-cancelled state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the token, waking every waiter.
    pub fn cancel(&self) {
        self.0.cancel();
    }

    /// Returns true once cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.is_cancelled()
    }

    /// Wait until the token is cancelled.
    pub async fn cancelled(&self) {
        self.0.cancelled().await;
    }

    /// A token cancelled together with this one, but cancellable on its own.
    #[must_use]
    pub fn child(&self) -> Self {
        Self(self.0.child_token())
    }
}

/// Request-scoped context passed across boundaries.
#[derive(Debug, Clone)]
pub struct RequestContext {
    correlation_id: CorrelationId,
    cancellation: CancellationToken,
}

impl RequestContext {
    /// Context with a fresh cancellation token.
    #[must_use]
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self::with_cancellation(correlation_id, CancellationToken::new())
    }

    /// Context with an auto-generated `req_*` id.
    #[must_use]
    pub fn new_request() -> Self {
        Self::new(CorrelationId::new_request_id())
    }

    /// Context sharing an existing cancellation token.
    #[must_use]
    pub const fn with_cancellation(
        correlation_id: CorrelationId,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            correlation_id,
            cancellation,
        }
    }

    /// Same correlation id, child cancellation token.
    #[must_use]
    pub fn child(&self) -> Self {
        Self::with_cancellation(self.correlation_id.clone(), self.cancellation.child())
    }

    /// Return the correlation id.
    #[must_use]
    pub const fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// Return a clone of the cancellation token.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Returns true if the request was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Cancel this request.
    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Await cancellation.
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await;
    }

    /// Fail with a cancellation error tagged with `operation` when cancelled.
    pub fn ensure_not_cancelled(&self, operation: &'static str) -> Result<()> {
        if self.is_cancelled() {
            return Err(ErrorEnvelope::cancelled("operation cancelled")
                .with_metadata("operation", operation));
        }
        Ok(())
    }
}

/// Bounded pool for background work.
///
/// At most `concurrency` tasks run at once; further tasks wait for a permit.
/// Must be used from within a tokio runtime.
#[derive(Debug, Clone)]
pub struct WorkerPool {
    inner: Arc<PoolInner>,
}

#[derive(Debug)]
struct PoolInner {
    concurrency: usize,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    running: AtomicUsize,
    closed: AtomicBool,
}

struct RunningGuard<'a>(&'a AtomicUsize);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WorkerPool {
    /// Create a pool running at most `concurrency` tasks at once.
    pub fn new(concurrency: usize) -> Result<Self> {
        if concurrency == 0 {
            return Err(ErrorEnvelope::expected(
                ErrorCode::invalid_input(),
                "concurrency must be a positive number",
            ));
        }
        Ok(Self {
            inner: Arc::new(PoolInner {
                concurrency,
                permits: Arc::new(Semaphore::new(concurrency)),
                tracker: TaskTracker::new(),
                running: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Configured concurrency.
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.inner.concurrency
    }

    /// Tasks currently holding a permit.
    #[must_use]
    pub fn running(&self) -> usize {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Tasks spawned and not yet finished, waiting ones included.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.tracker.len()
    }

    /// Returns true after [`WorkerPool::shutdown`] started.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Spawn a task and return immediately.
    pub fn spawn<F>(&self, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.is_closed() {
            return Err(pool_closed());
        }
        let inner = Arc::clone(&self.inner);
        self.inner.tracker.spawn(async move {
            let Ok(_permit) = Arc::clone(&inner.permits).acquire_owned().await else {
                return;
            };
            inner.running.fetch_add(1, Ordering::SeqCst);
            let _guard = RunningGuard(&inner.running);
            task.await;
        });
        Ok(())
    }

    /// Run a task on the pool and wait for its output.
    pub async fn submit<T, F>(&self, task: F) -> Result<T>
    where
        T: Send + 'static,
        F: Future<Output = T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.spawn(async move {
            let _ = tx.send(task.await);
        })?;
        rx.await.map_err(|_| {
            ErrorEnvelope::unexpected(
                ErrorCode::internal(),
                "worker task dropped before completing",
                ErrorClass::NonRetriable,
            )
        })
    }

    /// Stop accepting tasks and wait for spawned ones to finish.
    pub async fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.inner.tracker.close();
        self.inner.tracker.wait().await;
    }
}

fn pool_closed() -> ErrorEnvelope {
    ErrorEnvelope::expected(
        ErrorCode::new("core", "worker_pool_closed"),
        "worker pool is shut down",
    )
}
