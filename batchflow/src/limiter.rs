//! Admission control for stage chains.
//!
//! A `ConcurrencyLimiter` holds `n` permits. `run` acquires one before the
//! task starts and gives it back on every exit path, so at most `n` tasks are
//! inside `run` at any instant. Waiters are served by the tokio semaphore's
//! queue, roughly in submission order.

use batchflow_shared::errors::{BatchflowError, BatchflowResult};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Semaphore;

#[derive(Debug, Default)]
struct InFlight {
    current: AtomicUsize,
    high_water: AtomicUsize,
}

/// Decrements the in-flight gauge when dropped, including on cancellation.
struct InFlightGuard<'a> {
    in_flight: &'a InFlight,
}

impl<'a> InFlightGuard<'a> {
    fn enter(in_flight: &'a InFlight) -> Self {
        let now = in_flight.current.fetch_add(1, Ordering::SeqCst) + 1;
        in_flight.high_water.fetch_max(now, Ordering::SeqCst);
        Self { in_flight }
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.in_flight.current.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    permits: usize,
    semaphore: Arc<Semaphore>,
    in_flight: Arc<InFlight>,
}

impl ConcurrencyLimiter {
    /// Create a limiter with `permits` slots. `permits` must be at least 1.
    pub fn new(permits: usize) -> BatchflowResult<Self> {
        if permits == 0 {
            return Err(BatchflowError::Config(
                "concurrency limit must be at least 1".into(),
            ));
        }
        Ok(Self {
            permits,
            semaphore: Arc::new(Semaphore::new(permits)),
            in_flight: Arc::new(InFlight::default()),
        })
    }

    /// Run `task` once a permit is free.
    ///
    /// The permit is released before the task's outcome is returned, whether
    /// it succeeded or failed.
    pub async fn run<F, T>(&self, task: F) -> BatchflowResult<T>
    where
        F: Future<Output = BatchflowResult<T>>,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| BatchflowError::Internal(format!("limiter closed: {}", e)))?;
        let _guard = InFlightGuard::enter(&self.in_flight);
        tracing::trace!(
            in_flight = self.in_flight(),
            permits = self.permits,
            "permit acquired"
        );
        task.await
    }

    pub fn permits(&self) -> usize {
        self.permits
    }

    /// Number of tasks currently inside `run`.
    pub fn in_flight(&self) -> usize {
        self.in_flight.current.load(Ordering::SeqCst)
    }

    /// Highest number of tasks ever observed inside `run` at once.
    pub fn high_water(&self) -> usize {
        self.in_flight.high_water.load(Ordering::SeqCst)
    }

    /// Permits not currently held.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }
}
