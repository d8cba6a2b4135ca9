//! Batched sink shared by every stage chain of a run.
//!
//! ## Locking
//!
//! One `tokio::sync::Mutex` guards the queue. `enqueue` appends, checks the
//! threshold and, when the queue is full, performs the bulk write all inside
//! a single acquisition. `flush` takes the same lock. There is no second
//! unlocked write path, so exactly one flush fires per full crossing and the
//! queue is empty once it returns.
//!
//! The lock is held across the write, so enqueuers arriving during a flush
//! wait for it to finish. The queue is cleared only after the writer reports
//! success; a failed or cancelled write leaves every item queued.
//!
//! ```text
//! enqueue(item)
//!   lock ─→ push ─→ len < B ? ─yes─→ unlock
//!                     │ no
//!                     └─→ write_batch ─ok─→ clear ─→ unlock
//!                              └─err─→ keep items, retry on next enqueue/flush ─→ unlock
//! ```

mod writer;

pub use writer::{Batch, BatchWriter, FlushTrigger, MemoryWriter};

use crate::metrics::RunMetricsStorage;
use crate::types::WorkItem;
use batchflow_shared::errors::{BatchflowError, BatchflowResult};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;

/// Outcome of one successful flush.
#[derive(Debug, Clone, Serialize)]
pub struct FlushReport {
    pub seq: u64,
    pub trigger: FlushTrigger,
    pub items: usize,
    pub duration_ms: u128,
}

/// Acknowledgment of an accepted item.
#[derive(Debug, Clone, Serialize)]
pub struct EnqueueAck {
    pub item: WorkItem,
    /// Queue length once this enqueue returned.
    pub queued: usize,
    /// Set when this enqueue triggered a successful auto-flush.
    pub flushed: Option<FlushReport>,
    /// Set when the auto-flush failed and the items stay queued for retry.
    pub flush_deferred: bool,
}

struct SinkState {
    queue: Vec<WorkItem>,
    /// Last flush attempt failed; the queue may sit at or above batch size.
    retry_pending: bool,
    next_seq: u64,
}

pub struct BatchedSink {
    batch_size: usize,
    state: Mutex<SinkState>,
    writer: Arc<dyn BatchWriter>,
    metrics: Arc<RunMetricsStorage>,
}

impl BatchedSink {
    pub fn new(batch_size: usize, writer: Arc<dyn BatchWriter>) -> BatchflowResult<Self> {
        Self::with_metrics(batch_size, writer, Arc::new(RunMetricsStorage::new()))
    }

    /// Create a sink that reports into an existing metrics storage.
    pub fn with_metrics(
        batch_size: usize,
        writer: Arc<dyn BatchWriter>,
        metrics: Arc<RunMetricsStorage>,
    ) -> BatchflowResult<Self> {
        if batch_size == 0 {
            return Err(BatchflowError::Config(
                "batch_size must be at least 1".into(),
            ));
        }
        Ok(Self {
            batch_size,
            state: Mutex::new(SinkState {
                queue: Vec::with_capacity(batch_size),
                retry_pending: false,
                next_seq: 0,
            }),
            writer,
            metrics,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn metrics(&self) -> &Arc<RunMetricsStorage> {
        &self.metrics
    }

    /// Number of items waiting for a flush.
    pub async fn len(&self) -> usize {
        self.state.lock().await.queue.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Append `item`, flushing in the same critical section once the queue
    /// reaches batch size.
    ///
    /// A failed auto-flush does not reject the item: it is accepted, logged,
    /// and written by the next successful flush. Returns
    /// `CapacityViolation` if the queue is found full with no failed flush
    /// to explain it.
    pub async fn enqueue(&self, item: WorkItem) -> BatchflowResult<EnqueueAck> {
        let mut state = self.state.lock().await;

        if state.queue.len() >= self.batch_size && !state.retry_pending {
            tracing::error!(
                len = state.queue.len(),
                batch_size = self.batch_size,
                "Sink queue above batch size without a flush"
            );
            return Err(BatchflowError::CapacityViolation {
                len: state.queue.len(),
                batch_size: self.batch_size,
            });
        }

        state.queue.push(item);
        let queued = state.queue.len();
        tracing::trace!(item = %item, queued, "Item queued");

        if queued < self.batch_size {
            return Ok(EnqueueAck {
                item,
                queued,
                flushed: None,
                flush_deferred: false,
            });
        }

        tracing::debug!(queued, batch_size = self.batch_size, "Sink queue full");
        match self.flush_locked(&mut state, FlushTrigger::Auto).await {
            Ok(report) => Ok(EnqueueAck {
                item,
                queued: state.queue.len(),
                flushed: Some(report),
                flush_deferred: false,
            }),
            Err(e) => {
                tracing::warn!(
                    item = %item,
                    pending = state.queue.len(),
                    error = %e,
                    "Auto-flush failed, keeping items queued"
                );
                Ok(EnqueueAck {
                    item,
                    queued: state.queue.len(),
                    flushed: None,
                    flush_deferred: true,
                })
            }
        }
    }

    /// Write out whatever is queued.
    ///
    /// Returns `Ok(None)` on an empty queue without touching any state
    /// besides the empty-flush counter. A failed write is returned as a
    /// `Flush` error and the items stay queued.
    pub async fn flush(&self) -> BatchflowResult<Option<FlushReport>> {
        let mut state = self.state.lock().await;

        if state.queue.is_empty() {
            RunMetricsStorage::increment(&self.metrics.empty_flushes);
            tracing::debug!("Flush requested on empty queue");
            return Ok(None);
        }

        self.flush_locked(&mut state, FlushTrigger::Manual)
            .await
            .map(Some)
    }

    /// Bulk write of the current queue. Caller must hold the state lock.
    async fn flush_locked(
        &self,
        state: &mut SinkState,
        trigger: FlushTrigger,
    ) -> BatchflowResult<FlushReport> {
        let batch = Batch {
            seq: state.next_seq,
            items: state.queue.clone(),
            trigger,
            flushed_at: Utc::now(),
        };
        let batch_len = batch.len();
        let start = Instant::now();

        tracing::info!(seq = batch.seq, items = batch_len, ?trigger, "Flushing batch");

        if let Err(e) = self.writer.write_batch(&batch).await {
            state.retry_pending = true;
            RunMetricsStorage::increment(&self.metrics.flush_failures);
            return Err(match e {
                BatchflowError::Flush { .. } => e,
                other => BatchflowError::Flush {
                    batch_len,
                    message: other.to_string(),
                },
            });
        }

        state.queue.clear();
        state.retry_pending = false;
        state.next_seq += 1;

        let counter = match trigger {
            FlushTrigger::Auto => &self.metrics.auto_flushes,
            FlushTrigger::Manual => &self.metrics.manual_flushes,
        };
        RunMetricsStorage::increment(counter);
        RunMetricsStorage::add(&self.metrics.items_flushed, batch_len as u64);

        let report = FlushReport {
            seq: batch.seq,
            trigger,
            items: batch_len,
            duration_ms: start.elapsed().as_millis(),
        };
        tracing::debug!(seq = report.seq, duration_ms = report.duration_ms as u64, "Batch flushed");
        Ok(report)
    }

    #[cfg(test)]
    async fn force_queue(&self, items: Vec<WorkItem>) {
        self.state.lock().await.queue = items;
    }
}
