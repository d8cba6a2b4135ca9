//! Bulk write backends for the batched sink.

use crate::types::WorkItem;
use async_trait::async_trait;
use batchflow_shared::errors::{BatchflowError, BatchflowResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// What caused a flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushTrigger {
    /// Queue reached batch size inside `enqueue`.
    Auto,
    /// Explicit `flush()` call, e.g. end-of-run drain.
    Manual,
}

/// A group of items written as one atomic bulk operation.
#[derive(Debug, Clone, Serialize)]
pub struct Batch {
    /// Sequence number of the batch within its sink, starting at 0.
    pub seq: u64,
    pub items: Vec<WorkItem>,
    pub trigger: FlushTrigger,
    pub flushed_at: DateTime<Utc>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Destination of flushed batches.
///
/// A write is all-or-nothing: on error the sink keeps every item queued.
#[async_trait]
pub trait BatchWriter: Send + Sync {
    async fn write_batch(&self, batch: &Batch) -> BatchflowResult<()>;
}

/// In-memory writer with a fixed simulated write latency.
///
/// Keeps every written batch so callers can check what was persisted.
/// Contents are volatile and lost with the process.
#[derive(Debug, Default)]
pub struct MemoryWriter {
    latency: Duration,
    batches: Mutex<Vec<Batch>>,
    fail_next: AtomicUsize,
}

impl MemoryWriter {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            batches: Mutex::new(Vec::new()),
            fail_next: AtomicUsize::new(0),
        }
    }

    /// Make the next `count` writes fail without persisting anything.
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Every batch written so far, in write order.
    pub fn batches(&self) -> Vec<Batch> {
        self.batches.lock().clone()
    }

    /// Every persisted item, in write order.
    pub fn written_items(&self) -> Vec<WorkItem> {
        self.batches
            .lock()
            .iter()
            .flat_map(|batch| batch.items.iter().copied())
            .collect()
    }
}

#[async_trait]
impl BatchWriter for MemoryWriter {
    async fn write_batch(&self, batch: &Batch) -> BatchflowResult<()> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let injected = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(BatchflowError::Flush {
                batch_len: batch.len(),
                message: "injected write failure".into(),
            });
        }

        self.batches.lock().push(batch.clone());
        Ok(())
    }
}
