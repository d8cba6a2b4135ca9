//! Error types for batchflow.

use thiserror::Error;

/// Result alias used across batchflow.
pub type BatchflowResult<T> = Result<T, BatchflowError>;

/// Errors raised by stages, the batched sink and the orchestrator.
#[derive(Debug, Error)]
pub enum BatchflowError {
    /// Invalid configuration (zero concurrency, zero batch size, bad config file).
    #[error("configuration error: {0}")]
    Config(String),

    /// A single stage failed for a single item.
    #[error("stage '{stage}' failed for item {item}: {message}")]
    Stage {
        stage: String,
        item: u64,
        message: String,
    },

    /// A stage did not finish within the configured timeout.
    #[error("stage '{stage}' timed out after {timeout_ms}ms for item {item}")]
    StageTimeout {
        stage: String,
        item: u64,
        timeout_ms: u64,
    },

    /// The bulk write of a batch failed. Queued items are kept.
    #[error("flush of {batch_len} items failed: {message}")]
    Flush { batch_len: usize, message: String },

    /// The sink queue was observed above its batch size without a flush in between.
    #[error("sink queue holds {len} items, above batch size {batch_size}")]
    CapacityViolation { len: usize, batch_size: usize },

    #[error("internal error: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl BatchflowError {
    /// Whether this error is local to one item's stage chain.
    pub fn is_stage_failure(&self) -> bool {
        matches!(
            self,
            BatchflowError::Stage { .. } | BatchflowError::StageTimeout { .. }
        )
    }
}
