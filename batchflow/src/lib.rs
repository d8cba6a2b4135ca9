//! Bounded-concurrency stage pipeline with a batched sink.
//!
//! ```text
//! Orchestrator ──→ ConcurrencyLimiter (C permits)
//!                      │
//!                      ├─→ StageChain: fetch → transform → sink-write ─┐
//!                      ├─→ StageChain: fetch → transform → sink-write ─┼─→ BatchedSink ──→ BatchWriter
//!                      └─→ ...                                         ┘   (flush at B items)
//! ```
//!
//! After every chain completes, the orchestrator issues one explicit flush to
//! drain a partial batch.

pub mod config;
pub mod limiter;
pub mod logging;
pub mod metrics;
pub mod orchestrator;
pub mod pipeline;
pub mod sink;
pub mod stages;
pub mod types;

pub use batchflow_shared::errors::{BatchflowError, BatchflowResult};
pub use config::{FailurePolicy, PipelineOptions, StageLatencies};
pub use limiter::ConcurrencyLimiter;
pub use logging::init_logging;
pub use metrics::{RunMetrics, RunMetricsStorage};
pub use orchestrator::{ItemOutcome, Orchestrator, RunContext, RunReport, run_reference};
pub use pipeline::{BoxedStage, ChainMetrics, ChainOutput, PipelineStage, StageChain, StageKind};
pub use sink::{
    Batch, BatchWriter, BatchedSink, EnqueueAck, FlushReport, FlushTrigger, MemoryWriter,
};
pub use types::WorkItem;
