//! Per-item stage chain.
//!
//! This module provides the per-item processing infrastructure:
//! - Stages tagged as blocking or suspending
//! - A fixed fetch → transform → sink-write chain run once per item
//! - Per-stage timing and an optional per-stage timeout
//! - A logging decorator that wraps any stage without changing its contract
//!
//! ## Architecture
//!
//! ```text
//! StageChain → [fetch, transform, sink_write] → ChainOutput
//!
//! - StageChain: Runs the three stages strictly in order for one item
//! - PipelineStage: One step, receives the item and the shared run context
//! - Logged: Decorator emitting entry/exit events around a stage
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use batchflow::pipeline::{StageChain, logged};
//!
//! let chain = StageChain::new(
//!     Box::new(logged(FetchStage::new(prepare, wait))),
//!     Box::new(TransformStage::new(parse)),
//!     Box::new(SinkWriteStage),
//! );
//! let output = chain.process(WorkItem::new(7), ctx).await?;
//! println!("item took {}ms", output.metrics.total_duration_ms);
//! ```

mod logged;
mod metrics;
#[allow(clippy::module_inception)]
mod pipeline;
mod stage;

pub use logged::{Logged, logged};
pub use metrics::{ChainMetrics, StageMetrics};
pub use pipeline::{ChainOutput, StageChain};
pub use stage::{BoxedStage, PipelineStage, StageKind};
