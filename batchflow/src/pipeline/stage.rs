//! Stage definition for the per-item chain.

use crate::types::WorkItem;
use async_trait::async_trait;
use batchflow_shared::errors::BatchflowResult;
use serde::Serialize;
use std::fmt;

/// How a stage spends its time.
///
/// On a single-threaded scheduler this decides whether other admitted items
/// can progress while the stage runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Occupies the worker for its whole duration. Nothing else on the same
    /// cooperative scheduler runs meanwhile.
    Blocking,
    /// Yields to the scheduler while waiting, letting other items progress.
    Suspending,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::Blocking => write!(f, "blocking"),
            StageKind::Suspending => write!(f, "suspending"),
        }
    }
}

/// One step of per-item processing.
///
/// Stages are shared by every concurrently running chain, so `run` takes
/// `&self`. The run context is cloned per stage invocation.
#[async_trait]
pub trait PipelineStage<Ctx: Send + 'static>: Send + Sync {
    /// Process one item and hand it to the next stage.
    async fn run(&self, item: WorkItem, ctx: Ctx) -> BatchflowResult<WorkItem>;

    /// Get human-readable stage name for logging and metrics.
    fn name(&self) -> &str;

    fn kind(&self) -> StageKind;
}

pub type BoxedStage<Ctx> = Box<dyn PipelineStage<Ctx>>;
