//! Call-logging decorator for stages.

use super::stage::{PipelineStage, StageKind};
use crate::types::WorkItem;
use async_trait::async_trait;
use batchflow_shared::errors::BatchflowResult;
use std::time::Instant;

/// Wraps a stage and logs its entry and exit.
///
/// Same name, kind and result as the wrapped stage.
pub struct Logged<S> {
    inner: S,
}

/// Wrap `stage` with entry/exit logging.
pub fn logged<S>(stage: S) -> Logged<S> {
    Logged { inner: stage }
}

#[async_trait]
impl<Ctx, S> PipelineStage<Ctx> for Logged<S>
where
    Ctx: Send + 'static,
    S: PipelineStage<Ctx>,
{
    async fn run(&self, item: WorkItem, ctx: Ctx) -> BatchflowResult<WorkItem> {
        let stage = self.inner.name();
        let start = Instant::now();
        tracing::info!(stage, item = %item, kind = %self.inner.kind(), "Invoking stage");

        let result = self.inner.run(item, ctx).await;
        let elapsed_ms = start.elapsed().as_millis() as u64;

        match &result {
            Ok(output) => {
                tracing::info!(stage, item = %item, elapsed_ms, returned = %output, "Stage returned")
            }
            Err(e) => {
                tracing::warn!(stage, item = %item, elapsed_ms, error = %e, "Stage failed")
            }
        }
        result
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn kind(&self) -> StageKind {
        self.inner.kind()
    }
}
