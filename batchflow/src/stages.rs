//! Simulated stage bodies.
//!
//! Fixed-duration waits stand in for real I/O. Each stage declares whether
//! it blocks the worker or suspends.

use crate::config::PipelineOptions;
use crate::orchestrator::RunContext;
use crate::pipeline::{PipelineStage, StageChain, StageKind, logged};
use crate::types::WorkItem;
use async_trait::async_trait;
use batchflow_shared::errors::{BatchflowError, BatchflowResult};
use std::collections::HashSet;
use std::time::Duration;

/// Spend `duration` the way `kind` says.
///
/// `Blocking` sleeps the OS thread, so nothing else on a single-threaded
/// runtime runs meanwhile. `Suspending` awaits a timer.
pub async fn occupy(kind: StageKind, duration: Duration) {
    if duration.is_zero() {
        return;
    }
    match kind {
        StageKind::Blocking => std::thread::sleep(duration),
        StageKind::Suspending => tokio::time::sleep(duration).await,
    }
}

fn injected_failure(stage: &str, item: WorkItem) -> BatchflowError {
    BatchflowError::Stage {
        stage: stage.to_string(),
        item: item.id(),
        message: "injected failure".into(),
    }
}

/// Fetch: prepares the request on the worker, then waits on the response.
///
/// Kind: `Suspending`, since the response wait yields. The prepare portion
/// still occupies the worker.
#[derive(Debug, Clone, Default)]
pub struct FetchStage {
    prepare: Duration,
    wait: Duration,
    failing: HashSet<u64>,
}

impl FetchStage {
    pub fn new(prepare: Duration, wait: Duration) -> Self {
        Self {
            prepare,
            wait,
            failing: HashSet::new(),
        }
    }

    /// Fail for the given item ids after the prepare portion.
    pub fn failing_on(mut self, ids: impl IntoIterator<Item = u64>) -> Self {
        self.failing.extend(ids);
        self
    }
}

#[async_trait]
impl<Ctx: Send + 'static> PipelineStage<Ctx> for FetchStage {
    async fn run(&self, item: WorkItem, _ctx: Ctx) -> BatchflowResult<WorkItem> {
        occupy(StageKind::Blocking, self.prepare).await;
        if self.failing.contains(&item.id()) {
            return Err(injected_failure("fetch", item));
        }
        occupy(StageKind::Suspending, self.wait).await;
        Ok(item)
    }

    fn name(&self) -> &str {
        "fetch"
    }

    fn kind(&self) -> StageKind {
        StageKind::Suspending
    }
}

/// Transform: parses on the worker. Kind: `Blocking`.
#[derive(Debug, Clone, Default)]
pub struct TransformStage {
    parse: Duration,
}

impl TransformStage {
    pub fn new(parse: Duration) -> Self {
        Self { parse }
    }
}

#[async_trait]
impl<Ctx: Send + 'static> PipelineStage<Ctx> for TransformStage {
    async fn run(&self, item: WorkItem, _ctx: Ctx) -> BatchflowResult<WorkItem> {
        occupy(StageKind::Blocking, self.parse).await;
        Ok(item)
    }

    fn name(&self) -> &str {
        "transform"
    }

    fn kind(&self) -> StageKind {
        StageKind::Blocking
    }
}

/// Sink-write: hands the item to the run's batched sink.
///
/// Kind: `Suspending`. It may wait on the sink lock and on a flush.
#[derive(Debug, Clone, Copy, Default)]
pub struct SinkWriteStage;

#[async_trait]
impl PipelineStage<RunContext> for SinkWriteStage {
    async fn run(&self, item: WorkItem, ctx: RunContext) -> BatchflowResult<WorkItem> {
        let ack = ctx.sink.enqueue(item).await?;
        if let Some(report) = &ack.flushed {
            tracing::debug!(
                run_id = %ctx.run_id,
                item = %item,
                seq = report.seq,
                "Enqueue triggered flush"
            );
        }
        Ok(ack.item)
    }

    fn name(&self) -> &str {
        "sink_write"
    }

    fn kind(&self) -> StageKind {
        StageKind::Suspending
    }
}

/// Configurable stage used to force either kind.
#[derive(Debug, Clone)]
pub struct SimulatedStage {
    name: String,
    kind: StageKind,
    duration: Duration,
    failing: HashSet<u64>,
}

impl SimulatedStage {
    pub fn new(name: impl Into<String>, kind: StageKind, duration: Duration) -> Self {
        Self {
            name: name.into(),
            kind,
            duration,
            failing: HashSet::new(),
        }
    }

    pub fn blocking(name: impl Into<String>, duration: Duration) -> Self {
        Self::new(name, StageKind::Blocking, duration)
    }

    pub fn suspending(name: impl Into<String>, duration: Duration) -> Self {
        Self::new(name, StageKind::Suspending, duration)
    }

    pub fn failing_on(mut self, ids: impl IntoIterator<Item = u64>) -> Self {
        self.failing.extend(ids);
        self
    }
}

#[async_trait]
impl<Ctx: Send + 'static> PipelineStage<Ctx> for SimulatedStage {
    async fn run(&self, item: WorkItem, _ctx: Ctx) -> BatchflowResult<WorkItem> {
        occupy(self.kind, self.duration).await;
        if self.failing.contains(&item.id()) {
            return Err(injected_failure(&self.name, item));
        }
        Ok(item)
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        self.kind
    }
}

/// Build the reference chain from `options`, with call logging on every stage.
///
/// Fetch fails for every id in `failing`.
pub fn reference_chain(options: &PipelineOptions, failing: &[u64]) -> StageChain<RunContext> {
    let latency = &options.latency;
    let fetch = FetchStage::new(latency.fetch_blocking(), latency.fetch_suspending())
        .failing_on(failing.iter().copied());

    StageChain::new(
        Box::new(logged(fetch)),
        Box::new(logged(TransformStage::new(latency.transform_blocking()))),
        Box::new(logged(SinkWriteStage)),
    )
    .with_stage_timeout(options.stage_timeout())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test]
    async fn test_fetch_failure_injection() {
        let fetch = FetchStage::default().failing_on([3]);
        assert!(fetch.run(WorkItem::new(2), ()).await.is_ok());

        let err = fetch.run(WorkItem::new(3), ()).await.unwrap_err();
        assert!(err.is_stage_failure());
        assert!(err.to_string().contains("fetch"));
    }

    #[tokio::test]
    async fn test_declared_kinds() {
        assert_eq!(
            PipelineStage::<()>::kind(&FetchStage::default()),
            StageKind::Suspending
        );
        assert_eq!(
            PipelineStage::<()>::kind(&TransformStage::default()),
            StageKind::Blocking
        );
        assert_eq!(
            PipelineStage::<RunContext>::kind(&SinkWriteStage),
            StageKind::Suspending
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_blocking_stage_starves_scheduler() {
        let stage = SimulatedStage::blocking("parse", Duration::from_millis(40));
        let start = Instant::now();
        let runs = (0..3).map(|id| stage.run(WorkItem::new(id), ()));
        futures::future::join_all(runs).await;
        assert!(start.elapsed() >= Duration::from_millis(120));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_suspending_stage_interleaves() {
        let stage = SimulatedStage::suspending("wait", Duration::from_millis(40));
        let start = Instant::now();
        let runs = (0..3).map(|id| stage.run(WorkItem::new(id), ()));
        futures::future::join_all(runs).await;
        assert!(start.elapsed() < Duration::from_millis(110));
    }
}
