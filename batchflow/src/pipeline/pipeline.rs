//! Stage chain execution.
//!
//! Runs fetch, transform and sink-write strictly in order for one item. Each
//! stage receives the previous stage's output. The first failing stage aborts
//! the chain; nothing after it runs.

use super::metrics::{ChainMetrics, StageMetrics};
use super::stage::{BoxedStage, PipelineStage};
use crate::types::WorkItem;
use batchflow_shared::errors::{BatchflowError, BatchflowResult};
use std::time::{Duration, Instant};

/// Result of one successful chain.
#[derive(Debug, Clone)]
pub struct ChainOutput {
    /// Output of the final stage.
    pub item: WorkItem,
    pub metrics: ChainMetrics,
}

pub struct StageChain<Ctx: Send + 'static> {
    fetch: BoxedStage<Ctx>,
    transform: BoxedStage<Ctx>,
    sink_write: BoxedStage<Ctx>,
    stage_timeout: Option<Duration>,
}

impl<Ctx> StageChain<Ctx>
where
    Ctx: Clone + Send + Sync + 'static,
{
    pub fn new(
        fetch: BoxedStage<Ctx>,
        transform: BoxedStage<Ctx>,
        sink_write: BoxedStage<Ctx>,
    ) -> Self {
        Self {
            fetch,
            transform,
            sink_write,
            stage_timeout: None,
        }
    }

    /// Bound how long fetch and transform may take per item.
    ///
    /// Sink-write is never timed out: once the sink has accepted an item,
    /// cancelling the write would report an item as failed that still gets
    /// flushed. A blocking stage cannot be interrupted; its overrun is only
    /// detected once it yields.
    pub fn with_stage_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.stage_timeout = timeout;
        self
    }

    /// Stages in execution order.
    pub fn stages(&self) -> [&dyn PipelineStage<Ctx>; 3] {
        [
            self.fetch.as_ref(),
            self.transform.as_ref(),
            self.sink_write.as_ref(),
        ]
    }

    /// Run every stage for `item`, in order.
    pub async fn process(&self, item: WorkItem, ctx: Ctx) -> BatchflowResult<ChainOutput> {
        let total_start = Instant::now();
        let mut current = item;
        let mut stage_metrics = Vec::with_capacity(3);

        for (index, stage) in self.stages().into_iter().enumerate() {
            let is_terminal = index == 2;
            let stage_start = Instant::now();

            current = self
                .run_stage(stage, current, ctx.clone(), is_terminal)
                .await
                .inspect_err(|e| {
                    tracing::debug!(
                        item = %item,
                        stage = stage.name(),
                        error = %e,
                        "Stage chain aborted"
                    )
                })?;

            stage_metrics.push(StageMetrics {
                name: stage.name().to_string(),
                kind: stage.kind(),
                duration_ms: stage_start.elapsed().as_millis(),
            });
        }

        Ok(ChainOutput {
            item: current,
            metrics: ChainMetrics {
                item,
                total_duration_ms: total_start.elapsed().as_millis(),
                stages: stage_metrics,
            },
        })
    }

    async fn run_stage(
        &self,
        stage: &dyn PipelineStage<Ctx>,
        item: WorkItem,
        ctx: Ctx,
        is_terminal: bool,
    ) -> BatchflowResult<WorkItem> {
        match self.stage_timeout {
            Some(timeout) if !is_terminal => tokio::time::timeout(timeout, stage.run(item, ctx))
                .await
                .map_err(|_| BatchflowError::StageTimeout {
                    stage: stage.name().to_string(),
                    item: item.id(),
                    timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })?,
            _ => stage.run(item, ctx).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::StageKind;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;

    type Trace = Arc<Mutex<Vec<String>>>;

    struct TraceStage {
        name: &'static str,
        fail_on: Option<u64>,
        delay: Duration,
    }

    impl TraceStage {
        fn new(name: &'static str) -> Self {
            Self {
                name,
                fail_on: None,
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl PipelineStage<Trace> for TraceStage {
        async fn run(&self, item: WorkItem, ctx: Trace) -> BatchflowResult<WorkItem> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail_on == Some(item.id()) {
                return Err(BatchflowError::Stage {
                    stage: self.name.to_string(),
                    item: item.id(),
                    message: "injected".into(),
                });
            }
            ctx.lock().push(format!("{}:{}", self.name, item));
            Ok(item)
        }

        fn name(&self) -> &str {
            self.name
        }

        fn kind(&self) -> StageKind {
            StageKind::Suspending
        }
    }

    fn chain(fetch: TraceStage) -> StageChain<Trace> {
        StageChain::new(
            Box::new(fetch),
            Box::new(TraceStage::new("transform")),
            Box::new(TraceStage::new("sink_write")),
        )
    }

    #[tokio::test]
    async fn test_stages_run_in_order() {
        let trace: Trace = Arc::default();
        let output = chain(TraceStage::new("fetch"))
            .process(WorkItem::new(5), trace.clone())
            .await
            .unwrap();

        assert_eq!(output.item, WorkItem::new(5));
        assert_eq!(
            *trace.lock(),
            vec!["fetch:5", "transform:5", "sink_write:5"]
        );
        let names: Vec<_> = output.metrics.stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["fetch", "transform", "sink_write"]);
        assert!(output.metrics.stage_duration_ms("transform").is_some());
        assert!(output.metrics.stage_duration_ms("missing").is_none());
    }

    #[tokio::test]
    async fn test_failure_stops_later_stages() {
        let trace: Trace = Arc::default();
        let fetch = TraceStage {
            fail_on: Some(2),
            ..TraceStage::new("fetch")
        };
        let err = chain(fetch)
            .process(WorkItem::new(2), trace.clone())
            .await
            .unwrap_err();

        assert!(err.is_stage_failure());
        assert!(trace.lock().is_empty());
    }

    #[tokio::test]
    async fn test_stage_timeout() {
        let trace: Trace = Arc::default();
        let fetch = TraceStage {
            delay: Duration::from_millis(200),
            ..TraceStage::new("fetch")
        };
        let err = chain(fetch)
            .with_stage_timeout(Some(Duration::from_millis(10)))
            .process(WorkItem::new(1), trace.clone())
            .await
            .unwrap_err();

        match err {
            BatchflowError::StageTimeout {
                stage,
                item,
                timeout_ms,
            } => {
                assert_eq!(stage, "fetch");
                assert_eq!(item, 1);
                assert_eq!(timeout_ms, 10);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(trace.lock().is_empty());
    }

    #[tokio::test]
    async fn test_sink_write_is_not_timed_out() {
        let trace: Trace = Arc::default();
        let chain = StageChain::new(
            Box::new(TraceStage::new("fetch")) as BoxedStage<Trace>,
            Box::new(TraceStage::new("transform")),
            Box::new(TraceStage {
                delay: Duration::from_millis(30),
                ..TraceStage::new("sink_write")
            }),
        )
        .with_stage_timeout(Some(Duration::from_millis(5)));

        let output = chain.process(WorkItem::new(4), trace.clone()).await.unwrap();
        assert_eq!(output.item, WorkItem::new(4));
        assert_eq!(trace.lock().len(), 3);
    }
}
