//! Run orchestration.
//!
//! Submits one stage chain per work item through the concurrency limiter,
//! collects outcomes in input order, then drains the sink with one explicit
//! flush.

use crate::config::{FailurePolicy, PipelineOptions};
use crate::limiter::ConcurrencyLimiter;
use crate::metrics::{RunMetrics, RunMetricsStorage};
use crate::pipeline::{ChainMetrics, StageChain};
use crate::sink::{BatchWriter, BatchedSink, FlushReport, MemoryWriter};
use crate::stages::reference_chain;
use crate::types::WorkItem;
use batchflow_shared::errors::{BatchflowError, BatchflowResult};
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use ulid::Ulid;

/// Handle passed into every stage of every chain of one run.
///
/// The sink is created per run, never shared between runs.
#[derive(Clone)]
pub struct RunContext {
    pub run_id: Ulid,
    pub sink: Arc<BatchedSink>,
}

/// What happened to one work item.
#[derive(Debug)]
pub enum ItemOutcome {
    Completed {
        item: WorkItem,
        metrics: ChainMetrics,
    },
    Failed {
        item: WorkItem,
        error: BatchflowError,
    },
}

impl ItemOutcome {
    pub fn item(&self) -> WorkItem {
        match self {
            ItemOutcome::Completed { item, .. } | ItemOutcome::Failed { item, .. } => *item,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, ItemOutcome::Completed { .. })
    }

    pub fn error(&self) -> Option<&BatchflowError> {
        match self {
            ItemOutcome::Failed { error, .. } => Some(error),
            ItemOutcome::Completed { .. } => None,
        }
    }
}

#[derive(Debug)]
pub struct RunReport {
    pub run_id: Ulid,
    /// One entry per input item, in input order.
    pub outcomes: Vec<ItemOutcome>,
    /// The end-of-run drain. None when the queue was already empty.
    pub final_flush: Option<FlushReport>,
    pub metrics: RunMetrics,
    /// Highest number of chains observed running at once.
    pub max_in_flight: usize,
    pub total_duration_ms: u128,
}

impl RunReport {
    pub fn completed(&self) -> impl Iterator<Item = WorkItem> + '_ {
        self.outcomes
            .iter()
            .filter(|o| o.is_completed())
            .map(ItemOutcome::item)
    }

    pub fn failed(&self) -> impl Iterator<Item = (WorkItem, &BatchflowError)> + '_ {
        self.outcomes
            .iter()
            .filter_map(|o| o.error().map(|e| (o.item(), e)))
    }

    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(ItemOutcome::is_completed)
    }

    /// JSON summary for reporting.
    pub fn to_json(&self) -> serde_json::Value {
        let results: Vec<serde_json::Value> = self
            .outcomes
            .iter()
            .map(|outcome| match outcome {
                ItemOutcome::Completed { item, metrics } => serde_json::json!({
                    "item": item,
                    "status": "completed",
                    "duration_ms": metrics.total_duration_ms as u64,
                }),
                ItemOutcome::Failed { item, error } => serde_json::json!({
                    "item": item,
                    "status": "failed",
                    "error": error.to_string(),
                }),
            })
            .collect();

        serde_json::json!({
            "run_id": self.run_id.to_string(),
            "results": results,
            "final_flush": self.final_flush,
            "metrics": self.metrics,
            "max_in_flight": self.max_in_flight,
            "total_duration_ms": self.total_duration_ms as u64,
        })
    }
}

pub struct Orchestrator {
    options: PipelineOptions,
    chain: Arc<StageChain<RunContext>>,
    writer: Arc<dyn BatchWriter>,
}

impl Orchestrator {
    pub fn new(
        options: PipelineOptions,
        chain: StageChain<RunContext>,
        writer: Arc<dyn BatchWriter>,
    ) -> BatchflowResult<Self> {
        options.sanitize()?;
        Ok(Self {
            options,
            chain: Arc::new(chain),
            writer,
        })
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    /// Process `items` and drain the sink.
    ///
    /// Under `FailurePolicy::Continue` a failing chain is reported in its
    /// outcome and its siblings keep running. Under `FailurePolicy::Abort`
    /// the first failure cancels chains still pending, the sink is drained,
    /// and the failure is returned.
    ///
    /// A failing final flush or a `CapacityViolation` is always returned as
    /// an error.
    ///
    /// Every chain is spawned as its own task, so a multi-threaded runtime
    /// runs admitted chains in parallel. Must be called from within a tokio
    /// runtime.
    pub async fn run(&self, items: Vec<WorkItem>) -> BatchflowResult<RunReport> {
        let total_start = Instant::now();
        let run_id = Ulid::new();

        let metrics = Arc::new(RunMetricsStorage::new());
        let sink = Arc::new(BatchedSink::with_metrics(
            self.options.batch_size,
            Arc::clone(&self.writer),
            Arc::clone(&metrics),
        )?);
        let limiter = ConcurrencyLimiter::new(self.options.concurrency)?;
        let ctx = RunContext {
            run_id,
            sink: Arc::clone(&sink),
        };

        tracing::info!(
            run_id = %run_id,
            items = items.len(),
            concurrency = self.options.concurrency,
            batch_size = self.options.batch_size,
            policy = ?self.options.failure_policy,
            "Starting run"
        );
        RunMetricsStorage::add(&metrics.items_submitted, items.len() as u64);

        let mut chains: JoinSet<(usize, ItemOutcome)> = JoinSet::new();
        for (index, &item) in items.iter().enumerate() {
            let chain = Arc::clone(&self.chain);
            let limiter = limiter.clone();
            let ctx = ctx.clone();
            let metrics = Arc::clone(&metrics);
            chains.spawn(async move {
                let outcome = match limiter.run(chain.process(item, ctx)).await {
                    Ok(output) => {
                        RunMetricsStorage::increment(&metrics.items_completed);
                        ItemOutcome::Completed {
                            item,
                            metrics: output.metrics,
                        }
                    }
                    Err(error) => {
                        RunMetricsStorage::increment(&metrics.items_failed);
                        ItemOutcome::Failed { item, error }
                    }
                };
                (index, outcome)
            });
        }

        let abort_on_failure = self.options.failure_policy == FailurePolicy::Abort;
        let mut slots: Vec<Option<ItemOutcome>> = Vec::with_capacity(items.len());
        slots.resize_with(items.len(), || None);

        while let Some(joined) = chains.join_next().await {
            let (index, outcome) = match joined {
                Ok(done) => done,
                Err(e) => {
                    tracing::error!(run_id = %run_id, error = %e, "Stage chain task died");
                    cancel_and_drain(&mut chains, &sink, true).await?;
                    return Err(BatchflowError::Internal(format!(
                        "stage chain task failed: {}",
                        e
                    )));
                }
            };

            match outcome {
                ItemOutcome::Failed { item, error } if abort_on_failure => {
                    tracing::error!(run_id = %run_id, item = %item, error = %error, "Aborting run");
                    let flush = !matches!(error, BatchflowError::CapacityViolation { .. });
                    cancel_and_drain(&mut chains, &sink, flush).await?;
                    return Err(error);
                }
                outcome => slots[index] = Some(outcome),
            }
        }

        let outcomes = slots
            .into_iter()
            .map(|slot| {
                slot.ok_or_else(|| BatchflowError::Internal("stage chain outcome missing".into()))
            })
            .collect::<BatchflowResult<Vec<_>>>()?;

        for outcome in &outcomes {
            if let ItemOutcome::Failed { item, error } = outcome {
                if let BatchflowError::CapacityViolation { len, batch_size } = error {
                    tracing::error!(run_id = %run_id, item = %item, "Sink capacity invariant broken");
                    return Err(BatchflowError::CapacityViolation {
                        len: *len,
                        batch_size: *batch_size,
                    });
                }
                tracing::warn!(run_id = %run_id, item = %item, error = %error, "Item failed");
            }
        }

        let final_flush = sink.flush().await.inspect_err(|e| {
            tracing::error!(run_id = %run_id, error = %e, "Final flush failed");
        })?;

        let report = RunReport {
            run_id,
            outcomes,
            final_flush,
            metrics: metrics.snapshot(),
            max_in_flight: limiter.high_water(),
            total_duration_ms: total_start.elapsed().as_millis(),
        };

        tracing::info!(
            run_id = %run_id,
            completed = report.metrics.items_completed,
            failed = report.metrics.items_failed,
            auto_flushes = report.metrics.auto_flushes,
            items_flushed = report.metrics.items_flushed,
            duration_ms = report.total_duration_ms as u64,
            "Run finished"
        );

        Ok(report)
    }
}

/// Cancel every chain still running, wait for them to stop, then optionally
/// drain the sink so items it already accepted are written.
async fn cancel_and_drain(
    chains: &mut JoinSet<(usize, ItemOutcome)>,
    sink: &BatchedSink,
    flush: bool,
) -> BatchflowResult<()> {
    chains.abort_all();
    while chains.join_next().await.is_some() {}
    if flush {
        sink.flush().await?;
    }
    Ok(())
}

/// Run the simulated reference workload described by `options`.
///
/// Items are `0..work_size`; fetch fails for every id in `failing`. Returns
/// the report and the writer holding every flushed batch.
pub async fn run_reference(
    options: &PipelineOptions,
    failing: &[u64],
) -> BatchflowResult<(RunReport, Arc<MemoryWriter>)> {
    let writer = Arc::new(MemoryWriter::new(options.latency.flush()));
    let chain = reference_chain(options, failing);
    let orchestrator = Orchestrator::new(options.clone(), chain, writer.clone())?;
    let report = orchestrator.run(WorkItem::range(options.work_size)).await?;
    Ok((report, writer))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StageLatencies;
    use crate::pipeline::BoxedStage;
    use crate::sink::Batch;
    use crate::stages::{SimulatedStage, SinkWriteStage};
    use std::time::Duration;

    fn options(concurrency: usize, batch_size: usize) -> PipelineOptions {
        PipelineOptions {
            concurrency,
            batch_size,
            work_size: 0,
            latency: StageLatencies::zero(),
            ..Default::default()
        }
    }

    fn chain(fetch: SimulatedStage) -> StageChain<RunContext> {
        StageChain::new(
            Box::new(fetch) as BoxedStage<RunContext>,
            Box::new(SimulatedStage::blocking("transform", Duration::ZERO)),
            Box::new(SinkWriteStage),
        )
    }

    #[test]
    fn test_invalid_options_rejected() {
        let writer = Arc::new(MemoryWriter::default());
        let fetch = SimulatedStage::suspending("fetch", Duration::ZERO);
        assert!(Orchestrator::new(options(0, 4), chain(fetch), writer).is_err());
    }

    #[tokio::test]
    async fn test_results_follow_input_order() {
        let writer = Arc::new(MemoryWriter::default());
        let fetch = SimulatedStage::suspending("fetch", Duration::from_millis(1));
        let orchestrator = Orchestrator::new(options(3, 4), chain(fetch), writer.clone()).unwrap();

        let items: Vec<WorkItem> = [9u64, 2, 7, 4, 0].into_iter().map(WorkItem::new).collect();
        let report = orchestrator.run(items.clone()).await.unwrap();

        let order: Vec<WorkItem> = report.outcomes.iter().map(ItemOutcome::item).collect();
        assert_eq!(order, items);
        assert!(report.is_success());
        assert_eq!(report.metrics.items_completed, 5);
        assert_eq!(report.final_flush.as_ref().unwrap().items, 1);
        assert_eq!(writer.written_items().len(), 5);
    }

    #[tokio::test]
    async fn test_empty_input() {
        let writer = Arc::new(MemoryWriter::default());
        let fetch = SimulatedStage::suspending("fetch", Duration::ZERO);
        let orchestrator = Orchestrator::new(options(2, 4), chain(fetch), writer.clone()).unwrap();

        let report = orchestrator.run(Vec::new()).await.unwrap();
        assert!(report.outcomes.is_empty());
        assert!(report.final_flush.is_none());
        assert_eq!(report.metrics.empty_flushes, 1);
        assert!(writer.batches().is_empty());
    }

    #[tokio::test]
    async fn test_abort_policy_returns_first_failure_and_drains() {
        let writer = Arc::new(MemoryWriter::default());
        let fetch = SimulatedStage::suspending("fetch", Duration::from_millis(2)).failing_on([0]);
        let opts = PipelineOptions {
            failure_policy: FailurePolicy::Abort,
            ..options(1, 4)
        };
        let orchestrator = Orchestrator::new(opts, chain(fetch), writer.clone()).unwrap();

        let err = orchestrator.run(WorkItem::range(6)).await.unwrap_err();
        assert!(matches!(err, BatchflowError::Stage { item: 0, .. }));
        // Item 0 is first in line with a single permit, so nothing reached the sink.
        assert!(writer.written_items().is_empty());
    }

    #[tokio::test]
    async fn test_abort_policy_drains_items_enqueued_before_failure() {
        let writer = Arc::new(MemoryWriter::default());
        let fetch = SimulatedStage::suspending("fetch", Duration::from_millis(2)).failing_on([5]);
        let opts = PipelineOptions {
            failure_policy: FailurePolicy::Abort,
            ..options(1, 4)
        };
        let orchestrator = Orchestrator::new(opts, chain(fetch), writer.clone()).unwrap();

        let err = orchestrator.run(WorkItem::range(10)).await.unwrap_err();
        assert!(matches!(err, BatchflowError::Stage { item: 5, .. }));

        // 0..4 went out in the auto-flush, 4 was drained after the abort.
        let mut written: Vec<u64> = writer.written_items().iter().map(|i| i.id()).collect();
        written.sort_unstable();
        assert_eq!(written, vec![0, 1, 2, 3, 4]);

        let sizes: Vec<usize> = writer.batches().iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![4, 1]);
    }

    #[tokio::test]
    async fn test_final_flush_failure_surfaces() {
        let writer = Arc::new(MemoryWriter::default());
        writer.fail_next(1);
        let fetch = SimulatedStage::suspending("fetch", Duration::ZERO);
        let orchestrator = Orchestrator::new(options(2, 4), chain(fetch), writer.clone()).unwrap();

        let err = orchestrator.run(WorkItem::range(3)).await.unwrap_err();
        assert!(matches!(err, BatchflowError::Flush { batch_len: 3, .. }));
        assert!(writer.batches().is_empty());
    }

    #[tokio::test]
    async fn test_report_json_shape() {
        let writer = Arc::new(MemoryWriter::default());
        let fetch = SimulatedStage::suspending("fetch", Duration::ZERO).failing_on([1]);
        let orchestrator = Orchestrator::new(options(2, 2), chain(fetch), writer).unwrap();

        let report = orchestrator.run(WorkItem::range(3)).await.unwrap();
        let json = report.to_json();
        let results = json["results"].as_array().unwrap();
        assert_eq!(results.len(), 3);
        assert_eq!(results[0]["status"], "completed");
        assert_eq!(results[1]["status"], "failed");
        assert_eq!(results[1]["item"], 1);
        assert_eq!(json["metrics"]["items_flushed"], 2);
    }
}
