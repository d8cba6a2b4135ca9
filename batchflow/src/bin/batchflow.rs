//! Run the simulated reference pipeline and print the outcome as JSON.

use std::path::PathBuf;

use anyhow::{Context, Result};
use batchflow::{BatchflowResult, FailurePolicy, PipelineOptions, init_logging, run_reference};
use clap::Parser;

#[derive(Debug, Parser)]
#[command(
    name = "batchflow",
    about = "Bounded-concurrency fetch → transform → batched sink pipeline"
)]
struct Args {
    /// JSON options file; flags below override its values.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Max simultaneously running stage chains.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Sink auto-flush threshold.
    #[arg(long)]
    batch_size: Option<usize>,

    /// Number of work items.
    #[arg(long)]
    work_size: Option<u64>,

    #[arg(long)]
    fetch_blocking_ms: Option<u64>,

    #[arg(long)]
    fetch_suspending_ms: Option<u64>,

    #[arg(long)]
    transform_ms: Option<u64>,

    #[arg(long)]
    flush_ms: Option<u64>,

    /// Per-stage timeout for fetch and transform.
    #[arg(long)]
    stage_timeout_ms: Option<u64>,

    /// Make fetch fail for this item id. Repeatable.
    #[arg(long = "fail-item")]
    fail_items: Vec<u64>,

    /// Abort the whole run on the first failed item.
    #[arg(long)]
    abort_on_failure: bool,

    /// Write logs to a daily-rolling file in this directory instead of stderr.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Use a multi-threaded runtime instead of a single cooperative worker.
    #[arg(long)]
    multi_thread: bool,
}

impl Args {
    fn options(&self) -> BatchflowResult<PipelineOptions> {
        let mut options = match &self.config {
            Some(path) => PipelineOptions::from_json_file(path)?,
            None => PipelineOptions::default(),
        };

        if let Some(v) = self.concurrency {
            options.concurrency = v;
        }
        if let Some(v) = self.batch_size {
            options.batch_size = v;
        }
        if let Some(v) = self.work_size {
            options.work_size = v;
        }
        if let Some(v) = self.fetch_blocking_ms {
            options.latency.fetch_blocking_ms = v;
        }
        if let Some(v) = self.fetch_suspending_ms {
            options.latency.fetch_suspending_ms = v;
        }
        if let Some(v) = self.transform_ms {
            options.latency.transform_blocking_ms = v;
        }
        if let Some(v) = self.flush_ms {
            options.latency.flush_ms = v;
        }
        if self.stage_timeout_ms.is_some() {
            options.stage_timeout_ms = self.stage_timeout_ms;
        }
        if self.abort_on_failure {
            options.failure_policy = FailurePolicy::Abort;
        }

        options.sanitize()?;
        Ok(options)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(args.log_dir.as_deref())?;
    let options = args.options()?;

    let mut builder = if args.multi_thread {
        tokio::runtime::Builder::new_multi_thread()
    } else {
        tokio::runtime::Builder::new_current_thread()
    };
    let runtime = builder
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    let (report, writer) = runtime.block_on(run_reference(&options, &args.fail_items))?;

    let summary = serde_json::json!({
        "options": options,
        "report": report.to_json(),
        "batches": writer.batches(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    let failed = report.failed().count();
    if failed > 0 {
        anyhow::bail!("{} of {} items failed", failed, report.outcomes.len());
    }
    Ok(())
}
