//! Pipeline configuration.

use batchflow_shared::errors::{BatchflowError, BatchflowResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// What the orchestrator does when one item's stage chain fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Report the failed item and keep running the others.
    #[default]
    Continue,
    /// Abort the run on the first failure (after draining the sink).
    Abort,
}

/// Simulated per-stage cost.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageLatencies {
    /// Fetch: preparing the request occupies the worker.
    pub fetch_blocking_ms: u64,
    /// Fetch: waiting on the response yields to the scheduler.
    pub fetch_suspending_ms: u64,
    /// Transform: parsing occupies the worker.
    pub transform_blocking_ms: u64,
    /// Bulk write latency of one flush, independent of batch size.
    pub flush_ms: u64,
}

impl Default for StageLatencies {
    fn default() -> Self {
        Self {
            fetch_blocking_ms: 500,
            fetch_suspending_ms: 500,
            transform_blocking_ms: 10,
            flush_ms: 100,
        }
    }
}

impl StageLatencies {
    /// All latencies zero. Handy for tests that only care about ordering and batching.
    pub fn zero() -> Self {
        Self {
            fetch_blocking_ms: 0,
            fetch_suspending_ms: 0,
            transform_blocking_ms: 0,
            flush_ms: 0,
        }
    }

    pub fn fetch_blocking(&self) -> Duration {
        Duration::from_millis(self.fetch_blocking_ms)
    }

    pub fn fetch_suspending(&self) -> Duration {
        Duration::from_millis(self.fetch_suspending_ms)
    }

    pub fn transform_blocking(&self) -> Duration {
        Duration::from_millis(self.transform_blocking_ms)
    }

    pub fn flush(&self) -> Duration {
        Duration::from_millis(self.flush_ms)
    }
}

/// Options for one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Max simultaneously running stage chains.
    pub concurrency: usize,
    /// Sink auto-flush threshold.
    pub batch_size: usize,
    /// Number of work items in a reference run.
    pub work_size: u64,
    pub latency: StageLatencies,
    /// Per-stage timeout. None waits forever.
    pub stage_timeout_ms: Option<u64>,
    pub failure_policy: FailurePolicy,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            concurrency: 4,
            batch_size: 4,
            work_size: 15,
            latency: StageLatencies::default(),
            stage_timeout_ms: None,
            failure_policy: FailurePolicy::Continue,
        }
    }
}

impl PipelineOptions {
    /// Validate options before a run.
    pub fn sanitize(&self) -> BatchflowResult<()> {
        if self.concurrency == 0 {
            return Err(BatchflowError::Config(
                "concurrency must be at least 1".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(BatchflowError::Config(
                "batch_size must be at least 1".into(),
            ));
        }
        if self.stage_timeout_ms == Some(0) {
            return Err(BatchflowError::Config(
                "stage_timeout_ms must be positive when set".into(),
            ));
        }
        Ok(())
    }

    pub fn stage_timeout(&self) -> Option<Duration> {
        self.stage_timeout_ms.map(Duration::from_millis)
    }

    /// Load options from a JSON file. Missing fields take their defaults.
    pub fn from_json_file(path: &Path) -> BatchflowResult<Self> {
        let raw = std::fs::read_to_string(path).inspect_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Failed to read config file");
        })?;
        let options: PipelineOptions = serde_json::from_str(&raw)?;
        options.sanitize()?;
        Ok(options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_match_reference_run() {
        let options = PipelineOptions::default();
        assert_eq!(options.concurrency, 4);
        assert_eq!(options.batch_size, 4);
        assert_eq!(options.work_size, 15);
        assert_eq!(options.latency.fetch_blocking(), Duration::from_millis(500));
        assert_eq!(options.latency.flush(), Duration::from_millis(100));
        assert!(options.sanitize().is_ok());
    }

    #[test]
    fn test_sanitize_rejects_zero_limits() {
        let options = PipelineOptions {
            concurrency: 0,
            ..Default::default()
        };
        assert!(matches!(options.sanitize(), Err(BatchflowError::Config(_))));

        let options = PipelineOptions {
            batch_size: 0,
            ..Default::default()
        };
        let err = options.sanitize().unwrap_err();
        assert!(err.to_string().contains("batch_size"));

        let options = PipelineOptions {
            stage_timeout_ms: Some(0),
            ..Default::default()
        };
        assert!(options.sanitize().is_err());
    }

    #[test]
    fn test_from_json_file_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"concurrency": 2, "latency": {{"flush_ms": 5}}, "failure_policy": "abort"}}"#
        )
        .unwrap();

        let options = PipelineOptions::from_json_file(file.path()).unwrap();
        assert_eq!(options.concurrency, 2);
        assert_eq!(options.batch_size, 4);
        assert_eq!(options.latency.flush_ms, 5);
        assert_eq!(options.latency.fetch_blocking_ms, 500);
        assert_eq!(options.failure_policy, FailurePolicy::Abort);
    }

    #[test]
    fn test_from_json_file_invalid() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"batch_size": 0}}"#).unwrap();
        assert!(PipelineOptions::from_json_file(file.path()).is_err());

        let missing = std::path::Path::new("/nonexistent/batchflow.json");
        let err = PipelineOptions::from_json_file(missing).unwrap_err();
        assert!(matches!(err, BatchflowError::Io(_)));
    }
}
