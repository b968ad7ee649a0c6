//! Run orchestration: capture phase, compare phase, report

use chrono::Local;
use futures::stream::{self, StreamExt};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use snapgate_common::{ComparisonPair, RunConfig};

use crate::compare::{CompareScheduler, WorkerCommand};
use crate::diff::DiffAdapter;
use crate::engine::BrowserEngine;
use crate::error::RunnerResult;
use crate::placeholder::PlaceholderSet;
use crate::report::Report;
use crate::session::{SessionDriver, SessionOutcome};

/// Result of a capture phase
#[derive(Debug, Default)]
pub struct CaptureSummary {
    /// Comparison pairs in scenario, viewport, selector order
    pub pairs: Vec<ComparisonPair>,
    pub sessions: usize,
    /// Sessions that ended in an engine error
    pub errored: usize,
    pub test_root: PathBuf,
}

pub struct Runner {
    config: RunConfig,
    engine: Arc<dyn BrowserEngine>,
    diff: Arc<dyn DiffAdapter>,
    worker: Option<WorkerCommand>,
}

impl Runner {
    pub fn new(config: RunConfig, engine: Arc<dyn BrowserEngine>, diff: Arc<dyn DiffAdapter>) -> Self {
        Self {
            config,
            engine,
            diff,
            worker: None,
        }
    }

    /// Process-isolated compare workers run this command instead of the
    /// current executable.
    pub fn with_worker_command(mut self, worker: WorkerCommand) -> Self {
        self.worker = Some(worker);
        self
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// `YYYYMMDD-HHMMSS`, naming the test bitmap directory of one run
    pub fn run_stamp() -> String {
        Local::now().format("%Y%m%d-%H%M%S").to_string()
    }

    /// Capture reference bitmaps. Unless `incremental`, the reference
    /// directory is emptied first.
    pub async fn reference(&self, incremental: bool) -> RunnerResult<CaptureSummary> {
        let reference_dir = &self.config.paths.bitmaps_reference;
        if !incremental && tokio::fs::try_exists(reference_dir).await? {
            info!("Cleaning reference directory {}", reference_dir.display());
            tokio::fs::remove_dir_all(reference_dir).await?;
        }

        let placeholders = PlaceholderSet::prepare(&self.config.paths.placeholders).await?;
        let test_root = self.config.paths.bitmaps_test.join(Self::run_stamp());
        let summary = self.capture(true, test_root, &placeholders).await;
        info!(
            "Reference capture finished: {} session(s), {} errored",
            summary.sessions, summary.errored
        );
        Ok(summary)
    }

    /// Capture test bitmaps, compare them against the references and collect
    /// the results.
    pub async fn test(&self) -> RunnerResult<Report> {
        let placeholders = PlaceholderSet::prepare(&self.config.paths.placeholders).await?;
        let test_root = self.config.paths.bitmaps_test.join(Self::run_stamp());
        let summary = self.capture(false, test_root, &placeholders).await;
        if summary.errored > 0 {
            warn!("{} session(s) ended in an engine error", summary.errored);
        }

        let mut scheduler = CompareScheduler::new(
            self.config.async_compare_limit,
            Arc::clone(&self.diff),
            placeholders,
        )
        .with_isolation(self.config.compare_isolation);
        if let Some(worker) = &self.worker {
            scheduler = scheduler.with_worker_command(worker.clone());
        }
        let results = scheduler.run(summary.pairs).await;

        let mut report = Report::new(self.config.config_id(), self.config.test_suite_name.clone());
        for result in results {
            report.add_result(result);
        }
        info!(
            "Test completed: {} passed, {} failed",
            report.passed(),
            report.failed()
        );
        Ok(report)
    }

    /// Fan out one session per (scenario, viewport), scenario-major, at most
    /// `asyncCaptureLimit` at a time.
    pub async fn capture(
        &self,
        is_reference: bool,
        test_root: PathBuf,
        placeholders: &PlaceholderSet,
    ) -> CaptureSummary {
        let naming = self.config.naming_scheme(test_root.clone());
        let driver = SessionDriver::new(
            self.engine.as_ref(),
            &self.config,
            &naming,
            placeholders,
            is_reference,
        );

        let jobs: Vec<_> = self
            .config
            .scenarios
            .iter()
            .flat_map(|scenario| self.config.viewports.iter().map(move |viewport| (scenario, viewport)))
            .collect();
        info!(
            sessions = jobs.len(),
            limit = self.config.async_capture_limit,
            reference = is_reference,
            "Starting capture"
        );

        let outcomes: Vec<SessionOutcome> = stream::iter(jobs)
            .map(|(scenario, viewport)| driver.run(scenario, viewport))
            .buffered(self.config.async_capture_limit.max(1))
            .collect()
            .await;

        let mut summary = CaptureSummary {
            sessions: outcomes.len(),
            test_root,
            ..Default::default()
        };
        for outcome in outcomes {
            if outcome.errored() {
                summary.errored += 1;
            }
            if !is_reference {
                summary.pairs.extend(outcome.pairs);
            }
        }
        summary
    }
}
