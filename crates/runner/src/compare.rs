//! Compare scheduler
//!
//! Resolves every comparison pair of a run into exactly one result. Cheap
//! input checks run inline; the pixel diff itself runs in a single-use
//! worker (a dedicated OS thread or a child process) so that a crashing diff only
//! fails its own pair. At most `limit` pairs are in flight and results come
//! back in submission order.

use base64::Engine as _;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::io::{Read, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::oneshot;
use tracing::{debug, error, info, info_span, Instrument};

use snapgate_common::{ComparisonPair, ComparisonResult, ComparisonStatus, IsolationMode};

use crate::diff::{DiffAdapter, DiffOptions, DiffOutcome};
use crate::error::{RunnerError, RunnerResult};
use crate::placeholder::{Placeholder, PlaceholderSet};

/// Command line used to start a process-isolated compare worker
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    /// The running binary's hidden `compare-worker` subcommand.
    pub fn current_exe() -> RunnerResult<Self> {
        Ok(Self {
            program: std::env::current_exe()?,
            args: vec!["compare-worker".to_string()],
        })
    }
}

pub struct CompareScheduler {
    limit: usize,
    isolation: IsolationMode,
    diff: Arc<dyn DiffAdapter>,
    placeholders: PlaceholderSet,
    worker: Option<WorkerCommand>,
}

impl CompareScheduler {
    pub fn new(limit: usize, diff: Arc<dyn DiffAdapter>, placeholders: PlaceholderSet) -> Self {
        Self {
            limit: limit.max(1),
            isolation: IsolationMode::Thread,
            diff,
            placeholders,
            worker: None,
        }
    }

    pub fn with_isolation(mut self, isolation: IsolationMode) -> Self {
        self.isolation = isolation;
        self
    }

    /// Override the worker started in process isolation mode.
    pub fn with_worker_command(mut self, worker: WorkerCommand) -> Self {
        self.worker = Some(worker);
        self
    }

    /// Compare all pairs. Returns one result per pair, in input order.
    pub async fn run(&self, pairs: Vec<ComparisonPair>) -> Vec<ComparisonResult> {
        let group_sizes = group_sizes(&pairs);
        info!(pairs = pairs.len(), limit = self.limit, "Comparing bitmaps");

        stream::iter(pairs)
            .map(|pair| {
                let group_size = group_sizes
                    .get(&(pair.label.clone(), pair.viewport_label.clone()))
                    .copied()
                    .unwrap_or_default();
                let span = info_span!(
                    "compare",
                    stage = "compare",
                    scenario = %pair.label,
                    viewport = %pair.viewport_label
                );
                self.compare_pair(pair, group_size).instrument(span)
            })
            .buffered(self.limit)
            .collect()
            .await
    }

    async fn compare_pair(&self, pair: ComparisonPair, group_size: usize) -> ComparisonResult {
        if let Some(engine_error) = &pair.engine_error {
            let message = format!(
                "{}. See scenario {} ({})",
                engine_error, pair.label, pair.viewport_label
            );
            error!(result = false, "{}", message);
            return ComparisonResult::failed(pair, message);
        }

        if !path_exists(&pair.reference).await {
            if !path_exists(&pair.test).await {
                if let Err(e) = self.placeholders.copy_to(Placeholder::Error, &pair.test).await {
                    debug!("Could not write placeholder to {}: {}", pair.test.display(), e);
                }
            }
            error!(result = false, "Reference image not found {}", pair.file_name);
            let message = format!("Reference file not found {}", pair.reference.display());
            return ComparisonResult::failed(pair, message);
        }

        if !path_exists(&pair.test).await {
            error!(result = false, "Test image not found {}", pair.file_name);
            let message = format!("Test file not found {}", pair.test.display());
            return ComparisonResult::failed(pair, message);
        }

        if let Some(expect) = pair.expect.filter(|n| *n > 0) {
            if expect != group_size {
                let message = format!(
                    "Expected {} images for scenario \"{} ({})\", but {} were found",
                    expect, pair.label, pair.viewport_label, group_size
                );
                error!(result = false, "{}", message);
                return ComparisonResult::failed(pair, message);
            }
        }

        let options = DiffOptions {
            require_same_dimensions: pair.require_same_dimensions,
            ignore_areas: Vec::new(),
        };
        let outcome = match self.isolation {
            IsolationMode::Thread => self.diff_on_thread(&pair, options).await,
            IsolationMode::Process => self.diff_in_process(&pair, options).await,
        };

        match outcome {
            Ok(outcome) => self.judge(pair, outcome).await,
            Err(message) => {
                error!(result = false, "Comparison failed for {}: {}", pair.file_name, message);
                ComparisonResult::failed(pair, message)
            }
        }
    }

    /// Run one diff on a freshly spawned OS thread that exits afterwards.
    async fn diff_on_thread(&self, pair: &ComparisonPair, options: DiffOptions) -> Result<DiffOutcome, String> {
        let diff = Arc::clone(&self.diff);
        let reference = pair.reference.clone();
        let test = pair.test.clone();
        let (tx, rx) = oneshot::channel();

        std::thread::Builder::new()
            .name(format!("compare-{}", pair.file_name))
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| diff.diff(&reference, &test, &options)));
                let _ = tx.send(result);
            })
            .map_err(|e| format!("Could not start compare worker: {}", e))?;

        match rx.await {
            Ok(Ok(Ok(outcome))) => Ok(outcome),
            Ok(Ok(Err(e))) => Err(e.to_string()),
            Ok(Err(payload)) => Err(format!("Compare worker crashed: {}", panic_message(payload))),
            Err(_) => Err("Compare worker crashed: worker exited without a result".to_string()),
        }
    }

    async fn diff_in_process(&self, pair: &ComparisonPair, options: DiffOptions) -> Result<DiffOutcome, String> {
        let worker = match &self.worker {
            Some(worker) => worker.clone(),
            None => WorkerCommand::current_exe().map_err(|e| e.to_string())?,
        };
        let request = WorkerRequest {
            reference: pair.reference.clone(),
            test: pair.test.clone(),
            options,
        };
        spawn_worker(&worker, &request).await.map_err(|e| e.to_string())
    }

    /// Turn a diff outcome into a verdict, storing the diff bitmap on failure.
    async fn judge(&self, pair: ComparisonPair, outcome: DiffOutcome) -> ComparisonResult {
        let dimensions_ok = !pair.require_same_dimensions || outcome.is_same_dimensions;
        let passed = dimensions_ok && outcome.mis_match_percentage <= pair.mis_match_threshold;

        let mut result = ComparisonResult {
            status: if passed {
                ComparisonStatus::Pass
            } else {
                ComparisonStatus::Fail
            },
            mismatch_percent: Some(outcome.mis_match_percentage),
            dimensions_match: Some(outcome.is_same_dimensions),
            diff_image: None,
            error: None,
            pair,
        };

        if passed {
            info!(result = true, "OK: {} {}", result.pair.label, result.pair.file_name);
            return result;
        }

        error!(
            result = false,
            "ERROR {{ requireSameDimensions: {}, size: {}, content: {:.2}%, threshold: {}% }}: {} {}",
            result.pair.require_same_dimensions,
            if outcome.is_same_dimensions { "ok" } else { "isDifferent" },
            outcome.mis_match_percentage,
            result.pair.mis_match_threshold,
            result.pair.label,
            result.pair.file_name
        );

        if let Some(bitmap) = outcome.diff_bitmap {
            let path = failed_diff_path(&result.pair);
            match tokio::fs::write(&path, bitmap).await {
                Ok(()) => result.diff_image = Some(path),
                Err(e) => error!("Could not store diff image {}: {}", path.display(), e),
            }
        }
        result
    }
}

/// Number of pairs per (label, viewport label) group
fn group_sizes(pairs: &[ComparisonPair]) -> HashMap<(String, String), usize> {
    let mut sizes = HashMap::new();
    for pair in pairs {
        *sizes
            .entry((pair.label.clone(), pair.viewport_label.clone()))
            .or_insert(0) += 1;
    }
    sizes
}

/// `failed_diff_<fileName>` next to the test bitmap
pub fn failed_diff_path(pair: &ComparisonPair) -> PathBuf {
    let name = format!("failed_diff_{}", pair.file_name);
    match pair.test.parent() {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic".to_string()
    }
}

/// One diff job handed to a worker process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerRequest {
    pub reference: PathBuf,
    pub test: PathBuf,
    pub options: DiffOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum WorkerResponse {
    #[serde(rename_all = "camelCase")]
    Done {
        mis_match_percentage: f64,
        is_same_dimensions: bool,
        /// base64 PNG
        #[serde(default)]
        diff_bitmap: Option<String>,
    },
    Failed {
        error: String,
    },
}

impl From<RunnerResult<DiffOutcome>> for WorkerResponse {
    fn from(result: RunnerResult<DiffOutcome>) -> Self {
        match result {
            Ok(outcome) => WorkerResponse::Done {
                mis_match_percentage: outcome.mis_match_percentage,
                is_same_dimensions: outcome.is_same_dimensions,
                diff_bitmap: outcome
                    .diff_bitmap
                    .map(|b| base64::engine::general_purpose::STANDARD.encode(b)),
            },
            Err(e) => WorkerResponse::Failed { error: e.to_string() },
        }
    }
}

impl WorkerResponse {
    fn into_outcome(self) -> RunnerResult<DiffOutcome> {
        match self {
            WorkerResponse::Done {
                mis_match_percentage,
                is_same_dimensions,
                diff_bitmap,
            } => {
                let diff_bitmap = diff_bitmap
                    .map(|b| base64::engine::general_purpose::STANDARD.decode(b))
                    .transpose()
                    .map_err(|e| RunnerError::Worker(format!("bad diff bitmap: {}", e)))?;
                Ok(DiffOutcome {
                    mis_match_percentage,
                    is_same_dimensions,
                    diff_bitmap,
                })
            }
            WorkerResponse::Failed { error } => Err(RunnerError::Diff(error)),
        }
    }
}

async fn spawn_worker(worker: &WorkerCommand, request: &WorkerRequest) -> RunnerResult<DiffOutcome> {
    let mut child = Command::new(&worker.program)
        .args(&worker.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| RunnerError::Worker(format!("{}: {}", worker.program.display(), e)))?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| RunnerError::Worker("worker stdin unavailable".into()))?;
    stdin.write_all(&serde_json::to_vec(request)?).await?;
    stdin.shutdown().await?;
    drop(stdin);

    let output = child.wait_with_output().await?;
    if !output.status.success() {
        return Err(RunnerError::Worker(format!("worker exited with {}", output.status)));
    }
    let response: WorkerResponse = serde_json::from_slice(&output.stdout)
        .map_err(|e| RunnerError::Worker(format!("unparsable worker output: {}", e)))?;
    response.into_outcome()
}

/// Body of the `compare-worker` process: one request in, one response out.
pub fn run_worker(diff: &dyn DiffAdapter, mut input: impl Read, mut output: impl Write) -> RunnerResult<()> {
    let mut raw = Vec::new();
    input.read_to_end(&mut raw)?;
    let request: WorkerRequest = serde_json::from_slice(&raw)?;

    let response = WorkerResponse::from(diff.diff(&request.reference, &request.test, &request.options));
    serde_json::to_writer(&mut output, &response)?;
    output.flush()?;
    Ok(())
}
