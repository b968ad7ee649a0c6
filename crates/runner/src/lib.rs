//! Snapgate capture-and-compare runner
//!
//! Drives browser sessions to capture bitmaps for every scenario and
//! viewport, compares them against stored references, and aggregates the
//! outcome into a report and a per-scenario run log.

pub mod capture;
pub mod compare;
pub mod diff;
pub mod engine;
pub mod error;
pub mod placeholder;
pub mod report;
pub mod run_log;
pub mod runner;
pub mod selector;
pub mod session;

pub use compare::{run_worker, CompareScheduler, WorkerCommand};
pub use diff::{DiffAdapter, DiffOptions, DiffOutcome, PixelDiff};
pub use engine::{BrowserEngine, BrowserSession, PlaywrightEngine};
pub use error::{EngineError, EngineResult, RunnerError, RunnerResult};
pub use placeholder::{Placeholder, PlaceholderSet};
pub use report::Report;
pub use run_log::{RunLog, RunLogLayer};
pub use runner::{CaptureSummary, Runner};
pub use session::{SessionDriver, SessionOutcome, Stage};
