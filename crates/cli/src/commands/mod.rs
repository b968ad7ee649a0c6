//! CLI Commands

pub mod init;
pub mod reference;
pub mod worker;

use anyhow::Context;
use clap::{Args, ValueEnum};
use std::path::Path;
use std::sync::Arc;

use snapgate_common::{IsolationMode, RunConfig};
use snapgate_runner::{PixelDiff, PlaywrightEngine, Runner};

/// Options shared by the capturing commands
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Only run scenarios whose label matches this regular expression
    #[arg(long)]
    pub filter: Option<String>,

    /// Maximum number of concurrent browser sessions
    #[arg(long, env = "SNAPGATE_CAPTURE_LIMIT")]
    pub capture_limit: Option<usize>,

    /// Per-session timeout in milliseconds
    #[arg(long, env = "SNAPGATE_WAIT_TIMEOUT")]
    pub wait_timeout: Option<u64>,

    /// Show the browser window
    #[arg(long)]
    pub headed: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Isolation {
    Thread,
    Process,
}

impl From<Isolation> for IsolationMode {
    fn from(isolation: Isolation) -> Self {
        match isolation {
            Isolation::Thread => IsolationMode::Thread,
            Isolation::Process => IsolationMode::Process,
        }
    }
}

/// Load the run configuration and apply command-line overrides.
pub fn load_config(path: &Path, args: &RunArgs) -> anyhow::Result<RunConfig> {
    let mut config = RunConfig::load(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;

    if let Some(filter) = &args.filter {
        config.retain_scenarios(filter)?;
        if config.scenarios.is_empty() {
            anyhow::bail!("No scenario label matches filter '{}'", filter);
        }
    }
    if let Some(limit) = args.capture_limit.filter(|l| *l > 0) {
        config.async_capture_limit = limit;
    }
    if let Some(timeout) = args.wait_timeout {
        config.engine_options.wait_timeout_ms = timeout;
    }
    if args.headed {
        config.engine_options.headless = false;
    }
    Ok(config)
}

/// Runner using the Playwright engine and the pixel diff.
pub fn runner(config: RunConfig) -> anyhow::Result<Runner> {
    let engine = PlaywrightEngine::new(config.engine_options.node_binary.clone())
        .context("Failed to prepare the Playwright bridge")?;
    Ok(Runner::new(config, Arc::new(engine), Arc::new(PixelDiff)))
}
