//! Snapgate CLI - Main Entry Point
//!
//! Captures reference bitmaps, runs visual regression tests against them and
//! reports the results.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use snapgate_common::{LoggerKind, RunConfig};
use snapgate_runner::RunLog;

mod commands;
mod output;

use commands::{init, reference, test, worker};

/// Snapgate - visual regression testing for web pages
#[derive(Parser)]
#[command(name = "snapgate")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to the run configuration (json, yaml or toml)
    #[arg(short, long, default_value = "snapgate.json", env = "SNAPGATE_CONFIG", global = true)]
    config: PathBuf,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a starter config and engine scripts directory
    Init(init::InitArgs),

    /// Capture reference bitmaps
    Reference(reference::ReferenceArgs),

    /// Capture test bitmaps and compare them against the references
    Test(test::TestArgs),

    /// Run a single comparison read from stdin
    #[command(hide = true)]
    CompareWorker,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging; stdout is reserved for command output
    let log_level = if cli.verbose { "debug" } else { "info" };
    let console = match logger_kind(&cli.command, &cli.config) {
        LoggerKind::Console => Some(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        ),
        LoggerKind::Nil => None,
    };
    let run_log = RunLog::new();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with(console)
        .with(run_log.layer())
        .init();

    match cli.command {
        Commands::Init(args) => init::execute(&cli.config, args)?,
        Commands::Reference(args) => reference::execute(&cli.config, args, &run_log).await?,
        Commands::Test(args) => {
            if !test::execute(&cli.config, args, cli.format, &run_log).await? {
                std::process::exit(1);
            }
        }
        Commands::CompareWorker => worker::execute()?,
    }

    Ok(())
}

/// Console logging switch of the config a capturing command will load.
/// Falls back to console output; load errors surface when the command runs.
fn logger_kind(command: &Commands, config: &Path) -> LoggerKind {
    match command {
        Commands::Reference(_) | Commands::Test(_) => RunConfig::load(config)
            .map(|c| c.logger)
            .unwrap_or_default(),
        Commands::Init(_) | Commands::CompareWorker => LoggerKind::Console,
    }
}
