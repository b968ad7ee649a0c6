//! `snapgate reference`

use clap::Args;
use std::path::Path;

use snapgate_runner::RunLog;

use super::{load_config, runner, RunArgs};
use crate::output;

#[derive(Args, Debug)]
pub struct ReferenceArgs {
    #[command(flatten)]
    pub run: RunArgs,
}

pub async fn execute(config_path: &Path, args: ReferenceArgs, run_log: &RunLog) -> anyhow::Result<()> {
    let config = load_config(config_path, &args.run)?;
    // a filtered run only refreshes the matching references
    let incremental = args.run.filter.is_some();
    let reference_dir = config.paths.bitmaps_reference.clone();
    let report_dir = config.paths.json_report.clone();
    let title = config.config_id().to_string();

    let summary = runner(config)?.reference(incremental).await?;
    let log_path = run_log.write_html(&report_dir, &title).await?;

    if summary.errored > 0 {
        output::print_warning(&format!(
            "{} of {} session(s) failed; their references were replaced by error placeholders",
            summary.errored, summary.sessions
        ));
    }
    output::print_success(&format!(
        "Captured references for {} session(s) into {}",
        summary.sessions,
        reference_dir.display()
    ));
    output::print_info(&format!("Log: {}", log_path.display()));
    Ok(())
}
