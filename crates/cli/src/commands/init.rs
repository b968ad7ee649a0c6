//! `snapgate init`

use anyhow::Context;
use clap::Args;
use std::path::Path;
use tracing::info;

use snapgate_common::RunConfig;

use crate::output;

const ON_READY_SCRIPT: &str = r#"// Runs after the page is ready and before selectors are captured.
module.exports = async (page, scenario, viewport, isReference, browser) => {
  console.log('SCENARIO > ' + scenario.label);
};
"#;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Overwrite an existing config file
    #[arg(long)]
    pub force: bool,
}

pub fn execute(config_path: &Path, args: InitArgs) -> anyhow::Result<()> {
    if config_path.exists() && !args.force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            config_path.display()
        );
    }

    let config = RunConfig::boilerplate();
    config
        .save(config_path)
        .with_context(|| format!("Failed to write {}", config_path.display()))?;
    info!("Wrote config to {}", config_path.display());

    // same resolution RunConfig::load applies
    let mut paths = config.paths.clone();
    if let Some(project_dir) = config_path.parent() {
        paths.resolve_against(project_dir);
    }
    let scripts = paths.engine_scripts;
    std::fs::create_dir_all(&scripts)
        .with_context(|| format!("Failed to create {}", scripts.display()))?;
    let on_ready = scripts.join("onReady.js");
    if !on_ready.exists() {
        std::fs::write(&on_ready, ON_READY_SCRIPT)?;
    }

    output::print_success(&format!("Initialised snapgate project at {}", config_path.display()));
    Ok(())
}
