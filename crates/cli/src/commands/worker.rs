//! `snapgate compare-worker`: one diff per process, request on stdin,
//! response on stdout.

use snapgate_runner::{run_worker, PixelDiff};

pub fn execute() -> anyhow::Result<()> {
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    run_worker(&PixelDiff, stdin.lock(), stdout.lock())?;
    Ok(())
}
