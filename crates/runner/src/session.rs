//! Scenario session driver
//!
//! Drives one browser session for one (scenario, viewport) pair through a
//! fixed sequence of stages. Stages never overlap. The first failing stage
//! ends the session: the browser is force-closed and a single synthetic
//! comparison pair carrying the error replaces everything the session would
//! have produced.

use regex::Regex;
use serde_json::{json, Value};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, info_span, warn, Instrument};

use snapgate_common::{ComparisonPair, NamingScheme, RunConfig, Scenario, Viewport};

use crate::capture::{plan, CaptureDispatcher, CaptureJob, CaptureOutcome, CaptureTarget};
use crate::engine::{
    BrowserEngine, BrowserSession, ConsoleMessage, LaunchOptions, ScriptContext, WaitCondition,
};
use crate::error::{EngineError, RunnerError, RunnerResult};
use crate::placeholder::{Placeholder, PlaceholderSet};
use crate::selector::{self, normalize_selectors, ResolvedSelectors, CAPTURE_HELPERS};

const FORCE_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

const REMOVE_SELECTORS: &str = r#"({ selectors }) => {
  selectors.forEach(sel => document.querySelectorAll(sel).forEach(el => {
    el.style.cssText = 'display: none !important;';
    el.classList.add('__86d');
  }));
  return true;
}"#;

const HIDE_SELECTORS: &str = r#"({ selectors }) => {
  selectors.forEach(sel => document.querySelectorAll(sel).forEach(el => {
    el.style.visibility = 'hidden';
  }));
  return true;
}"#;

/// Lifecycle stages, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Launch,
    BeforeScript,
    Navigate,
    InjectHelpers,
    WaitReadyEvent,
    WaitReadySelector,
    WaitDelay,
    RemoveSelectors,
    ReadyScript,
    ReinjectHelpers,
    HideSelectors,
    ResolveSelectors,
    DispatchCapture,
    Close,
}

impl Stage {
    pub const SEQUENCE: [Stage; 14] = [
        Stage::Launch,
        Stage::BeforeScript,
        Stage::Navigate,
        Stage::InjectHelpers,
        Stage::WaitReadyEvent,
        Stage::WaitReadySelector,
        Stage::WaitDelay,
        Stage::RemoveSelectors,
        Stage::ReadyScript,
        Stage::ReinjectHelpers,
        Stage::HideSelectors,
        Stage::ResolveSelectors,
        Stage::DispatchCapture,
        Stage::Close,
    ];

    /// Stages covered by the per-session deadline
    fn is_bounded(self) -> bool {
        !matches!(self, Stage::DispatchCapture | Stage::Close)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Launch => "launch",
            Stage::BeforeScript => "before-script",
            Stage::Navigate => "navigate",
            Stage::InjectHelpers => "inject-capture-helpers",
            Stage::WaitReadyEvent => "wait-ready-event",
            Stage::WaitReadySelector => "wait-ready-selector",
            Stage::WaitDelay => "wait-delay",
            Stage::RemoveSelectors => "remove-selectors",
            Stage::ReadyScript => "ready-script",
            Stage::ReinjectHelpers => "reinject-capture-helpers",
            Stage::HideSelectors => "hide-selectors",
            Stage::ResolveSelectors => "resolve-selectors",
            Stage::DispatchCapture => "dispatch-capture",
            Stage::Close => "close-session",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A session that stopped at `stage`
#[derive(Debug, Clone, PartialEq)]
pub struct SessionFailure {
    pub stage: Stage,
    pub message: String,
}

/// Everything one session produced
#[derive(Debug, Default)]
pub struct SessionOutcome {
    /// Empty in reference mode unless the session failed
    pub pairs: Vec<ComparisonPair>,
    pub captures: Vec<(CaptureTarget, CaptureOutcome)>,
    pub failure: Option<SessionFailure>,
}

impl SessionOutcome {
    pub fn errored(&self) -> bool {
        self.failure.is_some()
    }
}

/// Mutable state threaded through the stages of one session
#[derive(Default)]
struct SessionContext {
    session: Option<Box<dyn BrowserSession>>,
    console: Option<mpsc::UnboundedReceiver<ConsoleMessage>>,
    resolved: Option<ResolvedSelectors>,
    outcome: SessionOutcome,
}

/// Drives sessions for one run
pub struct SessionDriver<'a> {
    engine: &'a dyn BrowserEngine,
    config: &'a RunConfig,
    naming: &'a NamingScheme,
    placeholders: &'a PlaceholderSet,
    is_reference: bool,
}

impl<'a> SessionDriver<'a> {
    pub fn new(
        engine: &'a dyn BrowserEngine,
        config: &'a RunConfig,
        naming: &'a NamingScheme,
        placeholders: &'a PlaceholderSet,
        is_reference: bool,
    ) -> Self {
        Self {
            engine,
            config,
            naming,
            placeholders,
            is_reference,
        }
    }

    /// Run the full lifecycle for one (scenario, viewport) pair. Never fails;
    /// errors are reported through [`SessionOutcome::failure`].
    pub async fn run(&self, scenario: &Scenario, viewport: &Viewport) -> SessionOutcome {
        let span = info_span!(
            "session",
            stage = "browser",
            scenario = %scenario.label,
            viewport = %viewport.label
        );
        self.run_stages(scenario, viewport).instrument(span).await
    }

    async fn run_stages(&self, scenario: &Scenario, viewport: &Viewport) -> SessionOutcome {
        if self.is_reference {
            info!("Creating reference files");
        }
        let deadline = Instant::now() + Duration::from_millis(self.config.engine_options.wait_timeout_ms);
        let mut ctx = SessionContext::default();

        for stage in Stage::SEQUENCE {
            debug!(%stage, "Entering stage");
            let result = if stage.is_bounded() {
                match tokio::time::timeout_at(deadline, self.run_stage(stage, scenario, viewport, &mut ctx)).await {
                    Ok(result) => result,
                    Err(_) => Err(EngineError::Timeout(stage.to_string()).into()),
                }
            } else {
                self.run_stage(stage, scenario, viewport, &mut ctx).await
            };

            if let Err(e) = result {
                error!(%stage, "Session failed: {}", e);
                if let Some(mut session) = ctx.session.take() {
                    if tokio::time::timeout(FORCE_CLOSE_TIMEOUT, session.close()).await.is_err() {
                        warn!("Browser did not close in time; dropping it");
                    }
                }
                return self.failed_outcome(scenario, viewport, stage, &e).await;
            }
        }
        ctx.outcome
    }

    async fn run_stage(
        &self,
        stage: Stage,
        scenario: &Scenario,
        viewport: &Viewport,
        ctx: &mut SessionContext,
    ) -> RunnerResult<()> {
        if stage == Stage::Launch {
            return self.launch(viewport, ctx).await;
        }
        let session = ctx.session.as_deref_mut().ok_or(EngineError::Closed)?;

        match stage {
            Stage::Launch => Ok(()),
            Stage::BeforeScript => {
                let script = scenario.on_before_script.as_ref().or(self.config.on_before_script.as_ref());
                self.run_engine_script(session, script, scenario, viewport).await
            }
            Stage::Navigate => {
                let url = match (&scenario.reference_url, self.is_reference) {
                    (Some(reference_url), true) => reference_url.as_str(),
                    _ => scenario.url.as_str(),
                };
                let url = translate_url(url);
                debug!("Navigating to {}", url);
                session.navigate(&url).await?;
                Ok(())
            }
            Stage::InjectHelpers | Stage::ReinjectHelpers => {
                session.evaluate(CAPTURE_HELPERS, Value::Null).await?;
                Ok(())
            }
            Stage::WaitReadyEvent => {
                let Some(pattern) = scenario.ready_event.as_ref().or(self.config.ready_event.as_ref()) else {
                    return Ok(());
                };
                let re = Regex::new(pattern).map_err(|e| RunnerError::ReadyEventPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })?;
                let console = ctx.console.as_mut().ok_or(EngineError::Closed)?;
                wait_for_console(console, &re).await?;
                info!("readyEvent ok");
                Ok(())
            }
            Stage::WaitReadySelector => {
                if let Some(selector) = &scenario.ready_selector {
                    session.wait_for(WaitCondition::Selector(selector.clone())).await?;
                }
                Ok(())
            }
            Stage::WaitDelay => {
                if scenario.delay > 0 {
                    session
                        .wait_for(WaitCondition::Delay(Duration::from_millis(scenario.delay)))
                        .await?;
                }
                Ok(())
            }
            Stage::RemoveSelectors => {
                if !scenario.remove_selectors.is_empty() {
                    session
                        .evaluate(REMOVE_SELECTORS, json!({ "selectors": scenario.remove_selectors }))
                        .await?;
                }
                Ok(())
            }
            Stage::ReadyScript => {
                let script = scenario.on_ready_script.as_ref().or(self.config.on_ready_script.as_ref());
                self.run_engine_script(session, script, scenario, viewport).await
            }
            Stage::HideSelectors => {
                if !scenario.hide_selectors.is_empty() {
                    session
                        .evaluate(HIDE_SELECTORS, json!({ "selectors": scenario.hide_selectors }))
                        .await?;
                }
                Ok(())
            }
            Stage::ResolveSelectors => {
                let resolved =
                    selector::resolve(session, &scenario.selectors, scenario.selector_expansion).await?;
                ctx.resolved = Some(resolved);
                Ok(())
            }
            Stage::DispatchCapture => {
                let resolved = ctx.resolved.take().unwrap_or_default();
                let targets = self.targets(scenario, viewport, &resolved, &mut ctx.outcome.pairs);
                let dispatcher = CaptureDispatcher::new(self.placeholders);
                ctx.outcome.captures = dispatcher.dispatch(session, plan(targets)).await;
                Ok(())
            }
            Stage::Close => {
                if let Some(mut session) = ctx.session.take() {
                    if let Err(e) = session.close().await {
                        warn!("Closing browser failed: {}", e);
                    }
                }
                debug!("Browser closed");
                Ok(())
            }
        }
    }

    async fn launch(&self, viewport: &Viewport, ctx: &mut SessionContext) -> RunnerResult<()> {
        let format = if self.naming.suffix == ".png" { "png" } else { "jpeg" };
        let options = LaunchOptions::for_viewport(
            self.config.engine,
            &self.config.engine_options,
            viewport,
            format,
        );
        let mut session = self.engine.launch(options).await?;
        if let Some(console) = session.take_console() {
            ctx.console = Some(forward_console(console));
        }
        ctx.session = Some(session);
        Ok(())
    }

    async fn run_engine_script(
        &self,
        session: &mut dyn BrowserSession,
        script: Option<&PathBuf>,
        scenario: &Scenario,
        viewport: &Viewport,
    ) -> RunnerResult<()> {
        let Some(script) = script else {
            return Ok(());
        };
        let path = self.config.paths.engine_scripts.join(script);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            warn!("Script not found: {}", path.display());
            return Ok(());
        }
        let context = serde_json::to_value(ScriptContext {
            scenario,
            viewport,
            is_reference: self.is_reference,
        })?;
        session.run_script(&path, context).await?;
        Ok(())
    }

    /// Compute target paths for every resolved selector, queueing one
    /// comparison pair per selector outside reference mode.
    fn targets(
        &self,
        scenario: &Scenario,
        viewport: &Viewport,
        resolved: &ResolvedSelectors,
        pairs: &mut Vec<ComparisonPair>,
    ) -> Vec<CaptureTarget> {
        resolved
            .selectors
            .iter()
            .enumerate()
            .map(|(selector_index, selector)| {
                let job = CaptureJob {
                    scenario,
                    viewport,
                    selector,
                    selector_index,
                };
                let file_name = job.file_name(self.naming);
                let pair = self.pair(scenario, viewport, selector, file_name);
                let path = if self.is_reference {
                    pair.reference.clone()
                } else {
                    pair.test.clone()
                };
                if !self.is_reference {
                    pairs.push(pair);
                }

                let mut state = resolved.state(selector);
                state.file_path = Some(path.clone());
                CaptureTarget {
                    selector: selector.clone(),
                    selector_index,
                    path,
                    state,
                }
            })
            .collect()
    }

    fn pair(
        &self,
        scenario: &Scenario,
        viewport: &Viewport,
        selector: &str,
        file_name: String,
    ) -> ComparisonPair {
        ComparisonPair {
            reference: self.naming.reference_path(&file_name),
            test: self.naming.test_path(&file_name),
            selector: selector.to_string(),
            file_name,
            label: scenario.label.clone(),
            viewport_label: viewport.label.clone(),
            mis_match_threshold: self.config.threshold_for(scenario),
            require_same_dimensions: self.config.require_same_dimensions_for(scenario),
            expect: scenario.expect.filter(|n| *n > 0),
            url: scenario.url.clone(),
            reference_url: scenario.reference_url.clone(),
            engine_error: None,
        }
    }

    /// The synthetic outcome standing in for a failed session.
    async fn failed_outcome(
        &self,
        scenario: &Scenario,
        viewport: &Viewport,
        stage: Stage,
        cause: &RunnerError,
    ) -> SessionOutcome {
        let message = format!("{} failed: {}", stage, cause);
        let joined = normalize_selectors(&scenario.selectors).join("__");
        let job = CaptureJob {
            scenario,
            viewport,
            selector: &joined,
            selector_index: 0,
        };
        let file_name = job.file_name(self.naming);
        let mut pair = self.pair(scenario, viewport, &joined, file_name);
        pair.engine_error = Some(message.clone());

        let path = if self.is_reference { &pair.reference } else { &pair.test };
        if let Err(e) = self.placeholders.copy_to(Placeholder::Error, path).await {
            warn!("Could not write engine error placeholder: {}", e);
        }

        SessionOutcome {
            pairs: vec![pair],
            captures: Vec::new(),
            failure: Some(SessionFailure { stage, message }),
        }
    }
}

/// Log every console message and pass it on for ready-event matching.
fn forward_console(
    mut console: mpsc::UnboundedReceiver<ConsoleMessage>,
) -> mpsc::UnboundedReceiver<ConsoleMessage> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(
        async move {
            while let Some(message) = console.recv().await {
                debug!("Browser console {}: {}", message.level, message.text);
                if tx.send(message).is_err() {
                    break;
                }
            }
        }
        .in_current_span(),
    );
    rx
}

async fn wait_for_console(
    console: &mut mpsc::UnboundedReceiver<ConsoleMessage>,
    pattern: &Regex,
) -> RunnerResult<()> {
    while let Some(message) = console.recv().await {
        if pattern.is_match(&message.text) {
            return Ok(());
        }
    }
    Err(EngineError::Closed.into())
}

/// Relative file names become `file://` URLs under the working directory.
pub fn translate_url(url: &str) -> String {
    if url.starts_with('.') || url.starts_with('/') {
        let cwd = std::env::current_dir().unwrap_or_default();
        let file_url = format!("file://{}", cwd.join(url.trim_start_matches('/')).display());
        debug!("Relative filename detected -- translating to {}", file_url);
        file_url
    } else {
        url.to_string()
    }
}
