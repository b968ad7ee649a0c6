//! Capture dispatch
//!
//! Groups the resolved selectors of one session into at most three
//! screenshot jobs (document, viewport, element list) and runs them one after
//! the other against the live page. A selector that cannot be captured gets a
//! placeholder bitmap instead; nothing here fails the session.

use std::path::{Path, PathBuf};
use tracing::{debug, error, warn};

use snapgate_common::{NamingScheme, Scenario, SelectorState, Viewport};

use crate::engine::{BrowserSession, CaptureRegion};
use crate::error::EngineResult;
use crate::placeholder::{Placeholder, PlaceholderSet};
use crate::selector::{classify, CaptureKind};

/// One unit of screenshot work. Everything about it, including both bitmap
/// paths, follows from these four fields.
#[derive(Debug, Clone, Copy)]
pub struct CaptureJob<'a> {
    pub scenario: &'a Scenario,
    pub viewport: &'a Viewport,
    pub selector: &'a str,
    pub selector_index: usize,
}

impl CaptureJob<'_> {
    pub fn file_name(&self, naming: &NamingScheme) -> String {
        naming.file_name(self.scenario, self.selector_index, self.selector, self.viewport)
    }
}

/// A selector together with where its bitmap goes
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureTarget {
    pub selector: String,
    pub selector_index: usize,
    pub path: PathBuf,
    pub state: SelectorState,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchJob {
    Document(Vec<CaptureTarget>),
    Viewport(Vec<CaptureTarget>),
    Elements(Vec<CaptureTarget>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CaptureOutcome {
    Written,
    Substituted(Placeholder),
    /// Even the error placeholder could not be written
    Lost(String),
}

/// Group targets into the document, viewport and element jobs, skipping
/// empty ones.
pub fn plan(targets: Vec<CaptureTarget>) -> Vec<DispatchJob> {
    let mut document = Vec::new();
    let mut viewport = Vec::new();
    let mut elements = Vec::new();

    for target in targets {
        match classify(&target.selector) {
            CaptureKind::Document { .. } => document.push(target),
            CaptureKind::Viewport => viewport.push(target),
            CaptureKind::Element => elements.push(target),
        }
    }

    let mut jobs = Vec::with_capacity(3);
    if !document.is_empty() {
        jobs.push(DispatchJob::Document(document));
    }
    if !viewport.is_empty() {
        jobs.push(DispatchJob::Viewport(viewport));
    }
    if !elements.is_empty() {
        jobs.push(DispatchJob::Elements(elements));
    }
    jobs
}

/// Runs dispatch jobs against one session
pub struct CaptureDispatcher<'a> {
    placeholders: &'a PlaceholderSet,
}

impl<'a> CaptureDispatcher<'a> {
    pub fn new(placeholders: &'a PlaceholderSet) -> Self {
        Self { placeholders }
    }

    /// Execute every job sequentially; returns one outcome per target.
    pub async fn dispatch(
        &self,
        session: &mut dyn BrowserSession,
        jobs: Vec<DispatchJob>,
    ) -> Vec<(CaptureTarget, CaptureOutcome)> {
        let mut outcomes = Vec::new();
        for job in jobs {
            match job {
                DispatchJob::Document(targets) | DispatchJob::Viewport(targets) => {
                    for target in targets {
                        let region = match classify(&target.selector) {
                            CaptureKind::Document { full_page: true } => CaptureRegion::FullPage,
                            _ => CaptureRegion::Viewport,
                        };
                        let outcome = self.capture_region(session, region, &target.path).await;
                        outcomes.push((target, outcome));
                    }
                }
                DispatchJob::Elements(targets) => {
                    for target in targets {
                        let outcome = self.capture_element(session, &target).await;
                        outcomes.push((target, outcome));
                    }
                }
            }
        }
        outcomes
    }

    async fn capture_region(
        &self,
        session: &mut dyn BrowserSession,
        region: CaptureRegion,
        path: &Path,
    ) -> CaptureOutcome {
        match capture_to(session, region, path).await {
            Ok(()) => CaptureOutcome::Written,
            Err(e) => {
                error!("Error capturing {}: {}", path.display(), e);
                self.substitute(Placeholder::Error, path).await
            }
        }
    }

    async fn capture_element(
        &self,
        session: &mut dyn BrowserSession,
        target: &CaptureTarget,
    ) -> CaptureOutcome {
        if !target.state.exists {
            debug!("Element not found for capturing: {}", target.selector);
            return self.substitute(Placeholder::NotFound, &target.path).await;
        }
        if !target.state.is_visible {
            debug!("Element not visible for capturing: {}", target.selector);
            return self.substitute(Placeholder::NotVisible, &target.path).await;
        }

        let region = CaptureRegion::Element(target.selector.clone());
        match capture_to(session, region, &target.path).await {
            Ok(()) => CaptureOutcome::Written,
            Err(e) => {
                error!("Error capturing element {}: {}", target.selector, e);
                self.substitute(Placeholder::Error, &target.path).await
            }
        }
    }

    async fn substitute(&self, kind: Placeholder, path: &Path) -> CaptureOutcome {
        match self.placeholders.copy_to(kind, path).await {
            Ok(()) => CaptureOutcome::Substituted(kind),
            Err(e) => {
                warn!("Could not write {:?} placeholder to {}: {}", kind, path.display(), e);
                CaptureOutcome::Lost(e.to_string())
            }
        }
    }
}

async fn capture_to(
    session: &mut dyn BrowserSession,
    region: CaptureRegion,
    path: &Path,
) -> EngineResult<()> {
    let bytes = session.screenshot(region).await?;
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, bytes).await?;
    Ok(())
}
