//! Core data model shared by the capture and compare stages

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Captures the whole scrollable document.
pub const DOCUMENT_SELECTOR: &str = "document";
/// Captures `<body>` clipped to the viewport.
pub const BODY_SELECTOR: &str = "body";
/// Captures `<body>` without clipping, i.e. the full page.
pub const NOCLIP_SELECTOR: &str = "body:noclip";
/// Captures exactly what is visible in the viewport.
pub const VIEWPORT_SELECTOR: &str = "viewport";

/// Returns true for the selectors that never need a DOM lookup.
pub fn is_sentinel(selector: &str) -> bool {
    matches!(
        selector,
        DOCUMENT_SELECTOR | BODY_SELECTOR | NOCLIP_SELECTOR | VIEWPORT_SELECTOR
    )
}

/// One logical page/state to be visually tested
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Scenario {
    /// Human-readable label, part of every bitmap name
    pub label: String,

    /// Position in the configured scenario list
    #[serde(skip)]
    pub index: usize,

    pub url: String,

    /// Alternative URL used when capturing references
    pub reference_url: Option<String>,

    /// Engine script run before navigation
    pub on_before_script: Option<PathBuf>,

    /// Engine script run once the page is ready
    pub on_ready_script: Option<PathBuf>,

    /// Regex matched against console output; capture waits for the first match
    pub ready_event: Option<String>,

    /// Selector that must be present before capture
    pub ready_selector: Option<String>,

    /// Fixed delay in milliseconds after the ready conditions
    pub delay: u64,

    /// Elements hidden with `display: none` before capture
    pub remove_selectors: Vec<String>,

    /// Elements hidden with `visibility: hidden` before capture
    pub hide_selectors: Vec<String>,

    /// Elements to capture; empty means the whole document
    pub selectors: Vec<String>,

    /// Expand selectors matching several elements into one capture each
    pub selector_expansion: bool,

    /// Allowed mismatch percentage; falls back to the run-wide value
    pub mis_match_threshold: Option<f64>,

    /// Fail whenever reference and test sizes differ
    pub require_same_dimensions: Option<bool>,

    /// Expected number of images for each viewport of this scenario
    pub expect: Option<usize>,
}

/// One screen-size configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Viewport {
    #[serde(default, alias = "name")]
    pub label: String,

    #[serde(skip)]
    pub index: usize,

    pub width: u32,
    pub height: u32,
}

/// Per-selector record produced while resolving selectors in a live page
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SelectorState {
    pub exists: bool,
    pub is_visible: bool,
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

impl SelectorState {
    /// State used for sentinels, which are always capturable.
    pub fn present() -> Self {
        Self {
            exists: true,
            is_visible: true,
            file_path: None,
        }
    }
}

/// A reference/test bitmap association for one capture job
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonPair {
    pub reference: PathBuf,
    pub test: PathBuf,
    pub selector: String,
    pub file_name: String,
    pub label: String,
    pub viewport_label: String,
    pub mis_match_threshold: f64,
    pub require_same_dimensions: bool,
    #[serde(default)]
    pub expect: Option<usize>,
    pub url: String,
    #[serde(default)]
    pub reference_url: Option<String>,
    /// Set on the synthetic pair emitted when a browser session fails
    #[serde(default)]
    pub engine_error: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ComparisonStatus {
    Pass,
    Fail,
}

/// Outcome of comparing one pair
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComparisonResult {
    pub pair: ComparisonPair,
    pub status: ComparisonStatus,
    pub mismatch_percent: Option<f64>,
    pub dimensions_match: Option<bool>,
    pub diff_image: Option<PathBuf>,
    pub error: Option<String>,
}

impl ComparisonResult {
    /// A failure decided without running the diff.
    pub fn failed(pair: ComparisonPair, error: impl Into<String>) -> Self {
        Self {
            pair,
            status: ComparisonStatus::Fail,
            mismatch_percent: None,
            dimensions_match: None,
            diff_image: None,
            error: Some(error.into()),
        }
    }

    pub fn passed(&self) -> bool {
        self.status == ComparisonStatus::Pass
    }
}
