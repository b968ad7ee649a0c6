//! Browser engine interface
//!
//! The orchestration only talks to a browser through [`BrowserEngine`] and
//! [`BrowserSession`]. [`playwright::PlaywrightEngine`] is the bundled
//! adapter; tests plug in scripted engines.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tokio::sync::mpsc;

use snapgate_common::{EngineKind, EngineOptions, Scenario, Viewport};

use crate::error::EngineResult;

pub mod playwright;

pub use playwright::PlaywrightEngine;

/// Flags passed to the browser unless the configuration replaces them
pub const DEFAULT_FLAGS: &[&str] = &[
    "--disable-gpu",
    "--force-device-scale-factor=1",
    "--disable-infobars=true",
];

/// Everything needed to start one browser session
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchOptions {
    pub engine: EngineKind,
    pub width: u32,
    pub height: u32,
    pub headless: bool,
    pub flags: Vec<String>,
    pub timeout_ms: u64,
    /// `png` or `jpeg`
    pub format: String,
}

impl LaunchOptions {
    /// Options for a session rendering `viewport`.
    pub fn for_viewport(
        engine: EngineKind,
        options: &EngineOptions,
        viewport: &Viewport,
        format: &str,
    ) -> Self {
        let mut flags: Vec<String> = match &options.flags {
            Some(flags) => flags.clone(),
            None => DEFAULT_FLAGS.iter().map(|f| f.to_string()).collect(),
        };
        if !flags
            .iter()
            .any(|f| f.to_ascii_lowercase().starts_with("--window-size="))
        {
            flags.push(format!("--window-size={},{}", viewport.width, viewport.height));
        }

        Self {
            engine,
            width: viewport.width,
            height: viewport.height,
            headless: options.headless,
            flags,
            timeout_ms: options.wait_timeout_ms,
            format: format.to_string(),
        }
    }
}

/// What a session should block on
#[derive(Debug, Clone, PartialEq)]
pub enum WaitCondition {
    /// Until an element matching the selector is attached to the DOM
    Selector(String),
    /// Fixed delay
    Delay(Duration),
    /// Until the JavaScript expression evaluates truthy
    Predicate(String),
}

/// Screenshot target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureRegion {
    Viewport,
    FullPage,
    Element(String),
}

/// A console message emitted by the page
#[derive(Debug, Clone, PartialEq)]
pub struct ConsoleMessage {
    pub level: String,
    pub text: String,
}

/// Arguments handed to before/ready engine scripts
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptContext<'a> {
    pub scenario: &'a Scenario,
    pub viewport: &'a Viewport,
    pub is_reference: bool,
}

#[async_trait]
pub trait BrowserEngine: Send + Sync {
    async fn launch(&self, options: LaunchOptions) -> EngineResult<Box<dyn BrowserSession>>;
}

/// One live page. Calls are strictly sequential.
#[async_trait]
pub trait BrowserSession: Send {
    /// Console output from launch onwards. Only the first call returns a receiver.
    fn take_console(&mut self) -> Option<mpsc::UnboundedReceiver<ConsoleMessage>>;

    async fn navigate(&mut self, url: &str) -> EngineResult<()>;

    /// Evaluate a JavaScript function source in the page, passing `arg` as its
    /// single parameter.
    async fn evaluate(&mut self, function: &str, arg: Value) -> EngineResult<Value>;

    async fn wait_for(&mut self, condition: WaitCondition) -> EngineResult<()>;

    /// Run a before/ready hook inside the engine's scripting host.
    async fn run_script(&mut self, path: &Path, context: Value) -> EngineResult<()>;

    async fn screenshot(&mut self, region: CaptureRegion) -> EngineResult<Vec<u8>>;

    async fn close(&mut self) -> EngineResult<()>;
}
