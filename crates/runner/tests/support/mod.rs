//! Scripted browser engine used by the integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use image::{ImageOutputFormat, Rgba, RgbaImage};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

use snapgate_common::{PathsConfig, RunConfig, Scenario, Viewport};
use snapgate_runner::engine::{
    BrowserEngine, BrowserSession, CaptureRegion, ConsoleMessage, LaunchOptions, WaitCondition,
};
use snapgate_runner::{EngineError, EngineResult};

/// Element state in the fake page
#[derive(Debug, Clone, Copy)]
pub struct Element {
    pub exists: bool,
    pub visible: bool,
}

/// Describes how every session of the scripted engine behaves
#[derive(Debug, Clone, Default)]
pub struct PageScript {
    pub elements: HashMap<String, Element>,
    pub console: Vec<String>,
    /// URL substrings whose navigation fails
    pub failing_urls: Vec<String>,
    /// Number of elements a selector matches when more than one
    pub counts: HashMap<String, usize>,
    /// Element selectors whose screenshot fails
    pub failing_screenshots: Vec<String>,
}

impl PageScript {
    pub fn with_element(mut self, selector: &str, exists: bool, visible: bool) -> Self {
        self.elements.insert(selector.to_string(), Element { exists, visible });
        self
    }

    /// A visible selector matching `count` elements
    pub fn with_repeated(mut self, selector: &str, count: usize) -> Self {
        self.counts.insert(selector.to_string(), count);
        self.with_element(selector, true, true)
    }

    pub fn with_failing_screenshot(mut self, selector: &str) -> Self {
        self.failing_screenshots.push(selector.to_string());
        self
    }
}

/// One `evaluate` call as the page saw it
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub function: String,
    pub arg: Value,
}

/// Counters shared between the engine and its sessions
#[derive(Debug, Default)]
pub struct EngineLog {
    pub launches: AtomicUsize,
    pub closes: AtomicUsize,
    pub screenshots: Mutex<Vec<CaptureRegion>>,
    pub scripts: Mutex<Vec<PathBuf>>,
    pub launch_options: Mutex<Vec<LaunchOptions>>,
    pub evaluations: Mutex<Vec<Evaluation>>,
    /// Sessions launched and not yet closed
    pub open_sessions: AtomicUsize,
    pub max_open_sessions: AtomicUsize,
}

impl EngineLog {
    /// Position of the first evaluation whose argument satisfies `pred`
    pub fn evaluation_index(&self, pred: impl Fn(&Evaluation) -> bool) -> Option<usize> {
        self.evaluations.lock().unwrap().iter().position(pred)
    }
}

pub struct ScriptedEngine {
    script: PageScript,
    pub log: Arc<EngineLog>,
}

impl ScriptedEngine {
    pub fn new(script: PageScript) -> Self {
        Self {
            script,
            log: Arc::new(EngineLog::default()),
        }
    }
}

#[async_trait]
impl BrowserEngine for ScriptedEngine {
    async fn launch(&self, options: LaunchOptions) -> EngineResult<Box<dyn BrowserSession>> {
        self.log.launches.fetch_add(1, Ordering::SeqCst);
        let open = self.log.open_sessions.fetch_add(1, Ordering::SeqCst) + 1;
        self.log.max_open_sessions.fetch_max(open, Ordering::SeqCst);
        let (console_tx, console_rx) = mpsc::unbounded_channel();
        for text in &self.script.console {
            let _ = console_tx.send(ConsoleMessage {
                level: "log".into(),
                text: text.clone(),
            });
        }
        let color = [(options.width % 251) as u8, (options.height % 251) as u8, 90, 255];
        self.log.launch_options.lock().unwrap().push(options);
        Ok(Box::new(ScriptedSession {
            script: self.script.clone(),
            log: Arc::clone(&self.log),
            console: Some(console_rx),
            _console_tx: console_tx,
            color,
        }))
    }
}

struct ScriptedSession {
    script: PageScript,
    log: Arc<EngineLog>,
    console: Option<mpsc::UnboundedReceiver<ConsoleMessage>>,
    /// Keeps the console open for the whole session
    _console_tx: mpsc::UnboundedSender<ConsoleMessage>,
    color: [u8; 4],
}

impl ScriptedSession {
    fn element(&self, selector: &str) -> Element {
        if snapgate_common::is_sentinel(selector) {
            return Element {
                exists: true,
                visible: true,
            };
        }
        // `h1.__n2` is the third element matched by `h1`
        let base = selector.split(".__n").next().unwrap_or(selector);
        self.script.elements.get(base).copied().unwrap_or(Element {
            exists: false,
            visible: false,
        })
    }
}

#[async_trait]
impl BrowserSession for ScriptedSession {
    fn take_console(&mut self) -> Option<mpsc::UnboundedReceiver<ConsoleMessage>> {
        self.console.take()
    }

    async fn navigate(&mut self, url: &str) -> EngineResult<()> {
        if self.script.failing_urls.iter().any(|u| url.contains(u.as_str())) {
            return Err(EngineError::Navigation {
                url: url.to_string(),
                reason: "net::ERR_CONNECTION_REFUSED".into(),
            });
        }
        Ok(())
    }

    async fn evaluate(&mut self, function: &str, arg: Value) -> EngineResult<Value> {
        self.log.evaluations.lock().unwrap().push(Evaluation {
            function: function.to_string(),
            arg: arg.clone(),
        });
        let Some(expand) = arg.get("expand").and_then(Value::as_bool) else {
            return Ok(json!(true));
        };
        let mut selectors: Vec<String> = serde_json::from_value(arg["selectors"].clone())?;
        if expand {
            selectors = selectors
                .into_iter()
                .flat_map(|selector| {
                    let count = self.script.counts.get(&selector).copied().unwrap_or(1);
                    let mut expanded = vec![selector.clone()];
                    expanded.extend((1..count).map(|i| format!("{}.__n{}", selector, i)));
                    expanded
                })
                .collect();
        }
        let entries: Vec<Value> = selectors
            .iter()
            .map(|selector| {
                let element = self.element(selector);
                json!({
                    "selector": selector,
                    "exists": element.exists,
                    "isVisible": element.visible,
                })
            })
            .collect();
        Ok(Value::Array(entries))
    }

    async fn wait_for(&mut self, condition: WaitCondition) -> EngineResult<()> {
        if let WaitCondition::Delay(duration) = condition {
            tokio::time::sleep(duration).await;
        }
        Ok(())
    }

    async fn run_script(&mut self, path: &Path, _context: Value) -> EngineResult<()> {
        self.log.scripts.lock().unwrap().push(path.to_path_buf());
        Ok(())
    }

    async fn screenshot(&mut self, region: CaptureRegion) -> EngineResult<Vec<u8>> {
        self.log.screenshots.lock().unwrap().push(region.clone());
        if let CaptureRegion::Element(selector) = &region {
            if self.script.failing_screenshots.contains(selector) {
                return Err(EngineError::Screenshot(format!("{} is detached", selector)));
            }
        }
        Ok(png(16, 16, self.color))
    }

    async fn close(&mut self) -> EngineResult<()> {
        self.log.closes.fetch_add(1, Ordering::SeqCst);
        self.log.open_sessions.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn png(width: u32, height: u32, color: [u8; 4]) -> Vec<u8> {
    let mut bytes = Vec::new();
    RgbaImage::from_pixel(width, height, Rgba(color))
        .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
        .unwrap();
    bytes
}

pub fn viewport(label: &str, width: u32, height: u32) -> Viewport {
    Viewport {
        label: label.into(),
        index: 0,
        width,
        height,
    }
}

pub fn scenario(label: &str, selectors: &[&str]) -> Scenario {
    Scenario {
        label: label.into(),
        url: format!("http://localhost:3000/{}", label),
        selectors: selectors.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    }
}

/// A run configuration writing everything below `tmp`
pub fn config(tmp: &TempDir, scenarios: Vec<Scenario>, viewports: Vec<Viewport>) -> RunConfig {
    let root = tmp.path();
    let mut config = RunConfig {
        id: Some("itest".into()),
        scenarios,
        viewports,
        paths: PathsConfig {
            bitmaps_reference: root.join("bitmaps_reference"),
            bitmaps_test: root.join("bitmaps_test"),
            engine_scripts: root.join("engine_scripts"),
            placeholders: root.join("placeholders"),
            json_report: root.join("json_report"),
        },
        ..Default::default()
    };
    config.normalize();
    config
}
