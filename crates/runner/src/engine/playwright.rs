//! Playwright browser automation
//!
//! Each session is a `node` process running a small bridge script. Commands
//! and replies are JSON lines over the child's stdin/stdout; console output
//! of the page is forwarded as events on the same stream.

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::{BrowserEngine, BrowserSession, CaptureRegion, ConsoleMessage, LaunchOptions, WaitCondition};
use crate::error::{EngineError, EngineResult};

const BRIDGE_SCRIPT: &str = include_str!("bridge.js");
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// Engine adapter launching one Playwright-controlled browser per session
pub struct PlaywrightEngine {
    node_binary: String,
    /// Holds the bridge script for the lifetime of the engine
    bridge_dir: TempDir,
}

impl PlaywrightEngine {
    pub fn new(node_binary: impl Into<String>) -> EngineResult<Self> {
        let bridge_dir = tempfile::tempdir()?;
        std::fs::write(bridge_dir.path().join("bridge.js"), BRIDGE_SCRIPT)?;
        Ok(Self {
            node_binary: node_binary.into(),
            bridge_dir,
        })
    }

    fn bridge_path(&self) -> PathBuf {
        self.bridge_dir.path().join("bridge.js")
    }

    /// The bridge lives in a temp dir, so point module resolution back at the
    /// project's `node_modules`.
    fn node_path() -> String {
        let local = std::env::current_dir()
            .map(|d| d.join("node_modules").to_string_lossy().to_string())
            .unwrap_or_else(|_| "node_modules".to_string());
        match std::env::var("NODE_PATH") {
            Ok(existing) if !existing.is_empty() => format!("{}:{}", local, existing),
            _ => local,
        }
    }
}

#[async_trait]
impl BrowserEngine for PlaywrightEngine {
    async fn launch(&self, options: LaunchOptions) -> EngineResult<Box<dyn BrowserSession>> {
        let launch_json = serde_json::to_string(&options)?;
        debug!("Starting Playwright: {}", launch_json);

        let mut child = Command::new(&self.node_binary)
            .arg(self.bridge_path())
            .env("SNAPGATE_LAUNCH", launch_json)
            .env("NODE_PATH", Self::node_path())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::Launch(format!("{}: {}", self.node_binary, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Launch("bridge stdin unavailable".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Launch("bridge stdout unavailable".into()))?;

        let (console_tx, console_rx) = mpsc::unbounded_channel();
        let (inbox_tx, inbox_rx) = mpsc::unbounded_channel();
        tokio::spawn(pump_stdout(stdout, console_tx, inbox_tx));

        let mut session = PlaywrightSession {
            child,
            stdin,
            inbox: inbox_rx,
            console: Some(console_rx),
            next_id: 0,
        };

        match session.inbox.recv().await {
            Some(BridgeMessage::Event { event, .. }) if event == "ready" => Ok(Box::new(session)),
            Some(BridgeMessage::Event { error, .. }) => Err(EngineError::Launch(
                error.unwrap_or_else(|| "bridge reported a fatal error".into()),
            )),
            Some(BridgeMessage::Response { .. }) => {
                Err(EngineError::Protocol("response before ready".into()))
            }
            None => Err(EngineError::Launch("bridge exited during startup".into())),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BridgeMessage {
    Event {
        event: String,
        #[serde(default)]
        level: String,
        #[serde(default)]
        text: String,
        #[serde(default)]
        error: Option<String>,
    },
    Response {
        id: u64,
        ok: bool,
        #[serde(default)]
        value: Value,
        #[serde(default)]
        error: Option<String>,
    },
}

/// Split the bridge's stdout into console events and everything else.
async fn pump_stdout(
    stdout: tokio::process::ChildStdout,
    console_tx: mpsc::UnboundedSender<ConsoleMessage>,
    inbox_tx: mpsc::UnboundedSender<BridgeMessage>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Bridge stdout read failed: {}", e);
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<BridgeMessage>(&line) {
            Ok(BridgeMessage::Event { event, level, text, .. }) if event == "console" => {
                // nobody listening is fine
                let _ = console_tx.send(ConsoleMessage { level, text });
            }
            Ok(message) => {
                if inbox_tx.send(message).is_err() {
                    break;
                }
            }
            Err(_) => debug!("Bridge output: {}", line),
        }
    }
}

struct PlaywrightSession {
    child: Child,
    stdin: ChildStdin,
    inbox: mpsc::UnboundedReceiver<BridgeMessage>,
    console: Option<mpsc::UnboundedReceiver<ConsoleMessage>>,
    next_id: u64,
}

impl PlaywrightSession {
    async fn request(&mut self, mut payload: Value) -> EngineResult<Value> {
        self.next_id += 1;
        let id = self.next_id;
        payload["id"] = json!(id);

        let mut line = serde_json::to_vec(&payload)?;
        line.push(b'\n');
        self.stdin.write_all(&line).await?;
        self.stdin.flush().await?;

        while let Some(message) = self.inbox.recv().await {
            match message {
                BridgeMessage::Response { id: reply, ok, value, error } if reply == id => {
                    return if ok {
                        Ok(value)
                    } else {
                        Err(EngineError::Protocol(
                            error.unwrap_or_else(|| "unknown bridge error".into()),
                        ))
                    };
                }
                BridgeMessage::Event { event, error, .. } if event == "fatal" => {
                    return Err(EngineError::Protocol(error.unwrap_or(event)));
                }
                other => debug!("Ignoring stale bridge message: {:?}", other),
            }
        }
        Err(EngineError::Closed)
    }
}

#[async_trait]
impl BrowserSession for PlaywrightSession {
    fn take_console(&mut self) -> Option<mpsc::UnboundedReceiver<ConsoleMessage>> {
        self.console.take()
    }

    async fn navigate(&mut self, url: &str) -> EngineResult<()> {
        self.request(json!({ "cmd": "navigate", "url": url }))
            .await
            .map(|_| ())
            .map_err(|e| EngineError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            })
    }

    async fn evaluate(&mut self, function: &str, arg: Value) -> EngineResult<Value> {
        self.request(json!({ "cmd": "evaluate", "function": function, "arg": arg }))
            .await
            .map_err(|e| EngineError::Evaluation(e.to_string()))
    }

    async fn wait_for(&mut self, condition: WaitCondition) -> EngineResult<()> {
        match condition {
            WaitCondition::Delay(duration) => {
                tokio::time::sleep(duration).await;
                Ok(())
            }
            WaitCondition::Selector(selector) => self
                .request(json!({ "cmd": "waitSelector", "selector": selector }))
                .await
                .map(|_| ()),
            WaitCondition::Predicate(predicate) => self
                .request(json!({ "cmd": "waitFunction", "predicate": predicate }))
                .await
                .map(|_| ()),
        }
    }

    async fn run_script(&mut self, path: &Path, context: Value) -> EngineResult<()> {
        self.request(json!({
            "cmd": "runScript",
            "path": path.to_string_lossy(),
            "context": context,
        }))
        .await
        .map(|_| ())
    }

    async fn screenshot(&mut self, region: CaptureRegion) -> EngineResult<Vec<u8>> {
        let region = match region {
            CaptureRegion::Viewport => json!({ "kind": "viewport" }),
            CaptureRegion::FullPage => json!({ "kind": "fullPage" }),
            CaptureRegion::Element(selector) => json!({ "kind": "element", "selector": selector }),
        };
        let value = self
            .request(json!({ "cmd": "screenshot", "region": region }))
            .await
            .map_err(|e| EngineError::Screenshot(e.to_string()))?;
        let encoded = value
            .as_str()
            .ok_or_else(|| EngineError::Screenshot("bridge returned no image data".into()))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| EngineError::Screenshot(e.to_string()))
    }

    async fn close(&mut self) -> EngineResult<()> {
        if let Err(e) = self.request(json!({ "cmd": "close" })).await {
            debug!("Bridge close request failed: {}", e);
        }
        match tokio::time::timeout(CLOSE_GRACE, self.child.wait()).await {
            Ok(status) => {
                status?;
            }
            Err(_) => {
                warn!("Bridge did not exit after close; killing it");
                self.child.kill().await?;
            }
        }
        Ok(())
    }
}
