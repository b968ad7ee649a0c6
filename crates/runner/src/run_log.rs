//! Run log
//!
//! A `tracing` layer that files every event under the (scenario, viewport)
//! of its enclosing spans, split by the `stage` those spans carry. The result
//! is written next to the JSON report as `log.html`, one table row per
//! scenario and viewport.

use serde::Serialize;
use std::fmt::{self, Write as _};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id, Record};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::Layer;

use crate::error::RunnerResult;

pub const LOG_FILE_NAME: &str = "log.html";

/// Span fields that place an event in the run log
#[derive(Debug, Clone, Default, PartialEq)]
struct LogContext {
    scenario: Option<String>,
    viewport: Option<String>,
    stage: Option<String>,
}

impl LogContext {
    /// Fill fields still unset from `other`.
    fn inherit(&mut self, other: &LogContext) {
        if other.scenario.is_some() {
            self.scenario = other.scenario.clone();
        }
        if other.viewport.is_some() {
            self.viewport = other.viewport.clone();
        }
        if other.stage.is_some() {
            self.stage = other.stage.clone();
        }
    }
}

impl Visit for LogContext {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.set(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.set(field, format!("{:?}", value));
    }
}

impl LogContext {
    fn set(&mut self, field: &Field, value: String) {
        match field.name() {
            "scenario" => self.scenario = Some(value),
            "viewport" => self.viewport = Some(value),
            "stage" => self.stage = Some(value),
            _ => {}
        }
    }
}

#[derive(Default)]
struct EventVisitor {
    message: String,
    extra: Vec<String>,
    result: Option<bool>,
}

impl Visit for EventVisitor {
    fn record_bool(&mut self, field: &Field, value: bool) {
        if field.name() == "result" {
            self.result = Some(value);
        } else {
            self.extra.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.extra.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.extra.push(format!("{}={:?}", field.name(), value));
        }
    }
}

impl EventVisitor {
    fn into_text(self) -> String {
        if self.extra.is_empty() {
            self.message
        } else {
            format!("{} {}", self.message, self.extra.join(" "))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogLine {
    pub level: String,
    pub message: String,
    /// Verdict carried by compare lines
    pub result: Option<bool>,
}

/// All lines of one (scenario, viewport)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LogRow {
    pub scenario: String,
    pub viewport: Option<String>,
    pub log: Vec<LogLine>,
    pub browser: Vec<LogLine>,
    pub compare: Vec<LogLine>,
}

#[derive(Default)]
struct RunLogData {
    rows: Vec<LogRow>,
    messages: Vec<LogLine>,
}

/// Shared handle to the lines collected during a run
#[derive(Clone, Default)]
pub struct RunLog {
    inner: Arc<Mutex<RunLogData>>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer feeding this log. Install it once on the global subscriber.
    pub fn layer(&self) -> RunLogLayer {
        RunLogLayer { log: self.clone() }
    }

    fn data(&self) -> MutexGuard<'_, RunLogData> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn record(&self, context: &LogContext, line: LogLine) {
        let mut data = self.data();
        let Some(scenario) = &context.scenario else {
            data.messages.push(line);
            return;
        };

        let index = match data
            .rows
            .iter()
            .position(|r| &r.scenario == scenario && r.viewport == context.viewport)
        {
            Some(index) => index,
            None => {
                data.rows.push(LogRow {
                    scenario: scenario.clone(),
                    viewport: context.viewport.clone(),
                    ..Default::default()
                });
                data.rows.len() - 1
            }
        };
        let row = &mut data.rows[index];
        match context.stage.as_deref() {
            Some("browser") => row.browser.push(line),
            Some("compare") => row.compare.push(line),
            _ => row.log.push(line),
        }
    }

    /// Rows in first-seen order
    pub fn rows(&self) -> Vec<LogRow> {
        self.data().rows.clone()
    }

    /// Lines logged outside any scenario
    pub fn messages(&self) -> Vec<LogLine> {
        self.data().messages.clone()
    }

    pub fn to_html(&self, title: &str) -> String {
        let data = self.data();
        let mut html = String::new();
        let _ = write!(
            html,
            "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{}</title></head>\n<body>\n<h1>{}</h1>\n",
            escape_html(title),
            escape_html(title)
        );
        html.push_str("<table border=\"1\" cellspacing=\"0\" cellpadding=\"4\">\n");
        html.push_str("<tr><th>Scenario</th><th>Viewport</th><th>Log</th><th>Browser</th><th>Compare</th></tr>\n");
        for row in &data.rows {
            let _ = writeln!(
                html,
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                escape_html(&row.scenario),
                escape_html(row.viewport.as_deref().unwrap_or("")),
                lines_html(&row.log),
                lines_html(&row.browser),
                lines_html(&row.compare)
            );
        }
        html.push_str("</table>\n<ul>\n");
        for line in &data.messages {
            let _ = writeln!(
                html,
                "<li style=\"background: {}\">{}</li>",
                level_color(&line.level),
                escape_html(&line.message)
            );
        }
        html.push_str("</ul>\n</body>\n</html>\n");
        html
    }

    /// Write `log.html` into `dir`.
    pub async fn write_html(&self, dir: &Path, title: &str) -> RunnerResult<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(LOG_FILE_NAME);
        tokio::fs::write(&path, self.to_html(title)).await?;
        Ok(path)
    }
}

fn lines_html(lines: &[LogLine]) -> String {
    let mut html = String::new();
    for line in lines {
        let _ = write!(
            html,
            "<p><span style=\"background: {}\">{}</span></p>",
            level_color(&line.level),
            escape_html(&line.message)
        );
        match line.result {
            Some(true) => html.push_str("<h2 style=\"background: lightgreen\">SUCCESS</h2>"),
            Some(false) => html.push_str("<h2 style=\"background: lightcoral\">FAILURE</h2>"),
            None => {}
        }
    }
    html
}

fn level_color(level: &str) -> &'static str {
    match level {
        "ERROR" => "lightcoral",
        "WARN" => "yellow",
        "INFO" => "lightgrey",
        _ => "lightblue",
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            c => escaped.push(c),
        }
    }
    escaped
}

pub struct RunLogLayer {
    log: RunLog,
}

impl<S> Layer<S> for RunLogLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(&self, attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
        let mut context = LogContext::default();
        attrs.record(&mut context);
        if context == LogContext::default() {
            return;
        }
        if let Some(span) = ctx.span(id) {
            span.extensions_mut().insert(context);
        }
    }

    fn on_record(&self, id: &Id, values: &Record<'_>, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };
        let mut extensions = span.extensions_mut();
        match extensions.get_mut::<LogContext>() {
            Some(context) => values.record(context),
            None => {
                let mut context = LogContext::default();
                values.record(&mut context);
                extensions.insert(context);
            }
        }
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let mut context = LogContext::default();
        if let Some(scope) = ctx.event_scope(event) {
            for span in scope.from_root() {
                if let Some(span_context) = span.extensions().get::<LogContext>() {
                    context.inherit(span_context);
                }
            }
        }

        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);
        let result = visitor.result;
        self.log.record(
            &context,
            LogLine {
                level: level_name(event.metadata().level()).to_string(),
                message: visitor.into_text(),
                result,
            },
        );
    }
}

fn level_name(level: &Level) -> &'static str {
    match *level {
        Level::ERROR => "ERROR",
        Level::WARN => "WARN",
        Level::INFO => "INFO",
        Level::DEBUG => "DEBUG",
        Level::TRACE => "TRACE",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tracing::{error, info, info_span, warn};
    use tracing_subscriber::layer::SubscriberExt;

    fn collect<F: FnOnce()>(f: F) -> RunLog {
        let log = RunLog::new();
        let subscriber = tracing_subscriber::registry().with(log.layer());
        tracing::subscriber::with_default(subscriber, f);
        log
    }

    #[test]
    fn test_events_are_filed_by_scenario_viewport_and_stage() {
        let log = collect(|| {
            info!("Starting run");
            let session = info_span!("session", stage = "browser", scenario = %"home", viewport = %"phone");
            session.in_scope(|| {
                info!("Navigating to http://x/");
                let inner = info_span!("dispatch");
                inner.in_scope(|| warn!(selector = "h1", "Element not visible"));
            });
            let compare = info_span!("compare", stage = "compare", scenario = %"home", viewport = %"phone");
            compare.in_scope(|| error!(result = false, "ERROR home"));
            let other = info_span!("compare", stage = "compare", scenario = %"home", viewport = %"tablet");
            other.in_scope(|| info!(result = true, "OK home"));
        });

        let rows = log.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].scenario, "home");
        assert_eq!(rows[0].viewport.as_deref(), Some("phone"));
        assert_eq!(rows[0].browser.len(), 2);
        assert_eq!(rows[0].browser[0].message, "Navigating to http://x/");
        assert_eq!(rows[0].browser[1].message, "Element not visible selector=h1");
        assert_eq!(rows[0].browser[1].level, "WARN");
        assert_eq!(rows[0].compare[0].result, Some(false));
        assert!(rows[0].log.is_empty());
        assert_eq!(rows[1].viewport.as_deref(), Some("tablet"));
        assert_eq!(rows[1].compare[0].result, Some(true));

        let messages = log.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message, "Starting run");
    }

    #[test]
    fn test_span_without_stage_goes_to_log_column() {
        let log = collect(|| {
            let span = info_span!("script", scenario = %"about");
            span.in_scope(|| info!("Cookie state restored"));
        });
        let rows = log.rows();
        assert_eq!(rows[0].log[0].message, "Cookie state restored");
        assert_eq!(rows[0].viewport, None);
    }

    #[tokio::test]
    async fn test_write_html_escapes_and_marks_verdicts() {
        let log = collect(|| {
            let span = info_span!("compare", stage = "compare", scenario = %"a<b>", viewport = %"phone");
            span.in_scope(|| error!(result = false, "mismatch & more"));
        });
        let tmp = TempDir::new().unwrap();

        let path = log.write_html(&tmp.path().join("report"), "nightly").await.unwrap();
        assert_eq!(path.file_name().unwrap(), LOG_FILE_NAME);
        let html = std::fs::read_to_string(path).unwrap();
        assert!(html.contains("<title>nightly</title>"));
        assert!(html.contains("a&lt;b&gt;"));
        assert!(html.contains("mismatch &amp; more"));
        assert!(html.contains("FAILURE"));
    }
}
