//! Output formatting for CLI
//!
//! The report goes to stdout; status lines go to stderr so that `--format
//! json` and `--format yaml` leave a single parseable document on stdout.

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};

use snapgate_common::ComparisonResult;
use snapgate_runner::Report;

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
    /// Plain text format
    Plain,
}

const HEADERS: [&str; 6] = ["Scenario", "Viewport", "Selector", "Status", "Mismatch", "Details"];

fn row(result: &ComparisonResult) -> Vec<String> {
    vec![
        result.pair.label.clone(),
        result.pair.viewport_label.clone(),
        result.pair.selector.clone(),
        if result.passed() { "pass" } else { "fail" }.to_string(),
        result
            .mismatch_percent
            .map(|m| format!("{:.2}%", m))
            .unwrap_or_else(|| "-".to_string()),
        result
            .error
            .clone()
            .or_else(|| result.diff_image.as_ref().map(|p| p.display().to_string()))
            .unwrap_or_default(),
    ]
}

/// Render the report in `format`.
pub fn render_report(report: &Report, format: OutputFormat) -> String {
    match format {
        OutputFormat::Json => report.to_json().unwrap_or_default(),
        OutputFormat::Yaml => serde_yaml::to_string(report).unwrap_or_default(),
        OutputFormat::Table | OutputFormat::Plain => {
            let body = if report.tests().is_empty() {
                "No comparisons.".to_string()
            } else if format == OutputFormat::Table {
                let mut table = Table::new();
                table
                    .load_preset(UTF8_FULL)
                    .set_content_arrangement(ContentArrangement::Dynamic);
                table.set_header(HEADERS.to_vec());
                for result in report.tests() {
                    table.add_row(row(result));
                }
                table.to_string()
            } else {
                report
                    .tests()
                    .iter()
                    .map(|result| {
                        HEADERS
                            .iter()
                            .zip(row(result))
                            .map(|(header, value)| format!("{}: {}", header, value))
                            .collect::<Vec<_>>()
                            .join("\n")
                    })
                    .collect::<Vec<_>>()
                    .join("\n---\n")
            };
            format!(
                "{}\n{} ({}): {} passed, {} failed",
                body,
                report.test_suite_name,
                report.id,
                report.passed().to_string().green(),
                report.failed().to_string().red()
            )
        }
    }
}

pub fn print_report(report: &Report, format: OutputFormat) {
    println!("{}", render_report(report, format));
}

/// Print success message
pub fn print_success(message: &str) {
    eprintln!("✅ {}", message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("❌ {}", message);
}

/// Print warning message
pub fn print_warning(message: &str) {
    eprintln!("⚠️  {}", message);
}

/// Print info message
pub fn print_info(message: &str) {
    eprintln!("ℹ️  {}", message);
}
