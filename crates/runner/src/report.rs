//! Run report

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use snapgate_common::ComparisonResult;

use crate::error::RunnerResult;

pub const REPORT_FILE_NAME: &str = "report.json";

/// Collects comparison results. Records, never decides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub id: String,
    pub test_suite_name: String,
    pub created_at: DateTime<Utc>,
    tests: Vec<ComparisonResult>,
}

/// Results of one (scenario, viewport) combination
#[derive(Debug, Clone, PartialEq)]
pub struct ReportGroup<'a> {
    pub label: &'a str,
    pub viewport_label: &'a str,
    pub results: Vec<&'a ComparisonResult>,
}

impl Report {
    pub fn new(id: impl Into<String>, test_suite_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            test_suite_name: test_suite_name.into(),
            created_at: Utc::now(),
            tests: Vec::new(),
        }
    }

    pub fn add_result(&mut self, result: ComparisonResult) {
        self.tests.push(result);
    }

    pub fn extend(&mut self, results: impl IntoIterator<Item = ComparisonResult>) {
        self.tests.extend(results);
    }

    pub fn tests(&self) -> &[ComparisonResult] {
        &self.tests
    }

    pub fn total(&self) -> usize {
        self.tests.len()
    }

    pub fn passed(&self) -> usize {
        self.tests.iter().filter(|t| t.passed()).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.passed()
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    /// Results grouped by (scenario, viewport), groups in first-seen order and
    /// results in insertion order within each group.
    pub fn groups(&self) -> Vec<ReportGroup<'_>> {
        let mut groups: Vec<ReportGroup<'_>> = Vec::new();
        for result in &self.tests {
            let pair = &result.pair;
            match groups
                .iter_mut()
                .find(|g| g.label == pair.label && g.viewport_label == pair.viewport_label)
            {
                Some(group) => group.results.push(result),
                None => groups.push(ReportGroup {
                    label: &pair.label,
                    viewport_label: &pair.viewport_label,
                    results: vec![result],
                }),
            }
        }
        groups
    }

    pub fn to_json(&self) -> RunnerResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write `report.json` into `dir`.
    pub async fn write_json(&self, dir: &Path) -> RunnerResult<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;
        let path = dir.join(REPORT_FILE_NAME);
        tokio::fs::write(&path, self.to_json()?).await?;
        info!("Report written to: {}", path.display());
        Ok(path)
    }
}
