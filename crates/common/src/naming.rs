//! Deterministic bitmap file naming
//!
//! The same function names both the reference and the test bitmap of a
//! capture job; only the root directory differs. Pairs therefore line up
//! across runs as long as the configuration is unchanged.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

use crate::types::{Scenario, Viewport};

pub const DEFAULT_FILENAME_TEMPLATE: &str =
    "{configId}_{scenarioLabel}_{selectorIndex}_{selectorLabel}_{viewportIndex}_{viewportLabel}";

/// Replace spaces and slashes so a label can be embedded in a file name.
pub fn make_safe(label: &str) -> String {
    label.replace([' ', '/'], "_")
}

/// Keep only `[A-Za-z0-9_-]`.
pub fn sanitize(value: &str) -> String {
    value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// Build a bitmap file name from a template.
#[allow(clippy::too_many_arguments)]
pub fn name(
    template: &str,
    suffix: &str,
    config_id: &str,
    scenario_index: usize,
    scenario_label: &str,
    selector_index: usize,
    selector_label: &str,
    viewport_index: usize,
    viewport_label: &str,
) -> String {
    let substituted = template
        .replacen("{configId}", config_id, 1)
        .replacen("{scenarioIndex}", &scenario_index.to_string(), 1)
        .replacen("{scenarioLabel}", &make_safe(scenario_label), 1)
        .replacen("{selectorIndex}", &selector_index.to_string(), 1)
        .replacen("{selectorLabel}", &sanitize(selector_label), 1)
        .replacen("{viewportIndex}", &viewport_index.to_string(), 1)
        .replacen("{viewportLabel}", &make_safe(viewport_label), 1);

    let mut file_name = sanitize(&substituted);
    if !file_name.to_ascii_lowercase().ends_with(&suffix.to_ascii_lowercase()) {
        file_name.push_str(suffix);
    }
    file_name
}

/// Derive a config id from the config file location.
pub fn config_id_for(config_path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(config_path.to_string_lossy().as_bytes());
    hex::encode(hasher.finalize())[..8].to_string()
}

/// Map an output format setting onto a file suffix.
pub fn suffix_for_format(format: Option<&str>) -> &'static str {
    match format.map(|f| f.to_ascii_lowercase()) {
        Some(f) if f.contains("jpeg") => ".jpeg",
        Some(f) if f.contains("jpg") => ".jpg",
        _ => ".png",
    }
}

/// Naming parameters fixed for a whole run
#[derive(Debug, Clone, PartialEq)]
pub struct NamingScheme {
    pub template: String,
    pub suffix: String,
    pub config_id: String,
    pub reference_root: PathBuf,
    pub test_root: PathBuf,
}

impl NamingScheme {
    pub fn file_name(
        &self,
        scenario: &Scenario,
        selector_index: usize,
        selector: &str,
        viewport: &Viewport,
    ) -> String {
        name(
            &self.template,
            &self.suffix,
            &self.config_id,
            scenario.index,
            &scenario.label,
            selector_index,
            selector,
            viewport.index,
            &viewport.label,
        )
    }

    pub fn reference_path(&self, file_name: &str) -> PathBuf {
        self.reference_root.join(file_name)
    }

    pub fn test_path(&self, file_name: &str) -> PathBuf {
        self.test_root.join(file_name)
    }
}
