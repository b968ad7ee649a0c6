//! Run configuration

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{Error, Result};
use crate::naming::{self, NamingScheme, DEFAULT_FILENAME_TEMPLATE};
use crate::types::{Scenario, Viewport};

pub const DEFAULT_CAPTURE_LIMIT: usize = 10;
pub const DEFAULT_COMPARE_LIMIT: usize = 20;
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_MISMATCH_THRESHOLD: f64 = 0.1;

/// Top-level configuration for a capture/compare run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RunConfig {
    /// Stable id used as `{configId}` in file names
    pub id: Option<String>,

    pub viewports: Vec<Viewport>,

    pub scenarios: Vec<Scenario>,

    pub paths: PathsConfig,

    /// Browser engine to drive
    pub engine: EngineKind,

    pub engine_options: EngineOptions,

    /// Maximum number of browser sessions alive at once
    pub async_capture_limit: usize,

    /// Maximum number of comparisons running at once
    pub async_compare_limit: usize,

    pub compare_isolation: IsolationMode,

    pub file_name_template: String,

    /// `png` (default), `jpg` or `jpeg`
    pub output_format: Option<String>,

    pub mis_match_threshold: f64,

    pub require_same_dimensions: bool,

    /// Run-wide defaults, overridden per scenario
    pub on_before_script: Option<PathBuf>,
    pub on_ready_script: Option<PathBuf>,
    pub ready_event: Option<String>,

    pub test_suite_name: String,

    /// Where log lines go besides the per-scenario run log
    pub logger: LoggerKind,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            id: None,
            viewports: Vec::new(),
            scenarios: Vec::new(),
            paths: PathsConfig::default(),
            engine: EngineKind::default(),
            engine_options: EngineOptions::default(),
            async_capture_limit: DEFAULT_CAPTURE_LIMIT,
            async_compare_limit: DEFAULT_COMPARE_LIMIT,
            compare_isolation: IsolationMode::default(),
            file_name_template: DEFAULT_FILENAME_TEMPLATE.to_string(),
            output_format: None,
            mis_match_threshold: DEFAULT_MISMATCH_THRESHOLD,
            require_same_dimensions: true,
            on_before_script: None,
            on_ready_script: None,
            ready_event: None,
            test_suite_name: "snapgate".to_string(),
            logger: LoggerKind::default(),
        }
    }
}

/// On-disk locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PathsConfig {
    pub bitmaps_reference: PathBuf,
    pub bitmaps_test: PathBuf,
    pub engine_scripts: PathBuf,
    pub placeholders: PathBuf,
    pub json_report: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            bitmaps_reference: PathBuf::from("snapgate_data/bitmaps_reference"),
            bitmaps_test: PathBuf::from("snapgate_data/bitmaps_test"),
            engine_scripts: PathBuf::from("snapgate_data/engine_scripts"),
            placeholders: PathBuf::from("snapgate_data/placeholders"),
            json_report: PathBuf::from("snapgate_data/json_report"),
        }
    }
}

impl PathsConfig {
    /// Join every relative entry onto `base`.
    pub fn resolve_against(&mut self, base: &Path) {
        for path in [
            &mut self.bitmaps_reference,
            &mut self.bitmaps_test,
            &mut self.engine_scripts,
            &mut self.placeholders,
            &mut self.json_report,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    #[default]
    Chromium,
    Firefox,
    Webkit,
}

impl EngineKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Chromium => "chromium",
            EngineKind::Firefox => "firefox",
            EngineKind::Webkit => "webkit",
        }
    }
}

/// Browser launch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineOptions {
    pub headless: bool,

    /// Replaces the default browser flags when set
    pub flags: Option<Vec<String>>,

    /// Bounds navigation and every explicit wait of one session
    pub wait_timeout_ms: u64,

    /// Command used to run the engine bridge
    pub node_binary: String,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            headless: true,
            flags: None,
            wait_timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
            node_binary: "node".to_string(),
        }
    }
}

/// How each comparison is isolated from its siblings
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IsolationMode {
    /// One freshly spawned OS thread per comparison, never reused
    #[default]
    Thread,
    /// One short-lived child process per comparison
    Process,
}

/// Console output switch
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LoggerKind {
    /// Log lines are printed to stderr
    #[default]
    Console,
    /// Nothing is printed; the run log still records every line
    Nil,
}

impl RunConfig {
    /// Load configuration from a JSON, YAML or TOML file. Relative paths are
    /// resolved against the directory holding the file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = match extension(path).as_str() {
            "json" => serde_json::from_str(&content)?,
            "yaml" | "yml" => serde_yaml::from_str(&content)?,
            "toml" => toml::from_str(&content)?,
            other => return Err(Error::UnsupportedFormat(other.to_string())),
        };
        if config.id.is_none() {
            config.id = Some(naming::config_id_for(path));
        }
        if let Some(base) = path.parent() {
            config.paths.resolve_against(base);
        }
        config.normalize();
        config.validate()?;
        debug!(
            "Loaded {} scenario(s) x {} viewport(s) from {}",
            config.scenarios.len(),
            config.viewports.len(),
            path.display()
        );
        Ok(config)
    }

    /// Save configuration to a file, picking the format from the extension.
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = match extension(path).as_str() {
            "json" => serde_json::to_string_pretty(self)?,
            "yaml" | "yml" => serde_yaml::to_string(self)?,
            "toml" => toml::to_string_pretty(self)?,
            other => return Err(Error::UnsupportedFormat(other.to_string())),
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Assign indices and fill in fields that were left empty.
    pub fn normalize(&mut self) {
        for (index, scenario) in self.scenarios.iter_mut().enumerate() {
            scenario.index = index;
        }
        for (index, viewport) in self.viewports.iter_mut().enumerate() {
            viewport.index = index;
        }
        if self.async_capture_limit == 0 {
            self.async_capture_limit = DEFAULT_CAPTURE_LIMIT;
        }
        if self.async_compare_limit == 0 {
            self.async_compare_limit = DEFAULT_COMPARE_LIMIT;
        }
        if self.file_name_template.is_empty() {
            self.file_name_template = DEFAULT_FILENAME_TEMPLATE.to_string();
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.viewports.is_empty() {
            return Err(Error::InvalidConfig("at least one viewport is required".into()));
        }
        for viewport in &self.viewports {
            if viewport.width == 0 || viewport.height == 0 {
                return Err(Error::InvalidConfig(format!(
                    "viewport '{}' has an empty size",
                    viewport.label
                )));
            }
        }
        for scenario in &self.scenarios {
            if scenario.url.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "scenario '{}' has no url",
                    scenario.label
                )));
            }
        }
        Ok(())
    }

    pub fn config_id(&self) -> &str {
        self.id.as_deref().unwrap_or("snapgate")
    }

    /// Naming scheme for a run whose test bitmaps go under `test_root`.
    pub fn naming_scheme(&self, test_root: PathBuf) -> NamingScheme {
        NamingScheme {
            template: self.file_name_template.clone(),
            suffix: naming::suffix_for_format(self.output_format.as_deref()).to_string(),
            config_id: self.config_id().to_string(),
            reference_root: self.paths.bitmaps_reference.clone(),
            test_root,
        }
    }

    pub fn threshold_for(&self, scenario: &Scenario) -> f64 {
        scenario.mis_match_threshold.unwrap_or(self.mis_match_threshold)
    }

    pub fn require_same_dimensions_for(&self, scenario: &Scenario) -> bool {
        scenario
            .require_same_dimensions
            .unwrap_or(self.require_same_dimensions)
    }

    /// Keep only scenarios whose label matches `pattern`. Indices are kept so
    /// file names stay identical to an unfiltered run.
    pub fn retain_scenarios(&mut self, pattern: &str) -> Result<()> {
        let re = Regex::new(pattern).map_err(|e| Error::InvalidFilter {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        self.scenarios.retain(|s| re.is_match(&s.label));
        Ok(())
    }

    /// A minimal configuration written by `snapgate init`.
    pub fn boilerplate() -> Self {
        let mut config = Self {
            id: Some("snapgate_default".to_string()),
            viewports: vec![
                Viewport {
                    label: "phone".into(),
                    index: 0,
                    width: 320,
                    height: 480,
                },
                Viewport {
                    label: "tablet".into(),
                    index: 1,
                    width: 1024,
                    height: 768,
                },
            ],
            scenarios: vec![Scenario {
                label: "snapgate homepage".into(),
                url: "https://example.com".into(),
                ..Default::default()
            }],
            on_ready_script: Some(PathBuf::from("onReady.js")),
            ..Default::default()
        };
        config.normalize();
        config
    }
}

fn extension(path: &Path) -> String {
    path.extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default()
}
