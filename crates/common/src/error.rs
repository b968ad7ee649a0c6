//! Error types for snapgate

use thiserror::Error;

/// Result type alias using the snapgate common error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while loading configuration or preparing a run
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid scenario filter '{pattern}': {reason}")]
    InvalidFilter { pattern: String, reason: String },
}
