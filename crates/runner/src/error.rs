//! Error types for the capture and compare stages

use thiserror::Error;

/// Failures reported by a browser engine adapter
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Engine failed to launch: {0}")]
    Launch(String),

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Script evaluation failed: {0}")]
    Evaluation(String),

    #[error("Screenshot failed: {0}")]
    Screenshot(String),

    #[error("Engine protocol error: {0}")]
    Protocol(String),

    #[error("Engine session closed")]
    Closed,

    #[error("Timeout waiting for: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Failures of the orchestration itself
#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Invalid ready event pattern '{pattern}': {reason}")]
    ReadyEventPattern { pattern: String, reason: String },

    #[error("Diff failed: {0}")]
    Diff(String),

    #[error("Compare worker failed: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Config(#[from] snapgate_common::Error),
}

pub type RunnerResult<T> = Result<T, RunnerError>;
