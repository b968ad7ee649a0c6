//! Snapgate Common Library
//!
//! Shared data model, deterministic bitmap naming and run configuration for
//! the snapgate visual regression runner.

pub mod config;
pub mod error;
pub mod naming;
pub mod types;

// Re-export commonly used types
pub use config::{EngineKind, EngineOptions, IsolationMode, LoggerKind, PathsConfig, RunConfig};
pub use error::{Error, Result};
pub use naming::NamingScheme;
pub use types::*;

/// Snapgate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
