//! vizreg Common Library
//!
//! Shared data model, canonical naming and layered configuration for the
//! vizreg visual regression orchestrator.

pub mod config;
pub mod error;
pub mod naming;
pub mod types;

// Re-export commonly used types
pub use config::{Defaults, EngineSettings, ProjectConfig, SuiteConfig};
pub use error::{Error, Result};
pub use naming::{ArtifactRole, TestIdentity, Viewport, IDENTITY_DELIMITER};
pub use types::*;

/// vizreg version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
