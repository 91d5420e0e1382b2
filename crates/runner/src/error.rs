//! Error types for run orchestration

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] vizreg_common::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Targeted runs need at least one endpoint title or viewport filter")]
    NoTargetFilters,

    #[error("No matching endpoints for filters (endpoints: {endpoints:?}, viewports: {viewports:?})")]
    NoMatchingTargets {
        endpoints: Vec<String>,
        viewports: Vec<String>,
    },

    #[error("No diffs found for suite '{0}'")]
    NoDiffs(String),

    #[error("Failed to spawn capture engine: {0}")]
    EngineSpawn(String),

    #[error("A run is already active for suite '{0}'")]
    AlreadyRunning(String),

    #[error("No assessment in progress")]
    NotAssessing,

    #[error("Diff {index} is not the one under assessment (current: {current:?})")]
    NotCurrent { index: usize, current: Option<usize> },

    #[error("Diff {0} has already been decided")]
    AlreadyDecided(usize),

    #[error("Diff index {index} out of range ({len} diffs)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Artifact not found: {}", .0.display())]
    ArtifactMissing(PathBuf),

    #[error("Artifacts for '{identity}' left inconsistent while trying to {step}: {source}")]
    Inconsistent {
        identity: String,
        step: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl RunError {
    /// Errors raised before any filesystem mutation because the request or config is invalid
    pub fn is_validation(&self) -> bool {
        match self {
            RunError::Config(e) => e.is_validation(),
            RunError::NoTargetFilters
            | RunError::NoMatchingTargets { .. }
            | RunError::NoDiffs(_) => true,
            _ => false,
        }
    }
}

pub type RunResult<T> = Result<T, RunError>;
