//! Bounded log of run summaries, stored as one JSON array (newest last)

use std::path::{Path, PathBuf};
use tracing::{debug, info};
use vizreg_common::{ProjectConfig, RunSummary};

use crate::error::RunResult;

pub struct RunHistory {
    path: PathBuf,
    limit: usize,
}

impl RunHistory {
    pub fn new(path: impl Into<PathBuf>, limit: usize) -> Self {
        Self {
            path: path.into(),
            limit: limit.max(1),
        }
    }

    pub fn for_project(project: &ProjectConfig) -> Self {
        Self::new(project.history_path(), project.history_limit())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All entries, oldest first; a missing file is an empty history
    pub fn load(&self) -> RunResult<Vec<RunSummary>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = std::fs::read_to_string(&self.path)?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&content)?)
    }

    /// Append `summary`, evicting the oldest entries beyond the limit
    pub fn record(&self, summary: &RunSummary) -> RunResult<()> {
        let mut entries = self.load()?;
        entries.push(summary.clone());

        if entries.len() > self.limit {
            let evicted = entries.len() - self.limit;
            entries.drain(..evicted);
            debug!("Evicted {} old history entries", evicted);
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_vec_pretty(&entries)?)?;
        std::fs::rename(&tmp, &self.path)?;

        info!(
            "Recorded run {} for suite '{}' in {}",
            summary.id,
            summary.suite,
            self.path.display()
        );
        Ok(())
    }

    /// Newest first, optionally for one suite
    pub fn list(&self, suite: Option<&str>, limit: Option<usize>) -> RunResult<Vec<RunSummary>> {
        let entries = self.load()?;
        Ok(entries
            .into_iter()
            .rev()
            .filter(|s| suite.map_or(true, |name| s.suite == name))
            .take(limit.unwrap_or(usize::MAX))
            .collect())
    }

    /// Most recent summary for `suite`
    pub fn latest(&self, suite: &str) -> RunResult<Option<RunSummary>> {
        Ok(self.list(Some(suite), Some(1))?.into_iter().next())
    }
}
