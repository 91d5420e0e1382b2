//! CLI Commands

pub mod assess;
pub mod diffs;
pub mod history;
pub mod plan;
pub mod run;
pub mod serve;
pub mod suites;

use clap::Args;
use vizreg_common::ProjectConfig;
use vizreg_runner::{ArtifactStore, TargetFilters};

/// Endpoint and viewport selection shared by `plan` and `run`
#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Endpoint title to include (repeatable)
    #[arg(long = "endpoint", value_name = "TITLE")]
    pub endpoints: Vec<String>,

    /// Viewport to include (repeatable)
    #[arg(long = "viewport", value_name = "NAME")]
    pub viewports: Vec<String>,
}

impl TargetArgs {
    pub fn filters(&self) -> TargetFilters {
        TargetFilters::new(self.endpoints.clone(), self.viewports.clone())
    }
}

/// Artifact store of a suite after checking that the suite exists
pub fn suite_store(project: &ProjectConfig, suite: &str) -> anyhow::Result<ArtifactStore> {
    let suite = project.load_suite(suite)?;
    Ok(ArtifactStore::for_suite(&project.suite_dir(&suite.name)))
}
