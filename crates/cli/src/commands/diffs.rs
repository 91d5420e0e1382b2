//! Diff listing

use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::process::ExitCode;
use vizreg_common::{ArtifactRole, ProjectConfig};

use super::suite_store;
use crate::output::{print_list, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct DiffsArgs {
    /// Suite name
    #[arg(short, long)]
    pub suite: String,

    /// List the lab namespace instead
    #[arg(long)]
    pub lab: bool,
}

#[derive(Serialize)]
pub struct DiffDisplay {
    pub test_title: String,
    pub diff_file: String,
    pub has_received: bool,
    pub has_baseline: bool,
}

impl TableDisplay for DiffDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Test", "Diff", "Received", "Baseline"]
    }

    fn row(&self) -> Vec<String> {
        let mark = |present: bool| if present { "yes" } else { "-" }.to_string();
        vec![
            self.test_title.clone(),
            self.diff_file.clone(),
            mark(self.has_received),
            mark(self.has_baseline),
        ]
    }
}

pub fn execute(args: DiffsArgs, project: &ProjectConfig, format: OutputFormat) -> Result<ExitCode> {
    let mut store = suite_store(project, &args.suite)?;
    if args.lab {
        store = store.lab();
    }

    let rows: Vec<DiffDisplay> = store
        .list_diffs()?
        .into_iter()
        .map(|identity| DiffDisplay {
            test_title: identity.canonical(),
            diff_file: identity.file_name(ArtifactRole::Diff),
            has_received: store.path(&identity, ArtifactRole::Received).is_file(),
            has_baseline: store.path(&identity, ArtifactRole::Baseline).is_file(),
        })
        .collect();

    print_list(&rows, format, &format!("No diffs for suite '{}'", args.suite));
    Ok(ExitCode::SUCCESS)
}
