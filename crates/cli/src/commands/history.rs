//! Run history browsing

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use std::process::ExitCode;
use vizreg_common::{ProjectConfig, RunSummary};
use vizreg_runner::RunHistory;

use crate::output::{print_list, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct HistoryArgs {
    /// Only runs of this suite
    #[arg(short, long)]
    pub suite: Option<String>,

    /// Maximum number of runs to show
    #[arg(short = 'n', long, default_value = "20")]
    pub limit: usize,
}

/// One history row; JSON output carries the whole summary
#[derive(Serialize)]
#[serde(transparent)]
pub struct HistoryDisplay(pub RunSummary);

impl TableDisplay for HistoryDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["When", "Suite", "Type", "Pass", "Fail", "Skip", "Diffs", "Status"]
    }

    fn row(&self) -> Vec<String> {
        let summary = &self.0;
        let results = &summary.endpoint_test_results;
        let status = if summary.terminated {
            "terminated".yellow().to_string()
        } else if summary.failed {
            "failed".red().to_string()
        } else {
            "ok".green().to_string()
        };

        vec![
            summary
                .created_at
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            summary.suite.clone(),
            summary.test_type.to_string(),
            results.passing.len().to_string(),
            results.failing.len().to_string(),
            results.skipped.len().to_string(),
            summary.test_diff_list.len().to_string(),
            status,
        ]
    }
}

pub fn execute(args: HistoryArgs, project: &ProjectConfig, format: OutputFormat) -> Result<ExitCode> {
    let history = RunHistory::for_project(project);
    let rows: Vec<HistoryDisplay> = history
        .list(args.suite.as_deref(), Some(args.limit))?
        .into_iter()
        .map(HistoryDisplay)
        .collect();

    print_list(&rows, format, "No runs recorded yet.");
    Ok(ExitCode::SUCCESS)
}
