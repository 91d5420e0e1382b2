//! Dry-run planning

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use std::process::ExitCode;
use vizreg_common::{ProjectConfig, TestType};
use vizreg_runner::{RunRequest, RunSession};

use super::TargetArgs;
use crate::output::{print_json, print_list, print_warning, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct PlanArgs {
    /// Suite name
    #[arg(short, long)]
    pub suite: String,

    /// full-test, diffs-only, targeted or lab
    #[arg(short = 't', long = "type")]
    pub test_type: TestType,

    #[command(flatten)]
    pub targets: TargetArgs,
}

#[derive(Serialize)]
pub struct AgendaRow {
    pub position: usize,
    pub test_title: String,
    pub endpoint_title: String,
    pub viewport: String,
}

impl TableDisplay for AgendaRow {
    fn headers() -> Vec<&'static str> {
        vec!["#", "Test", "Endpoint", "Viewport"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.position.to_string(),
            self.test_title.clone(),
            self.endpoint_title.clone(),
            self.viewport.clone(),
        ]
    }
}

pub fn execute(args: PlanArgs, project: &ProjectConfig, format: OutputFormat) -> Result<ExitCode> {
    let request = RunRequest::new(&args.suite, args.test_type).with_filters(args.targets.filters());
    let session = RunSession::prepare(project, request)?;
    let plan = session.plan();

    if format == OutputFormat::Json {
        print_json(plan);
        return Ok(ExitCode::SUCCESS);
    }

    println!(
        "{} {} ({:?} artifacts)",
        plan.test_type.to_string().bold(),
        plan.suite,
        plan.policy
    );
    for endpoint in &plan.unmatched.endpoint_titles {
        print_warning(&format!("No endpoint titled '{}'", endpoint));
    }
    for viewport in &plan.unmatched.viewports {
        print_warning(&format!("No viewport named '{}'", viewport));
    }

    let rows: Vec<AgendaRow> = plan
        .agenda
        .iter()
        .enumerate()
        .map(|(i, identity)| AgendaRow {
            position: i + 1,
            test_title: identity.canonical(),
            endpoint_title: identity.endpoint_title.clone(),
            viewport: identity.viewport.canonical(),
        })
        .collect();
    print_list(&rows, format, "Nothing to run.");
    Ok(ExitCode::SUCCESS)
}
