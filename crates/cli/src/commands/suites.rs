//! Suite listing

use anyhow::Result;
use serde::Serialize;
use std::process::ExitCode;
use tracing::warn;
use vizreg_common::ProjectConfig;

use crate::output::{print_list, OutputFormat, TableDisplay};

#[derive(Serialize)]
pub struct SuiteDisplay {
    pub name: String,
    pub base_url: String,
    pub endpoints: usize,
    pub viewports: Vec<String>,
}

impl TableDisplay for SuiteDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Suite", "Base URL", "Endpoints", "Viewports"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.base_url.clone(),
            self.endpoints.to_string(),
            self.viewports.join(", "),
        ]
    }
}

pub fn execute(project: &ProjectConfig, format: OutputFormat) -> Result<ExitCode> {
    let mut rows = Vec::new();
    for name in project.suite_names()? {
        match project.load_suite(&name) {
            Ok(suite) => rows.push(SuiteDisplay {
                name: suite.name,
                base_url: suite.base_url,
                endpoints: suite.endpoints.len(),
                viewports: suite.viewports.iter().map(|v| v.canonical()).collect(),
            }),
            Err(e) => warn!("Skipping suite '{}': {}", name, e),
        }
    }

    print_list(
        &rows,
        format,
        &format!("No suites under {}", project.suites_dir().display()),
    );
    Ok(ExitCode::SUCCESS)
}
