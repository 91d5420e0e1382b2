//! Interactive diff review

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use vizreg_common::{ArtifactRole, AssessmentSummary, ProjectConfig};
use vizreg_runner::{Assessment, AssessmentItem};

use super::suite_store;
use crate::output::{print_error, print_info, print_json, print_success, print_warning, OutputFormat};

#[derive(Args)]
pub struct AssessArgs {
    /// Suite name
    #[arg(short, long)]
    pub suite: String,

    /// Approve every diff without prompting
    #[arg(long)]
    pub approve_all: bool,
}

/// A keypress at the assessment prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Choice {
    Approve,
    Reject,
    ApproveAll,
    Quit,
}

impl Choice {
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim() {
            "a" | "y" => Some(Choice::Approve),
            "r" | "n" => Some(Choice::Reject),
            "A" => Some(Choice::ApproveAll),
            "q" | "Q" => Some(Choice::Quit),
            _ => None,
        }
    }
}

pub fn execute(args: AssessArgs, project: &ProjectConfig, format: OutputFormat) -> Result<ExitCode> {
    let store = suite_store(project, &args.suite)?;
    let mut assessment = Assessment::new(store);
    assessment.begin(None)?;

    if assessment.items().is_empty() {
        print_info(&format!("No diffs to review for suite '{}'", args.suite));
        return Ok(ExitCode::SUCCESS);
    }

    if args.approve_all {
        assessment.approve_all()?;
    } else {
        let stdin = io::stdin();
        interact(&mut assessment, stdin.lock(), &CancellationToken::new())?;
    }

    let summary = assessment.summary();
    report(&summary, format);
    Ok(if summary.failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

/// Prompt for each pending diff until the queue is empty or the user quits.
///
/// End of input cancels the pass like `q` does, and so does `quit` once
/// cancelled. A line read after `quit` fired is discarded.
pub fn interact(assessment: &mut Assessment, input: impl BufRead, quit: &CancellationToken) -> Result<()> {
    let mut lines = input.lines();
    let total = assessment.items().len();

    while let Some(item) = assessment.current().cloned() {
        if quit.is_cancelled() {
            assessment.cancel();
            break;
        }
        show_item(assessment, &item, total);
        print!("{} ", "[a]pprove  [r]eject  approve [A]ll  [q]uit >".bold());
        io::stdout().flush()?;

        let Some(line) = lines.next() else {
            println!();
            assessment.cancel();
            break;
        };
        let line = line?;
        if quit.is_cancelled() {
            println!();
            assessment.cancel();
            break;
        }

        match Choice::parse(&line) {
            Some(Choice::Approve) => match assessment.approve(item.index) {
                Ok(_) => print_success(&format!("Approved {}", item.test_title)),
                Err(e) => print_error(&e.to_string()),
            },
            Some(Choice::Reject) => {
                assessment.reject(item.index)?;
                print_info(&format!("Rejected {}", item.test_title));
            }
            Some(Choice::ApproveAll) => {
                let approved = assessment.approve_all()?;
                print_success(&format!("Approved {} remaining diff(s)", approved));
            }
            Some(Choice::Quit) => {
                assessment.cancel();
                break;
            }
            None => print_warning("Unknown choice"),
        }
    }
    Ok(())
}

fn show_item(assessment: &Assessment, item: &AssessmentItem, total: usize) {
    let store = assessment.store();
    println!();
    println!(
        "{} {}",
        format!("[{}/{}]", item.index + 1, total).dimmed(),
        item.test_title.bold()
    );
    println!(
        "  diff:     {}",
        store.path(&item.identity, ArtifactRole::Diff).display()
    );
    println!(
        "  received: {}",
        store.path(&item.identity, ArtifactRole::Received).display()
    );
    if item.has_baseline {
        println!(
            "  baseline: {}",
            store.path(&item.identity, ArtifactRole::Baseline).display()
        );
    } else {
        println!("  baseline: {}", "none yet".yellow());
    }
}

pub fn report(summary: &AssessmentSummary, format: OutputFormat) {
    if format == OutputFormat::Json {
        print_json(summary);
        return;
    }

    println!();
    println!(
        "Assessment: {} approved, {} rejected",
        summary.approved_files.len().to_string().green(),
        summary.rejected_files.len().to_string().red()
    );
    if summary.failed {
        print_error("Some approvals failed; their artifacts were left in place");
    }
}
