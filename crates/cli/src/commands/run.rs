//! Run a suite end to end: plan, capture, classify, review, record

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, IsTerminal};
use std::process::ExitCode;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use vizreg_common::{ProjectConfig, RunSummary, TestType};
use vizreg_runner::{
    ProcessEngine, RunError, RunHistory, RunOutcome, RunRequest, RunSession, SessionEvent,
};

use super::{assess, TargetArgs};
use crate::output::{print_error, print_info, print_json, print_warning, OutputFormat};

#[derive(Args)]
pub struct RunArgs {
    /// Suite name
    #[arg(short, long)]
    pub suite: String,

    /// full-test, diffs-only, targeted or lab
    #[arg(short = 't', long = "type")]
    pub test_type: TestType,

    #[command(flatten)]
    pub targets: TargetArgs,

    /// Launch the engine in its interactive mode
    #[arg(long)]
    pub gui: bool,

    /// Leave diffs for a later `vizreg assess`
    #[arg(long)]
    pub no_assess: bool,
}

pub async fn execute(
    args: RunArgs,
    project: &ProjectConfig,
    format: OutputFormat,
    verbose: bool,
) -> Result<ExitCode> {
    let request = RunRequest::new(&args.suite, args.test_type)
        .with_filters(args.targets.filters())
        .with_gui(args.gui);

    let mut session = match RunSession::prepare(project, request) {
        Ok(session) => session,
        Err(RunError::NoTargetFilters) => {
            print_error(&format!(
                "A {} run needs something to target. Pass at least one --endpoint TITLE or --viewport NAME.",
                args.test_type
            ));
            return Ok(ExitCode::from(2));
        }
        Err(e) => return Err(e.into()),
    };

    // Each interrupt cancels whichever token is current: the run, then the review
    let cancel = CancellationToken::new();
    let (interrupt_target, target) = watch::channel(cancel.clone());
    let ctrl_c = tokio::spawn(async move {
        while tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupt received");
            target.borrow().cancel();
        }
    });

    let (tx, rx) = mpsc::unbounded_channel();
    let progress = progress_bar(session.plan().agenda.len(), format);
    let renderer = tokio::spawn(render_events(rx, progress, verbose));

    let engine = ProcessEngine::new(project.root.clone());
    let result = session.execute(&engine, cancel, Some(tx)).await;
    let _ = renderer.await;
    let outcome = match result {
        Ok(outcome) => outcome,
        Err(e) => {
            ctrl_c.abort();
            return Err(e.into());
        }
    };

    if format == OutputFormat::Table {
        report_outcome(&outcome);
    }

    let mut assessment_summary = None;
    if outcome.has_diffs() && session.plan().test_type.is_snapshot() {
        let interactive = io::stdin().is_terminal() && format == OutputFormat::Table;
        if args.no_assess || !interactive {
            print_info(&format!(
                "{} diff(s) left for review; run `vizreg assess --suite {}`",
                outcome.test_diff_list.len(),
                args.suite
            ));
        } else if let Some(mut assessment) = session.begin_assessment()? {
            let quit = CancellationToken::new();
            interrupt_target.send_replace(quit.clone());
            print_info("Ctrl-C ends the review after the current prompt");
            let (assessment, result) = tokio::task::spawn_blocking(move || {
                let result = assess::interact(&mut assessment, io::stdin().lock(), &quit);
                (assessment, result)
            })
            .await?;
            result?;
            let summary = assessment.summary();
            assess::report(&summary, format);
            assessment_summary = Some(summary);
        }
    }

    ctrl_c.abort();

    let summary = session.summarize(&outcome, assessment_summary);
    RunHistory::for_project(project).record(&summary)?;

    match format {
        OutputFormat::Json => print_json(&summary),
        OutputFormat::Table => report_status(&summary),
    }

    Ok(if summary.failed || summary.terminated {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn progress_bar(len: usize, format: OutputFormat) -> ProgressBar {
    if format == OutputFormat::Json || !io::stderr().is_terminal() {
        return ProgressBar::hidden();
    }

    let bar = ProgressBar::new(len as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{bar:30.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> "),
    );
    bar
}

async fn render_events(mut rx: UnboundedReceiver<SessionEvent>, bar: ProgressBar, verbose: bool) {
    while let Some(event) = rx.recv().await {
        match event {
            SessionEvent::Started {
                suite,
                test_type,
                agenda,
                ..
            } => {
                bar.set_length(agenda.len() as u64);
                bar.set_message(format!("{} {}", test_type, suite));
            }
            SessionEvent::Raw { text } => {
                if verbose {
                    bar.println(text.dimmed().to_string());
                }
            }
            SessionEvent::Passing { test_title } => {
                bar.inc(1);
                bar.println(format!("  {} {}", "✓".green(), test_title));
            }
            SessionEvent::Failing {
                test_title,
                error_message,
            } => {
                bar.inc(1);
                bar.println(format!("  {} {}", "✗".red(), test_title));
                if !error_message.is_empty() {
                    bar.println(format!("      {}", error_message.dimmed()));
                }
            }
            SessionEvent::UserTerminated => {
                bar.println(format!("  {} run stopped by user", "!".yellow()));
            }
            SessionEvent::Restored { files } => {
                bar.println(format!(
                    "  {} restored {} previous artifact(s)",
                    "·".dimmed(),
                    files.len()
                ));
            }
            SessionEvent::Summary { .. } | SessionEvent::Assessment { .. } => {}
        }
    }
    bar.finish_and_clear();
}

fn report_outcome(outcome: &RunOutcome) {
    let results = &outcome.outcomes;
    println!();
    println!(
        "{} passing ({} unchanged), {} failing, {} skipped in {:.1}s",
        results.passing.len().to_string().green(),
        results.unchanged.len(),
        results.failing.len().to_string().red(),
        results.skipped.len().to_string().yellow(),
        outcome.duration_ms as f64 / 1000.0
    );

    for result in &results.skipped {
        print_warning(&format!("Skipped {}", result.test_title));
    }
    if outcome.rolled_back {
        print_warning("Previous diffs were restored; nothing from this run was kept");
    }
}

fn report_status(summary: &RunSummary) {
    if summary.terminated {
        print_warning("Run was terminated");
    } else if summary.failed {
        print_error("Run failed");
    } else {
        println!("{} Run passed", "✓".green());
    }
}
