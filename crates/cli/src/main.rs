//! vizreg CLI - Main Entry Point
//!
//! Plans and runs visual regression suites, walks through the resulting
//! diffs, and starts the web layer.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use vizreg_common::ProjectConfig;
use vizreg_runner::RunError;

mod commands;
mod output;

use commands::{assess, diffs, history, plan, run, serve, suites};

/// vizreg - Visual regression run orchestration
#[derive(Parser)]
#[command(name = "vizreg")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Project root containing vizreg.toml and suites/
    #[arg(long, env = "VIZREG_ROOT", default_value = ".", global = true)]
    root: PathBuf,

    /// Output format
    #[arg(long, value_enum, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List suites
    Suites,

    /// Show the agenda a run would execute
    Plan(plan::PlanArgs),

    /// Run a suite
    Run(run::RunArgs),

    /// Review the current diffs of a suite
    Assess(assess::AssessArgs),

    /// List current diff artifacts
    Diffs(diffs::DiffsArgs),

    /// Browse past run summaries
    History(history::HistoryArgs),

    /// Start the web server
    Serve(serve::ServeArgs),
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match (&cli.command, cli.verbose) {
        (_, true) => "debug",
        (Commands::Serve(_), false) => "info",
        _ => "warn",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            ExitCode::from(exit_code(&e))
        }
    }
}

async fn dispatch(cli: Cli) -> anyhow::Result<ExitCode> {
    let project = ProjectConfig::load(&cli.root)?;

    match cli.command {
        Commands::Suites => suites::execute(&project, cli.format),
        Commands::Plan(args) => plan::execute(args, &project, cli.format),
        Commands::Run(args) => run::execute(args, &project, cli.format, cli.verbose).await,
        Commands::Assess(args) => assess::execute(args, &project, cli.format),
        Commands::Diffs(args) => diffs::execute(args, &project, cli.format),
        Commands::History(args) => history::execute(args, &project, cli.format),
        Commands::Serve(args) => serve::execute(args, project).await,
    }
}

/// 2 for requests rejected before anything ran, 1 for everything else
fn exit_code(err: &anyhow::Error) -> u8 {
    let validation = err.chain().any(|cause| {
        cause
            .downcast_ref::<RunError>()
            .map(RunError::is_validation)
            .or_else(|| {
                cause
                    .downcast_ref::<vizreg_common::Error>()
                    .map(vizreg_common::Error::is_validation)
            })
            .unwrap_or(false)
    });

    if validation {
        2
    } else {
        1
    }
}
