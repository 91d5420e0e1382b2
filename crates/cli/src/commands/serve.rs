//! Web server

use anyhow::Result;
use clap::Args;
use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use vizreg_common::ProjectConfig;
use vizreg_runner::ProcessEngine;
use vizreg_web::AppState;

#[derive(Args)]
pub struct ServeArgs {
    /// Web server bind address
    #[arg(long, env = "VIZREG_WEB_ADDR", default_value = "127.0.0.1:8080")]
    pub addr: SocketAddr,
}

pub async fn execute(args: ServeArgs, project: ProjectConfig) -> Result<ExitCode> {
    let engine = Arc::new(ProcessEngine::new(project.root.clone()));
    vizreg_web::serve(args.addr, AppState::new(project, engine)).await?;
    Ok(ExitCode::SUCCESS)
}
