use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use vizreg_common::ProjectConfig;
use vizreg_runner::ProcessEngine;
use vizreg_web::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let web_addr: SocketAddr = std::env::var("VIZREG_WEB_ADDR")
        .unwrap_or_else(|_| "127.0.0.1:8080".to_string())
        .parse()?;

    let root = std::env::var("VIZREG_ROOT")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("."));

    let project = ProjectConfig::load(&root)?;
    let engine = Arc::new(ProcessEngine::new(root));

    vizreg_web::serve(web_addr, AppState::new(project, engine)).await
}
