//! Wires a real `clangd` subprocess end to end: spawn, initialize, tick
//! one file open, shut down. Demonstrates the public API; not part of
//! the library itself.

use clangd_client::{ClientLifecycle, FileEventKind, FileSnapshot, ResourceLimits, ServerLaunchConfig};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_logging();

    let project_directory = std::env::args()
        .nth(1)
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|| std::env::current_dir().expect("cwd"));

    let config = ServerLaunchConfig::new("clangd", vec!["clangd".to_string()], &project_directory);
    let lifecycle = ClientLifecycle::new(config, ResourceLimits::default());

    info!("starting clangd");
    if !lifecycle.start_server().await {
        anyhow::bail!("failed to start clangd");
    }

    let file = project_directory.join("main.cpp");
    if file.exists() {
        let contents = std::fs::read(&file)?;
        lifecycle
            .on_file_ready_to_parse(&[FileSnapshot {
                path: file.to_string_lossy().into_owned(),
                kind: FileEventKind::Dirty,
                contents,
            }])
            .await;
    }

    info!("shutting down");
    lifecycle.shutdown().await;
    Ok(())
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(std::env::var("RUST_LOG").unwrap_or_else(|_| "clangd_client=debug,info".to_string()))
        .init();
}
