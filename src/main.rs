//! sfs-sync - Batch replication scheduler
//!
//! This is the composition root that wires together all the components.

use sfs_sync::adapters::outbound::ProcessCommandRunner;
use sfs_sync::application::Orchestrator;
use sfs_sync::config::{config_path, load_config};
use sfs_sync::domain::ports::CommandExecutor;
use sfs_sync::infrastructure::{shutdown_signal, ConfigWatcher, ShutdownController};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::fmt::format::FmtSpan;

/// How often the configuration file is checked for changes.
const CONFIG_POLL: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration from the file named in the environment
    let path = config_path();
    let cfg = load_config(&path)?;

    // Setup logging
    let log_level = if cfg.log_debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_span_events(FmtSpan::CLOSE)
        .init();

    tracing::info!(
        "starting {} with config {:?}",
        cfg.role_ident("main"),
        path
    );

    // ===== COMPOSITION ROOT =====

    // 1. Config snapshots, reloaded in the background
    let watcher = Arc::new(ConfigWatcher::new(&path, cfg, CONFIG_POLL));

    // 2. Outbound adapter for the transfer commands
    let executor: Arc<dyn CommandExecutor> = Arc::new(ProcessCommandRunner::new(watcher.subscribe()));

    // 3. Signals drive cooperative shutdown
    let shutdown = ShutdownController::new();
    let signals = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(e) = shutdown_signal(shutdown.clone()).await {
                tracing::error!("cannot listen for signals, stopping: {}", e);
                shutdown.shutdown();
            }
        })
    };

    // 4. Run every role until shutdown
    let result = Orchestrator::new(watcher, executor, shutdown.clone()).run().await;

    shutdown.shutdown();
    if let Err(e) = signals.await {
        tracing::error!("signal task ended abnormally: {}", e);
    }

    result?;
    Ok(())
}
