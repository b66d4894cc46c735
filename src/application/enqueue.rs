//! Enqueue Loop
//!
//! Fans newly produced batches out to every peer's push queue and runs the
//! pull-batches command that harvests remote batches into the local pull
//! queues. Runs independently of the scheduler with its own health map.

use crate::adapters::outbound::{DurableRetry, FsBatchStore};
use crate::application::transfer::{ensure_check_file, pull_batches_invocation};
use crate::config::Config;
use crate::domain::ports::CommandExecutor;
use crate::domain::value_objects::Mode;
use crate::error::SyncError;
use crate::infrastructure::config_watcher::ConfigHandle;
use crate::infrastructure::health_tracker::{BackoffConfig, NodeHealthTracker};
use crate::infrastructure::shutdown::ShutdownController;
use std::sync::Arc;

/// What one enqueue pass did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EnqueueReport {
    /// New batches queued for their peers
    pub fanned_out: usize,
    /// Nodes whose batches were harvested
    pub pulled: usize,
    /// Scans or pull commands that failed
    pub failures: usize,
}

pub struct EnqueueLoop {
    config: ConfigHandle,
    store: Arc<FsBatchStore>,
    executor: Arc<dyn CommandExecutor>,
    shutdown: ShutdownController,
    health: NodeHealthTracker,
}

impl EnqueueLoop {
    pub fn new(
        config: ConfigHandle,
        store: Arc<FsBatchStore>,
        executor: Arc<dyn CommandExecutor>,
        shutdown: ShutdownController,
    ) -> Self {
        let backoff = BackoffConfig::from_config(&config.borrow());
        Self {
            config,
            store,
            executor,
            shutdown,
            health: NodeHealthTracker::new(backoff),
        }
    }

    /// Run until shutdown.
    pub async fn run(mut self) {
        tracing::info!("enqueue loop started");

        while !self.shutdown.is_shutdown() {
            let cfg = self.config.borrow().clone();
            let pause = match self.run_once().await {
                Ok(report) if report.failures == 0 => cfg.scan_interval(),
                Ok(_) => cfg.fail_interval(),
                Err(SyncError::Interrupted) => break,
                Err(SyncError::CheckFileMissing(path)) => {
                    tracing::warn!("check file {:?} is missing, not enqueueing", path);
                    cfg.fail_interval()
                }
                Err(e) => {
                    tracing::error!("enqueue pass failed: {}", e);
                    cfg.fail_interval()
                }
            };

            if !self.shutdown.sleep(pause).await {
                break;
            }
        }

        tracing::info!("enqueue loop stopped");
    }

    /// Fan out new batches, then harvest batches from ready peers.
    pub async fn run_once(&mut self) -> Result<EnqueueReport, SyncError> {
        let cfg = self.config.borrow().clone();
        self.health.set_config(BackoffConfig::from_config(&cfg));
        ensure_check_file(&cfg)?;

        let mut report = EnqueueReport::default();
        self.fan_out_new(&cfg, &mut report).await?;
        self.harvest(&cfg, &mut report).await;
        Ok(report)
    }

    async fn fan_out_new(&self, cfg: &Config, report: &mut EnqueueReport) -> Result<(), SyncError> {
        let batches = match self.store.list_new_batches().await {
            Ok(batches) => batches,
            Err(e) => {
                tracing::error!("cannot scan for new batches: {}", e);
                report.failures += 1;
                return Ok(());
            }
        };
        if batches.is_empty() {
            return Ok(());
        }

        let nodes = cfg.node_names();
        let retry = DurableRetry {
            interval: cfg.fail_interval(),
            shutdown: self.shutdown.clone(),
        };
        for batch in batches {
            if cfg.dry_run {
                tracing::info!("dry run, not fanning out {}", batch.name);
                continue;
            }
            let peers = self
                .store
                .fan_out(&batch, &nodes, cfg.backup_batches.as_deref(), &retry)
                .await?;
            tracing::debug!("queued {} for {} peers", batch.name, peers);
            report.fanned_out += 1;
        }
        Ok(())
    }

    async fn harvest(&mut self, cfg: &Config, report: &mut EnqueueReport) {
        for node in cfg.node_names() {
            if !cfg.pulls_from(node) || !self.health.is_ready(node) {
                continue;
            }
            let Some(invocation) = pull_batches_invocation(cfg, &self.store, node) else {
                continue;
            };

            if let Err(e) = self.store.ensure_queue_dir(Mode::Pull, node).await {
                tracing::error!("cannot prepare pull queue for {}: {}", node, e);
                self.health.set_failing(node);
                report.failures += 1;
                continue;
            }

            match self.executor.execute(&invocation).await {
                Ok(()) => report.pulled += 1,
                Err(e) => {
                    tracing::error!("pulling batches from {} failed: {}", node, e);
                    self.health.set_failing(node);
                    report.failures += 1;
                }
            }
        }
    }
}
