//! Push and Pull Workers
//!
//! Workers block on the dispatch queue for tasks of their mode, run the
//! transfer command for the bulk, retire the batches on success and always
//! report a result back to the scheduler.

use crate::adapters::outbound::{DurableRetry, FsBatchStore};
use crate::application::transfer::transfer_invocation;
use crate::domain::entities::{Bulk, DispatchMessage, MessageKind};
use crate::domain::ports::CommandExecutor;
use crate::domain::value_objects::{Mode, Outcome};
use crate::error::{StoreError, SyncError};
use crate::infrastructure::config_watcher::ConfigHandle;
use crate::infrastructure::dispatch_queue::DispatchQueue;
use crate::infrastructure::node_locks::{NodeLockGuard, NodeLocks};
use crate::infrastructure::shutdown::ShutdownController;
use std::sync::Arc;
use std::time::Duration;

/// Shortest wait for a node lock, so a zero fail interval cannot spin.
const MIN_LOCK_WAIT: Duration = Duration::from_millis(100);

/// Resources shared by every worker.
#[derive(Clone)]
pub struct WorkerContext {
    pub config: ConfigHandle,
    pub store: Arc<FsBatchStore>,
    pub queue: Arc<DispatchQueue>,
    pub executor: Arc<dyn CommandExecutor>,
    pub shutdown: ShutdownController,
}

impl WorkerContext {
    /// Receive tasks of `mode`, handing each bulk to `handle`.
    async fn serve<'a, F, Fut>(&'a self, mode: Mode, handle: F)
    where
        F: Fn(Bulk) -> Fut,
        Fut: std::future::Future<Output = Result<(), SyncError>> + 'a,
    {
        loop {
            let bulk = match self.queue.recv(MessageKind::from(mode)).await {
                Ok(DispatchMessage::Push(bulk)) | Ok(DispatchMessage::Pull(bulk)) => bulk,
                Ok(other) => {
                    tracing::error!("unexpected {:?} message on the {} lane", other.kind(), mode);
                    continue;
                }
                Err(_) => break,
            };

            let node = bulk.node.clone();
            let count = bulk.len();
            let outcome = {
                let _in_flight = self.shutdown.task_guard();
                match handle(bulk).await {
                    Ok(()) => Outcome::Success,
                    Err(SyncError::Interrupted) => Outcome::Fail,
                    Err(e) => {
                        tracing::error!("{} of {} batches for {} failed: {}", mode, count, node, e);
                        Outcome::Fail
                    }
                }
            };

            let result = DispatchMessage::Result { node, outcome };
            if let Err(e) = self.queue.send(result).await {
                if self.shutdown.is_shutdown() {
                    break;
                }
                tracing::error!("cannot report {} result: {}", mode, e);
                let pause = self.config.borrow().fail_interval();
                if !self.shutdown.sleep(pause).await {
                    break;
                }
            }
        }
        tracing::debug!("{} worker stopped", mode);
    }
}

/// Pushes bulks to peers under the per-node lock.
pub struct PushWorker {
    ctx: WorkerContext,
    locks: Arc<NodeLocks>,
}

impl PushWorker {
    pub fn new(ctx: WorkerContext, locks: Arc<NodeLocks>) -> Self {
        Self { ctx, locks }
    }

    pub async fn run(self) {
        self.ctx.serve(Mode::Push, |bulk| self.push(bulk)).await;
    }

    /// Push one bulk and remove its batches.
    pub async fn push(&self, bulk: Bulk) -> Result<(), SyncError> {
        let cfg = self.ctx.config.borrow().clone();
        let store = &self.ctx.store;

        store.ensure_queue_dir(Mode::Push, &bulk.node).await?;
        let invocation = transfer_invocation(&cfg, store, Mode::Push, &bulk).await?;

        let guard = self.lock_node(&bulk.node, cfg.fail_interval()).await?;
        let executed = self.ctx.executor.execute(&invocation).await;
        drop(guard);
        executed?;

        if cfg.dry_run {
            tracing::info!("dry run, keeping {} pushed batches for {}", bulk.len(), bulk.node);
            return Ok(());
        }

        let report = store.retire_pushed(&bulk.node, &bulk.batches).await;
        if !report.is_complete() {
            return Err(StoreError::PartialRetire {
                failed: report.failed.len(),
                total: bulk.len(),
            }
            .into());
        }
        tracing::info!("pushed {} batches to {}", bulk.len(), bulk.node);
        Ok(())
    }

    /// Take the node's lock, waiting in fail-interval steps.
    async fn lock_node(&self, node: &str, patience: Duration) -> Result<NodeLockGuard, SyncError> {
        let patience = patience.max(MIN_LOCK_WAIT);
        loop {
            if let Some(guard) = self.locks.acquire_within(node, patience).await {
                return Ok(guard);
            }
            if self.ctx.shutdown.is_shutdown() || !self.locks.contains(node) {
                return Err(SyncError::Interrupted);
            }
            tracing::warn!("node {} is locked by another push, waiting", node);
        }
    }
}

/// Applies bulks harvested from peers to the local data directory.
pub struct PullWorker {
    ctx: WorkerContext,
}

impl PullWorker {
    pub fn new(ctx: WorkerContext) -> Self {
        Self { ctx }
    }

    pub async fn run(self) {
        self.ctx.serve(Mode::Pull, |bulk| self.pull(bulk)).await;
    }

    /// Apply one pulled bulk, then back it up and move it to the inbound
    /// directory for local fan-out.
    pub async fn pull(&self, bulk: Bulk) -> Result<(), SyncError> {
        let cfg = self.ctx.config.borrow().clone();
        let store = &self.ctx.store;

        store.ensure_queue_dir(Mode::Pull, &bulk.node).await?;
        let invocation = transfer_invocation(&cfg, store, Mode::Pull, &bulk).await?;
        self.ctx.executor.execute(&invocation).await?;

        if cfg.dry_run {
            tracing::info!("dry run, keeping {} pulled batches from {}", bulk.len(), bulk.node);
            return Ok(());
        }

        if let Some(backup) = &cfg.backup_batches {
            let retry = DurableRetry {
                interval: cfg.fail_interval(),
                shutdown: self.ctx.shutdown.clone(),
            };
            store.backup_pulled(&bulk.node, &bulk.batches, backup, &retry).await?;
        }
        store.retire_pulled(&bulk.node, &bulk.batches).await?;
        tracing::info!("pulled {} batches from {}", bulk.len(), bulk.node);
        Ok(())
    }
}
