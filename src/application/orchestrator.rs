//! Orchestrator
//!
//! Wires the roles together: one scheduler, one enqueue loop, the push and
//! pull workers and the config watcher. Owns the dispatch queue and the
//! node locks and tears them down on shutdown.

use crate::adapters::outbound::FsBatchStore;
use crate::application::enqueue::EnqueueLoop;
use crate::application::scheduler::Scheduler;
use crate::application::workers::{PullWorker, PushWorker, WorkerContext};
use crate::domain::ports::CommandExecutor;
use crate::error::{StoreError, SyncError};
use crate::infrastructure::config_watcher::ConfigWatcher;
use crate::infrastructure::dispatch_queue::DispatchQueue;
use crate::infrastructure::node_locks::NodeLocks;
use crate::infrastructure::shutdown::ShutdownController;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::Instrument;

/// How long teardown waits for running commands.
pub const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Orchestrator {
    watcher: Arc<ConfigWatcher>,
    executor: Arc<dyn CommandExecutor>,
    shutdown: ShutdownController,
    drain_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        watcher: Arc<ConfigWatcher>,
        executor: Arc<dyn CommandExecutor>,
        shutdown: ShutdownController,
    ) -> Self {
        Self {
            watcher,
            executor,
            shutdown,
            drain_timeout: DRAIN_TIMEOUT,
        }
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Start every role and block until shutdown has been handled.
    ///
    /// Fails only when startup itself fails.
    pub async fn run(self) -> Result<(), SyncError> {
        let cfg = self.watcher.current();
        let config = self.watcher.subscribe();

        let store = Arc::new(FsBatchStore::new(cfg.batch_dir.clone()));
        tokio::fs::create_dir_all(store.root())
            .await
            .map_err(|source| StoreError::CreateDir {
                path: store.root().to_path_buf(),
                source,
            })?;

        // A cycle sends at most one task per node and mode, and the node
        // set is fixed, so this bound holds across reloads
        let queue = Arc::new(DispatchQueue::new(cfg.nodes.len(), cfg.nodes.len()));
        let locks = Arc::new(NodeLocks::new(cfg.node_names()));

        tracing::info!(
            "starting with {} nodes, {} push and {} pull workers{}",
            cfg.nodes.len(),
            cfg.push_procs,
            cfg.pull_procs,
            if cfg.dry_run { " (dry run)" } else { "" }
        );

        let mut roles = JoinSet::new();
        let watcher_task = self.watcher.clone().start(self.shutdown.clone());

        let scheduler = Scheduler::new(config.clone(), store.clone(), queue.clone(), self.shutdown.clone());
        roles.spawn(scheduler.run().instrument(role_span(&cfg.role_ident("scheduler"))));

        let enqueue = EnqueueLoop::new(
            config.clone(),
            store.clone(),
            self.executor.clone(),
            self.shutdown.clone(),
        );
        roles.spawn(enqueue.run().instrument(role_span(&cfg.role_ident("enqueue"))));

        let ctx = WorkerContext {
            config,
            store,
            queue: queue.clone(),
            executor: self.executor.clone(),
            shutdown: self.shutdown.clone(),
        };
        for i in 0..cfg.push_procs {
            let worker = PushWorker::new(ctx.clone(), locks.clone());
            let span = role_span(&cfg.role_ident(&format!("push-{}", i)));
            roles.spawn(worker.run().instrument(span));
        }
        for i in 0..cfg.pull_procs {
            let worker = PullWorker::new(ctx.clone());
            let span = role_span(&cfg.role_ident(&format!("pull-{}", i)));
            roles.spawn(worker.run().instrument(span));
        }

        self.shutdown.wait().await;

        tracing::info!("stopping roles");
        queue.close();
        locks.release_all();
        if self.shutdown.wait_for_drain(self.drain_timeout).await {
            while let Some(joined) = roles.join_next().await {
                if let Err(e) = joined {
                    tracing::error!("role ended abnormally: {}", e);
                }
            }
        } else {
            tracing::warn!(
                "{} commands still running after {:?}, leaving them to finish",
                self.shutdown.in_flight(),
                self.drain_timeout
            );
            roles.detach_all();
        }
        if let Err(e) = watcher_task.await {
            tracing::error!("config watcher ended abnormally: {}", e);
        }

        tracing::info!("shutdown complete");
        Ok(())
    }
}

fn role_span(ident: &str) -> tracing::Span {
    tracing::info_span!("role", ident = %ident)
}
