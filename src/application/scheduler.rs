//! Scheduler
//!
//! Groups pending batches into bulks and dispatches them fairly across
//! nodes. Each cycle handles push, then pull: it builds at most one bulk per
//! ready node, dispatches up to the configured number of tasks, then waits
//! for exactly as many results before moving to the next mode.
//!
//! The health map and the rotation cursors belong to the scheduler alone.

use crate::adapters::outbound::FsBatchStore;
use crate::application::transfer::ensure_check_file;
use crate::config::Config;
use crate::domain::entities::{Bulk, DispatchMessage, MessageKind};
use crate::domain::services::{BulkBuilder, DispatchRotation};
use crate::domain::value_objects::Mode;
use crate::error::SyncError;
use crate::infrastructure::config_watcher::ConfigHandle;
use crate::infrastructure::dispatch_queue::DispatchQueue;
use crate::infrastructure::health_tracker::{BackoffConfig, NodeHealthTracker};
use crate::infrastructure::shutdown::ShutdownController;
use std::sync::Arc;
use std::time::SystemTime;

/// What one scheduling cycle did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    /// Tasks sent to workers
    pub dispatched: usize,
    /// Nodes put into backoff during the cycle
    pub failed: usize,
}

impl CycleReport {
    /// Nothing happened, so the next cycle can wait a scan interval.
    pub fn is_idle(&self) -> bool {
        self.dispatched == 0 && self.failed == 0
    }
}

pub struct Scheduler {
    config: ConfigHandle,
    store: Arc<FsBatchStore>,
    queue: Arc<DispatchQueue>,
    shutdown: ShutdownController,
    health: NodeHealthTracker,
    rotation: DispatchRotation,
}

impl Scheduler {
    pub fn new(
        config: ConfigHandle,
        store: Arc<FsBatchStore>,
        queue: Arc<DispatchQueue>,
        shutdown: ShutdownController,
    ) -> Self {
        let backoff = BackoffConfig::from_config(&config.borrow());
        Self {
            config,
            store,
            queue,
            shutdown,
            health: NodeHealthTracker::new(backoff),
            rotation: DispatchRotation::new(),
        }
    }

    /// Run until shutdown.
    pub async fn run(mut self) {
        tracing::info!("scheduler started");

        while !self.shutdown.is_shutdown() {
            let cfg = self.config.borrow().clone();
            let pause = match self.run_cycle().await {
                Ok(report) if report.is_idle() => Some(cfg.scan_interval()),
                Ok(_) => None,
                Err(SyncError::Queue(_)) if self.shutdown.is_shutdown() => break,
                Err(SyncError::CheckFileMissing(path)) => {
                    tracing::warn!("check file {:?} is missing, not scheduling", path);
                    Some(cfg.fail_interval())
                }
                Err(e) => {
                    tracing::error!("scheduling cycle failed: {}", e);
                    Some(cfg.fail_interval())
                }
            };

            if let Some(pause) = pause {
                if !self.shutdown.sleep(pause).await {
                    break;
                }
            }
        }

        tracing::info!("scheduler stopped");
    }

    /// Run one scheduling cycle over both modes.
    ///
    /// Push runs to completion before pull bulks are collected, so a node
    /// that just failed a push is skipped for pull in the same cycle.
    pub async fn run_cycle(&mut self) -> Result<CycleReport, SyncError> {
        let cfg = self.config.borrow().clone();
        self.health.set_config(BackoffConfig::from_config(&cfg));
        ensure_check_file(&cfg)?;

        let mut report = CycleReport::default();
        for mode in Mode::ALL {
            let candidates = self.collect_bulks(&cfg, mode, &mut report).await;
            let budget = match mode {
                Mode::Push => cfg.push_count(),
                Mode::Pull => cfg.pull_count(),
            }
            .min(self.queue.bound(mode.into()));

            let mut dispatched = 0;
            for bulk in self.rotation.select(mode, candidates, budget) {
                tracing::debug!(
                    "dispatching {} of {} {} batches for {}",
                    mode,
                    bulk.len(),
                    bulk.kind,
                    bulk.node
                );
                self.queue.send(DispatchMessage::task(mode, bulk)).await?;
                dispatched += 1;
            }

            // Results are matched by count only
            for _ in 0..dispatched {
                if let DispatchMessage::Result { node, outcome } =
                    self.queue.recv(MessageKind::Result).await?
                {
                    if !outcome.is_success() {
                        self.health.set_failing(&node);
                        report.failed += 1;
                    }
                }
            }
            report.dispatched += dispatched;
        }

        Ok(report)
    }

    /// Build at most one bulk per ready node, in configuration order.
    async fn collect_bulks(&mut self, cfg: &Config, mode: Mode, report: &mut CycleReport) -> Vec<Bulk> {
        let staleness = cfg.staleness();
        let mut bulks = Vec::new();

        for node in cfg.node_names() {
            if !self.health.is_ready(node) {
                continue;
            }
            let max = cfg.bulk_max_for(node);
            match self.store.list_candidates(mode, node, max).await {
                Ok(candidates) => {
                    if let Some(bulk) =
                        BulkBuilder::build(node, &candidates, staleness, max, SystemTime::now())
                    {
                        bulks.push(bulk);
                    }
                }
                Err(e) => {
                    tracing::error!("cannot scan {} queue of {}: {}", mode, node, e);
                    self.health.set_failing(node);
                    report.failed += 1;
                }
            }
        }
        bulks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::domain::value_objects::Outcome;
    use std::collections::HashMap;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::watch;

    struct Fixture {
        _dir: TempDir,
        config: watch::Sender<Arc<Config>>,
        store: Arc<FsBatchStore>,
        queue: Arc<DispatchQueue>,
        scheduler: Scheduler,
    }

    fn fixture(nodes: &[&str], push_count: usize) -> Fixture {
        fixture_with_queue(nodes, push_count, DispatchQueue::new(push_count, 1))
    }

    fn fixture_with_queue(nodes: &[&str], push_count: usize, queue: DispatchQueue) -> Fixture {
        let dir = TempDir::new().unwrap();
        let mounted = dir.path().join("mounted");
        fs::write(&mounted, "").unwrap();
        let cfg = Config {
            nodes: nodes.iter().map(|n| NodeConfig::new(*n).data("x:/data")).collect(),
            sync_data_rec: "true".to_string(),
            sync_data_norec: "true".to_string(),
            batch_dir: dir.path().to_path_buf(),
            data_dir: "/data".to_string(),
            push_count: Some(push_count),
            check_file: Some(mounted),
            ..Config::default()
        };
        let (config, rx) = watch::channel(Arc::new(cfg));
        let store = Arc::new(FsBatchStore::new(dir.path()));
        let queue = Arc::new(queue);
        let scheduler = Scheduler::new(rx, store.clone(), queue.clone(), ShutdownController::new());
        Fixture {
            _dir: dir,
            config,
            store,
            queue,
            scheduler,
        }
    }

    /// Swap in a modified snapshot, as a reload would.
    fn reload(f: &Fixture, tweak: impl FnOnce(&mut Config)) {
        let mut cfg = (**f.config.borrow()).clone();
        tweak(&mut cfg);
        f.config.send_replace(Arc::new(cfg));
    }

    fn queue_batch(store: &FsBatchStore, mode: Mode, node: &str, name: &str) {
        let path = store.batch_path(mode, node, name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "/file\n").unwrap();
    }

    /// Answer every task of `kind` with `outcome`, recording the nodes served.
    fn responder(
        queue: Arc<DispatchQueue>,
        kind: MessageKind,
        outcome: Outcome,
    ) -> tokio::task::JoinHandle<Vec<String>> {
        tokio::spawn(async move {
            let mut served = Vec::new();
            while let Ok(msg) = queue.recv(kind).await {
                served.push(msg.node().to_string());
                let result = DispatchMessage::Result {
                    node: msg.node().to_string(),
                    outcome,
                };
                if queue.send(result).await.is_err() {
                    break;
                }
            }
            served
        })
    }

    #[tokio::test]
    async fn test_idle_cycle() {
        let mut f = fixture(&["a", "b"], 2);
        let report = f.scheduler.run_cycle().await.unwrap();
        assert!(report.is_idle());
    }

    #[tokio::test]
    async fn test_one_bulk_per_node() {
        let mut f = fixture(&["a", "b"], 4);
        queue_batch(&f.store, Mode::Push, "b", "0001_a_rec.batch");
        queue_batch(&f.store, Mode::Push, "b", "0002_a_norec.batch");
        queue_batch(&f.store, Mode::Push, "a", "0001_b_rec.batch");

        let worker = responder(f.queue.clone(), MessageKind::Push, Outcome::Success);
        let report = f.scheduler.run_cycle().await.unwrap();
        assert_eq!(report.dispatched, 2);
        assert_eq!(report.failed, 0);

        f.queue.close();
        let mut served = worker.await.unwrap();
        served.sort();
        assert_eq!(served, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_failed_result_puts_node_in_backoff() {
        let mut f = fixture(&["a", "b"], 2);
        queue_batch(&f.store, Mode::Push, "b", "0001_a_rec.batch");

        let worker = responder(f.queue.clone(), MessageKind::Push, Outcome::Fail);
        let report = f.scheduler.run_cycle().await.unwrap();
        assert_eq!(report, CycleReport { dispatched: 1, failed: 1 });
        assert!(!f.scheduler.health.is_ready("b"));
        assert!(f.scheduler.health.is_ready("a"));

        // Node b is skipped while backing off
        let report = f.scheduler.run_cycle().await.unwrap();
        assert!(report.is_idle());

        f.queue.close();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_check_file_blocks_cycle() {
        let mut f = fixture(&["a"], 1);
        reload(&f, |cfg| cfg.check_file = Some("/nonexistent/sfs-check".into()));

        assert!(matches!(
            f.scheduler.run_cycle().await,
            Err(SyncError::CheckFileMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_unset_check_file_blocks_cycle() {
        let mut f = fixture(&["a", "b"], 1);
        queue_batch(&f.store, Mode::Push, "b", "0001_a_rec.batch");
        reload(&f, |cfg| cfg.check_file = None);

        assert!(matches!(
            f.scheduler.run_cycle().await,
            Err(SyncError::CheckFileUnset)
        ));
        let idle = tokio::time::timeout(Duration::from_millis(50), f.queue.recv(MessageKind::Push)).await;
        assert!(idle.is_err());
    }

    #[tokio::test]
    async fn test_push_failure_skips_pull_in_same_cycle() {
        let mut f = fixture(&["a", "b"], 1);
        queue_batch(&f.store, Mode::Push, "b", "0001_a_rec.batch");
        queue_batch(&f.store, Mode::Pull, "b", "0001_b_rec.batch");

        let pusher = responder(f.queue.clone(), MessageKind::Push, Outcome::Fail);
        let report = f.scheduler.run_cycle().await.unwrap();
        assert_eq!(report, CycleReport { dispatched: 1, failed: 1 });

        // The pull for b was never sent because b failed its push first
        let pull = tokio::time::timeout(Duration::from_millis(50), f.queue.recv(MessageKind::Pull)).await;
        assert!(pull.is_err());

        f.queue.close();
        assert_eq!(pusher.await.unwrap(), vec!["b"]);
    }

    #[tokio::test]
    async fn test_pull_waits_for_push_results() {
        let mut f = fixture(&["a", "b"], 1);
        queue_batch(&f.store, Mode::Push, "b", "0001_a_rec.batch");
        queue_batch(&f.store, Mode::Pull, "b", "0001_b_rec.batch");
        let queue = f.queue.clone();

        let cycle = tokio::spawn(async move { f.scheduler.run_cycle().await });
        let task = queue.recv(MessageKind::Push).await.unwrap();
        assert_eq!(task.node(), "b");

        // While the push is outstanding no pull task appears
        let pull = tokio::time::timeout(Duration::from_millis(50), queue.recv(MessageKind::Pull)).await;
        assert!(pull.is_err());

        queue
            .send(DispatchMessage::Result {
                node: "b".to_string(),
                outcome: Outcome::Success,
            })
            .await
            .unwrap();
        let task = queue.recv(MessageKind::Pull).await.unwrap();
        assert_eq!(task.node(), "b");
        queue
            .send(DispatchMessage::Result {
                node: "b".to_string(),
                outcome: Outcome::Success,
            })
            .await
            .unwrap();

        let report = cycle.await.unwrap().unwrap();
        assert_eq!(report, CycleReport { dispatched: 2, failed: 0 });
    }

    #[tokio::test]
    async fn test_reload_budget_beyond_lane_does_not_stall() {
        let nodes = ["a", "b", "c", "d", "e", "f"];
        let mut f = fixture_with_queue(&nodes, 1, DispatchQueue::new(1, 1));
        for node in nodes {
            queue_batch(&f.store, Mode::Push, node, "0001_z_rec.batch");
        }
        reload(&f, |cfg| cfg.push_count = Some(6));

        let worker = responder(f.queue.clone(), MessageKind::Push, Outcome::Success);
        let report = tokio::time::timeout(Duration::from_secs(3), f.scheduler.run_cycle())
            .await
            .expect("cycle stalled")
            .unwrap();
        assert_eq!(report.dispatched, 1);

        f.queue.close();
        worker.await.unwrap();
    }

    #[tokio::test]
    async fn test_fair_rotation_with_single_slot() {
        let nodes = ["a", "b", "c", "d"];
        let mut f = fixture(&nodes, 1);
        // Every node always has work because nothing is retired
        for node in nodes {
            queue_batch(&f.store, Mode::Push, node, "0001_z_rec.batch");
        }

        let worker = responder(f.queue.clone(), MessageKind::Push, Outcome::Success);
        let cycles = 10;
        for _ in 0..cycles {
            let report = f.scheduler.run_cycle().await.unwrap();
            assert_eq!(report.dispatched, 1);
        }

        f.queue.close();
        let served = worker.await.unwrap();
        let mut counts: HashMap<String, usize> = HashMap::new();
        for node in served {
            *counts.entry(node).or_default() += 1;
        }
        for node in nodes {
            let n = counts.get(node).copied().unwrap_or(0);
            assert!(n == cycles / nodes.len() || n == cycles / nodes.len() + 1, "{node}: {n}");
        }
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let f = fixture(&["a"], 1);
        let shutdown = f.scheduler.shutdown.clone();
        let handle = tokio::spawn(f.scheduler.run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown.shutdown();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
