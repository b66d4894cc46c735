//! Filesystem Batch Store
//!
//! Directory-partitioned batch queues under a single root:
//!
//! ```text
//! <root>/                  new local batches and retired pulled batches
//! <root>/push/<node>/      batches waiting to be pushed to <node>
//! <root>/pull/<node>/      batches harvested from <node>, waiting to be applied
//! ```
//!
//! There is no locking around these directories. Safety comes from the
//! partitioning by (mode, node) and from the scheduler never dispatching
//! two tasks for the same (node, mode) at once.

use crate::domain::entities::{BatchName, Candidate};
use crate::domain::value_objects::Mode;
use crate::error::{StoreError, SyncError};
use crate::infrastructure::shutdown::ShutdownController;
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Outcome of removing pushed batches.
#[derive(Debug, Default)]
pub struct RetireReport {
    pub failed: Vec<String>,
}

impl RetireReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Retry settings for operations that must never be skipped.
#[derive(Clone)]
pub struct DurableRetry {
    pub interval: Duration,
    pub shutdown: ShutdownController,
}

/// Filesystem-backed batch store.
#[derive(Debug, Clone)]
pub struct FsBatchStore {
    root: PathBuf,
}

impl FsBatchStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory where pulled batches are merged back for local fan-out.
    pub fn inbound_dir(&self) -> &Path {
        &self.root
    }

    pub fn queue_dir(&self, mode: Mode, node: &str) -> PathBuf {
        self.root.join(mode.as_str()).join(node)
    }

    pub fn batch_path(&self, mode: Mode, node: &str, batch: &str) -> PathBuf {
        self.queue_dir(mode, node).join(batch)
    }

    /// Dated backup directory: `<backup>/<YYYY-MM-DD>/<mode>/<node>`.
    pub fn backup_dir(backup_root: &Path, mode: Mode, node: &str) -> PathBuf {
        let day = chrono::Local::now().format("%F").to_string();
        backup_root.join(day).join(mode.as_str()).join(node)
    }

    /// Create a queue directory if absent.
    pub async fn ensure_queue_dir(&self, mode: Mode, node: &str) -> Result<PathBuf, StoreError> {
        let dir = self.queue_dir(mode, node);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StoreError::CreateDir {
                path: dir.clone(),
                source,
            })?;
        Ok(dir)
    }

    /// Batch names in `dir`, oldest first.
    async fn scan(dir: &Path) -> Result<Vec<BatchName>, StoreError> {
        let scan_err = |source| StoreError::Scan {
            path: dir.to_path_buf(),
            source,
        };
        let mut entries = tokio::fs::read_dir(dir).await.map_err(scan_err)?;
        let mut batches = Vec::new();

        while let Some(entry) = entries.next_entry().await.map_err(scan_err)? {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            let Some(batch) = BatchName::parse(&name) else {
                continue;
            };
            match entry.file_type().await {
                Ok(ft) if ft.is_file() => batches.push(batch),
                _ => continue,
            }
        }

        batches.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(batches)
    }

    /// List the oldest queued batches of a (mode, node) queue.
    ///
    /// At most `2 * max_bulk` names are returned, which bounds the cost of
    /// statting a long backlog.
    pub async fn list_candidates(
        &self,
        mode: Mode,
        node: &str,
        max_bulk: usize,
    ) -> Result<Vec<Candidate>, StoreError> {
        let dir = self.ensure_queue_dir(mode, node).await?;
        let mut batches = Self::scan(&dir).await?;
        batches.truncate(max_bulk.saturating_mul(2));

        let mut candidates = Vec::with_capacity(batches.len());
        for batch in batches {
            let modified = tokio::fs::metadata(dir.join(&batch.name))
                .await
                .and_then(|m| m.modified())
                .ok();
            candidates.push(Candidate { batch, modified });
        }
        Ok(candidates)
    }

    /// Newly produced batches at the top level of the root.
    pub async fn list_new_batches(&self) -> Result<Vec<BatchName>, StoreError> {
        Self::scan(&self.root).await
    }

    /// Read a queued batch.
    pub async fn read_batch(&self, mode: Mode, node: &str, batch: &str) -> Result<String, StoreError> {
        let path = self.batch_path(mode, node, batch);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| StoreError::Read { path, source })
    }

    /// Fan a new batch out to every node's push queue except its origin.
    ///
    /// Each link (and its dated backup link) is retried until it exists; the
    /// source is only removed once every link is in place. Returns the number
    /// of peers the batch was queued for.
    pub async fn fan_out(
        &self,
        batch: &BatchName,
        nodes: &[&str],
        backup_root: Option<&Path>,
        retry: &DurableRetry,
    ) -> Result<usize, SyncError> {
        let source = self.root.join(&batch.name);
        let mut queued = 0;

        for node in nodes.iter().filter(|n| **n != batch.origin) {
            let dir = self.queue_dir(Mode::Push, node);
            let target = dir.join(&batch.name);
            durable("create push directory", &dir, retry, || {
                tokio::fs::create_dir_all(dir.clone())
            })
            .await?;
            durable("link batch", &target, retry, || {
                link_once(source.clone(), target.clone())
            })
            .await?;

            if let Some(backup_root) = backup_root {
                let bak_dir = Self::backup_dir(backup_root, Mode::Push, node);
                let bak = bak_dir.join(&batch.name);
                durable("create backup directory", &bak_dir, retry, || {
                    tokio::fs::create_dir_all(bak_dir.clone())
                })
                .await?;
                durable("link backup", &bak, retry, || link_once(source.clone(), bak.clone())).await?;
            }
            queued += 1;
        }

        if let Err(e) = tokio::fs::remove_file(&source).await {
            if e.kind() != io::ErrorKind::NotFound {
                tracing::error!("could not unlink {:?}, will be retried: {}", source, e);
            }
        }
        Ok(queued)
    }

    /// Remove pushed batches from a node's push queue.
    ///
    /// Every file is attempted; failures are collected, nothing is reverted.
    pub async fn retire_pushed(&self, node: &str, batches: &[String]) -> RetireReport {
        let mut report = RetireReport::default();
        for batch in batches {
            let path = self.batch_path(Mode::Push, node, batch);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                // Already gone: nothing left to retry
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::error!("could not unlink {:?}, will be retried: {}", path, e);
                    report.failed.push(batch.clone());
                }
            }
        }
        report
    }

    /// Move pulled batches into the inbound directory.
    ///
    /// Stops at the first failed rename. Batches renamed before the failure
    /// stay retired.
    pub async fn retire_pulled(&self, node: &str, batches: &[String]) -> Result<usize, StoreError> {
        let mut moved = 0;
        for batch in batches {
            let from = self.batch_path(Mode::Pull, node, batch);
            let to = self.inbound_dir().join(batch);
            if let Err(source) = tokio::fs::rename(&from, &to).await {
                tracing::error!(
                    "cannot move pulled batch {:?} into {:?}, the batch will be retried",
                    from,
                    to
                );
                return Err(StoreError::Rename { from, to, source });
            }
            moved += 1;
        }
        Ok(moved)
    }

    /// Hard-link pulled batches into the dated pull backup directory.
    pub async fn backup_pulled(
        &self,
        node: &str,
        batches: &[String],
        backup_root: &Path,
        retry: &DurableRetry,
    ) -> Result<(), SyncError> {
        let bak_dir = Self::backup_dir(backup_root, Mode::Pull, node);
        durable("create backup directory", &bak_dir, retry, || {
            tokio::fs::create_dir_all(bak_dir.clone())
        })
        .await?;

        for batch in batches {
            let source = self.batch_path(Mode::Pull, node, batch);
            let bak = bak_dir.join(batch);
            durable("link backup", &bak, retry, || link_once(source.clone(), bak.clone())).await?;
        }
        Ok(())
    }
}

/// Create a hard link unless the target already exists.
async fn link_once(source: PathBuf, target: PathBuf) -> io::Result<()> {
    if tokio::fs::try_exists(&target).await? {
        return Ok(());
    }
    match tokio::fs::hard_link(&source, &target).await {
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(()),
        other => other,
    }
}

/// Run `op` until it succeeds. Only shutdown ends the retries, and then the
/// caller must not treat the operation as done.
async fn durable<F, Fut>(what: &str, path: &Path, retry: &DurableRetry, mut op: F) -> Result<(), SyncError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    loop {
        match op().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::error!(
                    "cannot {} at {:?}, cannot continue safely: {}",
                    what,
                    path,
                    e
                );
                if !retry.shutdown.sleep(retry.interval).await {
                    return Err(SyncError::Interrupted);
                }
            }
        }
    }
}
