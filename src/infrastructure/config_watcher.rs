//! Configuration Hot Reload
//!
//! Polls the configuration file and publishes a new snapshot when it
//! changes. A candidate that fails validation or changes the node set is
//! rejected and the last good snapshot stays in effect.

use crate::config::{load_config, Config};
use crate::error::ConfigError;
use crate::infrastructure::shutdown::ShutdownController;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;

/// Read-only view of the current configuration snapshot.
pub type ConfigHandle = watch::Receiver<Arc<Config>>;

/// Result of one reload check.
#[derive(Debug, Clone, PartialEq)]
pub enum ReloadOutcome {
    /// File untouched, or touched without any effective change
    Unchanged,
    /// A new snapshot was published
    Reloaded,
    /// The candidate was refused; the previous snapshot is kept
    Rejected(ConfigError),
}

/// Configuration watcher that publishes validated snapshots.
pub struct ConfigWatcher {
    path: PathBuf,
    /// Last modification time seen for the file
    last_mtime: Mutex<Option<SystemTime>>,
    /// Channel holding the current snapshot
    current: watch::Sender<Arc<Config>>,
    /// Poll interval for file changes
    poll_interval: Duration,
}

impl ConfigWatcher {
    /// Create a watcher around an already loaded snapshot.
    pub fn new(path: impl AsRef<Path>, initial: Config, poll_interval: Duration) -> Self {
        let path = path.as_ref().to_path_buf();
        let last_mtime = Self::mtime(&path);
        let (current, _) = watch::channel(Arc::new(initial));
        Self {
            path,
            last_mtime: Mutex::new(last_mtime),
            current,
            poll_interval,
        }
    }

    fn mtime(path: &Path) -> Option<SystemTime> {
        std::fs::metadata(path).and_then(|m| m.modified()).ok()
    }

    /// Subscribe to snapshot updates.
    pub fn subscribe(&self) -> ConfigHandle {
        self.current.subscribe()
    }

    /// Current snapshot.
    pub fn current(&self) -> Arc<Config> {
        self.current.borrow().clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the file if it changed since the last check.
    ///
    /// Rejections are gated on the file's modification time, so each bad
    /// revision is reported exactly once.
    pub fn check_reload(&self) -> ReloadOutcome {
        let mtime = Self::mtime(&self.path);
        {
            let mut last = self.last_mtime.lock();
            if *last == mtime {
                return ReloadOutcome::Unchanged;
            }
            *last = mtime;
        }

        let candidate = match load_config(&self.path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::error!("error reloading config {:?}: {}", self.path, e);
                return ReloadOutcome::Rejected(e);
            }
        };

        let current = self.current();
        if *current == candidate {
            return ReloadOutcome::Unchanged;
        }

        if let Err(e) = current.check_reload(&candidate) {
            tracing::error!("rejected config reload from {:?}: {}", self.path, e);
            return ReloadOutcome::Rejected(e);
        }

        self.current.send_replace(Arc::new(candidate));
        tracing::info!("configuration reloaded successfully");
        ReloadOutcome::Reloaded
    }

    /// Start the polling loop; it ends on shutdown.
    pub fn start(self: Arc<Self>, shutdown: ShutdownController) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            while shutdown.sleep(self.poll_interval).await {
                self.check_reload();
            }
            tracing::debug!("config watcher stopped");
        })
    }
}
