//! Cooperative Shutdown
//!
//! Signals termination to every role and tracks tasks that are still
//! running an external command, so teardown can let them finish.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::Notify;

/// Shutdown coordinator shared by all roles.
#[derive(Clone)]
pub struct ShutdownController {
    /// Whether shutdown has been initiated
    shutdown_initiated: Arc<AtomicBool>,
    /// Number of tasks currently being executed by workers
    in_flight: Arc<AtomicUsize>,
    /// Broadcast channel for shutdown signal
    shutdown_tx: broadcast::Sender<()>,
    /// Notify when all in-flight tasks are done
    drain_complete: Arc<Notify>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            shutdown_initiated: Arc::new(AtomicBool::new(false)),
            in_flight: Arc::new(AtomicUsize::new(0)),
            shutdown_tx,
            drain_complete: Arc::new(Notify::new()),
        }
    }

    /// Subscribe to shutdown notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Initiate shutdown. Idempotent.
    pub fn shutdown(&self) {
        if !self.shutdown_initiated.swap(true, Ordering::SeqCst) {
            tracing::info!("initiating shutdown");
            let _ = self.shutdown_tx.send(());
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_initiated.load(Ordering::SeqCst)
    }

    /// Sleep for `duration` unless shutdown comes first.
    ///
    /// Returns `false` if the sleep was cut short by shutdown.
    pub async fn sleep(&self, duration: Duration) -> bool {
        let mut rx = self.subscribe();
        if self.is_shutdown() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = rx.recv() => false,
        }
    }

    /// Resolve once shutdown has been initiated.
    pub async fn wait(&self) {
        let mut rx = self.subscribe();
        if self.is_shutdown() {
            return;
        }
        let _ = rx.recv().await;
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    fn task_ended(&self) {
        let prev = self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if prev == 1 && self.is_shutdown() {
            self.drain_complete.notify_waiters();
        }
    }

    /// Mark a task as in flight until the guard is dropped.
    pub fn task_guard(&self) -> TaskGuard {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        TaskGuard {
            controller: self.clone(),
        }
    }

    /// Wait for in-flight tasks to finish (with timeout).
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let notified = self.drain_complete.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if self.in_flight() == 0 {
            return true;
        }

        tokio::select! {
            _ = notified => true,
            _ = tokio::time::sleep(timeout) => {
                tracing::warn!(
                    "drain timeout: {} tasks still running an external command",
                    self.in_flight()
                );
                false
            }
        }
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for an in-flight task.
pub struct TaskGuard {
    controller: ShutdownController,
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        self.controller.task_ended();
    }
}

/// Wait for SIGINT or SIGTERM, then initiate shutdown.
pub async fn shutdown_signal(controller: ShutdownController) -> std::io::Result<()> {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let mut sigterm =
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;

    #[cfg(unix)]
    let terminate = sigterm.recv();

    #[cfg(not(unix))]
    let terminate = std::future::pending::<Option<()>>();

    tokio::select! {
        res = ctrl_c => {
            res?;
            tracing::info!("received SIGINT, initiating shutdown");
        }
        _ = terminate => {
            tracing::info!("received SIGTERM, initiating shutdown");
        }
        _ = controller.wait() => {}
    }

    controller.shutdown();
    Ok(())
}
