//! Infrastructure Layer
//!
//! Coordination primitives shared by the roles.

pub mod config_watcher;
pub mod dispatch_queue;
pub mod health_tracker;
pub mod node_locks;
pub mod shutdown;

pub use config_watcher::{ConfigHandle, ConfigWatcher, ReloadOutcome};
pub use dispatch_queue::DispatchQueue;
pub use health_tracker::{BackoffConfig, NodeHealthTracker};
pub use node_locks::{NodeLockGuard, NodeLocks};
pub use shutdown::{shutdown_signal, ShutdownController, TaskGuard};
