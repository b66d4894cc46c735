//! sfs-sync Library
//!
//! This module exposes the sfs-sync components for use in integration tests
//! and as a library.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;

// Re-export commonly used types
pub use adapters::outbound::{FsBatchStore, ProcessCommandRunner};
pub use application::Orchestrator;
pub use config::{load_config, Config, NodeConfig};
pub use domain::entities::{BatchName, Bulk, DispatchMessage};
pub use domain::ports::CommandExecutor;
pub use domain::services::{BulkBuilder, DispatchRotation};
pub use domain::value_objects::{BatchKind, Mode, Outcome};
pub use error::{Result, SyncError};
