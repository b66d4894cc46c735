//! Error types for sfs-sync
//!
//! Error hierarchy covering:
//! - Configuration loading and reload rejection
//! - Batch store filesystem operations
//! - External command execution
//! - Dispatch queue communication

use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for sfs-sync.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("batch store error: {0}")]
    Store(#[from] StoreError),

    #[error("command error: {0}")]
    Command(#[from] CommandError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// The liveness marker file is absent
    #[error("checkfile {0:?} does not exist")]
    CheckFileMissing(PathBuf),

    /// No liveness marker configured
    #[error("CHECKFILE is not configured")]
    CheckFileUnset,

    /// Interrupted by shutdown
    #[error("operation interrupted by shutdown")]
    Interrupted,
}

/// Configuration errors. A reload failing with one of these keeps the
/// previous snapshot.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("sync data command not configured ({0})")]
    MissingSyncCommand(&'static str),

    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("{field} must be at least {min}")]
    OutOfRange { field: &'static str, min: u64 },

    #[error("node {node} has no DATA path")]
    MissingNodeData { node: String },

    #[error("nodes cannot change at runtime")]
    NodesChanged,

    #[error("cannot read {path:?}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("cannot parse {path:?}: {reason}")]
    Parse { path: PathBuf, reason: String },
}

/// Batch store filesystem errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("cannot create directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot scan {path:?}: {source}")]
    Scan {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot read batch {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid batch filename format {0}")]
    InvalidBatchName(String),

    #[error("{failed} of {total} batches could not be retired")]
    PartialRetire { failed: usize, total: usize },

    #[error("cannot move {from:?} into {to:?}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// External command errors.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("unable to execute {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command '{command}' exited with status {status:?}, inputsize: {input_size} stderr: {stderr}")]
    Rejected {
        command: String,
        status: Option<i32>,
        input_size: usize,
        stderr: String,
    },

    #[error("i/o error while running '{command}': {source}")]
    Io {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

/// Dispatch queue errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueueError {
    #[error("dispatch queue closed")]
    Closed,
}

/// Result type alias for sfs-sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
