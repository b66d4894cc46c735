//! Domain Entities - Core business objects
//!
//! These entities represent the queued batches and the units of work built
//! from them. They have no external dependencies.

use crate::domain::value_objects::{BatchKind, Mode, Outcome};
use std::time::SystemTime;

/// Suffix shared by every batch file.
pub const BATCH_SUFFIX: &str = ".batch";

/// A parsed batch filename.
///
/// Layout: `<timestamp>_<origin>_..._<type>.batch`. The leading timestamp is
/// a digit run so lexical order is creation order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchName {
    /// Full file name, including the suffix
    pub name: String,
    /// Node that produced the batch
    pub origin: String,
    /// Type tag
    pub kind: BatchKind,
}

impl BatchName {
    /// Parse a file name. Returns `None` for anything that is not a batch.
    pub fn parse(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(BATCH_SUFFIX)?;
        let mut fields = stem.split('_');

        let stamp = fields.next()?;
        if stamp.is_empty() || !stamp.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let origin = fields.next().filter(|o| !o.is_empty())?;
        let tag = fields.last()?;
        if tag.contains('.') {
            return None;
        }
        let kind = BatchKind::from_tag(tag)?;

        Some(Self {
            name: name.to_string(),
            origin: origin.to_string(),
            kind,
        })
    }
}

/// A queued batch observed during a directory scan.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub batch: BatchName,
    /// Modification time, `None` when it could not be read
    pub modified: Option<SystemTime>,
}

/// An ordered, same-type group of batches selected for one dispatch to one
/// node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bulk {
    pub node: String,
    pub kind: BatchKind,
    /// Batch file names, oldest first
    pub batches: Vec<String>,
}

impl Bulk {
    pub fn len(&self) -> usize {
        self.batches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

/// Selector used by consumers of the dispatch queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Push,
    Pull,
    Result,
}

impl From<Mode> for MessageKind {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Push => Self::Push,
            Mode::Pull => Self::Pull,
        }
    }
}

/// Message carried by the dispatch queue.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchMessage {
    /// Push a bulk to its node
    Push(Bulk),
    /// Pull a bulk from its node
    Pull(Bulk),
    /// Completion report for a previously dispatched bulk
    Result { node: String, outcome: Outcome },
}

impl DispatchMessage {
    /// Build the task message for a mode.
    pub fn task(mode: Mode, bulk: Bulk) -> Self {
        match mode {
            Mode::Push => Self::Push(bulk),
            Mode::Pull => Self::Pull(bulk),
        }
    }

    pub fn kind(&self) -> MessageKind {
        match self {
            Self::Push(_) => MessageKind::Push,
            Self::Pull(_) => MessageKind::Pull,
            Self::Result { .. } => MessageKind::Result,
        }
    }

    pub fn node(&self) -> &str {
        match self {
            Self::Push(bulk) | Self::Pull(bulk) => &bulk.node,
            Self::Result { node, .. } => node,
        }
    }
}
