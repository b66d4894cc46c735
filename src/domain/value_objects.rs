//! Value Objects - Immutable domain primitives
//!
//! Value objects are identified by their value rather than identity.
//! They are immutable and can be freely shared.

use std::fmt;

/// Replication direction of a queue.
///
/// Each mode owns its own directory tree under the batch root
/// (`push/<node>` and `pull/<node>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Send local changes to a peer
    Push,
    /// Receive a peer's changes into the local store
    Pull,
}

impl Mode {
    /// Both modes, in the order the scheduler serves them.
    pub const ALL: [Mode; 2] = [Mode::Push, Mode::Pull];

    /// Directory name of the mode under the batch root.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Pull => "pull",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Batch type tag.
///
/// `rec` batches name directory trees that must be transferred recursively,
/// `norec` batches name individual entries. The two never share a bulk
/// because they are transferred by different commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BatchKind {
    Rec,
    Norec,
}

impl BatchKind {
    /// Parse a type tag. Unknown tags are not batches.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "rec" => Some(Self::Rec),
            "norec" => Some(Self::Norec),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rec => "rec",
            Self::Norec => "norec",
        }
    }
}

impl fmt::Display for BatchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of one dispatched task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Fail,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => f.write_str("success"),
            Self::Fail => f.write_str("fail"),
        }
    }
}
