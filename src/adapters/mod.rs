//! Adapters Layer
//!
//! Implementations of the domain ports against the filesystem and the shell.

pub mod outbound;
