//! Command Executor Port
//!
//! Defines the interface for running external transfer commands.
//! The production implementation spawns a shell subprocess; tests can
//! substitute an in-memory recorder.

use crate::domain::invocation::Invocation;
use crate::error::CommandError;
use async_trait::async_trait;

/// Runs one external command to completion.
///
/// Implementations must treat an exit status outside the configured
/// allow-list, or a failure to spawn, as an error. A dry-run implementation
/// returns `Ok(())` without side effects.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, invocation: &Invocation) -> Result<(), CommandError>;
}
