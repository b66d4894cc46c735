//! Application Layer
//!
//! The long-running roles and the wiring between them.

pub mod enqueue;
pub mod orchestrator;
pub mod scheduler;
pub mod transfer;
pub mod workers;

pub use enqueue::{EnqueueLoop, EnqueueReport};
pub use orchestrator::Orchestrator;
pub use scheduler::{CycleReport, Scheduler};
pub use workers::{PullWorker, PushWorker, WorkerContext};
