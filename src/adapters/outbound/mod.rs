mod fs_batch_store;
mod process_command_runner;

pub use fs_batch_store::{DurableRetry, FsBatchStore, RetireReport};
pub use process_command_runner::ProcessCommandRunner;
