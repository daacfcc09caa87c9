//! Process execution module.
//!
//! This module describes the commands the coordinator issues, runs them
//! on the local host, and builds the experiment worker invocation.

pub mod recording;
pub mod runner;
pub mod types;
pub mod worker;

// Re-export commonly used types for convenience
pub use recording::RecordingRunner;
pub use runner::{BackgroundProcess, CommandRunner, RunError, SystemRunner};
pub use types::{CommandOutput, CommandSpec};
pub use worker::WorkerLaunch;
