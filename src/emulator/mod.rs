//! Virtual network emulation.
//!
//! The lifecycle only depends on the [`Emulator`] trait: create the
//! switch, router and worker nodes of a [`Topology`], run commands inside
//! worker nodes, and take everything down again. [`NetnsEmulator`] is the
//! Linux network-namespace backend.

pub mod netns;

pub use netns::NetnsEmulator;

use crate::process::RunError;
use crate::topology::{Topology, WorkerNode};

#[derive(Debug, thiserror::Error)]
pub enum EmulatorError {
    #[error("Emulated network is not running")]
    NotStarted,

    #[error("Emulated network is already running")]
    AlreadyStarted,

    #[error(transparent)]
    Command(#[from] RunError),

    #[error("{failed} teardown step(s) failed, first: {first}")]
    Teardown { failed: usize, first: String },

    #[error("Name '{name}' is longer than the {max} bytes the kernel allows")]
    NameTooLong { name: String, max: usize },
}

/// Backend that turns a [`Topology`] into a running emulated network
pub trait Emulator: Send {
    /// Reject a topology this backend cannot build, before anything exists
    fn validate(&self, _topology: &Topology) -> Result<(), EmulatorError> {
        Ok(())
    }

    /// Remove leftovers of a previous run. Best effort.
    fn clean_stale_state(&mut self);

    /// Create and bring up the switch, router and worker nodes
    fn start(&mut self, topology: &Topology) -> Result<(), EmulatorError>;

    /// Start `shell_command` in the background inside `worker`
    fn launch(&mut self, worker: &WorkerNode, shell_command: &str) -> Result<(), EmulatorError>;

    /// Stop every process running inside `worker`
    fn stop_worker(&mut self, worker: &WorkerNode) -> Result<(), EmulatorError>;

    /// Tear down every emulated object. Every step is attempted even if
    /// an earlier one fails.
    fn stop(&mut self) -> Result<(), EmulatorError>;
}
