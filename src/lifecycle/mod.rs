//! Local run lifecycle.
//!
//! One run moves through
//! `Idle -> Building -> Running -> AwaitingCompletion -> TearingDown -> Done`.
//! Teardown happens whenever building got under way, including after a
//! failed start, a timeout, or a cancellation.

pub mod marker;
pub mod plan;

pub use marker::{CancelToken, CompletionMarker, WaitOutcome};
pub use plan::LocalPlan;

use crate::config::RunConfig;
use crate::emulator::{Emulator, EmulatorError};
use crate::process::CommandRunner;
use crate::routing::{LogRelay, RoutingCoordinator, RoutingError};
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Building,
    Running,
    AwaitingCompletion,
    TearingDown,
    Done,
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("Failed to clear completion marker {path:?}: {source}")]
    Marker {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Emulator(#[from] EmulatorError),

    #[error(transparent)]
    Routing(#[from] RoutingError),

    #[error("Local run thread panicked")]
    Panicked,
}

/// Drives one local run on top of an [`Emulator`] backend
pub struct LifecycleController<E: Emulator> {
    emulator: E,
    runner: Arc<dyn CommandRunner>,
    marker: CompletionMarker,
    poll_interval: Duration,
    timeout: Option<Duration>,
    relay_sink: PathBuf,
    relay_port: u16,
    state: RunState,
    transitions: Vec<RunState>,
}

impl<E: Emulator> LifecycleController<E> {
    pub fn new(emulator: E, runner: Arc<dyn CommandRunner>, config: &RunConfig) -> Self {
        Self {
            emulator,
            runner,
            marker: CompletionMarker::new(config.completion.marker.clone()),
            poll_interval: config.completion.poll_interval,
            timeout: config.completion.timeout,
            relay_sink: config.log_relay.sink_path.clone(),
            relay_port: config.log_relay.port,
            state: RunState::Idle,
            transitions: vec![RunState::Idle],
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Every state entered so far, in order
    pub fn transitions(&self) -> &[RunState] {
        &self.transitions
    }

    pub fn marker(&self) -> &CompletionMarker {
        &self.marker
    }

    fn transition(&mut self, state: RunState) {
        log::debug!("Local run: {:?} -> {:?}", self.state, state);
        self.state = state;
        self.transitions.push(state);
    }

    /// Run the local subnet until its completion writer signals, then tear
    /// everything down again.
    pub fn run(&mut self, plan: &LocalPlan, cancel: &CancelToken) -> Result<WaitOutcome, LifecycleError> {
        info!("Cleaning up emulated network and completion marker");
        if let Err(source) = self.marker.clear() {
            self.transition(RunState::Done);
            return Err(LifecycleError::Marker {
                path: self.marker.path().to_path_buf(),
                source,
            });
        }
        self.emulator.clean_stale_state();

        self.transition(RunState::Building);
        let relay = LogRelay::new(self.relay_sink.clone(), self.relay_port, plan.log_root);
        let mut routing = RoutingCoordinator::new(self.runner.clone(), plan.routes.clone(), relay);

        let result = match self.bring_up(plan, &mut routing) {
            Ok(()) => {
                self.transition(RunState::AwaitingCompletion);
                info!("Waiting for the experiment in {} to finish", plan.topology.subnet);
                let outcome = self.marker.wait(self.poll_interval, self.timeout, cancel);
                match outcome {
                    WaitOutcome::Completed => info!("Experiment in {} is finished", plan.topology.subnet),
                    WaitOutcome::TimedOut => warn!(
                        "No completion marker after {:?}, tearing down",
                        self.timeout.unwrap_or_default()
                    ),
                    WaitOutcome::Cancelled => warn!("Local run cancelled, tearing down"),
                }
                Ok(outcome)
            }
            Err(e) => {
                warn!("Failed to bring up {}: {}", plan.topology.subnet, e);
                Err(e)
            }
        };

        self.tear_down(plan, &mut routing);
        self.transition(RunState::Done);
        result
    }

    fn bring_up(&mut self, plan: &LocalPlan, routing: &mut RoutingCoordinator) -> Result<(), LifecycleError> {
        routing.install()?;
        self.emulator.start(&plan.topology)?;
        self.transition(RunState::Running);

        for worker in &plan.topology.workers {
            self.emulator
                .launch(worker, &plan.workers.shell_command(worker))?;
        }
        info!(
            "Started {} workers for '{}'",
            plan.topology.workers.len(),
            plan.topology
                .workers
                .first()
                .map(|w| w.simulation.as_str())
                .unwrap_or_default()
        );
        Ok(())
    }

    fn tear_down(&mut self, plan: &LocalPlan, routing: &mut RoutingCoordinator) {
        self.transition(RunState::TearingDown);

        for worker in &plan.topology.workers {
            if let Err(e) = self.emulator.stop_worker(worker) {
                warn!("Failed to stop worker on {}: {}", worker.name, e);
            }
        }
        if let Err(e) = self.emulator.stop() {
            warn!("Emulated network did not stop cleanly: {}", e);
        }
        let failures = routing.teardown();
        if failures > 0 {
            warn!("{} routing teardown step(s) failed", failures);
        }
    }
}

/// Clear what a previous run may have left behind on this host
pub fn clean_stale_run<E: Emulator>(emulator: &mut E, marker: &CompletionMarker) -> Result<(), LifecycleError> {
    emulator.clean_stale_state();
    marker.clear().map_err(|source| LifecycleError::Marker {
        path: marker.path().to_path_buf(),
        source,
    })
}
