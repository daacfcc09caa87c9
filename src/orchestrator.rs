//! Run orchestrator.
//!
//! Ties the parsed manifest to the local lifecycle and the fleet launcher.
//! The local run and the peer launches proceed concurrently; the run is
//! over once the local run (if this host has a site) and every peer task
//! have finished.

use crate::config::RunConfig;
use crate::emulator::Emulator;
use crate::fleet::{launch_peers, FleetReport, PeerLauncher, Shipment};
use crate::lifecycle::{CancelToken, LifecycleController, LifecycleError, LocalPlan, WaitOutcome};
use crate::manifest::ParsedManifest;
use crate::process::CommandRunner;
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use log::{info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;

/// How this invocation was asked to run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    pub manifest_path: PathBuf,
    /// Also launch every peer site
    pub fan_out: bool,
    pub config_path: Option<PathBuf>,
}

/// What happened during one invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// `None` if this host has no site in the manifest
    pub local: Option<WaitOutcome>,
    /// `None` unless peers were launched
    pub fleet: Option<FleetReport>,
}

impl RunSummary {
    /// The local run, if any, ended because its experiment finished.
    /// Peer failures do not count against the run.
    pub fn completed(&self) -> bool {
        !matches!(self.local, Some(WaitOutcome::TimedOut | WaitOutcome::Cancelled))
    }
}

/// Files shipped to every peer alongside the manifest
pub fn support_files(config: &RunConfig, options: &RunOptions) -> Result<Vec<PathBuf>> {
    let mut files = vec![std::env::current_exe().wrap_err("Failed to locate the coordinator binary")?];
    let worker = PathBuf::from(&config.worker.binary);
    if worker.exists() {
        files.push(worker);
    } else {
        warn!("Worker binary {:?} not found locally, peers must provide it", worker);
    }
    files.extend(options.config_path.iter().cloned());
    files.extend(config.remote.support_files.iter().cloned());
    Ok(files)
}

/// Run the local site and, with `fan_out`, every peer site.
///
/// Configuration problems are reported before anything is touched. Peer
/// failures are logged and returned in the summary, never as an error.
#[allow(clippy::too_many_arguments)]
pub fn run<E: Emulator>(
    parsed: &ParsedManifest,
    config: &RunConfig,
    options: &RunOptions,
    shipment: Shipment,
    emulator: E,
    runner: Arc<dyn CommandRunner>,
    launcher: &dyn PeerLauncher,
    cancel: &CancelToken,
) -> Result<RunSummary> {
    let plan = match &parsed.local {
        Some(local) => {
            let plan = LocalPlan::new(&parsed.manifest, local, &parsed.peers, config)
                .wrap_err_with(|| format!("Cannot build the emulated network for {}", local.site.subnet))?;
            emulator
                .validate(&plan.topology)
                .wrap_err_with(|| format!("Cannot emulate {}", local.site.subnet))?;
            info!(
                "Local site {} runs {} workers in {}",
                local.site.host_address, local.site.node_count, local.site.subnet
            );
            Some(plan)
        }
        None => {
            warn!("No manifest site matches this host, only peers will run");
            None
        }
    };

    if plan.is_none() && !options.fan_out {
        return Err(eyre!(
            "Nothing to do: no site in {:?} belongs to this host and --fan-out is not set",
            options.manifest_path
        ));
    }

    let (local, fleet) = thread::scope(|scope| {
        let local_run = plan.as_ref().map(|plan| {
            let mut controller = LifecycleController::new(emulator, runner, config);
            scope.spawn(move || controller.run(plan, cancel))
        });

        let fleet = if options.fan_out {
            if local_run.is_some() {
                thread::sleep(config.remote.launch_delay);
            }
            Some(launch_peers(launcher, &parsed.peers, &shipment))
        } else {
            None
        };

        let local = local_run.map(|handle| {
            handle
                .join()
                .unwrap_or_else(|_| Err(LifecycleError::Panicked))
        });
        (local, fleet)
    });

    if let Some(report) = &fleet {
        report.log_summary();
    }

    let local = local
        .transpose()
        .wrap_err("Local run failed")?;
    if let Some(outcome) = local {
        info!("Local run finished: {:?}", outcome);
    }

    Ok(RunSummary { local, fleet })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_completion() {
        assert!(RunSummary::default().completed());
        let finished = RunSummary {
            local: Some(WaitOutcome::Completed),
            fleet: Some(FleetReport::default()),
        };
        assert!(finished.completed());
        let timed_out = RunSummary {
            local: Some(WaitOutcome::TimedOut),
            fleet: None,
        };
        assert!(!timed_out.completed());
    }

    #[test]
    fn test_support_files() {
        let mut config = RunConfig::default();
        config.worker.binary = "/nonexistent/worker".to_string();
        config.remote.support_files = vec![PathBuf::from("experiment.toml")];
        let options = RunOptions {
            manifest_path: PathBuf::from("sites.list"),
            fan_out: true,
            config_path: Some(PathBuf::from("run.yaml")),
        };

        let files = support_files(&config, &options).unwrap();
        assert_eq!(files.len(), 3);
        assert_eq!(files[1], PathBuf::from("run.yaml"));
        assert_eq!(files[2], PathBuf::from("experiment.toml"));
    }
}
