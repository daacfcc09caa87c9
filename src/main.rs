use clap::Parser;
use color_eyre::eyre::{eyre, WrapErr};
use color_eyre::Result;
use env_logger::Env;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use meshsim::config::{load_config, RunConfig};
use meshsim::emulator::NetnsEmulator;
use meshsim::fleet::{Shipment, SshLauncher};
use meshsim::ip::local_ipv4_addresses;
use meshsim::lifecycle::{clean_stale_run, CancelToken, CompletionMarker};
use meshsim::manifest::parse_manifest;
use meshsim::orchestrator::{self, RunOptions};
use meshsim::process::{CommandRunner, SystemRunner};

/// Coordinator for emulated subnets spread across multiple hosts
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the site manifest
    #[arg(required_unless_present = "cleanup")]
    manifest: Option<PathBuf>,

    /// Also start the coordinator on every peer site
    #[arg(long)]
    fan_out: bool,

    /// Path to the YAML run configuration
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Only remove leftovers of a previous run, then exit
    #[arg(long)]
    cleanup: bool,

    /// Give up waiting for the completion marker after this long (e.g. 90m)
    #[arg(long, value_parser = parse_timeout)]
    completion_timeout: Option<Duration>,
}

fn parse_timeout(value: &str) -> Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(value).map_err(|e| e.to_string())
}

fn binary_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|path| path.file_name().map(|name| name.to_string_lossy().into_owned()))
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Cancel `cancel` on Ctrl-C or SIGTERM so the run still tears down
fn install_cancel_handler(cancel: &CancelToken) -> Result<()> {
    let token = cancel.clone();
    ctrlc::set_handler(move || {
        warn!("Interrupted, tearing down the local run");
        token.cancel();
    })
    .wrap_err("Failed to install the interrupt handler")
}

fn main() -> Result<()> {
    // Initialize error handling
    color_eyre::install()?;

    let args = Args::parse();

    // Initialize logging with default filter level of "info"
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => RunConfig::default(),
    };
    if let Some(timeout) = args.completion_timeout {
        config.completion.timeout = Some(timeout);
    }

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let mut emulator = NetnsEmulator::new(runner.clone(), config.emulator.prefix.clone());

    if args.cleanup {
        info!("Removing leftovers of a previous run");
        let marker = CompletionMarker::new(config.completion.marker.clone());
        clean_stale_run(&mut emulator, &marker)?;
        return Ok(());
    }

    let manifest_path = args
        .manifest
        .clone()
        .ok_or_else(|| eyre!("A manifest path is required"))?;

    let local_addresses = local_ipv4_addresses().wrap_err("Failed to list local interface addresses")?;
    let parsed = parse_manifest(&manifest_path, &local_addresses)?;
    info!(
        "Simulation '{}' with {} site(s), {} Mbit/s, {} delay",
        parsed.manifest.params.name,
        parsed.manifest.sites.len(),
        parsed.manifest.params.bandwidth_mbit,
        parsed.manifest.params.delay_token()
    );

    let options = RunOptions {
        manifest_path: manifest_path.clone(),
        fan_out: args.fan_out,
        config_path: args.config.clone(),
    };

    let mut launcher = SshLauncher::new(runner.clone(), config.remote.clone(), binary_name());
    if let Some(config_path) = &args.config {
        launcher = launcher.with_config(file_name(config_path));
    }
    let shipment = Shipment {
        manifest: manifest_path,
        support_files: if args.fan_out {
            orchestrator::support_files(&config, &options)?
        } else {
            Vec::new()
        },
    };

    let cancel = CancelToken::new();
    install_cancel_handler(&cancel)?;

    let summary = orchestrator::run(
        &parsed,
        &config,
        &options,
        shipment,
        emulator,
        runner,
        &launcher,
        &cancel,
    )?;

    if !summary.completed() {
        return Err(eyre!("Local run ended without a completion marker: {:?}", summary.local));
    }
    info!("Run finished successfully");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parsing() {
        let args = Args::parse_from(["meshsim", "sites.list"]);
        assert_eq!(args.manifest, Some(PathBuf::from("sites.list")));
        assert!(!args.fan_out);
        assert!(!args.cleanup);
        assert_eq!(args.config, None);
    }

    #[test]
    fn test_fan_out_args() {
        let args = Args::parse_from([
            "meshsim",
            "sites.list",
            "--fan-out",
            "--config", "run.yaml",
            "--completion-timeout", "90m",
        ]);
        assert!(args.fan_out);
        assert_eq!(args.config, Some(PathBuf::from("run.yaml")));
        assert_eq!(args.completion_timeout, Some(Duration::from_secs(5400)));
    }

    #[test]
    fn test_manifest_is_required() {
        assert!(Args::try_parse_from(["meshsim"]).is_err());
        assert!(Args::try_parse_from(["meshsim", "sites.list", "--completion-timeout", "soon"]).is_err());
    }

    #[test]
    fn test_interrupt_cancels_the_run() {
        let cancel = CancelToken::new();
        install_cancel_handler(&cancel).unwrap();

        let status = std::process::Command::new("kill")
            .args(["-INT", &std::process::id().to_string()])
            .status()
            .unwrap();
        assert!(status.success());

        for _ in 0..200 {
            if cancel.is_cancelled() {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        panic!("SIGINT did not cancel the run");
    }

    #[test]
    fn test_cleanup_without_manifest() {
        let args = Args::parse_from(["meshsim", "--cleanup"]);
        assert!(args.cleanup);
        assert_eq!(args.manifest, None);
    }
}
