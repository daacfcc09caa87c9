//! Run configuration.
//!
//! Everything that is not part of the shared manifest: where the worker
//! binary lives, which ports the relay and monitor use, how long to wait
//! for completion, and how peers are reached. Every field has a default,
//! so the configuration file is optional.
//!
//! ```yaml
//! worker:
//!   binary: ./worker
//!   debug_level: 1
//! completion:
//!   poll_interval: 1s
//!   timeout: 2h
//! remote:
//!   support_files: [experiment.toml]
//! ```

use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid worker configuration: {0}")]
    InvalidWorker(String),
    #[error("Invalid log relay configuration: {0}")]
    InvalidLogRelay(String),
    #[error("Invalid completion configuration: {0}")]
    InvalidCompletion(String),
    #[error("Invalid remote configuration: {0}")]
    InvalidRemote(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub worker: WorkerConfig,
    /// Port of the monitoring sink on the manifest's first host
    pub monitor_port: u16,
    pub log_relay: LogRelayConfig,
    pub completion: CompletionConfig,
    pub remote: RemoteConfig,
    pub emulator: EmulatorConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            worker: WorkerConfig::default(),
            monitor_port: 10000,
            log_relay: LogRelayConfig::default(),
            completion: CompletionConfig::default(),
            remote: RemoteConfig::default(),
            emulator: EmulatorConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub binary: String,
    pub port: u16,
    pub debug_level: u8,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            binary: "./worker".to_string(),
            port: 2000,
            debug_level: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogRelayConfig {
    pub sink_path: PathBuf,
    pub port: u16,
}

impl Default for LogRelayConfig {
    fn default() -> Self {
        Self {
            sink_path: PathBuf::from("/tmp/meshsim.log"),
            port: 5000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    pub marker: PathBuf,
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// `None`, the default, waits forever
    #[serde(with = "humantime_serde")]
    pub timeout: Option<Duration>,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            marker: PathBuf::from("/tmp/meshsim_done.log"),
            poll_interval: Duration::from_secs(1),
            timeout: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub ssh: String,
    pub scp: String,
    /// Directory on the peer the files are copied to and run from
    pub directory: String,
    /// Prefix for commands that need root on the peer
    pub sudo: String,
    /// Extra files shipped to every peer
    pub support_files: Vec<PathBuf>,
    /// Pause between starting the local network and launching peers
    #[serde(with = "humantime_serde")]
    pub launch_delay: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            ssh: "ssh".to_string(),
            scp: "scp".to_string(),
            directory: ".".to_string(),
            sudo: "sudo".to_string(),
            support_files: Vec::new(),
            launch_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmulatorConfig {
    /// Prefix of every namespace and interface the emulator creates
    pub prefix: String,
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            prefix: crate::emulator::netns::DEFAULT_PREFIX.to_string(),
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker.binary.trim().is_empty() {
            return Err(ConfigError::InvalidWorker("binary cannot be empty".to_string()));
        }
        if self.worker.port == 0 || self.monitor_port == 0 {
            return Err(ConfigError::InvalidWorker(
                "worker and monitor ports must be non-zero".to_string(),
            ));
        }
        if self.log_relay.port == 0 {
            return Err(ConfigError::InvalidLogRelay("port must be non-zero".to_string()));
        }
        if self.completion.poll_interval.is_zero() {
            return Err(ConfigError::InvalidCompletion(
                "poll_interval must be greater than zero".to_string(),
            ));
        }
        if self.completion.timeout.is_some_and(|t| t.is_zero()) {
            return Err(ConfigError::InvalidCompletion(
                "timeout must be greater than zero".to_string(),
            ));
        }
        if self.remote.ssh.is_empty() || self.remote.scp.is_empty() {
            return Err(ConfigError::InvalidRemote(
                "ssh and scp commands cannot be empty".to_string(),
            ));
        }
        // Interface names are limited to 15 bytes; the full names are checked
        // against the topology before the network is built
        if self.emulator.prefix.is_empty() || self.emulator.prefix.len() > 4 {
            return Err(ConfigError::InvalidWorker(
                "emulator prefix must be 1 to 4 characters".to_string(),
            ));
        }
        Ok(())
    }
}

/// Load and validate a run configuration from a YAML file
pub fn load_config(config_path: &Path) -> Result<RunConfig> {
    info!("Loading run configuration from: {:?}", config_path);

    let file = File::open(config_path)
        .wrap_err_with(|| format!("Failed to open configuration '{}'", config_path.display()))?;
    let config: RunConfig = serde_yaml::from_reader(file)
        .wrap_err_with(|| format!("Failed to parse configuration '{}'", config_path.display()))?;

    config.validate()?;
    Ok(config)
}
