//! Peer launcher over ssh and scp.

use super::{FleetError, PeerLauncher};
use crate::config::RemoteConfig;
use crate::manifest::PeerSite;
use crate::process::{CommandRunner, CommandSpec, RunError};
use log::debug;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Starts the coordinator on peers with `ssh`, after copying files with `scp`.
///
/// Files land in `remote.directory` on the peer and the coordinator is run
/// from there under `remote.sudo`. Peers are started without `--fan-out`
/// so they never launch sites of their own.
pub struct SshLauncher {
    runner: Arc<dyn CommandRunner>,
    remote: RemoteConfig,
    binary_name: String,
    config_name: Option<String>,
}

impl SshLauncher {
    pub fn new(runner: Arc<dyn CommandRunner>, remote: RemoteConfig, binary_name: impl Into<String>) -> Self {
        Self {
            runner,
            remote,
            binary_name: binary_name.into(),
            config_name: None,
        }
    }

    /// Pass `--config <name>` to the remote coordinator
    pub fn with_config(mut self, config_name: impl Into<String>) -> Self {
        self.config_name = Some(config_name.into());
        self
    }

    fn privileged(&self, command: &str) -> String {
        if self.remote.sudo.is_empty() {
            command.to_string()
        } else {
            format!("{} {}", self.remote.sudo, command)
        }
    }

    fn coordinator(&self, args: &[&str]) -> String {
        let mut words = vec![format!("./{}", self.binary_name)];
        words.extend(args.iter().map(|a| a.to_string()));
        if let Some(config) = &self.config_name {
            words.push("--config".to_string());
            words.push(config.clone());
        }
        self.privileged(&shell_words::join(words))
    }

    fn in_directory(&self, command: &str) -> String {
        format!("cd {} && {}", shell_words::quote(&self.remote.directory), command)
    }

    fn ssh(&self, host: Ipv4Addr, remote_command: String) -> CommandSpec {
        CommandSpec::new(&self.remote.ssh)
            .arg("-q")
            .arg(host.to_string())
            .arg(remote_command)
    }

    /// Kill a leftover coordinator, then clear its emulated network
    pub fn cleanup_command(&self, host: Ipv4Addr) -> CommandSpec {
        let kill = self.privileged(&shell_words::join(["pkill", "-9", "-x", self.binary_name.as_str()]));
        let clean = self.in_directory(&self.coordinator(&["--cleanup"]));
        self.ssh(host, format!("{}; {}", kill, clean))
    }

    pub fn copy_command(&self, host: Ipv4Addr, files: &[PathBuf]) -> CommandSpec {
        CommandSpec::new(&self.remote.scp)
            .arg("-q")
            .args(files.iter().map(|f| f.display().to_string()))
            .arg(format!("{}:{}", host, self.remote.directory))
    }

    pub fn invoke_command(&self, host: Ipv4Addr, manifest: &Path) -> CommandSpec {
        let manifest = manifest
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| manifest.display().to_string());
        self.ssh(host, self.in_directory(&self.coordinator(&[manifest.as_str()])))
    }
}

fn reason(error: RunError) -> String {
    match error.stderr() {
        "" => error.to_string(),
        stderr => stderr.to_string(),
    }
}

impl PeerLauncher for SshLauncher {
    fn clean_remote(&self, peer: &PeerSite) -> Result<(), FleetError> {
        let host = peer.host_address();
        let command = self.cleanup_command(host);
        debug!("{}", command);
        // pkill exits non-zero when nothing was running
        let output = self.runner.output(&command).map_err(|e| FleetError::Cleanup {
            host,
            reason: reason(e),
        })?;
        if output.status == Some(255) {
            return Err(FleetError::Cleanup {
                host,
                reason: output.stderr.trim().to_string(),
            });
        }
        Ok(())
    }

    fn copy_files(&self, peer: &PeerSite, files: &[PathBuf]) -> Result<(), FleetError> {
        let host = peer.host_address();
        let command = self.copy_command(host, files);
        debug!("{}", command);
        self.runner
            .run(&command)
            .map(|_| ())
            .map_err(|e| FleetError::Copy { host, reason: reason(e) })
    }

    fn invoke_remote(&self, peer: &PeerSite, manifest: &Path) -> Result<(), FleetError> {
        let host = peer.host_address();
        let command = self.invoke_command(host, manifest);
        debug!("{}", command);
        self.runner
            .run(&command)
            .map(|_| ())
            .map_err(|e| FleetError::Invoke { host, reason: reason(e) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fleet::{launch_peers, Shipment};
    use crate::ip::Subnet;
    use crate::manifest::SiteSpec;
    use crate::process::RecordingRunner;

    fn peer(host: &str) -> PeerSite {
        PeerSite {
            site: SiteSpec {
                host_address: host.parse().unwrap(),
                subnet: Subnet::parse("10.2.0.0/16").unwrap(),
                node_count: 3,
            },
            position: 1,
        }
    }

    fn launcher(runner: Arc<RecordingRunner>) -> SshLauncher {
        let remote = RemoteConfig {
            directory: "/opt/sim".to_string(),
            ..RemoteConfig::default()
        };
        SshLauncher::new(runner, remote, "meshsim")
    }

    #[test]
    fn test_command_lines() {
        let launcher = launcher(Arc::new(RecordingRunner::new()));
        let host: Ipv4Addr = "10.0.0.9".parse().unwrap();

        assert_eq!(
            launcher.cleanup_command(host).command_line(),
            "ssh -q 10.0.0.9 'sudo pkill -9 -x meshsim; cd /opt/sim && sudo ./meshsim --cleanup'"
        );
        assert_eq!(
            launcher
                .copy_command(host, &[PathBuf::from("sites.list"), PathBuf::from("worker")])
                .command_line(),
            "scp -q sites.list worker '10.0.0.9:/opt/sim'"
        );
        assert_eq!(
            launcher
                .invoke_command(host, Path::new("/home/sim/sites.list"))
                .command_line(),
            "ssh -q 10.0.0.9 'cd /opt/sim && sudo ./meshsim sites.list'"
        );
    }

    #[test]
    fn test_config_is_forwarded() {
        let launcher = launcher(Arc::new(RecordingRunner::new())).with_config("run.yaml");
        let invoke = launcher.invoke_command("10.0.0.9".parse().unwrap(), Path::new("sites.list"));
        assert!(invoke.command_line().ends_with("sudo ./meshsim sites.list --config run.yaml'"));
        assert!(!invoke.command_line().contains("--fan-out"));
    }

    #[test]
    fn test_without_sudo() {
        let remote = RemoteConfig {
            sudo: String::new(),
            ..RemoteConfig::default()
        };
        let launcher = SshLauncher::new(Arc::new(RecordingRunner::new()), remote, "meshsim");
        let invoke = launcher.invoke_command("10.0.0.9".parse().unwrap(), Path::new("sites.list"));
        assert_eq!(invoke.command_line(), "ssh -q 10.0.0.9 'cd . && ./meshsim sites.list'");
    }

    #[test]
    fn test_nothing_to_kill_is_not_a_cleanup_failure() {
        let runner = Arc::new(RecordingRunner::new());
        runner.fail_matching("pkill", "");
        assert!(launcher(runner).clean_remote(&peer("10.0.0.9")).is_ok());
    }

    #[test]
    fn test_failed_copy_skips_invoke() {
        let runner = Arc::new(RecordingRunner::new());
        runner.fail_matching("scp -q", "ssh: connect to host 10.0.0.9 port 22: No route to host");
        let launcher = launcher(runner.clone());
        let shipment = Shipment {
            manifest: PathBuf::from("sites.list"),
            support_files: vec![PathBuf::from("meshsim")],
        };

        let report = launch_peers(&launcher, &[peer("10.0.0.9")], &shipment);
        assert_eq!(
            report.outcomes[0].result,
            Err(FleetError::Copy {
                host: "10.0.0.9".parse().unwrap(),
                reason: "ssh: connect to host 10.0.0.9 port 22: No route to host".to_string(),
            })
        );
        assert_eq!(runner.count_matching("./meshsim sites.list"), 0);
    }

    #[test]
    fn test_remote_failure_is_reported() {
        let runner = Arc::new(RecordingRunner::new());
        runner.fail_matching("./meshsim sites.list", "Error: no site matches this host");
        let launcher = launcher(runner);
        let result = launcher.invoke_remote(&peer("10.0.0.9"), Path::new("sites.list"));
        assert!(matches!(result, Err(FleetError::Invoke { .. })));
    }
}
