//! Best-effort log relay.
//!
//! Every router runs a UDP sink that appends what it receives to a local
//! log file. Every site except the manifest's first one also forwards new
//! lines of that file to the aggregation root.

use crate::process::{BackgroundProcess, CommandRunner, CommandSpec};
use log::{debug, info, warn};
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;

pub struct LogRelay {
    sink_path: PathBuf,
    port: u16,
    root: Option<Ipv4Addr>,
    processes: Vec<BackgroundProcess>,
}

impl LogRelay {
    pub fn new(sink_path: impl Into<PathBuf>, port: u16, root: Option<Ipv4Addr>) -> Self {
        Self {
            sink_path: sink_path.into(),
            port,
            root,
            processes: Vec::new(),
        }
    }

    pub fn root(&self) -> Option<SocketAddrV4> {
        self.root.map(|ip| SocketAddrV4::new(ip, self.port))
    }

    pub fn sink_command(&self) -> CommandSpec {
        CommandSpec::new("socat").args([
            format!("OPEN:{},creat,append", self.sink_path.display()),
            format!("udp4-listen:{},reuseaddr,fork", self.port),
        ])
    }

    /// Streams lines appended to the sink file from now on. The file is
    /// created if the sink has not opened it yet.
    pub fn forwarder_command(&self, root: SocketAddrV4) -> CommandSpec {
        CommandSpec::new("socat").args([
            "-u".to_string(),
            format!("OPEN:{},rdonly,creat,seek-end=0,ignoreeof", self.sink_path.display()),
            format!("udp-sendto:{}", root),
        ])
    }

    pub fn is_running(&self) -> bool {
        !self.processes.is_empty()
    }

    /// Start the sink and, when a root exists, the forwarder. Failures are
    /// logged and never abort the run.
    pub fn start(&mut self, runner: &dyn CommandRunner) {
        if self.is_running() {
            debug!("Log relay already running");
            return;
        }

        match runner.spawn(&self.sink_command()) {
            Ok(process) => self.processes.push(process),
            Err(e) => warn!("Log sink did not start: {}", e),
        }

        if let Some(root) = self.root() {
            info!("Forwarding logs to {}", root);
            match runner.spawn(&self.forwarder_command(root)) {
                Ok(process) => self.processes.push(process),
                Err(e) => warn!("Log forwarder to {} did not start: {}", root, e),
            }
        }
    }

    /// Stop the sink and forwarder, including children forked by the sink
    pub fn stop(&mut self, runner: &dyn CommandRunner) {
        for process in &mut self.processes {
            process.stop();
        }
        self.processes.clear();

        let pattern = self.sink_path.display().to_string();
        match runner.output(&CommandSpec::new("pkill").args(["-f", pattern.as_str()])) {
            Ok(output) if output.success() => debug!("Stopped leftover relay processes"),
            Ok(_) => debug!("No leftover relay processes"),
            Err(e) => warn!("Could not stop leftover relay processes: {}", e),
        }
    }
}
