//! Experiment worker invocation.
//!
//! Every worker is started with its bound address, a debug level, the
//! simulation name and the monitoring sink. Its combined output is sent
//! to the router's log relay; the completion writer additionally stamps
//! the completion marker once the worker exits.

use crate::topology::WorkerNode;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::path::PathBuf;

/// Everything needed to start workers for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerLaunch {
    pub binary: String,
    pub debug_level: u8,
    /// Port the worker binds on its own address
    pub port: u16,
    /// Monitoring/metrics sink
    pub monitor: SocketAddrV4,
    /// UDP log relay on the local router
    pub log_relay: SocketAddrV4,
    /// Written by the completion writer when its worker exits
    pub marker: PathBuf,
}

impl WorkerLaunch {
    pub fn bind_address(&self, address: Ipv4Addr) -> SocketAddrV4 {
        SocketAddrV4::new(address, self.port)
    }

    /// Worker arguments, e.g. `-debug 1 -address 10.1.0.2:2000 -simul sim-x -monitor 10.0.0.5:10000`
    pub fn args(&self, worker: &WorkerNode) -> Vec<String> {
        vec![
            "-debug".to_string(),
            self.debug_level.to_string(),
            "-address".to_string(),
            self.bind_address(worker.address).to_string(),
            "-simul".to_string(),
            worker.simulation.clone(),
            "-monitor".to_string(),
            self.monitor.to_string(),
        ]
    }

    /// Shell pipeline that runs the worker inside its node
    pub fn shell_command(&self, worker: &WorkerNode) -> String {
        let invocation =
            shell_words::join(std::iter::once(self.binary.clone()).chain(self.args(worker)));

        let completion = if worker.writes_completion() {
            format!(
                "; date > {}",
                shell_words::quote(&self.marker.to_string_lossy())
            )
        } else {
            String::new()
        };

        format!(
            "( {} 2>&1 {} ) | socat - udp-sendto:{}",
            invocation, completion, self.log_relay
        )
    }
}
