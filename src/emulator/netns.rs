//! Network-namespace emulator backend.
//!
//! The switch is a Linux bridge. Every worker gets its own namespace
//! connected to the bridge by a veth pair; the router's interface stays in
//! the host namespace so it shares the host routing table. Worker links
//! are shaped with `tc netem` on both ends.

use super::{Emulator, EmulatorError};
use crate::process::{BackgroundProcess, CommandRunner, CommandSpec};
use crate::topology::{LinkShaping, Topology, WorkerNode};
use log::{debug, info, warn};
use std::sync::Arc;

/// Default prefix for every namespace and interface name
pub const DEFAULT_PREFIX: &str = "ms";

/// Longest interface name Linux accepts (`IFNAMSIZ` minus the NUL)
pub const MAX_INTERFACE_NAME: usize = 15;

pub struct NetnsEmulator {
    runner: Arc<dyn CommandRunner>,
    prefix: String,
    topology: Option<Topology>,
    processes: Vec<BackgroundProcess>,
}

impl NetnsEmulator {
    pub fn new(runner: Arc<dyn CommandRunner>, prefix: impl Into<String>) -> Self {
        Self {
            runner,
            prefix: prefix.into(),
            topology: None,
            processes: Vec::new(),
        }
    }

    fn namespace(&self, node: &str) -> String {
        format!("{}-{}", self.prefix, node)
    }

    fn bridge(&self, topology: &Topology) -> String {
        format!("{}-{}", self.prefix, topology.switch)
    }

    /// Interface on the node side of its link
    fn node_interface(&self, node: &str) -> String {
        format!("{}-{}-eth0", self.prefix, node)
    }

    /// Interface on the switch side of a node's link
    fn switch_port(&self, node: &str) -> String {
        format!("{}-{}-s0", self.prefix, node)
    }

    fn router_interface(&self, topology: &Topology) -> String {
        self.namespace(&topology.router.name)
    }

    fn ip(&self, args: &[&str]) -> Result<(), EmulatorError> {
        self.runner.run(&CommandSpec::new("ip").args(args.iter().copied()))?;
        Ok(())
    }

    fn netem_args(shaping: &LinkShaping) -> Vec<String> {
        let mut args = vec![
            "root".to_string(),
            "netem".to_string(),
            "delay".to_string(),
            crate::utils::duration::format_delay(shaping.delay),
        ];
        if let Some(bandwidth) = shaping.bandwidth_mbit {
            args.push("rate".to_string());
            args.push(format!("{}mbit", bandwidth));
        }
        args
    }

    fn create_switch(&self, topology: &Topology) -> Result<(), EmulatorError> {
        let bridge = self.bridge(topology);
        self.ip(&["link", "add", bridge.as_str(), "type", "bridge"])?;
        self.ip(&["link", "set", bridge.as_str(), "up"])
    }

    fn create_router(&self, topology: &Topology) -> Result<(), EmulatorError> {
        let bridge = self.bridge(topology);
        let router = &topology.router;
        let interface = self.router_interface(topology);
        let port = self.switch_port(&router.name);
        let address = format!("{}/{}", router.address, router.prefix_len);

        debug!("Starting router {} at {}", router.name, address);
        self.ip(&["link", "add", interface.as_str(), "type", "veth", "peer", "name", port.as_str()])?;
        self.ip(&["link", "set", port.as_str(), "master", bridge.as_str()])?;
        self.ip(&["link", "set", port.as_str(), "up"])?;
        self.ip(&["addr", "add", address.as_str(), "dev", interface.as_str()])?;
        self.ip(&["link", "set", interface.as_str(), "up"])
    }

    fn create_worker(&self, topology: &Topology, worker: &WorkerNode) -> Result<(), EmulatorError> {
        let bridge = self.bridge(topology);
        let namespace = self.namespace(&worker.name);
        let interface = self.node_interface(&worker.name);
        let port = self.switch_port(&worker.name);
        let address = format!("{}/{}", worker.address, worker.prefix_len);
        let gateway = worker.gateway.to_string();

        debug!("Adding worker {} at {} via {}", worker.name, address, gateway);
        self.ip(&["netns", "add", namespace.as_str()])?;
        self.ip(&[
            "link", "add", port.as_str(), "type", "veth", "peer", "name", interface.as_str(), "netns", namespace.as_str(),
        ])?;
        self.ip(&["link", "set", port.as_str(), "master", bridge.as_str()])?;
        self.ip(&["link", "set", port.as_str(), "up"])?;
        self.ip(&["-n", namespace.as_str(), "link", "set", "lo", "up"])?;
        self.ip(&["-n", namespace.as_str(), "addr", "add", address.as_str(), "dev", interface.as_str()])?;
        self.ip(&["-n", namespace.as_str(), "link", "set", interface.as_str(), "up"])?;
        self.ip(&["-n", namespace.as_str(), "route", "add", "default", "via", gateway.as_str()])?;

        if let Some(shaping) = topology.link_for(&worker.name).and_then(|l| l.shaping) {
            let netem = Self::netem_args(&shaping);
            self.runner.run(
                &CommandSpec::new("tc")
                    .args(["qdisc", "add", "dev", port.as_str()])
                    .args(netem.iter().cloned()),
            )?;
            self.runner.run(
                &CommandSpec::new("ip")
                    .args(["netns", "exec", namespace.as_str(), "tc", "qdisc", "add", "dev", interface.as_str()])
                    .args(netem),
            )?;
        }
        Ok(())
    }

    /// Namespaces left behind by an earlier run
    fn stale_namespaces(&self) -> Vec<String> {
        let owned = format!("{}-", self.prefix);
        match self.runner.run(&CommandSpec::new("ip").args(["netns", "list"])) {
            Ok(output) => output
                .stdout
                .lines()
                .filter_map(|line| line.split_whitespace().next())
                .filter(|name| name.starts_with(&owned))
                .map(str::to_string)
                .collect(),
            Err(e) => {
                warn!("Could not list namespaces: {}", e);
                Vec::new()
            }
        }
    }
}

impl Emulator for NetnsEmulator {
    fn validate(&self, topology: &Topology) -> Result<(), EmulatorError> {
        let names = [
            self.bridge(topology),
            self.router_interface(topology),
            self.switch_port(&topology.router.name),
        ]
            .into_iter()
            .chain(topology.workers.iter().flat_map(|w| {
                [self.node_interface(&w.name), self.switch_port(&w.name)]
            }));
        for name in names {
            if name.len() > MAX_INTERFACE_NAME {
                return Err(EmulatorError::NameTooLong {
                    name,
                    max: MAX_INTERFACE_NAME,
                });
            }
        }
        Ok(())
    }

    fn clean_stale_state(&mut self) {
        for process in &mut self.processes {
            process.stop();
        }
        self.processes.clear();

        for namespace in self.stale_namespaces() {
            debug!("Removing stale namespace {}", namespace);
            if let Err(e) = self.ip(&["netns", "del", namespace.as_str()]) {
                warn!("Failed to remove stale namespace {}: {}", namespace, e);
            }
        }
        // Absent links are the normal case here
        for link in [
            format!("{}-{}", self.prefix, crate::topology::builder::SWITCH_NAME),
            format!("{}-{}", self.prefix, crate::topology::builder::ROUTER_NAME),
        ] {
            if self.ip(&["link", "del", link.as_str()]).is_ok() {
                debug!("Removed stale link {}", link);
            }
        }
        self.topology = None;
    }

    fn start(&mut self, topology: &Topology) -> Result<(), EmulatorError> {
        if self.topology.is_some() {
            return Err(EmulatorError::AlreadyStarted);
        }
        info!(
            "Starting emulated network {} with {} workers",
            topology.subnet,
            topology.workers.len()
        );
        // Recorded first so a partial start is still torn down by stop()
        self.topology = Some(topology.clone());

        self.create_switch(topology)?;
        self.create_router(topology)?;
        for worker in &topology.workers {
            self.create_worker(topology, worker)?;
        }
        Ok(())
    }

    fn launch(&mut self, worker: &WorkerNode, shell_command: &str) -> Result<(), EmulatorError> {
        if self.topology.is_none() {
            return Err(EmulatorError::NotStarted);
        }
        let namespace = self.namespace(&worker.name);
        debug!("Starting worker on node {} ({})", worker.name, worker.address);
        let process = self.runner.spawn(
            &CommandSpec::new("ip")
                .args(["netns", "exec", namespace.as_str(), "sh", "-c"])
                .arg(shell_command),
        )?;
        self.processes.push(process);
        Ok(())
    }

    fn stop_worker(&mut self, worker: &WorkerNode) -> Result<(), EmulatorError> {
        let namespace = self.namespace(&worker.name);
        debug!("Stopping worker on node {}", worker.name);
        let output = self
            .runner
            .run(&CommandSpec::new("ip").args(["netns", "pids", namespace.as_str()]))?;

        let pids: Vec<&str> = output.stdout.split_whitespace().collect();
        if pids.is_empty() {
            return Ok(());
        }
        self.runner
            .run(&CommandSpec::new("kill").arg("-TERM").args(pids))?;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), EmulatorError> {
        let Some(topology) = self.topology.take() else {
            return Ok(());
        };
        info!("Stopping emulated network {}", topology.subnet);

        for process in &mut self.processes {
            process.stop();
        }
        self.processes.clear();

        let mut failures = Vec::new();
        for worker in &topology.workers {
            let namespace = self.namespace(&worker.name);
            if let Err(e) = self.ip(&["netns", "del", namespace.as_str()]) {
                warn!("Failed to delete namespace {}: {}", namespace, e);
                failures.push(e.to_string());
            }
        }
        for link in [self.router_interface(&topology), self.bridge(&topology)] {
            if let Err(e) = self.ip(&["link", "del", link.as_str()]) {
                warn!("Failed to delete link {}: {}", link, e);
                failures.push(e.to_string());
            }
        }

        match failures.first() {
            None => Ok(()),
            Some(first) => Err(EmulatorError::Teardown {
                failed: failures.len(),
                first: first.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip::Subnet;
    use crate::manifest::{LocalSite, SimulationParams, SiteSpec};
    use crate::process::RecordingRunner;
    use crate::topology::build_topology;
    use std::net::Ipv4Addr;
    use std::time::Duration;

    fn topology(count: u32) -> Topology {
        let local = LocalSite {
            site: SiteSpec {
                host_address: Ipv4Addr::new(10, 0, 0, 5),
                subnet: Subnet::parse("10.1.0.0/16").unwrap(),
                node_count: count,
            },
            position: 0,
        };
        let params = SimulationParams {
            name: "sim-x".to_string(),
            bandwidth_mbit: 10,
            delay: Duration::from_millis(20),
        };
        build_topology(&local, &params).unwrap()
    }

    fn emulator() -> (Arc<RecordingRunner>, NetnsEmulator) {
        let runner = Arc::new(RecordingRunner::new());
        let emulator = NetnsEmulator::new(runner.clone(), DEFAULT_PREFIX);
        (runner, emulator)
    }

    #[test]
    fn test_start_creates_switch_router_and_workers() {
        let (runner, mut emulator) = emulator();
        emulator.start(&topology(2)).unwrap();

        let commands = runner.commands();
        assert_eq!(commands[0], "ip link add ms-s0 type bridge");
        assert!(commands.contains(&"ip addr add 10.1.0.1/16 dev ms-h0".to_string()));
        assert!(commands.contains(&"ip -n ms-h1 addr add 10.1.0.2/16 dev ms-h1-eth0".to_string()));
        assert!(commands.contains(&"ip -n ms-h2 route add default via 10.1.0.1".to_string()));
        assert!(commands.contains(&"tc qdisc add dev ms-h2-s0 root netem delay 20ms rate 10mbit".to_string()));
        assert_eq!(runner.count_matching("ip netns add"), 2);
        // The router link is not shaped
        assert_eq!(runner.count_matching("dev ms-h0-s0 root netem"), 0);
    }

    #[test]
    fn test_validate_rejects_long_interface_names() {
        let (runner, emulator) = emulator();
        assert!(emulator.validate(&topology(3)).is_ok());

        let wide = NetnsEmulator::new(runner.clone(), "abcd");
        assert!(wide.validate(&topology(9_999)).is_ok());
        assert!(matches!(
            wide.validate(&topology(10_000)),
            Err(EmulatorError::NameTooLong { ref name, max: 15 }) if name == "abcd-h10000-eth0"
        ));
        assert!(runner.commands().is_empty());
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let (_runner, mut emulator) = emulator();
        emulator.start(&topology(1)).unwrap();
        assert!(matches!(
            emulator.start(&topology(1)),
            Err(EmulatorError::AlreadyStarted)
        ));
    }

    #[test]
    fn test_launch_requires_running_network() {
        let (_runner, mut emulator) = emulator();
        let topology = topology(1);
        assert!(matches!(
            emulator.launch(&topology.workers[0], "true"),
            Err(EmulatorError::NotStarted)
        ));
    }

    #[test]
    fn test_launch_runs_inside_namespace() {
        let (runner, mut emulator) = emulator();
        let topology = topology(1);
        emulator.start(&topology).unwrap();
        emulator.launch(&topology.workers[0], "./worker -debug 1").unwrap();
        assert_eq!(
            runner.commands().last().unwrap(),
            "ip netns exec ms-h1 sh -c './worker -debug 1'"
        );
    }

    #[test]
    fn test_stop_worker_kills_namespace_pids() {
        let (runner, mut emulator) = emulator();
        let topology = topology(1);
        runner.respond_matching("netns pids ms-h1", "101\n202\n");
        emulator.stop_worker(&topology.workers[0]).unwrap();
        assert_eq!(runner.commands().last().unwrap(), "kill -TERM 101 202");
    }

    #[test]
    fn test_stop_attempts_every_step() {
        let (runner, mut emulator) = emulator();
        emulator.start(&topology(2)).unwrap();
        runner.fail_matching("netns del ms-h1", "Cannot remove namespace");

        let err = emulator.stop().unwrap_err();
        assert!(matches!(err, EmulatorError::Teardown { failed: 1, .. }));
        assert_eq!(runner.count_matching("ip netns del ms-h2"), 1);
        assert_eq!(runner.count_matching("ip link del ms-h0"), 1);
        assert_eq!(runner.count_matching("ip link del ms-s0"), 1);

        // Nothing left to stop
        assert!(emulator.stop().is_ok());
    }

    #[test]
    fn test_clean_stale_state_only_touches_own_namespaces() {
        let (runner, mut emulator) = emulator();
        runner.respond_matching("netns list", "ms-h1 (id: 0)\nother-ns\nms-h7\n");
        runner.fail_matching("link del", "Cannot find device");
        emulator.clean_stale_state();

        assert_eq!(runner.count_matching("ip netns del ms-h1"), 1);
        assert_eq!(runner.count_matching("ip netns del ms-h7"), 1);
        assert_eq!(runner.count_matching("other-ns"), 0);
    }
}
