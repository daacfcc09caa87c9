//! Topology type definitions.
//!
//! A topology is one switch, one router node bound to the subnet's first
//! address, and the worker nodes behind it. It only describes the
//! network; the emulator backend turns it into real objects.

use crate::ip::Subnet;
use std::net::Ipv4Addr;
use std::time::Duration;

/// What a worker does beyond running the experiment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerRole {
    /// Writes the completion marker once its worker process exits
    CompletionWriter,
    /// Runs the experiment only
    Regular,
}

/// Gateway node for the subnet.
///
/// The router lives in the physical host's own namespace, so it shares
/// the host routing table and can reach peer hosts directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterNode {
    pub name: String,
    pub address: Ipv4Addr,
    pub prefix_len: u8,
}

/// Isolated node running one experiment worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerNode {
    pub name: String,
    /// 1-based worker index
    pub index: u32,
    pub address: Ipv4Addr,
    pub prefix_len: u8,
    /// Default route next hop (the router)
    pub gateway: Ipv4Addr,
    pub role: WorkerRole,
    /// Experiment payload the worker runs
    pub simulation: String,
}

impl WorkerNode {
    pub fn writes_completion(&self) -> bool {
        self.role == WorkerRole::CompletionWriter
    }
}

/// Traffic shaping applied to a link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkShaping {
    /// Rate limit in Mbit/s, `None` for unlimited
    pub bandwidth_mbit: Option<u32>,
    pub delay: Duration,
}

/// Link between a node and the switch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub node: String,
    pub shaping: Option<LinkShaping>,
}

/// Complete description of the local emulated subnet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub subnet: Subnet,
    pub switch: String,
    pub router: RouterNode,
    pub workers: Vec<WorkerNode>,
    pub links: Vec<Link>,
}

impl Topology {
    pub fn gateway(&self) -> Ipv4Addr {
        self.router.address
    }

    pub fn completion_writer(&self) -> Option<&WorkerNode> {
        self.workers.iter().find(|w| w.writes_completion())
    }

    pub fn link_for(&self, node: &str) -> Option<&Link> {
        self.links.iter().find(|l| l.node == node)
    }

    /// Router address followed by every worker address
    pub fn addresses(&self) -> Vec<Ipv4Addr> {
        std::iter::once(self.router.address)
            .chain(self.workers.iter().map(|w| w.address))
            .collect()
    }
}
