//! Manifest type definitions.
//!
//! A manifest is the shared description of every site taking part in a
//! run. It is parsed once at startup and never mutated afterwards.

use crate::ip::Subnet;
use crate::utils::duration::format_delay;
use std::net::Ipv4Addr;
use std::time::Duration;

/// One physical host and the emulated subnet it contributes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteSpec {
    /// Real, routable address of the physical host
    pub host_address: Ipv4Addr,
    /// Subnet emulated on that host
    pub subnet: Subnet,
    /// Number of worker nodes in the subnet
    pub node_count: u32,
}

/// Parameters shared by every site of a simulation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SimulationParams {
    /// Experiment name handed to every worker
    pub name: String,
    /// Worker link bandwidth in Mbit/s; 0 leaves links unshaped
    pub bandwidth_mbit: u32,
    /// One-way worker link delay
    pub delay: Duration,
}

impl SimulationParams {
    /// Delay in the form the link shaper expects, e.g. "20ms"
    pub fn delay_token(&self) -> String {
        format_delay(self.delay)
    }
}

/// Ordered list of sites plus the shared simulation parameters.
///
/// Order is significant: the site at index 0 is the log-aggregation root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub params: SimulationParams,
    pub sites: Vec<SiteSpec>,
}

impl Manifest {
    /// The log-aggregation and monitoring root, `None` without sites
    pub fn root(&self) -> Option<&SiteSpec> {
        self.sites.first()
    }
}

/// The manifest entry owned by this host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalSite {
    pub site: SiteSpec,
    /// Index of the entry in the manifest
    pub position: usize,
}

impl LocalSite {
    pub fn is_root(&self) -> bool {
        self.position == 0
    }
}

/// A manifest entry owned by another host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerSite {
    pub site: SiteSpec,
    /// Index of the entry in the manifest
    pub position: usize,
}

impl PeerSite {
    pub fn host_address(&self) -> Ipv4Addr {
        self.site.host_address
    }

    pub fn subnet(&self) -> Subnet {
        self.site.subnet
    }
}

/// Result of matching the manifest against the local host's addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedManifest {
    pub manifest: Manifest,
    pub local: Option<LocalSite>,
    pub peers: Vec<PeerSite>,
}
