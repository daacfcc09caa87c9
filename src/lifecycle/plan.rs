//! Everything the local run needs, computed before anything is touched.

use crate::config::RunConfig;
use crate::manifest::{LocalSite, Manifest, PeerSite};
use crate::process::WorkerLaunch;
use crate::routing::{log_aggregation_root, peer_routes, PeerRoute};
use crate::topology::{build_topology, Topology, TopologyError};
use std::net::{Ipv4Addr, SocketAddrV4};

/// Fully derived description of one local run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPlan {
    pub topology: Topology,
    pub routes: Vec<PeerRoute>,
    /// Router address of the first manifest site, unless that is us
    pub log_root: Option<Ipv4Addr>,
    pub workers: WorkerLaunch,
}

impl LocalPlan {
    /// Derive the plan; address-space errors surface here, before any
    /// emulated object exists.
    pub fn new(
        manifest: &Manifest,
        local: &LocalSite,
        peers: &[PeerSite],
        config: &RunConfig,
    ) -> Result<Self, TopologyError> {
        let topology = build_topology(local, &manifest.params)?;
        // A manifest holding the local site always has a root
        let root = manifest.root().map_or(local.site.host_address, |site| site.host_address);

        let workers = WorkerLaunch {
            binary: config.worker.binary.clone(),
            debug_level: config.worker.debug_level,
            port: config.worker.port,
            monitor: SocketAddrV4::new(root, config.monitor_port),
            log_relay: SocketAddrV4::new(topology.gateway(), config.log_relay.port),
            marker: config.completion.marker.clone(),
        };

        Ok(Self {
            routes: peer_routes(peers),
            log_root: log_aggregation_root(manifest, local),
            topology,
            workers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{classify_sites, parse_manifest_str};

    const MANIFEST: &str = "sim-x 10 20ms\n10.0.0.5 10.1.0.0/16 3\n10.0.0.9 10.2.0.0/16 2\n";

    fn plan_for(host: &str) -> LocalPlan {
        let manifest = parse_manifest_str(MANIFEST).unwrap();
        let (local, peers) = classify_sites(&manifest, &[host.parse().unwrap()]).unwrap();
        LocalPlan::new(&manifest, &local.unwrap(), &peers, &RunConfig::default()).unwrap()
    }

    #[test]
    fn test_root_site_plan() {
        let plan = plan_for("10.0.0.5");
        assert_eq!(plan.topology.workers.len(), 3);
        assert_eq!(plan.routes.len(), 1);
        assert_eq!(plan.routes[0].to_string(), "10.2.0.0/16 via 10.0.0.9");
        assert_eq!(plan.log_root, None);
        assert_eq!(plan.workers.monitor.to_string(), "10.0.0.5:10000");
        assert_eq!(plan.workers.log_relay.to_string(), "10.1.0.1:5000");
    }

    #[test]
    fn test_peer_site_plan() {
        let plan = plan_for("10.0.0.9");
        assert_eq!(plan.topology.router.address.to_string(), "10.2.0.1");
        assert_eq!(plan.routes[0].to_string(), "10.1.0.0/16 via 10.0.0.5");
        assert_eq!(plan.log_root, Some(Ipv4Addr::new(10, 1, 0, 1)));
        // The monitor always lives on the first site's host
        assert_eq!(plan.workers.monitor.to_string(), "10.0.0.5:10000");
    }

    #[test]
    fn test_overflow_is_reported_before_anything_runs() {
        let manifest = parse_manifest_str("sim 10 20ms\n10.0.0.5 10.1.0.0/30 5\n").unwrap();
        let (local, peers) = classify_sites(&manifest, &["10.0.0.5".parse().unwrap()]).unwrap();
        let result = LocalPlan::new(&manifest, &local.unwrap(), &peers, &RunConfig::default());
        assert!(matches!(result, Err(TopologyError::SubnetTooSmall { .. })));
    }
}
