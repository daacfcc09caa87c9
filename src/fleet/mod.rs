//! Fan-out to peer sites.
//!
//! Every peer gets its own thread which cleans up leftovers on the peer,
//! ships the manifest and supporting files, and starts the coordinator
//! there. A failing peer is recorded in the [`FleetReport`]; it never
//! stops the other peers or the local run.

pub mod ssh;

pub use ssh::SshLauncher;

use crate::manifest::PeerSite;
use log::{debug, info, warn};
use std::fmt;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::thread;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FleetError {
    #[error("Cleanup on {host} failed: {reason}")]
    Cleanup { host: Ipv4Addr, reason: String },

    #[error("Copying files to {host} failed: {reason}")]
    Copy { host: Ipv4Addr, reason: String },

    #[error("Remote run on {host} failed: {reason}")]
    Invoke { host: Ipv4Addr, reason: String },

    #[error("Launcher thread for {host} panicked")]
    Panicked { host: Ipv4Addr },
}

/// Remote operations needed to start the coordinator on a peer
pub trait PeerLauncher: Send + Sync {
    /// Tear down stale emulated state and kill any previous coordinator
    fn clean_remote(&self, peer: &PeerSite) -> Result<(), FleetError>;

    /// Copy `files` to the peer
    fn copy_files(&self, peer: &PeerSite, files: &[PathBuf]) -> Result<(), FleetError>;

    /// Run the coordinator on the peer with `manifest`, blocking until it exits
    fn invoke_remote(&self, peer: &PeerSite, manifest: &Path) -> Result<(), FleetError>;
}

/// Files shipped to every peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shipment {
    pub manifest: PathBuf,
    pub support_files: Vec<PathBuf>,
}

impl Shipment {
    /// Manifest first, then supporting files
    pub fn files(&self) -> Vec<PathBuf> {
        std::iter::once(self.manifest.clone())
            .chain(self.support_files.iter().cloned())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerOutcome {
    pub host: Ipv4Addr,
    pub position: usize,
    pub result: Result<(), FleetError>,
}

/// Result of driving every peer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FleetReport {
    pub outcomes: Vec<PeerOutcome>,
}

impl FleetReport {
    pub fn failures(&self) -> impl Iterator<Item = &FleetError> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().err())
    }

    pub fn all_succeeded(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn outcome_for(&self, host: Ipv4Addr) -> Option<&PeerOutcome> {
        self.outcomes.iter().find(|o| o.host == host)
    }

    /// Log one line per failed peer
    pub fn log_summary(&self) {
        let failed = self.failures().count();
        if failed == 0 {
            info!("All {} peer(s) finished", self.outcomes.len());
            return;
        }
        warn!("{} of {} peer(s) failed", failed, self.outcomes.len());
        for failure in self.failures() {
            warn!("  {}", failure);
        }
    }
}

impl fmt::Display for FleetReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failed = self.failures().count();
        write!(f, "{} peer(s), {} failed", self.outcomes.len(), failed)
    }
}

/// Clean, copy and invoke on one peer. Cleanup is best effort.
pub fn launch_peer(
    launcher: &dyn PeerLauncher,
    peer: &PeerSite,
    shipment: &Shipment,
) -> Result<(), FleetError> {
    let host = peer.host_address();
    debug!("Cleaning up {}", host);
    if let Err(e) = launcher.clean_remote(peer) {
        warn!("{}", e);
    }

    debug!(
        "Copying {:?} to {} to run {} hosts in {}",
        shipment.manifest,
        host,
        peer.site.node_count,
        peer.subnet()
    );
    launcher.copy_files(peer, &shipment.files())?;

    info!("Starting remote run on {}", host);
    launcher.invoke_remote(peer, &shipment.manifest)?;
    info!("Remote run on {} is done", host);
    Ok(())
}

/// Launch every peer concurrently and wait for all of them
pub fn launch_peers(
    launcher: &dyn PeerLauncher,
    peers: &[PeerSite],
    shipment: &Shipment,
) -> FleetReport {
    if peers.is_empty() {
        return FleetReport::default();
    }
    info!("Starting remotely on {} peer(s)", peers.len());

    let outcomes = thread::scope(|scope| {
        let handles: Vec<_> = peers
            .iter()
            .map(|peer| (peer, scope.spawn(move || launch_peer(launcher, peer, shipment))))
            .collect();

        handles
            .into_iter()
            .map(|(peer, handle)| PeerOutcome {
                host: peer.host_address(),
                position: peer.position,
                result: handle.join().unwrap_or_else(|_| Err(FleetError::Panicked {
                    host: peer.host_address(),
                })),
            })
            .collect()
    });

    FleetReport { outcomes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ip::Subnet;
    use crate::manifest::SiteSpec;
    use std::sync::Mutex;

    /// Launcher that records calls and fails for chosen hosts
    #[derive(Default)]
    struct MockLauncher {
        calls: Mutex<Vec<String>>,
        unreachable: Vec<Ipv4Addr>,
        broken_cleanup: bool,
    }

    impl MockLauncher {
        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl PeerLauncher for MockLauncher {
        fn clean_remote(&self, peer: &PeerSite) -> Result<(), FleetError> {
            self.record(format!("clean {}", peer.host_address()));
            if self.broken_cleanup {
                return Err(FleetError::Cleanup {
                    host: peer.host_address(),
                    reason: "mn not installed".to_string(),
                });
            }
            Ok(())
        }

        fn copy_files(&self, peer: &PeerSite, files: &[PathBuf]) -> Result<(), FleetError> {
            self.record(format!("copy {} {}", peer.host_address(), files.len()));
            if self.unreachable.contains(&peer.host_address()) {
                return Err(FleetError::Copy {
                    host: peer.host_address(),
                    reason: "No route to host".to_string(),
                });
            }
            Ok(())
        }

        fn invoke_remote(&self, peer: &PeerSite, manifest: &Path) -> Result<(), FleetError> {
            self.record(format!("invoke {} {}", peer.host_address(), manifest.display()));
            Ok(())
        }
    }

    fn peer(host: &str, cidr: &str, position: usize) -> PeerSite {
        PeerSite {
            site: SiteSpec {
                host_address: host.parse().unwrap(),
                subnet: Subnet::parse(cidr).unwrap(),
                node_count: 2,
            },
            position,
        }
    }

    fn shipment() -> Shipment {
        Shipment {
            manifest: PathBuf::from("sites.list"),
            support_files: vec![PathBuf::from("meshsim"), PathBuf::from("worker")],
        }
    }

    #[test]
    fn test_launch_peer_steps_in_order() {
        let launcher = MockLauncher::default();
        launch_peer(&launcher, &peer("10.0.0.9", "10.2.0.0/16", 1), &shipment()).unwrap();
        assert_eq!(
            launcher.calls(),
            vec!["clean 10.0.0.9", "copy 10.0.0.9 3", "invoke 10.0.0.9 sites.list"]
        );
    }

    #[test]
    fn test_cleanup_failure_is_not_fatal() {
        let launcher = MockLauncher {
            broken_cleanup: true,
            ..MockLauncher::default()
        };
        assert!(launch_peer(&launcher, &peer("10.0.0.9", "10.2.0.0/16", 1), &shipment()).is_ok());
    }

    #[test]
    fn test_unreachable_peer_does_not_block_others() {
        let launcher = MockLauncher {
            unreachable: vec!["10.0.0.9".parse().unwrap()],
            ..MockLauncher::default()
        };
        let peers = vec![peer("10.0.0.9", "10.2.0.0/16", 1), peer("10.0.0.11", "10.3.0.0/16", 2)];

        let report = launch_peers(&launcher, &peers, &shipment());
        assert_eq!(report.outcomes.len(), 2);
        assert!(!report.all_succeeded());
        assert!(matches!(
            report.outcome_for("10.0.0.9".parse().unwrap()).unwrap().result,
            Err(FleetError::Copy { .. })
        ));
        assert!(report.outcome_for("10.0.0.11".parse().unwrap()).unwrap().result.is_ok());
        assert!(launcher.calls().contains(&"invoke 10.0.0.11 sites.list".to_string()));
        assert!(!launcher.calls().iter().any(|c| c.starts_with("invoke 10.0.0.9")));
        assert_eq!(report.to_string(), "2 peer(s), 1 failed");
    }

    #[test]
    fn test_no_peers() {
        let launcher = MockLauncher::default();
        let report = launch_peers(&launcher, &[], &shipment());
        assert!(report.outcomes.is_empty());
        assert!(report.all_succeeded());
        assert!(launcher.calls().is_empty());
    }
}
