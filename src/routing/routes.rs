//! Routes toward peer subnets.
//!
//! Peer subnets only exist inside their physical hosts, so each one is
//! reached through that host's real address.

use crate::ip::Subnet;
use crate::manifest::PeerSite;
use crate::process::CommandSpec;
use std::fmt;
use std::net::Ipv4Addr;

/// Route for one peer site's emulated subnet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PeerRoute {
    pub destination: Subnet,
    /// The peer's physical host address
    pub next_hop: Ipv4Addr,
}

impl PeerRoute {
    pub fn for_peer(peer: &PeerSite) -> Self {
        Self {
            destination: peer.subnet(),
            next_hop: peer.host_address(),
        }
    }

    pub fn add_command(&self) -> CommandSpec {
        self.command("add")
    }

    pub fn delete_command(&self) -> CommandSpec {
        self.command("del")
    }

    fn command(&self, action: &str) -> CommandSpec {
        CommandSpec::new("ip").args([
            "route".to_string(),
            action.to_string(),
            self.destination.to_string(),
            "via".to_string(),
            self.next_hop.to_string(),
        ])
    }
}

impl fmt::Display for PeerRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} via {}", self.destination, self.next_hop)
    }
}

/// One route per peer site, in manifest order
pub fn peer_routes(peers: &[PeerSite]) -> Vec<PeerRoute> {
    peers.iter().map(PeerRoute::for_peer).collect()
}

/// `ip route add` reports an existing route this way
pub(crate) fn is_already_present(stderr: &str) -> bool {
    stderr.contains("File exists")
}

/// `ip route del` reports a missing route this way
pub(crate) fn is_already_absent(stderr: &str) -> bool {
    stderr.contains("No such process") || stderr.contains("not found")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::SiteSpec;

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

    #[test]
    fn test_next_hop_is_peer_host_address() {
        let routes = peer_routes(&[peer("10.0.0.9", "10.2.0.0/16", 1), peer("10.0.0.11", "10.3.0.0/16", 2)]);
        assert_eq!(routes.len(), 2);
        assert_eq!(routes[0].to_string(), "10.2.0.0/16 via 10.0.0.9");
        assert_eq!(routes[1].next_hop, Ipv4Addr::new(10, 0, 0, 11));
    }

    #[test]
    fn test_route_commands() {
        let route = PeerRoute::for_peer(&peer("10.0.0.9", "10.2.0.0/16", 1));
        assert_eq!(route.add_command().command_line(), "ip route add 10.2.0.0/16 via 10.0.0.9");
        assert_eq!(route.delete_command().command_line(), "ip route del 10.2.0.0/16 via 10.0.0.9");
    }

    #[test]
    fn test_error_classification() {
        assert!(is_already_present("RTNETLINK answers: File exists"));
        assert!(is_already_absent("RTNETLINK answers: No such process"));
        assert!(!is_already_absent("RTNETLINK answers: Network is unreachable"));
    }
}
