//! Discovery of the local host's real interface addresses.

use if_addrs::get_if_addrs;
use log::debug;
use std::io;
use std::net::{IpAddr, Ipv4Addr};

/// Enumerate every IPv4 address bound to a local interface.
///
/// Loopback is included; a manifest never lists it, so it cannot match.
pub fn local_ipv4_addresses() -> io::Result<Vec<Ipv4Addr>> {
    let mut addresses = Vec::new();
    for interface in get_if_addrs()? {
        if let IpAddr::V4(ip) = interface.ip() {
            debug!("Interface {} has address {}", interface.name, ip);
            addresses.push(ip);
        }
    }
    Ok(addresses)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enumeration_succeeds() {
        // Every Linux host has at least the loopback address
        let addresses = local_ipv4_addresses().unwrap();
        assert!(addresses.iter().all(|ip| !ip.is_unspecified()));
    }
}
