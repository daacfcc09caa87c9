//! Subnet arithmetic for a site's emulated network.
//!
//! Offsets are counted from the subnet base address: offset 1 is the
//! router, offsets 2 and up are worker nodes. The broadcast address is
//! never handed out.

use ipnet::Ipv4Net;
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

/// Errors raised by subnet parsing and address arithmetic
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubnetError {
    #[error("Invalid IPv4 CIDR: {0}")]
    InvalidCidr(String),

    #[error("Offset {offset} does not fit in subnet {subnet} (at most {capacity} host addresses)")]
    HostOutOfRange {
        subnet: String,
        offset: u32,
        capacity: u32,
    },
}

/// An IPv4 subnet normalized to its base address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subnet {
    net: Ipv4Net,
}

impl Subnet {
    /// Parse a CIDR like "10.1.0.0/16". Host bits are cleared, so
    /// "10.1.2.3/16" describes the same subnet as "10.1.0.0/16".
    pub fn parse(cidr: &str) -> Result<Self, SubnetError> {
        let net = Ipv4Net::from_str(cidr.trim())
            .map_err(|_| SubnetError::InvalidCidr(cidr.to_string()))?;
        Ok(Self { net: net.trunc() })
    }

    pub fn base(&self) -> Ipv4Addr {
        self.net.network()
    }

    pub fn prefix_len(&self) -> u8 {
        self.net.prefix_len()
    }

    pub fn as_net(&self) -> Ipv4Net {
        self.net
    }

    /// Number of assignable host offsets (network and broadcast excluded)
    pub fn capacity(&self) -> u32 {
        let host_bits = 32 - u32::from(self.prefix_len());
        if host_bits < 2 {
            return 0;
        }
        // host_bits == 32 would overflow a u32 shift
        let size = 1u64 << host_bits;
        u32::try_from(size - 2).unwrap_or(u32::MAX)
    }

    /// Address at `offset` from the base, e.g. `host(1)` is the router
    pub fn host(&self, offset: u32) -> Result<Ipv4Addr, SubnetError> {
        if offset == 0 || offset > self.capacity() {
            return Err(SubnetError::HostOutOfRange {
                subnet: self.to_string(),
                offset,
                capacity: self.capacity(),
            });
        }
        Ok(Ipv4Addr::from(u32::from(self.base()) + offset))
    }

    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        self.net.contains(&addr)
    }
}

impl fmt::Display for Subnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.base(), self.prefix_len())
    }
}

impl FromStr for Subnet {
    type Err = SubnetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let subnet = Subnet::parse("10.1.0.0/16").unwrap();
        assert_eq!(subnet.base(), Ipv4Addr::new(10, 1, 0, 0));
        assert_eq!(subnet.prefix_len(), 16);
        assert_eq!(subnet.to_string(), "10.1.0.0/16");
    }

    #[test]
    fn test_host_bits_are_cleared() {
        let subnet = Subnet::parse("10.1.2.3/16").unwrap();
        assert_eq!(subnet, Subnet::parse("10.1.0.0/16").unwrap());
    }

    #[test]
    fn test_invalid_cidr() {
        assert!(Subnet::parse("10.1.0.0").is_err());
        assert!(Subnet::parse("10.1.0.0/33").is_err());
        assert!(Subnet::parse("fd00::/64").is_err());
        assert!(Subnet::parse("not-a-net").is_err());
    }

    #[test]
    fn test_host_offsets() {
        let subnet = Subnet::parse("10.1.0.0/16").unwrap();
        assert_eq!(subnet.host(1).unwrap(), Ipv4Addr::new(10, 1, 0, 1));
        assert_eq!(subnet.host(2).unwrap(), Ipv4Addr::new(10, 1, 0, 2));
        assert_eq!(subnet.host(256).unwrap(), Ipv4Addr::new(10, 1, 1, 0));
        assert!(subnet.host(0).is_err());
    }

    #[test]
    fn test_capacity_excludes_broadcast() {
        let subnet = Subnet::parse("192.168.5.0/30").unwrap();
        assert_eq!(subnet.capacity(), 2);
        assert!(subnet.host(2).is_ok());
        assert!(matches!(
            subnet.host(3),
            Err(SubnetError::HostOutOfRange { offset: 3, capacity: 2, .. })
        ));

        assert_eq!(Subnet::parse("10.0.0.0/31").unwrap().capacity(), 0);
        assert_eq!(Subnet::parse("10.0.0.1/32").unwrap().capacity(), 0);
        assert_eq!(Subnet::parse("0.0.0.0/0").unwrap().capacity(), u32::MAX - 1);
    }

    #[test]
    fn test_contains() {
        let subnet = Subnet::parse("10.2.0.0/16").unwrap();
        assert!(subnet.contains(Ipv4Addr::new(10, 2, 200, 7)));
        assert!(!subnet.contains(Ipv4Addr::new(10, 3, 0, 1)));
    }
}
