//! IP address handling.
//!
//! Subnet arithmetic for deterministic node addressing, and discovery of
//! the local host's real addresses for matching manifest entries.

pub mod local;
pub mod subnet;

pub use local::local_ipv4_addresses;
pub use subnet::{Subnet, SubnetError};
