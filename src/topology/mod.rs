//! Network topology module.
//!
//! This module derives the local site's switch, router and worker nodes
//! from its manifest entry.

pub mod builder;
pub mod types;

// Re-export key types and functions for easier access
pub use builder::{build_topology, TopologyError, ROUTER_OFFSET};
pub use types::{Link, LinkShaping, RouterNode, Topology, WorkerNode, WorkerRole};
