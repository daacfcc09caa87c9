//! # Meshsim - Coordinator for emulated subnets spread across hosts
//!
//! Every participating host contributes one emulated subnet of worker
//! nodes behind a router. Meshsim reads a shared manifest, builds the
//! local subnet, routes traffic for every other subnet through the host
//! that owns it, runs the workers until the experiment signals completion,
//! and optionally starts the same coordinator on every peer host.
//!
//! ## Architecture
//!
//! - `manifest`: manifest parsing and local/peer site classification
//! - `ip`: subnet arithmetic and local interface addresses
//! - `topology`: router, worker and link layout of the local subnet
//! - `process`: command execution and worker invocation
//! - `emulator`: the emulated network backend
//! - `routing`: inter-subnet routes, NAT and the log relay
//! - `lifecycle`: the local run state machine and completion marker
//! - `fleet`: remote cleanup, copy and launch on peer hosts
//! - `orchestrator`: joins the local run and the fleet
//! - `config`: YAML run configuration
//! - `utils`: delay parsing
//!
//! ## Manifest Format
//!
//! ```text
//! sim-x 10 20ms
//! 10.0.0.5 10.1.0.0/16 3
//! 10.0.0.9 10.2.0.0/16 2
//! ```
//!
//! The header names the simulation, the link bandwidth in Mbit/s and the
//! link delay. Each further line is one site: the physical host address,
//! the emulated subnet and the number of worker nodes. The first site is
//! the root that collects logs and hosts the monitoring sink.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use meshsim::ip::local_ipv4_addresses;
//! use meshsim::manifest::parse_manifest;
//! use std::path::Path;
//!
//! let local = local_ipv4_addresses()?;
//! let parsed = parse_manifest(Path::new("sites.list"), &local)?;
//! for peer in &parsed.peers {
//!     println!("peer {} owns {}", peer.host_address(), peer.subnet());
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod config;
pub mod emulator;
pub mod fleet;
pub mod ip;
pub mod lifecycle;
pub mod manifest;
pub mod orchestrator;
pub mod process;
pub mod routing;
pub mod topology;
pub mod utils;
