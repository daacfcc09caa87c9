//! Manifest parsing and site classification.
//!
//! The manifest names every participating site; this module reads it and
//! works out which entry, if any, belongs to the local host.

pub mod parser;
pub mod types;

pub use parser::{classify_sites, parse_manifest, parse_manifest_str, ManifestError, MAX_NODES_PER_SITE};
pub use types::{LocalSite, Manifest, ParsedManifest, PeerSite, SimulationParams, SiteSpec};
