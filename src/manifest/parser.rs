//! Manifest file parsing.
//!
//! The manifest is line oriented:
//!
//! ```text
//! <simulation> <bandwidth> <delay>
//! <host address> <subnet CIDR> <node count>
//! ...
//! ```
//!
//! Blank lines and lines starting with `#` are ignored.

use super::types::{LocalSite, Manifest, ParsedManifest, PeerSite, SimulationParams, SiteSpec};
use crate::ip::Subnet;
use crate::utils::duration::parse_delay;
use log::{debug, info};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

/// Most worker nodes a single site may ask for (a full /16)
pub const MAX_NODES_PER_SITE: u32 = 65_534;

/// Errors that make a manifest unusable
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Failed to read manifest {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Manifest is empty: expected a '<simulation> <bandwidth> <delay>' header")]
    MissingHeader,

    #[error("Line {line}: malformed header: {reason}")]
    MalformedHeader { line: usize, reason: String },

    #[error("Line {line}: malformed site entry '{content}': {reason}")]
    MalformedSite {
        line: usize,
        content: String,
        reason: String,
    },

    #[error("Manifest lists no sites")]
    NoSites,

    #[error("Line {line}: host {address} already owns the site on line {first_line}")]
    DuplicateHost {
        address: Ipv4Addr,
        first_line: usize,
        line: usize,
    },

    #[error("Local host matches more than one site: {addresses:?}")]
    AmbiguousLocalSite { addresses: Vec<Ipv4Addr> },
}

/// Read a manifest file and classify its sites against `local_addresses`.
///
/// Only reads; nothing on disk or in the network is touched.
pub fn parse_manifest(
    path: &Path,
    local_addresses: &[Ipv4Addr],
) -> Result<ParsedManifest, ManifestError> {
    info!("Loading manifest from: {:?}", path);
    let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let manifest = parse_manifest_str(&content)?;
    let (local, peers) = classify_sites(&manifest, local_addresses)?;
    Ok(ParsedManifest {
        manifest,
        local,
        peers,
    })
}

/// Parse manifest text. Site order is preserved.
pub fn parse_manifest_str(content: &str) -> Result<Manifest, ManifestError> {
    let mut lines = content
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'));

    let (header_line, header) = lines.next().ok_or(ManifestError::MissingHeader)?;
    let params = parse_header(header_line, header)?;

    let mut sites: Vec<SiteSpec> = Vec::new();
    let mut site_lines: Vec<usize> = Vec::new();
    for (line, content) in lines {
        let site = parse_site(line, content)?;
        if let Some(i) = sites
            .iter()
            .position(|s| s.host_address == site.host_address)
        {
            return Err(ManifestError::DuplicateHost {
                address: site.host_address,
                first_line: site_lines[i],
                line,
            });
        }
        debug!(
            "Site {}: {} emulating {} with {} nodes",
            sites.len(),
            site.host_address,
            site.subnet,
            site.node_count
        );
        sites.push(site);
        site_lines.push(line);
    }

    if sites.is_empty() {
        return Err(ManifestError::NoSites);
    }

    Ok(Manifest { params, sites })
}

/// Split sites into the one owned by this host (if any) and its peers
pub fn classify_sites(
    manifest: &Manifest,
    local_addresses: &[Ipv4Addr],
) -> Result<(Option<LocalSite>, Vec<PeerSite>), ManifestError> {
    let mut local: Vec<LocalSite> = Vec::new();
    let mut peers = Vec::new();

    for (position, site) in manifest.sites.iter().enumerate() {
        if local_addresses.contains(&site.host_address) {
            local.push(LocalSite {
                site: site.clone(),
                position,
            });
        } else {
            peers.push(PeerSite {
                site: site.clone(),
                position,
            });
        }
    }

    if local.len() > 1 {
        return Err(ManifestError::AmbiguousLocalSite {
            addresses: local.iter().map(|l| l.site.host_address).collect(),
        });
    }

    let local = local.pop();
    match &local {
        Some(l) => info!(
            "Local site is {} ({} at position {})",
            l.site.host_address, l.site.subnet, l.position
        ),
        None => info!("No local site in manifest, only peers will be driven"),
    }
    Ok((local, peers))
}

fn parse_header(line: usize, header: &str) -> Result<SimulationParams, ManifestError> {
    let malformed = |reason: String| ManifestError::MalformedHeader { line, reason };

    let fields: Vec<&str> = header.split_whitespace().collect();
    let [name, bandwidth, delay] = fields.as_slice() else {
        return Err(malformed(format!(
            "expected 3 fields, found {}",
            fields.len()
        )));
    };

    let bandwidth_mbit = bandwidth
        .parse::<u32>()
        .map_err(|_| malformed(format!("bandwidth '{}' is not an integer", bandwidth)))?;
    let delay = parse_delay(delay).map_err(malformed)?;

    Ok(SimulationParams {
        name: name.to_string(),
        bandwidth_mbit,
        delay,
    })
}

fn parse_site(line: usize, content: &str) -> Result<SiteSpec, ManifestError> {
    let malformed = |reason: String| ManifestError::MalformedSite {
        line,
        content: content.to_string(),
        reason,
    };

    let fields: Vec<&str> = content.split_whitespace().collect();
    let [host, subnet, count] = fields.as_slice() else {
        return Err(malformed(format!(
            "expected 3 fields, found {}",
            fields.len()
        )));
    };

    let host_address = host
        .parse::<Ipv4Addr>()
        .map_err(|_| malformed(format!("'{}' is not an IPv4 address", host)))?;
    let subnet = Subnet::parse(subnet).map_err(|e| malformed(e.to_string()))?;
    let node_count = count
        .parse::<u32>()
        .map_err(|_| malformed(format!("node count '{}' is not an integer", count)))?;
    if node_count == 0 {
        return Err(malformed("node count must be at least 1".to_string()));
    }
    if node_count > MAX_NODES_PER_SITE {
        return Err(malformed(format!(
            "node count {} exceeds the limit of {}",
            node_count, MAX_NODES_PER_SITE
        )));
    }

    Ok(SiteSpec {
        host_address,
        subnet,
        node_count,
    })
}
