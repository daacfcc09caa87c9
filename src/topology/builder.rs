//! Deterministic construction of a site's topology.

use super::types::{Link, LinkShaping, RouterNode, Topology, WorkerNode, WorkerRole};
use crate::ip::SubnetError;
use crate::manifest::{LocalSite, SimulationParams};
use log::debug;

/// Offset of the router from the subnet base
pub const ROUTER_OFFSET: u32 = 1;

pub const SWITCH_NAME: &str = "s0";
pub const ROUTER_NAME: &str = "h0";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TopologyError {
    #[error("Subnet {subnet} has room for {capacity} hosts, but {requested} workers plus a router were requested")]
    SubnetTooSmall {
        subnet: String,
        requested: u32,
        capacity: u32,
    },

    #[error(transparent)]
    Address(#[from] SubnetError),
}

/// Build the topology for the local site.
///
/// The router gets `base+1`, worker `k` gets `base+1+k`. The first
/// worker is the completion writer. Fails before anything is created if
/// the workers do not fit in the subnet.
pub fn build_topology(
    local: &LocalSite,
    params: &SimulationParams,
) -> Result<Topology, TopologyError> {
    let subnet = local.site.subnet;
    let count = local.site.node_count;

    if u64::from(count) + u64::from(ROUTER_OFFSET) > u64::from(subnet.capacity()) {
        return Err(TopologyError::SubnetTooSmall {
            subnet: subnet.to_string(),
            requested: count,
            capacity: subnet.capacity(),
        });
    }

    let gateway = subnet.host(ROUTER_OFFSET)?;
    debug!(
        "Gateway {} for {} - bandwidth: {} Mbit/s, delay: {}",
        gateway,
        subnet,
        params.bandwidth_mbit,
        params.delay_token()
    );

    let router = RouterNode {
        name: ROUTER_NAME.to_string(),
        address: gateway,
        prefix_len: subnet.prefix_len(),
    };
    let mut links = vec![Link {
        node: router.name.clone(),
        shaping: None,
    }];

    let shaping = LinkShaping {
        bandwidth_mbit: (params.bandwidth_mbit > 0).then_some(params.bandwidth_mbit),
        delay: params.delay,
    };

    let mut workers = Vec::new();
    for index in 1..=count {
        let worker = WorkerNode {
            name: format!("h{}", index),
            index,
            address: subnet.host(ROUTER_OFFSET + index)?,
            prefix_len: subnet.prefix_len(),
            gateway,
            role: if index == 1 {
                WorkerRole::CompletionWriter
            } else {
                WorkerRole::Regular
            },
            simulation: params.name.clone(),
        };
        links.push(Link {
            node: worker.name.clone(),
            shaping: Some(shaping),
        });
        workers.push(worker);
    }

    Ok(Topology {
        subnet,
        switch: SWITCH_NAME.to_string(),
        router,
        workers,
        links,
    })
}
