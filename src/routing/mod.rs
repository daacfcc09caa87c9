//! Inter-subnet routing on the local router.
//!
//! The router lives in the host namespace, so everything here runs
//! directly on the physical host: peer routes, IP forwarding, NAT for
//! traffic leaving the emulated subnet, and the log relay.

pub mod log_relay;
pub mod routes;

pub use log_relay::LogRelay;
pub use routes::{peer_routes, PeerRoute};

use crate::manifest::{LocalSite, Manifest};
use crate::process::{CommandRunner, CommandSpec, RunError};
use crate::topology::ROUTER_OFFSET;
use log::{debug, info, warn};
use routes::{is_already_absent, is_already_present};
use std::net::Ipv4Addr;
use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("Failed to install route {route}: {source}")]
    Route {
        route: PeerRoute,
        #[source]
        source: RunError,
    },

    #[error("Failed to enable forwarding: {0}")]
    Forwarding(#[source] RunError),

    #[error("Failed to install NAT rule: {0}")]
    Nat(#[source] RunError),
}

/// Router address of the manifest's first site, which aggregates logs.
///
/// `None` when the local site is that first site.
pub fn log_aggregation_root(manifest: &Manifest, local: &LocalSite) -> Option<Ipv4Addr> {
    if local.is_root() {
        return None;
    }
    manifest.root()?.subnet.host(ROUTER_OFFSET).ok()
}

/// Installs and removes everything the local router needs.
///
/// Both directions are idempotent: a second install or teardown does
/// nothing, and routes the kernel already has (or already lost) are
/// logged rather than treated as failures.
pub struct RoutingCoordinator {
    runner: Arc<dyn CommandRunner>,
    routes: Vec<PeerRoute>,
    installed: Vec<PeerRoute>,
    forwarding: bool,
    nat: bool,
    relay: LogRelay,
}

impl RoutingCoordinator {
    pub fn new(runner: Arc<dyn CommandRunner>, routes: Vec<PeerRoute>, relay: LogRelay) -> Self {
        Self {
            runner,
            routes,
            installed: Vec::new(),
            forwarding: false,
            nat: false,
            relay,
        }
    }

    /// Routes currently held by this coordinator
    pub fn installed_routes(&self) -> &[PeerRoute] {
        &self.installed
    }

    pub fn install(&mut self) -> Result<(), RoutingError> {
        info!("Installing {} peer route(s)", self.routes.len());
        for route in self.routes.clone() {
            self.add_route(route)?;
        }

        if !self.forwarding {
            self.runner
                .run(&sysctl_forwarding(true))
                .map_err(RoutingError::Forwarding)?;
            self.forwarding = true;
        }

        if !self.nat {
            // -C succeeds when the rule is already there
            let present = self
                .runner
                .output(&nat_rule("-C"))
                .map_err(RoutingError::Nat)?
                .success();
            if present {
                debug!("NAT rule already present");
            } else {
                self.runner.run(&nat_rule("-I")).map_err(RoutingError::Nat)?;
            }
            self.nat = true;
        }

        self.relay.start(self.runner.as_ref());
        Ok(())
    }

    fn add_route(&mut self, route: PeerRoute) -> Result<(), RoutingError> {
        if self.installed.contains(&route) {
            debug!("Route {} already installed", route);
            return Ok(());
        }
        debug!("Adding route for {}", route);
        match self.runner.run(&route.add_command()) {
            Ok(_) => {}
            Err(e) if is_already_present(e.stderr()) => {
                warn!("Route {} already exists, keeping it", route);
            }
            Err(source) => return Err(RoutingError::Route { route, source }),
        }
        self.installed.push(route);
        Ok(())
    }

    /// Undo [`install`](Self::install). Every step is attempted; failures
    /// are logged and counted.
    pub fn teardown(&mut self) -> usize {
        info!("Stopping router");
        let mut failures = 0;

        self.relay.stop(self.runner.as_ref());

        if self.nat {
            if let Err(e) = self.runner.run(&nat_rule("-D")) {
                warn!("Failed to remove NAT rule: {}", e);
                failures += 1;
            }
            self.nat = false;
        }

        if self.forwarding {
            if let Err(e) = self.runner.run(&sysctl_forwarding(false)) {
                warn!("Failed to disable forwarding: {}", e);
                failures += 1;
            }
            self.forwarding = false;
        }

        for route in std::mem::take(&mut self.installed) {
            debug!("Deleting route for {}", route);
            match self.runner.run(&route.delete_command()) {
                Ok(_) => {}
                Err(e) if is_already_absent(e.stderr()) => {
                    warn!("Route {} was already gone", route);
                }
                Err(e) => {
                    warn!("Failed to delete route {}: {}", route, e);
                    failures += 1;
                }
            }
        }
        failures
    }
}

fn sysctl_forwarding(enabled: bool) -> CommandSpec {
    CommandSpec::new("sysctl").args([
        "-w".to_string(),
        format!("net.ipv4.ip_forward={}", u8::from(enabled)),
    ])
}

fn nat_rule(action: &str) -> CommandSpec {
    CommandSpec::new("iptables").args(["-t", "nat", action, "POSTROUTING", "-j", "MASQUERADE"])
}
