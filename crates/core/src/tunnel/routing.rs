//! Routing context for one tunnel as an ordered list of reversible steps.

use ipnet::IpNet;
use std::net::IpAddr;
use tracing::{debug, warn};

use super::error::HostError;
use super::host::{HostCommand, HostNetwork, Program};
use super::types::TunnelConfig;

/// Comment attached to firewall rules installed by the pool.
pub const FIREWALL_TAG: &str = "burrow";

/// Metric of the fail-closed route. The highest value, so an allowed range
/// of `0.0.0.0/0` or `::/0` (metric 0) coexists with it in the same table.
pub const FAIL_CLOSED_METRIC: u32 = u32::MAX;

/// One provisioning step and the command that reverts it.
#[derive(Debug, Clone)]
pub struct RoutingStep {
    pub label: &'static str,
    pub apply: HostCommand,
    pub undo: Option<HostCommand>,
}

/// Everything needed to bring a tunnel up and tear it down again.
#[derive(Debug, Clone)]
pub struct RoutingPlan {
    interface: String,
    table: u32,
    steps: Vec<RoutingStep>,
}

fn family_flag(addr: &IpAddr) -> &'static str {
    if addr.is_ipv4() {
        "-4"
    } else {
        "-6"
    }
}

impl RoutingPlan {
    /// Builds the plan for `config` on `interface`, routing through `table`.
    pub fn build(config: &TunnelConfig, interface: &str, table: u32, firewall: bool) -> Self {
        let iface = interface;
        let table_id = table.to_string();
        let source = config.address.addr();
        let mut steps = Vec::new();

        steps.push(RoutingStep {
            label: "link",
            apply: HostCommand::new(
                Program::Ip,
                ["link", "add", "dev", iface, "type", "wireguard"],
            ),
            undo: Some(HostCommand::new(Program::Ip, ["link", "del", "dev", iface])),
        });

        let allowed = config
            .allowed_ips
            .iter()
            .map(IpNet::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let mut wg_args = vec![
            "set".to_string(),
            iface.to_string(),
            "private-key".to_string(),
            "/dev/stdin".to_string(),
            "peer".to_string(),
            config.peer_public_key.to_base64(),
            "endpoint".to_string(),
            config.endpoint.clone(),
            "allowed-ips".to_string(),
            allowed,
        ];
        if let Some(keepalive) = config.persistent_keepalive {
            wg_args.push("persistent-keepalive".to_string());
            wg_args.push(keepalive.to_string());
        }
        steps.push(RoutingStep {
            label: "peer",
            apply: HostCommand::new(Program::Wg, wg_args)
                .with_stdin(config.private_key.to_base64()),
            // Removed together with the link.
            undo: None,
        });

        let address = config.address.to_string();
        steps.push(RoutingStep {
            label: "address",
            apply: HostCommand::new(Program::Ip, ["address", "add", address.as_str(), "dev", iface]),
            undo: Some(HostCommand::new(
                Program::Ip,
                ["address", "del", address.as_str(), "dev", iface],
            )),
        });

        steps.push(RoutingStep {
            label: "up",
            apply: HostCommand::new(Program::Ip, ["link", "set", "up", "dev", iface]),
            undo: Some(HostCommand::new(
                Program::Ip,
                ["link", "set", "down", "dev", iface],
            )),
        });

        for range in &config.allowed_ips {
            let range = range.to_string();
            steps.push(RoutingStep {
                label: "route",
                apply: HostCommand::new(
                    Program::Ip,
                    ["route", "add", range.as_str(), "dev", iface, "table", table_id.as_str()],
                ),
                undo: Some(HostCommand::new(
                    Program::Ip,
                    ["route", "del", range.as_str(), "dev", iface, "table", table_id.as_str()],
                )),
            });
        }

        // Anything from the tunnel address that misses the routes above is
        // dropped instead of falling through to the main table.
        let metric = FAIL_CLOSED_METRIC.to_string();
        let mut families: Vec<&'static str> = vec![family_flag(&source)];
        for range in &config.allowed_ips {
            let flag = family_flag(&range.addr());
            if !families.contains(&flag) {
                families.push(flag);
            }
        }
        for flag in families {
            steps.push(RoutingStep {
                label: "fail-closed",
                apply: HostCommand::new(
                    Program::Ip,
                    [
                        flag,
                        "route",
                        "add",
                        "unreachable",
                        "default",
                        "metric",
                        metric.as_str(),
                        "table",
                        table_id.as_str(),
                    ],
                ),
                undo: Some(HostCommand::new(
                    Program::Ip,
                    [
                        flag,
                        "route",
                        "del",
                        "unreachable",
                        "default",
                        "metric",
                        metric.as_str(),
                        "table",
                        table_id.as_str(),
                    ],
                )),
            });
        }

        let source_str = source.to_string();
        let flag = family_flag(&source);
        steps.push(RoutingStep {
            label: "rule",
            apply: HostCommand::new(
                Program::Ip,
                [flag, "rule", "add", "from", source_str.as_str(), "lookup", table_id.as_str()],
            ),
            undo: Some(HostCommand::new(
                Program::Ip,
                [flag, "rule", "del", "from", source_str.as_str(), "lookup", table_id.as_str()],
            )),
        });

        if firewall {
            let program = if source.is_ipv4() {
                Program::Iptables
            } else {
                Program::Ip6tables
            };
            let comment = format!("{}:{}", FIREWALL_TAG, config.id);
            let rule = |action: &str| {
                HostCommand::new(
                    program,
                    [
                        action,
                        "OUTPUT",
                        "-s",
                        source_str.as_str(),
                        "!",
                        "-o",
                        iface,
                        "-m",
                        "comment",
                        "--comment",
                        comment.as_str(),
                        "-j",
                        "REJECT",
                    ],
                )
            };
            steps.push(RoutingStep {
                label: "firewall",
                apply: rule("-A"),
                undo: Some(rule("-D")),
            });
        }

        Self {
            interface: iface.to_string(),
            table,
            steps,
        }
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn table(&self) -> u32 {
        self.table
    }

    pub fn steps(&self) -> &[RoutingStep] {
        &self.steps
    }

    /// Applies every step in order. If one fails, the steps already applied
    /// are reverted in reverse order before the error is returned.
    pub async fn apply(&self, host: &dyn HostNetwork) -> Result<(), HostError> {
        for (index, step) in self.steps.iter().enumerate() {
            debug!(interface = %self.interface, step = step.label, "Applying routing step");
            if let Err(e) = host.run(&step.apply).await {
                warn!(
                    interface = %self.interface,
                    step = step.label,
                    error = %e,
                    "Routing step failed, rolling back"
                );
                // The link step may have half-created the device.
                let upto = if index == 0 { 1 } else { index };
                let _ = self.revert(host, upto).await;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Reverts every step. Objects that are already gone are not errors, so
    /// this is safe to run repeatedly and after a partial provisioning.
    /// Returns the first real failure after attempting all steps.
    pub async fn teardown(&self, host: &dyn HostNetwork) -> Result<(), HostError> {
        self.revert(host, self.steps.len()).await
    }

    async fn revert(&self, host: &dyn HostNetwork, upto: usize) -> Result<(), HostError> {
        let mut first_error = None;
        for step in self.steps[..upto].iter().rev() {
            let Some(undo) = &step.undo else { continue };
            match host.run(undo).await {
                Ok(()) => {}
                Err(e) if e.is_absent() => {
                    debug!(interface = %self.interface, step = step.label, "Already absent");
                }
                Err(e) => {
                    warn!(
                        interface = %self.interface,
                        step = step.label,
                        error = %e,
                        "Failed to revert routing step"
                    );
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
