//! # Platform Adapter
//!
//! Route-table queries, NAT, and forwarding rules, all through the
//! `ip`/`iptables`/`sysctl` binaries. Correctness here is the net
//! effect: packets arriving on the TUN are masqueraded out the default
//! egress interface, and everything installed at startup is removed on
//! every exit path (the guards release in `Drop`, so errors, panics,
//! and signal-driven shutdown all clean up).

use std::process::Command;

use crate::error::{PlatformError, Result};

fn run(program: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(program).args(args).output().map_err(|e| {
        PlatformError::CommandFailed {
            command: format!("{} {}", program, args.join(" ")),
            output: e.to_string(),
        }
    })?;

    if !output.status.success() {
        return Err(PlatformError::CommandFailed {
            command: format!("{} {}", program, args.join(" ")),
            output: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
        .into());
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

// ═══════════════════════════════════════════════════════════════════════════
// ROUTE TABLE
// ═══════════════════════════════════════════════════════════════════════════

/// Name of the interface carrying the default route.
pub fn default_egress_interface() -> Result<String> {
    let output = run("ip", &["route", "show", "default"])?;
    parse_route_field(&output, "dev").ok_or_else(|| PlatformError::NoDefaultRoute.into())
}

/// Gateway address of the current default route.
pub fn default_gateway() -> Result<String> {
    let output = run("ip", &["route", "show", "default"])?;
    parse_route_field(&output, "via").ok_or_else(|| PlatformError::NoDefaultRoute.into())
}

/// Pull the value following `key` out of `ip route` output, e.g.
/// "default via 192.168.1.1 dev eth0".
fn parse_route_field(output: &str, key: &str) -> Option<String> {
    let fields: Vec<&str> = output.split_whitespace().collect();
    fields
        .windows(2)
        .find(|w| w[0] == key)
        .map(|w| w[1].to_string())
}

/// Delete a network interface if it exists. Used to clear a stale TUN
/// left behind by an earlier run; absence is not an error.
pub fn remove_interface(name: &str) {
    if let Err(e) = run("ip", &["link", "delete", name]) {
        log::debug!("no stale interface to remove: {}", e);
    }
}

/// Route all traffic through `iface` (the client's full-tunnel mode).
pub fn set_default_route_dev(iface: &str) -> Result<()> {
    run("ip", &["route", "replace", "default", "dev", iface])?;
    log::info!("default route set to {}", iface);
    Ok(())
}

/// Pin a /32 host route via a specific gateway, so the tunnel's own
/// TCP connection does not get routed into the tunnel.
pub fn add_host_route(host: &str, via: &str) -> Result<()> {
    let dest = format!("{}/32", host);
    run("ip", &["route", "replace", &dest, "via", via])?;
    Ok(())
}

pub fn del_host_route(host: &str) {
    let dest = format!("{}/32", host);
    let _ = run("ip", &["route", "del", &dest]);
}

pub fn restore_default_route(via: &str) -> Result<()> {
    run("ip", &["route", "replace", "default", "via", via])?;
    log::info!("default route restored via {}", via);
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// NAT AND FORWARDING
// ═══════════════════════════════════════════════════════════════════════════

/// Enable kernel IP forwarding.
pub fn enable_ip_forward() -> Result<()> {
    if run("sysctl", &["-w", "net.ipv4.ip_forward=1"]).is_err() {
        // sysctl may be missing in minimal containers
        std::fs::write("/proc/sys/net/ipv4/ip_forward", "1")?;
    }
    Ok(())
}

/// Masquerade everything leaving through `iface`.
pub fn enable_nat(iface: &str) -> Result<()> {
    run(
        "iptables",
        &["-t", "nat", "-A", "POSTROUTING", "-o", iface, "-j", "MASQUERADE"],
    )?;
    log::info!("NAT enabled on {}", iface);
    Ok(())
}

pub fn disable_nat(iface: &str) -> Result<()> {
    run(
        "iptables",
        &["-t", "nat", "-D", "POSTROUTING", "-o", iface, "-j", "MASQUERADE"],
    )?;
    log::info!("NAT disabled on {}", iface);
    Ok(())
}

/// Allow established traffic back in and everything out of the TUN.
pub fn install_forwarding(tun: &str, egress: &str) -> Result<()> {
    run(
        "iptables",
        &[
            "-A", "FORWARD", "-i", egress, "-o", tun, "-m", "state", "--state",
            "RELATED,ESTABLISHED", "-j", "ACCEPT",
        ],
    )?;

    if let Err(e) = run(
        "iptables",
        &["-A", "FORWARD", "-i", tun, "-o", egress, "-j", "ACCEPT"],
    ) {
        // Roll back the half-installed pair
        let _ = run(
            "iptables",
            &[
                "-D", "FORWARD", "-i", egress, "-o", tun, "-m", "state", "--state",
                "RELATED,ESTABLISHED", "-j", "ACCEPT",
            ],
        );
        return Err(e);
    }

    log::info!("forwarding installed {} <-> {}", tun, egress);
    Ok(())
}

pub fn remove_forwarding(tun: &str, egress: &str) -> Result<()> {
    run(
        "iptables",
        &[
            "-D", "FORWARD", "-i", egress, "-o", tun, "-m", "state", "--state",
            "RELATED,ESTABLISHED", "-j", "ACCEPT",
        ],
    )?;
    run(
        "iptables",
        &["-D", "FORWARD", "-i", tun, "-o", egress, "-j", "ACCEPT"],
    )?;
    log::info!("forwarding removed {} <-> {}", tun, egress);
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════
// GUARDS
// ═══════════════════════════════════════════════════════════════════════════

/// Server gateway state: NAT plus forwarding, released on drop.
pub struct GatewayGuard {
    tun: String,
    egress: String,
}

impl GatewayGuard {
    pub fn acquire(tun: &str, egress: &str) -> Result<Self> {
        enable_ip_forward()?;
        enable_nat(egress)?;

        if let Err(e) = install_forwarding(tun, egress) {
            let _ = disable_nat(egress);
            return Err(e);
        }

        Ok(Self {
            tun: tun.to_string(),
            egress: egress.to_string(),
        })
    }
}

impl Drop for GatewayGuard {
    fn drop(&mut self) {
        if let Err(e) = remove_forwarding(&self.tun, &self.egress) {
            log::warn!("failed to remove forwarding rules: {}", e);
        }
        if let Err(e) = disable_nat(&self.egress) {
            log::warn!("failed to remove NAT rule: {}", e);
        }
    }
}

/// Client routing state: full-tunnel default route plus a pinned host
/// route to the server, restored on drop.
pub struct RouteGuard {
    server_host: String,
    original_gateway: Option<String>,
}

impl RouteGuard {
    /// Point the default route at the TUN while keeping the server
    /// reachable via the old gateway.
    pub fn acquire(tun: &str, server_host: &str) -> Result<Self> {
        let original_gateway = default_gateway().ok();

        if let Some(ref gw) = original_gateway {
            add_host_route(server_host, gw)?;
        }
        set_default_route_dev(tun)?;

        Ok(Self {
            server_host: server_host.to_string(),
            original_gateway,
        })
    }
}

impl Drop for RouteGuard {
    fn drop(&mut self) {
        if let Some(ref gw) = self.original_gateway {
            if let Err(e) = restore_default_route(gw) {
                log::warn!("failed to restore default route: {}", e);
            }
        }
        del_host_route(&self.server_host);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_route_dev() {
        let output = "default via 192.168.1.1 dev eth0 proto dhcp metric 100\n";
        assert_eq!(parse_route_field(output, "dev").unwrap(), "eth0");
        assert_eq!(parse_route_field(output, "via").unwrap(), "192.168.1.1");
    }

    #[test]
    fn test_parse_route_missing_field() {
        let output = "default dev wg0 scope link\n";
        assert_eq!(parse_route_field(output, "dev").unwrap(), "wg0");
        assert!(parse_route_field(output, "via").is_none());
    }

    #[test]
    fn test_parse_route_empty() {
        assert!(parse_route_field("", "dev").is_none());
    }
}
