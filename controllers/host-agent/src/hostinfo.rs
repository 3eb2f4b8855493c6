//! Host platform and network introspection
//!
//! The parsers take file contents so they can be tested without touching
//! `/etc` or `/proc`.

use std::collections::BTreeMap;
use std::net::IpAddr;

use crds::{HostInfo, NetworkStatus};
use tracing::debug;

const OS_RELEASE: &str = "/etc/os-release";
const PROC_NET_ROUTE: &str = "/proc/net/route";
const SYS_CLASS_NET: &str = "/sys/class/net";

/// `PRETTY_NAME` from os-release content, falling back to `NAME VERSION`.
pub fn parse_os_release(content: &str) -> Option<String> {
    let mut fields = BTreeMap::new();
    for line in content.lines() {
        let line = line.trim();
        if line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            fields.insert(key.trim(), value.trim().trim_matches('"').trim_matches('\''));
        }
    }
    if let Some(pretty) = fields.get("PRETTY_NAME").filter(|v| !v.is_empty()) {
        return Some(pretty.to_string());
    }
    let name = fields.get("NAME").filter(|v| !v.is_empty())?;
    Some(match fields.get("VERSION").filter(|v| !v.is_empty()) {
        Some(version) => format!("{} {}", name, version),
        None => name.to_string(),
    })
}

/// Kubernetes architecture name for a Rust target architecture.
pub fn kubernetes_arch(arch: &str) -> &str {
    match arch {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        "arm" => "arm",
        "powerpc64" => "ppc64le",
        "s390x" => "s390x",
        other => other,
    }
}

/// Interface carrying the default IPv4 route in `/proc/net/route` content.
pub fn default_route_interface(route_table: &str) -> Option<String> {
    route_table.lines().skip(1).find_map(|line| {
        let mut columns = line.split_whitespace();
        let iface = columns.next()?;
        let destination = columns.next()?;
        (destination == "00000000").then(|| iface.to_string())
    })
}

/// Platform details of this host.
pub fn host_info() -> HostInfo {
    let os_image = std::fs::read_to_string(OS_RELEASE)
        .ok()
        .and_then(|content| parse_os_release(&content))
        .unwrap_or_default();
    HostInfo {
        os_name: std::env::consts::OS.to_string(),
        os_image,
        architecture: kubernetes_arch(std::env::consts::ARCH).to_string(),
    }
}

/// Name of the default-route interface, empty when it cannot be determined.
pub fn default_interface_name() -> String {
    std::fs::read_to_string(PROC_NET_ROUTE)
        .ok()
        .and_then(|table| default_route_interface(&table))
        .unwrap_or_default()
}

fn mac_address(iface: &str) -> Option<String> {
    let path = format!("{}/{}/address", SYS_CLASS_NET, iface);
    std::fs::read_to_string(path)
        .ok()
        .map(|mac| mac.trim().to_string())
        .filter(|mac| !mac.is_empty())
}

/// Group addresses by interface, skipping loopback, in name order.
pub fn group_interfaces(
    addrs: impl IntoIterator<Item = (String, IpAddr)>,
    default_iface: &str,
    mac_of: impl Fn(&str) -> Option<String>,
) -> Vec<NetworkStatus> {
    let mut by_name: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, ip) in addrs {
        if ip.is_loopback() {
            continue;
        }
        by_name.entry(name).or_default().push(ip.to_string());
    }
    by_name
        .into_iter()
        .map(|(name, mut ips)| {
            ips.sort();
            NetworkStatus {
                mac_addr: mac_of(&name),
                is_default: name == default_iface,
                network_interface_name: Some(name),
                ip_addrs: ips,
            }
        })
        .collect()
}

/// Non-loopback interfaces of this host.
pub fn network_status() -> Vec<NetworkStatus> {
    let addrs = match if_addrs::get_if_addrs() {
        Ok(addrs) => addrs,
        Err(e) => {
            debug!(error = %e, "Failed to list network interfaces");
            return Vec::new();
        }
    };
    group_interfaces(
        addrs.into_iter().map(|iface| (iface.name.clone(), iface.ip())),
        &default_interface_name(),
        mac_address,
    )
}
