//! Network interface detection and selection
//!
//! Picks the interface the passive ARP monitor listens on.

use anyhow::{Result, anyhow};
use pnet::datalink::{self, NetworkInterface};
use pnet::util::MacAddr;
use std::net::{IpAddr, Ipv4Addr};

/// Usable IPv4 interface with its hardware address
#[derive(Debug, Clone)]
pub struct InterfaceInfo {
    pub name: String,
    pub ip: Ipv4Addr,
    pub mac: MacAddr,
    pub prefix_len: u8,
    pub pnet_interface: NetworkInterface,
}

fn is_virtual_adapter_name(name_lower: &str) -> bool {
    ["hyper-v", "vmware", "virtualbox", "docker", "vethernet", "wsl", "veth", "br-"]
        .iter()
        .any(|p| name_lower.contains(p))
}

fn is_usable_ipv4(ipv4: &Ipv4Addr, prefix: u8) -> bool {
    !ipv4.is_unspecified() && prefix > 0 && !ipv4.is_link_local()
}

fn collect_candidate_interfaces(pnet_interfaces: &[NetworkInterface]) -> Vec<InterfaceInfo> {
    let mut candidates = Vec::new();

    for pnet_if in pnet_interfaces {
        if pnet_if.is_loopback() {
            continue;
        }

        let has_usable_ipv4 = pnet_if.ips.iter().any(|net| match net.ip() {
            IpAddr::V4(ipv4) => is_usable_ipv4(&ipv4, net.prefix()),
            IpAddr::V6(_) => false,
        });
        // Npcap reports usable adapters as down on Windows.
        if !pnet_if.is_up() && !(cfg!(target_os = "windows") && has_usable_ipv4) {
            tracing::debug!("Skipping down adapter: {}", pnet_if.name);
            continue;
        }

        let mac = match pnet_if.mac {
            Some(m) if m != MacAddr::zero() => m,
            _ => continue,
        };

        if is_virtual_adapter_name(&pnet_if.name.to_lowercase()) {
            tracing::debug!("Skipping virtual adapter: {}", pnet_if.name);
            continue;
        }

        for net in &pnet_if.ips {
            if let IpAddr::V4(ipv4) = net.ip()
                && is_usable_ipv4(&ipv4, net.prefix())
            {
                candidates.push(InterfaceInfo {
                    name: pnet_if.name.clone(),
                    ip: ipv4,
                    mac,
                    prefix_len: net.prefix(),
                    pnet_interface: pnet_if.clone(),
                });
            }
        }
    }

    candidates.sort_by_key(|c| std::cmp::Reverse(interface_score(&c.ip)));
    candidates
}

/// Best IPv4 interface, preferring typical LAN ranges over virtual ones
pub fn find_valid_interface() -> Result<InterfaceInfo> {
    let pnet_interfaces = datalink::interfaces();
    tracing::debug!("Scanning {} network interfaces...", pnet_interfaces.len());

    collect_candidate_interfaces(&pnet_interfaces)
        .into_iter()
        .next()
        .inspect(|best| {
            tracing::debug!(
                "Selected interface: {} (IP: {}/{}, MAC: {})",
                best.name,
                best.ip,
                best.prefix_len,
                best.mac
            )
        })
        .ok_or_else(|| {
            anyhow!(
                "No valid IPv4 network interface found.\n\
                 Ensure you have an active network connection."
            )
        })
}

/// Interface with the exact given name
pub fn find_interface_by_name(name: &str) -> Result<InterfaceInfo> {
    collect_candidate_interfaces(&datalink::interfaces())
        .into_iter()
        .find(|c| c.name == name)
        .ok_or_else(|| anyhow!("Interface '{}' not found or has no usable IPv4 address", name))
}

/// Valid interface names in priority order.
pub fn list_valid_interfaces() -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for candidate in collect_candidate_interfaces(&datalink::interfaces()) {
        if !names.contains(&candidate.name) {
            names.push(candidate.name);
        }
    }
    names
}

/// Scores an IP address for interface selection priority
pub fn interface_score(ip: &Ipv4Addr) -> u32 {
    let octets = ip.octets();
    match octets[0] {
        192 if octets[1] == 168 => 100,
        10 => 90,
        172 if (16..=31).contains(&octets[1]) => 50,
        _ => 70,
    }
}
