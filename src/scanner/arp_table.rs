//! System ARP table reader
//!
//! Linux exposes the neighbour table in `/proc/net/arp`; elsewhere we fall
//! back to parsing `arp -a` (BSD/macOS and Windows layouts).

use anyhow::{Context, Result};
use regex::Regex;
use std::future::Future;
use std::net::Ipv4Addr;
use std::path::Path;
use std::pin::Pin;
use std::sync::OnceLock;

use crate::models::{ArpEntry, MacAddress};

const PROC_NET_ARP: &str = "/proc/net/arp";

/// Source of the host's current IP -> MAC mappings
pub trait ArpTableSource: Send + Sync {
    fn read_entries<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<Vec<ArpEntry>>> + Send + 'a>>;
}

#[derive(Debug, Clone, Default)]
pub struct SystemArpTable;

impl ArpTableSource for SystemArpTable {
    fn read_entries<'a>(&'a self) -> Pin<Box<dyn Future<Output = Result<Vec<ArpEntry>>> + Send + 'a>> {
        Box::pin(async move {
            if Path::new(PROC_NET_ARP).exists() {
                let text = tokio::fs::read_to_string(PROC_NET_ARP)
                    .await
                    .with_context(|| format!("Failed to read {}", PROC_NET_ARP))?;
                return Ok(parse_proc_net_arp(&text));
            }

            let output = tokio::process::Command::new("arp")
                .arg("-a")
                .output()
                .await
                .context("Failed to run `arp -a`")?;
            if !output.status.success() {
                anyhow::bail!("`arp -a` exited with {}", output.status);
            }
            Ok(parse_arp_a(&String::from_utf8_lossy(&output.stdout)))
        })
    }
}

/// Keep only entries that name a real unicast host.
fn usable(mac: &MacAddress, ip: &str) -> bool {
    !mac.is_zero() && !mac.is_broadcast() && !mac.is_multicast() && ip.parse::<Ipv4Addr>().is_ok()
}

/// Parse the Linux `/proc/net/arp` table.
///
/// Incomplete entries (flags `0x0`) are skipped.
pub fn parse_proc_net_arp(text: &str) -> Vec<ArpEntry> {
    text.lines()
        .skip(1)
        .filter_map(|line| {
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 6 || cols[2] == "0x0" {
                return None;
            }
            let mac = MacAddress::parse(cols[3]).ok()?;
            let ip = cols[0].to_string();
            usable(&mac, &ip).then(|| ArpEntry {
                ip,
                mac,
                interface: Some(cols[5].to_string()),
            })
        })
        .collect()
}

struct ArpPatterns {
    bsd: Option<Regex>,
    windows: Option<Regex>,
}

fn patterns() -> &'static ArpPatterns {
    static PATTERNS: OnceLock<ArpPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| ArpPatterns {
        // ? (192.168.1.1) at a:b:c:1:2:3 on en0 ifscope [ethernet]
        bsd: Regex::new(
            r"\((\d{1,3}(?:\.\d{1,3}){3})\)\s+at\s+([0-9A-Fa-f]{1,2}(?:[:-][0-9A-Fa-f]{1,2}){5})(?:\s+on\s+(\S+))?",
        )
        .ok(),
        //   192.168.1.1           00-11-22-33-44-55     dynamic
        windows: Regex::new(
            r"^\s*(\d{1,3}(?:\.\d{1,3}){3})\s+([0-9A-Fa-f]{2}(?:-[0-9A-Fa-f]{2}){5})\s+\w+",
        )
        .ok(),
    })
}

/// Parse `arp -a` output in either the BSD or the Windows layout.
pub fn parse_arp_a(text: &str) -> Vec<ArpEntry> {
    let p = patterns();
    text.lines()
        .filter_map(|line| {
            let (ip, mac, interface) = if let Some(c) = p.bsd.as_ref().and_then(|re| re.captures(line)) {
                (c.get(1)?.as_str(), c.get(2)?.as_str(), c.get(3).map(|m| m.as_str().to_string()))
            } else if let Some(c) = p.windows.as_ref().and_then(|re| re.captures(line)) {
                (c.get(1)?.as_str(), c.get(2)?.as_str(), None)
            } else {
                return None;
            };
            let mac = MacAddress::parse(mac).ok()?;
            usable(&mac, ip).then(|| ArpEntry {
                ip: ip.to_string(),
                mac,
                interface,
            })
        })
        .collect()
}
