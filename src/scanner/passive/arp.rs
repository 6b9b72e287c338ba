//! ARP passive monitoring
//!
//! Listens to ARP traffic without sending packets and reports every
//! sender IP/MAC pair it sees.

use anyhow::{Context, Result, bail};
use pnet::datalink::{self, Channel, Config, DataLinkReceiver, NetworkInterface};
use pnet::packet::Packet;
use pnet::packet::arp::ArpPacket;
use pnet::packet::ethernet::{EtherTypes, EthernetPacket};
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::models::{ArpEntry, MacAddress};

/// Read timeout so the capture loop can notice a stop request
const READ_TIMEOUT: Duration = Duration::from_millis(500);

/// ARP monitor for passive device discovery
pub struct ArpMonitor {
    interface: NetworkInterface,
}

impl ArpMonitor {
    pub fn new(interface: NetworkInterface) -> Self {
        Self { interface }
    }

    /// Open the capture channel and start forwarding entries on a blocking
    /// thread. Fails when the interface cannot be opened (usually missing
    /// capture privileges).
    pub fn start(self, tx: mpsc::Sender<ArpEntry>, stop: Arc<AtomicBool>) -> Result<JoinHandle<()>> {
        let config = Config {
            read_timeout: Some(READ_TIMEOUT),
            ..Default::default()
        };
        let channel = datalink::channel(&self.interface, config)
            .with_context(|| format!("Failed to open capture on {}", self.interface.name))?;
        let rx = match channel {
            Channel::Ethernet(_, rx) => rx,
            _ => bail!("Unsupported channel type on {}", self.interface.name),
        };

        let name = self.interface.name.clone();
        Ok(tokio::task::spawn_blocking(move || capture_loop(rx, name, tx, stop)))
    }
}

fn capture_loop(
    mut rx: Box<dyn DataLinkReceiver>,
    interface: String,
    tx: mpsc::Sender<ArpEntry>,
    stop: Arc<AtomicBool>,
) {
    tracing::info!("[ARP] Started passive monitoring on {}", interface);

    while !stop.load(Ordering::SeqCst) {
        match rx.next() {
            Ok(frame) => {
                let Some(entry) = parse_arp_frame(frame, &interface) else {
                    continue;
                };
                tracing::debug!("[ARP] {} is at {}", entry.ip, entry.mac);
                if tx.blocking_send(entry).is_err() {
                    tracing::warn!("[ARP] Monitoring channel closed");
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                tracing::error!("[ARP] Capture error on {}: {}", interface, e);
                std::thread::sleep(Duration::from_millis(100));
            }
        }
    }

    tracing::info!("[ARP] Passive monitoring stopped on {}", interface);
}

/// Sender IP/MAC of an Ethernet frame carrying ARP, if it names a real host.
pub fn parse_arp_frame(frame: &[u8], interface: &str) -> Option<ArpEntry> {
    let ethernet = EthernetPacket::new(frame)?;
    if ethernet.get_ethertype() != EtherTypes::Arp {
        return None;
    }
    let arp = ArpPacket::new(ethernet.payload())?;

    let ip = arp.get_sender_proto_addr();
    if ip == Ipv4Addr::UNSPECIFIED {
        // ARP probes (RFC 5227) carry no sender address yet.
        return None;
    }
    let mac = MacAddress::parse(&arp.get_sender_hw_addr().to_string()).ok()?;
    if mac.is_zero() || mac.is_broadcast() || mac.is_multicast() {
        return None;
    }

    Some(ArpEntry {
        ip: ip.to_string(),
        mac,
        interface: Some(interface.to_string()),
    })
}
