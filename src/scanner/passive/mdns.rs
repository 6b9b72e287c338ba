//! mDNS/DNS-SD passive discovery
//!
//! Browses a fixed set of service types and reports each resolved instance
//! together with the announcing host.

use anyhow::{Context, Result};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use crate::models::{ServiceOrigin, ServiceRecord};
use crate::network::normalize_hostname;

/// Service types worth resolving for classification
const BROWSE_TYPES: &[&str] = &[
    "_airplay._tcp.local.",
    "_raop._tcp.local.",
    "_googlecast._tcp.local.",
    "_spotify-connect._tcp.local.",
    "_sonos._tcp.local.",
    "_ipp._tcp.local.",
    "_ipps._tcp.local.",
    "_printer._tcp.local.",
    "_pdl-datastream._tcp.local.",
    "_hap._tcp.local.",
    "_hue._tcp.local.",
    "_companion-link._tcp.local.",
    "_rtsp._tcp.local.",
    "_smb._tcp.local.",
    "_afpovertcp._tcp.local.",
    "_adisk._tcp.local.",
    "_workstation._tcp.local.",
    "_ssh._tcp.local.",
    "_http._tcp.local.",
    "_mqtt._tcp.local.",
    "_esphomelib._tcp.local.",
];

const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// One resolved service instance
#[derive(Debug, Clone, PartialEq)]
pub struct MdnsObservation {
    pub ip: Ipv4Addr,
    pub hostname: Option<String>,
    pub record: ServiceRecord,
}

/// Passive network scanner using mDNS
pub struct PassiveScanner {
    mdns: Arc<ServiceDaemon>,
}

impl PassiveScanner {
    pub fn new() -> Result<Self> {
        let mdns = ServiceDaemon::new().context("Failed to start mDNS daemon")?;
        tracing::info!("[MDNS] Passive scanner initialized");
        Ok(Self { mdns: Arc::new(mdns) })
    }

    /// Browse every known service type and forward resolved instances until
    /// `stop` is raised. Fails only when no browse could be started.
    pub fn start(self, tx: mpsc::Sender<MdnsObservation>, stop: Arc<AtomicBool>) -> Result<JoinHandle<()>> {
        let mut receivers = Vec::new();
        for ty in BROWSE_TYPES {
            match self.mdns.browse(ty) {
                Ok(receiver) => receivers.push(receiver),
                Err(e) => tracing::debug!("[MDNS] Browse {} failed: {}", ty, e),
            }
        }
        if receivers.is_empty() {
            anyhow::bail!("no mDNS browse could be started");
        }

        let mdns = Arc::clone(&self.mdns);
        Ok(tokio::spawn(async move {
            tracing::info!("[MDNS] Browsing {} service types", receivers.len());
            let mut tasks = JoinSet::new();
            for receiver in receivers {
                let tx = tx.clone();
                let stop = Arc::clone(&stop);
                tasks.spawn(async move {
                    while !stop.load(Ordering::SeqCst) {
                        match tokio::time::timeout(POLL_INTERVAL, receiver.recv_async()).await {
                            Ok(Ok(ServiceEvent::ServiceResolved(info))) => {
                                let Some(observation) = observation_from_info(&info) else {
                                    continue;
                                };
                                tracing::debug!(
                                    "[MDNS] {} at {} ({})",
                                    observation.record.name,
                                    observation.ip,
                                    observation.record.service_type
                                );
                                if tx.send(observation).await.is_err() {
                                    break;
                                }
                            }
                            Ok(Ok(_)) | Err(_) => {}
                            Ok(Err(_)) => break,
                        }
                    }
                });
            }
            while tasks.join_next().await.is_some() {}

            if let Err(e) = mdns.shutdown() {
                tracing::debug!("[MDNS] Daemon shutdown failed: {}", e);
            }
            tracing::info!("[MDNS] Passive scanner stopped");
        }))
    }
}

fn observation_from_info(info: &ServiceInfo) -> Option<MdnsObservation> {
    let ip = info
        .get_addresses()
        .iter()
        .find_map(|addr| addr.to_string().parse::<Ipv4Addr>().ok())?;
    let txt = info
        .get_properties()
        .iter()
        .map(|p| (p.key().to_string(), p.val_str().to_string()))
        .collect();
    let hostname = normalize_hostname(info.get_hostname());
    Some(MdnsObservation {
        ip,
        hostname: (!hostname.is_empty()).then_some(hostname),
        record: service_record(info.get_fullname(), info.get_type(), info.get_port(), txt, ip),
    })
}

/// Build a record from DNS-SD names: `Living Room._airplay._tcp.local.`
/// becomes instance `Living Room` of type `_airplay._tcp`.
pub fn service_record(
    fullname: &str,
    service_type: &str,
    port: u16,
    txt_records: BTreeMap<String, String>,
    ip: Ipv4Addr,
) -> ServiceRecord {
    let bare_type = service_type
        .trim_end_matches('.')
        .trim_end_matches(".local")
        .to_string();
    let name = fullname
        .strip_suffix(service_type)
        .map(|n| n.trim_end_matches('.'))
        .filter(|n| !n.is_empty())
        .unwrap_or(fullname)
        .to_string();

    let mut record = ServiceRecord::new(&name, &bare_type, port, ServiceOrigin::Mdns);
    record.txt_records = txt_records;
    record.host_ip = Some(ip.to_string());
    record
}
