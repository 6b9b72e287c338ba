//! SSDP discovery: active M-SEARCH and passive NOTIFY listening

use anyhow::{Context, Result};
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::models::{ServiceOrigin, ServiceRecord};

const SSDP_MULTICAST: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
const SSDP_PORT: u16 = 1900;
const MAX_DATAGRAM: usize = 4096;
const POLL_INTERVAL: Duration = Duration::from_secs(1);

fn m_search(mx: u64) -> String {
    format!(
        "M-SEARCH * HTTP/1.1\r\nHOST: {}:{}\r\nMAN: \"ssdp:discover\"\r\nMX: {}\r\nST: ssdp:all\r\n\r\n",
        SSDP_MULTICAST, SSDP_PORT, mx
    )
}

fn port_from_location(location: &str) -> Option<u16> {
    let rest = location.split_once("://").map_or(location, |(_, r)| r);
    let authority = rest.split('/').next()?;
    authority.rsplit_once(':')?.1.parse().ok()
}

/// Parse a search response or NOTIFY announcement.
///
/// Returns `None` for other requests (someone else's M-SEARCH), for
/// `ssdp:byebye` announcements and for messages without `ST`/`NT`.
pub fn parse_ssdp_message(text: &str, from: Ipv4Addr) -> Option<ServiceRecord> {
    let mut lines = text.lines();
    let start = lines.next()?.trim().to_ascii_uppercase();
    if !(start.starts_with("HTTP/1.1 200") || start.starts_with("NOTIFY ")) {
        return None;
    }

    let mut service_type = None;
    let mut usn = None;
    let mut server = None;
    let mut location = None;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim().to_string();
        match name.trim().to_ascii_uppercase().as_str() {
            "ST" | "NT" => service_type = Some(value),
            "USN" => usn = Some(value),
            "SERVER" => server = Some(value),
            "LOCATION" => location = Some(value),
            "NTS" if value.eq_ignore_ascii_case("ssdp:byebye") => return None,
            _ => {}
        }
    }

    let service_type = service_type.filter(|s| !s.is_empty())?;
    let port = location
        .as_deref()
        .and_then(port_from_location)
        .unwrap_or(SSDP_PORT);
    let name = usn.unwrap_or_else(|| service_type.clone());
    let mut record = ServiceRecord::new(&name, &service_type, port, ServiceOrigin::Ssdp);
    record.host_ip = Some(from.to_string());
    if let Some(server) = server {
        record.txt_records.insert("server".to_string(), server);
    }
    if let Some(location) = location {
        record.txt_records.insert("location".to_string(), location);
    }
    Some(record)
}

/// Send one M-SEARCH and collect the answers that arrive within `window`.
pub async fn ssdp_search(window: Duration) -> Result<Vec<ServiceRecord>> {
    let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))
        .await
        .context("Failed to bind SSDP search socket")?;
    let mx = window.as_secs().clamp(1, 5);
    socket
        .send_to(m_search(mx).as_bytes(), SocketAddrV4::new(SSDP_MULTICAST, SSDP_PORT))
        .await
        .context("Failed to send M-SEARCH")?;

    let deadline = tokio::time::Instant::now() + window;
    let mut buf = vec![0u8; MAX_DATAGRAM];
    let mut records: Vec<ServiceRecord> = Vec::new();
    while let Ok(received) = tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
        let (n, from) = match received {
            Ok(r) => r,
            Err(e) => {
                tracing::debug!("[SSDP] recv failed: {}", e);
                continue;
            }
        };
        let SocketAddr::V4(from) = from else {
            continue;
        };
        if let Some(record) = parse_ssdp_message(&String::from_utf8_lossy(&buf[..n]), *from.ip())
            && !records.iter().any(|r| r.same_service(&record) && r.host_ip == record.host_ip)
        {
            records.push(record);
        }
    }
    tracing::debug!("[SSDP] M-SEARCH collected {} record(s)", records.len());
    Ok(records)
}

/// Passive listener on the SSDP multicast group
pub struct SsdpListener {
    socket: UdpSocket,
}

impl SsdpListener {
    pub async fn bind() -> Result<Self> {
        let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, SSDP_PORT))
            .await
            .context("Failed to bind SSDP port 1900")?;
        socket
            .join_multicast_v4(SSDP_MULTICAST, Ipv4Addr::UNSPECIFIED)
            .context("Failed to join SSDP multicast group")?;
        Ok(Self { socket })
    }

    /// Forward announcements until `stop` is raised or the channel closes.
    pub fn start(self, tx: mpsc::Sender<ServiceRecord>, stop: Arc<AtomicBool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::info!("[SSDP] Listening on {}:{}", SSDP_MULTICAST, SSDP_PORT);
            let mut buf = vec![0u8; MAX_DATAGRAM];
            while !stop.load(Ordering::SeqCst) {
                let (n, from) = match tokio::time::timeout(POLL_INTERVAL, self.socket.recv_from(&mut buf)).await {
                    Ok(Ok(received)) => received,
                    Ok(Err(e)) => {
                        tracing::warn!("[SSDP] recv failed: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                    Err(_) => continue,
                };
                let SocketAddr::V4(from) = from else {
                    continue;
                };
                if let Some(record) = parse_ssdp_message(&String::from_utf8_lossy(&buf[..n]), *from.ip())
                    && tx.send(record).await.is_err()
                {
                    tracing::warn!("[SSDP] Listener channel closed");
                    break;
                }
            }
            tracing::info!("[SSDP] Listener stopped");
        })
    }
}
