//! TCP port probing and banner grabbing

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::pin::Pin;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::EngineSettings;
use crate::models::{BannerData, DeviceType, PortScanResult};

const MAX_BANNER_BYTES: usize = 2048;
const HTTP_PORTS: &[u16] = &[80, 8080, 8000, 8060];
const RTSP_PORTS: &[u16] = &[554, 8554];

/// What a probe found on one host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeOutcome {
    pub results: Vec<PortScanResult>,
    pub banners: Option<BannerData>,
}

/// Port scanner seam; the orchestrator drives one probe per device.
pub trait PortProber: Send + Sync {
    fn probe<'a>(
        &'a self,
        ip: Ipv4Addr,
        ports: &'a [u16],
        grab_banners: bool,
    ) -> Pin<Box<dyn Future<Output = ProbeOutcome> + Send + 'a>>;
}

#[derive(Debug, Clone)]
pub struct TcpPortProber {
    connect_timeout: Duration,
    banner_timeout: Duration,
}

impl TcpPortProber {
    pub fn new(connect_timeout: Duration, banner_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            banner_timeout,
        }
    }

    pub fn from_settings(settings: &EngineSettings) -> Self {
        Self::new(settings.tcp_probe_timeout(), settings.banner_timeout())
    }
}

impl PortProber for TcpPortProber {
    fn probe<'a>(
        &'a self,
        ip: Ipv4Addr,
        ports: &'a [u16],
        grab_banners: bool,
    ) -> Pin<Box<dyn Future<Output = ProbeOutcome> + Send + 'a>> {
        Box::pin(async move {
            let open = probe_host_ports(ip, ports, self.connect_timeout).await;
            let banners = if grab_banners && !open.is_empty() {
                Some(grab_banners_for(ip, &open, self.banner_timeout).await).filter(|b| !b.is_empty())
            } else {
                None
            };
            ProbeOutcome {
                results: open.into_iter().map(describe_port).collect(),
                banners,
            }
        })
    }
}

/// Probes a single host for open ports
async fn probe_host_ports(ip: Ipv4Addr, ports: &[u16], timeout: Duration) -> Vec<u16> {
    let mut open_ports = Vec::new();

    for &port in ports {
        let addr = SocketAddr::new(IpAddr::V4(ip), port);
        if let Ok(Ok(_)) = tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
            open_ports.push(port);
        }
    }

    open_ports
}

/// Well-known service name and device hint for an open port.
pub fn describe_port(port: u16) -> PortScanResult {
    let (service, smart, hint): (&str, bool, Option<DeviceType>) = match port {
        21 => ("ftp", false, None),
        22 => ("ssh", false, None),
        23 => ("telnet", false, Some(DeviceType::Router)),
        53 => ("dns", false, Some(DeviceType::Router)),
        80 => ("http", false, None),
        139 => ("netbios-ssn", false, None),
        443 => ("https", false, None),
        445 => ("smb", false, None),
        515 => ("lpd", true, Some(DeviceType::Printer)),
        548 => ("afp", false, Some(DeviceType::Nas)),
        554 | 8554 => ("rtsp", true, Some(DeviceType::Camera)),
        631 => ("ipp", true, Some(DeviceType::Printer)),
        1400 => ("sonos", true, Some(DeviceType::Speaker)),
        1883 => ("mqtt", true, Some(DeviceType::Iot)),
        3389 => ("rdp", false, Some(DeviceType::Computer)),
        5000 | 5001 => ("synology-dsm", true, Some(DeviceType::Nas)),
        5900 => ("vnc", false, Some(DeviceType::Computer)),
        7000 => ("airplay", true, Some(DeviceType::SmartTv)),
        8008 | 8009 => ("googlecast", true, Some(DeviceType::SmartTv)),
        8060 => ("roku-ecp", true, Some(DeviceType::SmartTv)),
        8080 => ("http-alt", false, None),
        8443 => ("https-alt", false, None),
        9100 => ("jetdirect", true, Some(DeviceType::Printer)),
        32400 => ("plex", false, Some(DeviceType::Server)),
        49152 => ("upnp", true, None),
        62078 => ("iphone-sync", true, Some(DeviceType::Phone)),
        _ => {
            return PortScanResult::tcp(port);
        }
    };
    PortScanResult {
        service: Some(service.to_string()),
        is_smart_indicator: smart,
        inferred_type: hint,
        ..PortScanResult::tcp(port)
    }
}

async fn grab_banners_for(ip: Ipv4Addr, open: &[u16], timeout: Duration) -> BannerData {
    let mut banners = BannerData::default();

    if open.contains(&22) {
        banners.ssh = exchange(ip, 22, None, timeout)
            .await
            .and_then(|text| text.lines().next().map(|l| l.trim().to_string()))
            .filter(|l| l.starts_with("SSH-"));
    }

    if let Some(&port) = HTTP_PORTS.iter().find(|p| open.contains(p)) {
        let request = format!("HEAD / HTTP/1.0\r\nHost: {}\r\n\r\n", ip);
        banners.http = exchange(ip, port, Some(&request), timeout)
            .await
            .and_then(|text| server_header(&text));
    }

    if let Some(&port) = RTSP_PORTS.iter().find(|p| open.contains(p)) {
        let request = format!("OPTIONS rtsp://{}:{}/ RTSP/1.0\r\nCSeq: 1\r\n\r\n", ip, port);
        banners.rtsp = exchange(ip, port, Some(&request), timeout)
            .await
            .and_then(|text| server_header(&text));
    }

    banners
}

/// Connect, optionally send a request, and return what the peer answers
/// within `timeout`.
async fn exchange(ip: Ipv4Addr, port: u16, request: Option<&str>, timeout: Duration) -> Option<String> {
    let addr = SocketAddr::new(IpAddr::V4(ip), port);
    let io = async {
        let mut stream = TcpStream::connect(addr).await?;
        if let Some(request) = request {
            stream.write_all(request.as_bytes()).await?;
        }
        let mut buf = vec![0u8; MAX_BANNER_BYTES];
        let n = stream.read(&mut buf).await?;
        buf.truncate(n);
        Ok::<_, std::io::Error>(buf)
    };

    match tokio::time::timeout(timeout, io).await {
        Ok(Ok(buf)) if !buf.is_empty() => Some(String::from_utf8_lossy(&buf).into_owned()),
        Ok(Err(e)) => {
            tracing::debug!("[PROBE] Banner grab {}:{} failed: {}", ip, port, e);
            None
        }
        _ => None,
    }
}

/// `Server:` header value of an HTTP or RTSP response.
pub fn server_header(response: &str) -> Option<String> {
    response
        .lines()
        .take_while(|l| !l.trim().is_empty())
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.trim()
                .eq_ignore_ascii_case("server")
                .then(|| value.trim().to_string())
        })
        .filter(|v| !v.is_empty())
}
