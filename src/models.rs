//! Data models shared by every lanlens component
//!
//! Devices, signals, presence observations, fingerprints and the raw
//! observation types produced by the source adapters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::registry::RegistryError;

/// Device type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceType {
    Router,
    AccessPoint,
    Switch,
    Server,
    Nas,
    Computer,
    Laptop,
    Phone,
    Tablet,
    SmartTv,
    Speaker,
    Camera,
    Printer,
    GameConsole,
    SmartHome,
    Iot,
    Unknown,
}

impl DeviceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Router => "ROUTER",
            DeviceType::AccessPoint => "ACCESS_POINT",
            DeviceType::Switch => "SWITCH",
            DeviceType::Server => "SERVER",
            DeviceType::Nas => "NAS",
            DeviceType::Computer => "COMPUTER",
            DeviceType::Laptop => "LAPTOP",
            DeviceType::Phone => "PHONE",
            DeviceType::Tablet => "TABLET",
            DeviceType::SmartTv => "SMART_TV",
            DeviceType::Speaker => "SPEAKER",
            DeviceType::Camera => "CAMERA",
            DeviceType::Printer => "PRINTER",
            DeviceType::GameConsole => "GAME_CONSOLE",
            DeviceType::SmartHome => "SMART_HOME",
            DeviceType::Iot => "IOT",
            DeviceType::Unknown => "UNKNOWN",
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, DeviceType::Unknown)
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ROUTER" => Ok(DeviceType::Router),
            "ACCESS_POINT" => Ok(DeviceType::AccessPoint),
            "SWITCH" => Ok(DeviceType::Switch),
            "SERVER" => Ok(DeviceType::Server),
            "NAS" => Ok(DeviceType::Nas),
            "COMPUTER" => Ok(DeviceType::Computer),
            "LAPTOP" => Ok(DeviceType::Laptop),
            "PHONE" => Ok(DeviceType::Phone),
            "TABLET" => Ok(DeviceType::Tablet),
            "SMART_TV" => Ok(DeviceType::SmartTv),
            "SPEAKER" => Ok(DeviceType::Speaker),
            "CAMERA" => Ok(DeviceType::Camera),
            "PRINTER" => Ok(DeviceType::Printer),
            "GAME_CONSOLE" => Ok(DeviceType::GameConsole),
            "SMART_HOME" => Ok(DeviceType::SmartHome),
            "IOT" => Ok(DeviceType::Iot),
            "UNKNOWN" => Ok(DeviceType::Unknown),
            other => Err(format!("Unknown device type: {}", other)),
        }
    }
}

/// Normalized MAC address: uppercase, colon-separated, two digits per octet.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MacAddress(String);

impl MacAddress {
    /// Parse and normalize a MAC address.
    ///
    /// Accepts `:`, `-` and `.` separators, bare 12-digit hex, and
    /// single-digit octets as printed by BSD `arp -a` (`a:b:c:1:2:3`).
    pub fn parse(raw: &str) -> Result<Self, RegistryError> {
        let trimmed = raw.trim();
        let invalid = || RegistryError::InvalidMac(raw.to_string());

        let octets: Vec<u8> = if trimmed.contains([':', '-']) {
            let parts: Vec<&str> = trimmed.split([':', '-']).collect();
            if parts.len() != 6 {
                return Err(invalid());
            }
            parts
                .iter()
                .map(|p| {
                    if p.is_empty() || p.len() > 2 {
                        return Err(invalid());
                    }
                    u8::from_str_radix(p, 16).map_err(|_| invalid())
                })
                .collect::<Result<_, _>>()?
        } else {
            let hex: String = trimmed.chars().filter(|c| *c != '.').collect();
            if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            (0..6)
                .map(|i| u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).map_err(|_| invalid()))
                .collect::<Result<_, _>>()?
        };

        Ok(Self(
            octets
                .iter()
                .map(|b| format!("{:02X}", b))
                .collect::<Vec<_>>()
                .join(":"),
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First three octets (`AA:BB:CC`).
    pub fn oui(&self) -> &str {
        &self.0[..8]
    }

    pub fn first_octet(&self) -> u8 {
        u8::from_str_radix(&self.0[..2], 16).unwrap_or(0)
    }

    /// Locally administered bit set (randomized / virtual MAC).
    pub fn is_locally_administered(&self) -> bool {
        self.first_octet() & 0x02 != 0
    }

    pub fn is_multicast(&self) -> bool {
        self.first_octet() & 0x01 != 0
    }

    pub fn is_broadcast(&self) -> bool {
        self.0 == "FF:FF:FF:FF:FF:FF"
    }

    pub fn is_zero(&self) -> bool {
        self.0 == "00:00:00:00:00:00"
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for MacAddress {
    type Error = RegistryError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        MacAddress::parse(&value)
    }
}

impl From<MacAddress> for String {
    fn from(value: MacAddress) -> Self {
        value.0
    }
}

impl FromStr for MacAddress {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MacAddress::parse(s)
    }
}

/// Where a piece of evidence came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    Fingerbank,
    Upnp,
    Ssdp,
    Mdns,
    Banner,
    Hostname,
    Behavior,
    MacAnalysis,
    PortScan,
}

impl SignalSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalSource::Fingerbank => "fingerbank",
            SignalSource::Upnp => "upnp",
            SignalSource::Ssdp => "ssdp",
            SignalSource::Mdns => "mdns",
            SignalSource::Banner => "banner",
            SignalSource::Hostname => "hostname",
            SignalSource::Behavior => "behavior",
            SignalSource::MacAnalysis => "mac_analysis",
            SignalSource::PortScan => "port_scan",
        }
    }
}

/// A single piece of typed evidence suggesting a device type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub source: SignalSource,
    pub suggested_type: DeviceType,
    pub confidence: f64,
}

impl Signal {
    /// Confidence is clamped to [0, 1]; NaN becomes 0.
    pub fn new(source: SignalSource, suggested_type: DeviceType, confidence: f64) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            source,
            suggested_type,
            confidence,
        }
    }

    /// Contribution of this signal to a device's smart score.
    pub fn smart_weight(&self) -> u32 {
        (self.confidence * crate::inference::source_weight(self.source) * 20.0).round() as u32
    }
}

/// Secondary observable signals that feed the fingerprint signal hash
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecondarySignals {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dhcp_fingerprint: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub user_agents: BTreeSet<String>,
}

impl SecondarySignals {
    pub fn is_empty(&self) -> bool {
        self.dhcp_fingerprint.is_none() && self.user_agents.is_empty()
    }
}

/// Entry read from the system ARP table or captured from ARP traffic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArpEntry {
    pub ip: String,
    pub mac: MacAddress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
}

/// A single timestamped online/offline sample for a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresenceRecord {
    pub mac: MacAddress,
    pub timestamp: DateTime<Utc>,
    pub is_online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<String>,
}

impl PresenceRecord {
    pub fn new(mac: MacAddress, timestamp: DateTime<Utc>, is_online: bool) -> Self {
        Self {
            mac,
            timestamp,
            is_online,
            ip: None,
            services: Vec::new(),
        }
    }
}

/// Which protocol announced a service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceOrigin {
    Mdns,
    DnsSd,
    Ssdp,
}

/// Service record announced by mDNS / DNS-SD / SSDP
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub name: String,
    /// mDNS service type (`_airplay._tcp`) or SSDP `ST`/`NT` value
    pub service_type: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub txt_records: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_ip: Option<String>,
    pub origin: ServiceOrigin,
}

impl ServiceRecord {
    pub fn new(name: &str, service_type: &str, port: u16, origin: ServiceOrigin) -> Self {
        Self {
            name: name.to_string(),
            service_type: service_type.to_string(),
            port,
            txt_records: BTreeMap::new(),
            host_ip: None,
            origin,
        }
    }

    fn identity(&self) -> (&str, &str, u16) {
        (self.name.as_str(), self.service_type.as_str(), self.port)
    }

    pub fn same_service(&self, other: &ServiceRecord) -> bool {
        self.identity() == other.identity()
    }
}

/// Transport protocol of a scanned port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    Tcp,
    Udp,
}

/// One open port reported by the port scanner
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortScanResult {
    pub port: u16,
    pub protocol: Protocol,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(default)]
    pub is_smart_indicator: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inferred_type: Option<DeviceType>,
}

impl PortScanResult {
    pub fn tcp(port: u16) -> Self {
        Self {
            port,
            protocol: Protocol::Tcp,
            service: None,
            is_smart_indicator: false,
            inferred_type: None,
        }
    }
}

/// Banner data grabbed from open services
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BannerData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rtsp: Option<String>,
}

impl BannerData {
    pub fn is_empty(&self) -> bool {
        self.ssh.is_none() && self.http.is_none() && self.rtsp.is_none()
    }
}

/// Which origin(s) contributed to a fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintSource {
    Upnp,
    Fingerbank,
    Both,
    Offline,
}

/// Merged identification data for a device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub friendly_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    /// Fingerbank device hierarchy, most generic first (`Phone/Apple iOS/iPhone`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_hierarchy: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upnp_device_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerbank_score: Option<u32>,
    pub source: FingerprintSource,
    #[serde(default)]
    pub cache_hit: bool,
    pub resolved_at: DateTime<Utc>,
}

impl Fingerprint {
    pub fn empty(source: FingerprintSource) -> Self {
        Self {
            manufacturer: None,
            model: None,
            model_number: None,
            friendly_name: None,
            os: None,
            os_version: None,
            device_hierarchy: None,
            upnp_device_type: None,
            fingerbank_score: None,
            source,
            cache_hit: false,
            resolved_at: Utc::now(),
        }
    }

    /// True when manufacturer, model and OS are all known.
    pub fn is_complete(&self) -> bool {
        self.manufacturer.is_some() && self.model.is_some() && self.os.is_some()
    }

    pub fn has_content(&self) -> bool {
        self.manufacturer.is_some()
            || self.model.is_some()
            || self.model_number.is_some()
            || self.friendly_name.is_some()
            || self.os.is_some()
            || self.device_hierarchy.is_some()
            || self.upnp_device_type.is_some()
    }
}

/// Canonical device record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Device {
    pub mac: MacAddress,
    pub ip: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub is_online: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub open_ports: Vec<PortScanResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub services: Vec<ServiceRecord>,
    #[serde(default)]
    pub smart_score: u8,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub signals: Vec<Signal>,
    pub device_type: DeviceType,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<Fingerprint>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub sources: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "SecondarySignals::is_empty")]
    pub secondary: SecondarySignals,
    /// UPnP description URL (SSDP `LOCATION`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banners: Option<BannerData>,
}

impl Device {
    /// Canonical minimal constructor to avoid field drift across call-sites.
    pub fn new(mac: MacAddress, ip: String, seen_at: DateTime<Utc>) -> Self {
        Self {
            mac,
            ip,
            hostname: None,
            vendor: None,
            first_seen: seen_at,
            last_seen: seen_at,
            is_online: true,
            open_ports: Vec::new(),
            services: Vec::new(),
            smart_score: 0,
            signals: Vec::new(),
            device_type: DeviceType::Unknown,
            confidence: 0.0,
            user_label: None,
            fingerprint: None,
            sources: BTreeSet::new(),
            secondary: SecondarySignals::default(),
            description_url: None,
            banners: None,
        }
    }

    /// Label for display: the user label wins over automated names.
    pub fn display_name(&self) -> &str {
        self.user_label
            .as_deref()
            .or_else(|| {
                self.fingerprint
                    .as_ref()
                    .and_then(|fp| fp.friendly_name.as_deref())
            })
            .or(self.hostname.as_deref())
            .unwrap_or(&self.ip)
    }

    pub fn port_numbers(&self) -> Vec<u16> {
        self.open_ports.iter().map(|p| p.port).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mac_parse_normalizes_separators_and_case() {
        let expected = "AA:BB:CC:11:22:33";
        assert_eq!(MacAddress::parse("aa:bb:cc:11:22:33").unwrap().as_str(), expected);
        assert_eq!(MacAddress::parse("AA-BB-CC-11-22-33").unwrap().as_str(), expected);
        assert_eq!(MacAddress::parse("aabb.cc11.2233").unwrap().as_str(), expected);
        assert_eq!(MacAddress::parse("aabbcc112233").unwrap().as_str(), expected);
    }

    #[test]
    fn mac_parse_pads_single_digit_octets() {
        let mac = MacAddress::parse("a:b:c:1:2:3").unwrap();
        assert_eq!(mac.as_str(), "0A:0B:0C:01:02:03");
        assert_eq!(mac.oui(), "0A:0B:0C");
    }

    #[test]
    fn mac_parse_rejects_garbage() {
        assert!(MacAddress::parse("").is_err());
        assert!(MacAddress::parse("not-a-mac").is_err());
        assert!(MacAddress::parse("aa:bb:cc:dd:ee").is_err());
        assert!(MacAddress::parse("aa:bb:cc:dd:ee:fff").is_err());
        assert!(MacAddress::parse("(incomplete)").is_err());
    }

    #[test]
    fn mac_flags() {
        assert!(MacAddress::parse("5a:05:d7:51:07:81").unwrap().is_locally_administered());
        assert!(!MacAddress::parse("00:1C:B3:00:00:00").unwrap().is_locally_administered());
        assert!(MacAddress::parse("ff:ff:ff:ff:ff:ff").unwrap().is_broadcast());
        assert!(MacAddress::parse("01:00:5e:00:00:fb").unwrap().is_multicast());
    }

    #[test]
    fn mac_serde_roundtrip_normalizes() {
        let mac: MacAddress = serde_json::from_str("\"aa-bb-cc-dd-ee-ff\"").unwrap();
        assert_eq!(serde_json::to_string(&mac).unwrap(), "\"AA:BB:CC:DD:EE:FF\"");
    }

    #[test]
    fn signal_confidence_is_clamped() {
        assert_eq!(Signal::new(SignalSource::Mdns, DeviceType::SmartTv, 1.7).confidence, 1.0);
        assert_eq!(Signal::new(SignalSource::Mdns, DeviceType::SmartTv, -0.2).confidence, 0.0);
        assert_eq!(Signal::new(SignalSource::Mdns, DeviceType::SmartTv, f64::NAN).confidence, 0.0);
    }

    #[test]
    fn device_type_parses_its_own_labels() {
        for ty in [DeviceType::SmartTv, DeviceType::Nas, DeviceType::Unknown] {
            assert_eq!(ty.as_str().parse::<DeviceType>().unwrap(), ty);
        }
        assert!("TOASTER".parse::<DeviceType>().is_err());
    }

    #[test]
    fn display_name_prefers_user_label() {
        let mac = MacAddress::parse("AA:BB:CC:11:22:33").unwrap();
        let mut device = Device::new(mac, "192.168.1.20".to_string(), Utc::now());
        assert_eq!(device.display_name(), "192.168.1.20");
        device.hostname = Some("living-room".to_string());
        assert_eq!(device.display_name(), "living-room");
        device.user_label = Some("TV".to_string());
        assert_eq!(device.display_name(), "TV");
    }
}
