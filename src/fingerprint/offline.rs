//! Bundled offline fingerprint tables
//!
//! Used when neither the UPnP description nor the remote service produced
//! anything: a DHCP option-55 parameter list or a user agent usually names
//! the OS family, and the OUI vendor names the manufacturer.

use crate::models::{Fingerprint, FingerprintSource, SecondarySignals};

/// DHCP parameter request lists (option 55) by OS family
const DHCP_OS_TABLE: &[(&str, &str)] = &[
    ("1,121,3,6,15,108,114,119,252,95,44,46", "Apple iOS"),
    ("1,121,3,6,15,119,252,95,44,46", "Apple macOS"),
    ("1,121,3,6,15,119,252", "Apple macOS"),
    ("1,3,6,15,31,33,43,44,46,47,119,121,249,252", "Windows"),
    ("1,15,3,6,44,46,47,31,33,121,249,43", "Windows"),
    ("1,3,6,15,26,28,51,58,59,43", "Android"),
    ("1,3,6,15,26,28,51,58,59", "Android"),
    ("1,121,33,3,6,12,15,26,28,51,54,58,59,119,114", "Android"),
    ("1,28,2,3,15,6,119,12,44,47,26,121,42", "Linux"),
    ("1,28,2,121,15,6,12,40,41,42,26,119,3,121,249,252,42", "Linux"),
    ("1,3,6,12,15,28,42", "Linux"),
    ("1,3,28,6", "Embedded Linux"),
    ("1,3,6,12,15,17,23,28,29,31,33,40,41,42", "Embedded Linux"),
];

/// User agent markers by OS family, most specific first
const USER_AGENT_OS_TABLE: &[(&str, &str)] = &[
    ("iphone", "Apple iOS"),
    ("ipad", "Apple iPadOS"),
    ("android", "Android"),
    ("cros", "Chrome OS"),
    ("windows nt", "Windows"),
    ("macintosh", "Apple macOS"),
    ("mac os x", "Apple macOS"),
    ("tizen", "Tizen"),
    ("web0s", "webOS"),
    ("linux", "Linux"),
];

/// OUI registry spellings mapped to a display manufacturer
const VENDOR_TABLE: &[(&str, &str)] = &[
    ("apple", "Apple"),
    ("samsung", "Samsung"),
    ("google", "Google"),
    ("amazon", "Amazon"),
    ("sonos", "Sonos"),
    ("roku", "Roku"),
    ("espressif", "Espressif"),
    ("raspberry pi", "Raspberry Pi"),
    ("synology", "Synology"),
    ("qnap", "QNAP"),
    ("hewlett", "HP"),
    ("brother", "Brother"),
    ("canon", "Canon"),
    ("epson", "Epson"),
    ("ubiquiti", "Ubiquiti"),
    ("tp-link", "TP-Link"),
    ("netgear", "Netgear"),
    ("intel", "Intel"),
    ("dell", "Dell"),
    ("lenovo", "Lenovo"),
    ("microsoft", "Microsoft"),
    ("nintendo", "Nintendo"),
    ("sony", "Sony"),
    ("lg electronics", "LG"),
    ("xiaomi", "Xiaomi"),
    ("huawei", "Huawei"),
];

fn normalize_dhcp(raw: &str) -> String {
    raw.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(",")
}

/// OS family for a DHCP option-55 list.
pub fn os_from_dhcp(fingerprint: &str) -> Option<&'static str> {
    let normalized = normalize_dhcp(fingerprint);
    DHCP_OS_TABLE
        .iter()
        .find(|(pattern, _)| *pattern == normalized)
        .map(|(_, os)| *os)
}

/// OS family named by a user agent.
pub fn os_from_user_agent(agent: &str) -> Option<&'static str> {
    let lower = agent.to_lowercase();
    USER_AGENT_OS_TABLE
        .iter()
        .find(|(marker, _)| lower.contains(marker))
        .map(|(_, os)| *os)
}

/// Display manufacturer for an OUI vendor string.
pub fn manufacturer_from_vendor(vendor: &str) -> Option<&'static str> {
    let lower = vendor.to_lowercase();
    VENDOR_TABLE
        .iter()
        .find(|(marker, _)| lower.contains(marker))
        .map(|(_, name)| *name)
}

/// Offline fingerprint, or `None` when no table matched.
pub fn offline_fingerprint(secondary: &SecondarySignals, vendor: Option<&str>) -> Option<Fingerprint> {
    let os = secondary
        .dhcp_fingerprint
        .as_deref()
        .and_then(os_from_dhcp)
        .or_else(|| secondary.user_agents.iter().find_map(|ua| os_from_user_agent(ua)));
    let manufacturer = vendor.and_then(manufacturer_from_vendor);

    if os.is_none() && manufacturer.is_none() {
        return None;
    }

    let mut fp = Fingerprint::empty(FingerprintSource::Offline);
    fp.os = os.map(str::to_string);
    fp.manufacturer = manufacturer.map(str::to_string);
    Some(fp)
}
