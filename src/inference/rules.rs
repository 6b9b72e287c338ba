//! Declarative signal rule tables, one per protocol
//!
//! Each table is scanned top to bottom and the first matching rule wins for
//! a given input, so more specific patterns sit above generic ones.

use crate::behavior::BehaviorClass;
use crate::models::{
    BannerData, DeviceType, Fingerprint, FingerprintSource, PortScanResult, ServiceRecord, Signal,
    SignalSource,
};
use crate::network::MacAnalysis;

/// Case-insensitive substring rule
struct KeywordRule {
    keywords: &'static [&'static str],
    device_type: DeviceType,
    confidence: f64,
}

const fn rule(keywords: &'static [&'static str], device_type: DeviceType, confidence: f64) -> KeywordRule {
    KeywordRule {
        keywords,
        device_type,
        confidence,
    }
}

fn first_match(text: &str, rules: &[KeywordRule], source: SignalSource) -> Option<Signal> {
    let lower = text.to_lowercase();
    rules
        .iter()
        .find(|r| r.keywords.iter().any(|k| lower.contains(k)))
        .map(|r| Signal::new(source, r.device_type, r.confidence))
}

// ====== SSDP ======

/// Matched against the `ST`/`NT` value and `SERVER` header
const SSDP_RULES: &[KeywordRule] = &[
    rule(&["roku"], DeviceType::SmartTv, 0.90),
    rule(&["zoneplayer", "sonos"], DeviceType::Speaker, 0.90),
    rule(&["internetgatewaydevice", "wanconnectiondevice"], DeviceType::Router, 0.90),
    rule(&["wlanaccesspoint"], DeviceType::AccessPoint, 0.85),
    rule(&["dial-multiscreen", "dial:1"], DeviceType::SmartTv, 0.85),
    rule(&["digitalsecuritycamera"], DeviceType::Camera, 0.85),
    rule(&["printer"], DeviceType::Printer, 0.85),
    rule(&["mediarenderer"], DeviceType::SmartTv, 0.75),
    rule(&["hue-bridgeid", "ipbridge", "belkin:device"], DeviceType::SmartHome, 0.80),
    rule(&["mediaserver"], DeviceType::Nas, 0.60),
];

/// Signals from one SSDP announcement.
pub fn signals_from_ssdp(record: &ServiceRecord) -> Vec<Signal> {
    let mut text = record.service_type.clone();
    if let Some(server) = record.txt_records.get("server") {
        text.push(' ');
        text.push_str(server);
    }
    first_match(&text, SSDP_RULES, SignalSource::Ssdp)
        .into_iter()
        .collect()
}

// ====== mDNS / DNS-SD ======

const MDNS_RULES: &[KeywordRule] = &[
    rule(&["_airplay._tcp", "_raop._tcp"], DeviceType::SmartTv, 0.80),
    rule(&["_googlecast._tcp"], DeviceType::SmartTv, 0.85),
    rule(&["_spotify-connect._tcp", "_sonos._tcp"], DeviceType::Speaker, 0.80),
    rule(&["_ipp._tcp", "_ipps._tcp", "_printer._tcp", "_pdl-datastream._tcp"], DeviceType::Printer, 0.90),
    rule(&["_hap._tcp", "_homekit._tcp", "_hue._tcp"], DeviceType::SmartHome, 0.80),
    rule(&["_companion-link._tcp", "_apple-mobdev2._tcp"], DeviceType::Phone, 0.60),
    rule(&["_rtsp._tcp", "_axis-video._tcp"], DeviceType::Camera, 0.75),
    rule(&["_afpovertcp._tcp", "_adisk._tcp"], DeviceType::Nas, 0.70),
    rule(&["_smb._tcp", "_nfs._tcp"], DeviceType::Nas, 0.50),
    rule(&["_workstation._tcp", "_rfb._tcp", "_sftp-ssh._tcp"], DeviceType::Computer, 0.60),
    rule(&["_mqtt._tcp", "_esphomelib._tcp"], DeviceType::Iot, 0.75),
];

/// One signal per recognized service record.
pub fn signals_from_mdns(records: &[ServiceRecord]) -> Vec<Signal> {
    records
        .iter()
        .filter_map(|r| first_match(&r.service_type, MDNS_RULES, SignalSource::Mdns))
        .collect()
}

// ====== Ports ======

/// Signals from the set of open port numbers.
pub fn signals_from_ports(ports: &[u16]) -> Vec<Signal> {
    let has = |p: u16| ports.contains(&p);
    let mut signals = Vec::new();
    let mut push = |ty, conf| signals.push(Signal::new(SignalSource::PortScan, ty, conf));

    if has(22) && has(80) && has(443) {
        push(DeviceType::Server, 0.60);
    }
    if has(9100) || has(631) || has(515) {
        push(DeviceType::Printer, 0.80);
    }
    if has(5000) || has(5001) || (has(445) && has(548)) {
        push(DeviceType::Nas, 0.70);
    }
    if has(554) || has(8554) {
        push(DeviceType::Camera, 0.60);
    }
    if has(8008) || has(8009) || has(8060) {
        push(DeviceType::SmartTv, 0.70);
    }
    if has(1400) {
        push(DeviceType::Speaker, 0.70);
    }
    if has(62078) {
        push(DeviceType::Phone, 0.70);
    }
    if has(3389) || has(5900) {
        push(DeviceType::Computer, 0.50);
    }
    if has(53) && has(80) {
        push(DeviceType::Router, 0.60);
    }
    if has(1883) {
        push(DeviceType::Iot, 0.60);
    }
    signals
}

/// Signals from scanner results: per-port hints plus the port-set rules.
pub fn signals_from_port_results(results: &[PortScanResult]) -> Vec<Signal> {
    let mut signals: Vec<Signal> = results
        .iter()
        .filter_map(|r| {
            let ty = r.inferred_type?;
            let conf = if r.is_smart_indicator { 0.60 } else { 0.40 };
            Some(Signal::new(SignalSource::PortScan, ty, conf))
        })
        .collect();
    let ports: Vec<u16> = results.iter().map(|r| r.port).collect();
    signals.extend(signals_from_ports(&ports));
    signals
}

// ====== Banners ======

const SSH_BANNER_RULES: &[KeywordRule] = &[
    rule(&["dropbear"], DeviceType::Router, 0.55),
    rule(&["rosssh", "cisco"], DeviceType::Router, 0.80),
    rule(&["synology"], DeviceType::Nas, 0.85),
    rule(&["openssh"], DeviceType::Server, 0.40),
];

const HTTP_BANNER_RULES: &[KeywordRule] = &[
    rule(&["synology", "diskstation", "qnap"], DeviceType::Nas, 0.85),
    rule(&["hikvision", "dahua", "webcam", "ipcam"], DeviceType::Camera, 0.85),
    rule(&["cups", "hp http server", "epson_linux", "brother"], DeviceType::Printer, 0.85),
    rule(&["mikrotik", "routeros", "openwrt", "luci", "rompager"], DeviceType::Router, 0.75),
    rule(&["plex", "jellyfin"], DeviceType::Server, 0.60),
    rule(&["roku", "webos", "tizen", "bravia"], DeviceType::SmartTv, 0.80),
    rule(&["esp8266", "esp32", "tasmota", "shelly"], DeviceType::Iot, 0.80),
    rule(&["goahead", "boa/"], DeviceType::Camera, 0.45),
];

/// Signals from SSH / HTTP / RTSP banners.
pub fn signals_from_banners(banners: &BannerData) -> Vec<Signal> {
    let mut signals = Vec::new();
    if let Some(ssh) = banners.ssh.as_deref() {
        signals.extend(first_match(ssh, SSH_BANNER_RULES, SignalSource::Banner));
    }
    if let Some(http) = banners.http.as_deref() {
        signals.extend(first_match(http, HTTP_BANNER_RULES, SignalSource::Banner));
    }
    if banners.rtsp.is_some() {
        signals.push(Signal::new(SignalSource::Banner, DeviceType::Camera, 0.70));
    }
    signals
}

// ====== Fingerprints ======

/// Matched against Fingerbank hierarchy segments and the OS name.
/// Device classes sit above OS families so an OS never outranks a class.
const HIERARCHY_RULES: &[KeywordRule] = &[
    rule(&["smartphone", "phone"], DeviceType::Phone, 0.90),
    rule(&["tablet", "ipad"], DeviceType::Tablet, 0.90),
    rule(&["laptop", "notebook", "macbook"], DeviceType::Laptop, 0.85),
    rule(&["smart tv", "television", "streaming", "chromecast", "roku", "apple tv"], DeviceType::SmartTv, 0.90),
    rule(&["game console", "playstation", "xbox", "nintendo"], DeviceType::GameConsole, 0.90),
    rule(&["printer", "scanner"], DeviceType::Printer, 0.90),
    rule(&["camera", "video surveillance"], DeviceType::Camera, 0.90),
    rule(&["storage", "nas"], DeviceType::Nas, 0.85),
    rule(&["router", "gateway", "firewall"], DeviceType::Router, 0.90),
    rule(&["access point", "wireless bridge"], DeviceType::AccessPoint, 0.85),
    rule(&["switch"], DeviceType::Switch, 0.80),
    rule(&["speaker", "audio"], DeviceType::Speaker, 0.85),
    rule(&["home automation", "thermostat", "smart plug", "light"], DeviceType::SmartHome, 0.85),
    rule(&["iot", "embedded"], DeviceType::Iot, 0.70),
    rule(&["server"], DeviceType::Server, 0.80),
    rule(&["apple ios", "iphone", "android"], DeviceType::Phone, 0.80),
    rule(&["windows", "macos", "mac os", "linux", "workstation", "computer"], DeviceType::Computer, 0.70),
];

/// Matched against the UPnP `deviceType` URN
const UPNP_TYPE_RULES: &[KeywordRule] = &[
    rule(&["internetgatewaydevice"], DeviceType::Router, 0.90),
    rule(&["wlanaccesspointdevice"], DeviceType::AccessPoint, 0.90),
    rule(&["mediarenderer", "tvdevice"], DeviceType::SmartTv, 0.85),
    rule(&["zoneplayer"], DeviceType::Speaker, 0.90),
    rule(&["printer"], DeviceType::Printer, 0.90),
    rule(&["digitalsecuritycamera"], DeviceType::Camera, 0.90),
    rule(&["mediaserver"], DeviceType::Nas, 0.65),
];

/// First hierarchy segment (most generic first) that names a type.
fn hierarchy_match(hierarchy: &str, source: SignalSource) -> Option<Signal> {
    hierarchy
        .split('/')
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .find_map(|segment| first_match(segment, HIERARCHY_RULES, source))
}

/// Signals from a resolved fingerprint.
///
/// Offline-table results are weaker and attributed to MAC analysis, since
/// they derive from the OUI vendor and the DHCP fingerprint alone.
pub fn signals_from_fingerprint(fp: &Fingerprint) -> Vec<Signal> {
    let mut signals = Vec::new();

    let (remote_source, scale) = match fp.source {
        FingerprintSource::Offline => (SignalSource::MacAnalysis, 0.6),
        _ => (SignalSource::Fingerbank, 1.0),
    };

    if let Some(hierarchy) = fp.device_hierarchy.as_deref()
        && let Some(s) = hierarchy_match(hierarchy, remote_source)
    {
        // Fingerbank scores run 0-100; low scores soften the signal.
        let score_factor = fp
            .fingerbank_score
            .map_or(1.0, |score| (score.min(100) as f64 / 100.0).max(0.3));
        signals.push(Signal::new(
            s.source,
            s.suggested_type,
            s.confidence * scale * score_factor,
        ));
    } else if let Some(os) = fp.os.as_deref()
        && let Some(s) = first_match(os, HIERARCHY_RULES, remote_source)
    {
        signals.push(Signal::new(s.source, s.suggested_type, s.confidence * scale * 0.8));
    }

    if let Some(upnp_type) = fp.upnp_device_type.as_deref() {
        signals.extend(first_match(upnp_type, UPNP_TYPE_RULES, SignalSource::Upnp));
    }
    if let Some(text) = fp.model.as_deref().or(fp.friendly_name.as_deref()) {
        signals.extend(
            first_match(text, HIERARCHY_RULES, SignalSource::Upnp)
                .map(|s| Signal::new(s.source, s.suggested_type, s.confidence * 0.7)),
        );
    }
    signals
}

// ====== Hostnames ======

const HOSTNAME_RULES: &[KeywordRule] = &[
    rule(&["ipad", "tablet", "galaxy-tab"], DeviceType::Tablet, 0.80),
    rule(&["iphone", "android", "galaxy", "pixel", "oneplus", "xiaomi", "redmi"], DeviceType::Phone, 0.80),
    rule(&["laptop", "notebook", "macbook", "thinkpad", "surface"], DeviceType::Laptop, 0.75),
    rule(&["desktop", "workstation", "pc-", "-pc", "imac"], DeviceType::Computer, 0.70),
    rule(&["nas", "synology", "qnap", "diskstation"], DeviceType::Nas, 0.85),
    rule(&["server", "srv", "dc-", "db-", "web-", "mail-"], DeviceType::Server, 0.70),
    rule(&["router", "gateway", "gw-", "rt-", "fritz.box"], DeviceType::Router, 0.80),
    rule(&["ap-", "accesspoint", "unifi"], DeviceType::AccessPoint, 0.75),
    rule(&["printer", "prn-", "mfp-", "officejet", "laserjet"], DeviceType::Printer, 0.85),
    rule(&["camera", "cam-", "ipcam", "cctv", "nvr", "dvr"], DeviceType::Camera, 0.80),
    rule(&["xbox", "playstation", "ps4", "ps5", "nintendo"], DeviceType::GameConsole, 0.85),
    rule(&["tv-", "-tv", "smarttv", "roku", "firetv", "chromecast", "appletv", "bravia"], DeviceType::SmartTv, 0.80),
    rule(&["sonos", "echo", "homepod", "speaker"], DeviceType::Speaker, 0.75),
    rule(&["hue", "nest", "thermostat", "plug", "bulb"], DeviceType::SmartHome, 0.70),
    rule(&["esp-", "esp32", "esp8266", "tasmota", "shelly"], DeviceType::Iot, 0.75),
    rule(&["switch", "sw-"], DeviceType::Switch, 0.50),
];

/// Signal from a device hostname.
pub fn signals_from_hostname(hostname: &str) -> Vec<Signal> {
    first_match(hostname, HOSTNAME_RULES, SignalSource::Hostname)
        .into_iter()
        .collect()
}

// ====== MAC analysis ======

const VENDOR_RULES: &[KeywordRule] = &[
    rule(&["cisco", "juniper", "mikrotik", "netgear", "tp-link", "d-link", "linksys", "avm"], DeviceType::Router, 0.60),
    rule(&["ubiquiti", "aruba", "ruckus", "meraki"], DeviceType::AccessPoint, 0.65),
    rule(&["synology", "qnap", "western digital"], DeviceType::Nas, 0.80),
    rule(&["hikvision", "dahua", "axis communications", "wyze", "arlo"], DeviceType::Camera, 0.75),
    rule(&["canon", "epson", "brother", "xerox", "ricoh", "lexmark"], DeviceType::Printer, 0.75),
    rule(&["nintendo", "sony interactive"], DeviceType::GameConsole, 0.75),
    rule(&["roku", "lg electronics", "tcl", "hisense", "vizio"], DeviceType::SmartTv, 0.60),
    rule(&["sonos"], DeviceType::Speaker, 0.80),
    rule(&["espressif", "tuya", "shelly", "sonoff"], DeviceType::Iot, 0.70),
    rule(&["philips lighting", "signify", "nest labs", "ecobee"], DeviceType::SmartHome, 0.70),
    rule(&["apple", "samsung", "xiaomi", "huawei", "oppo", "vivo", "oneplus"], DeviceType::Phone, 0.35),
    rule(&["dell", "lenovo", "hewlett", "acer", "asustek", "micro-star", "intel"], DeviceType::Computer, 0.40),
    rule(&["supermicro"], DeviceType::Server, 0.60),
];

/// Signals derived from the MAC address alone.
pub fn signals_from_mac_analysis(analysis: &MacAnalysis) -> Vec<Signal> {
    let mut signals = Vec::new();
    if analysis.is_virtual {
        signals.push(Signal::new(SignalSource::MacAnalysis, DeviceType::Server, 0.50));
    } else if analysis.is_randomized {
        // Private Wi-Fi addresses are a phone/tablet OS default.
        signals.push(Signal::new(SignalSource::MacAnalysis, DeviceType::Phone, 0.40));
    }
    if let Some(vendor) = analysis.vendor.as_deref() {
        signals.extend(first_match(vendor, VENDOR_RULES, SignalSource::MacAnalysis));
    }
    signals
}

// ====== Behavior ======

const BUSINESS_HOURS: std::ops::RangeInclusive<u32> = 8..=17;
const EVENING_HOURS: std::ops::RangeInclusive<u32> = 18..=23;

/// Maps a presence classification (and its peak hours) to a signal.
pub fn signals_from_behavior(class: BehaviorClass, peak_hours: &[u32]) -> Vec<Signal> {
    let signal = |ty, conf| vec![Signal::new(SignalSource::Behavior, ty, conf)];
    match class {
        BehaviorClass::Infrastructure => signal(DeviceType::Router, 0.40),
        BehaviorClass::Server => signal(DeviceType::Nas, 0.35),
        BehaviorClass::Iot => signal(DeviceType::SmartHome, 0.30),
        BehaviorClass::Workstation => {
            let business = peak_hours.iter().filter(|h| BUSINESS_HOURS.contains(*h)).count();
            let evening = peak_hours.iter().filter(|h| EVENING_HOURS.contains(*h)).count();
            if business > 0 && business >= evening {
                signal(DeviceType::Computer, 0.35)
            } else if evening > 0 {
                signal(DeviceType::SmartTv, 0.35)
            } else {
                signal(DeviceType::Computer, 0.25)
            }
        }
        BehaviorClass::Portable => signal(DeviceType::Laptop, 0.30),
        BehaviorClass::Mobile => signal(DeviceType::Phone, 0.30),
        BehaviorClass::Guest => signal(DeviceType::Phone, 0.15),
        BehaviorClass::Unknown => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ServiceOrigin;

    #[test]
    fn airplay_service_suggests_smart_tv() {
        let records = [ServiceRecord::new("Living Room", "_airplay._tcp", 7000, ServiceOrigin::Mdns)];
        let signals = signals_from_mdns(&records);
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].suggested_type, DeviceType::SmartTv);
        assert_eq!(signals[0].source, SignalSource::Mdns);
        assert!((signals[0].confidence - 0.80).abs() < 1e-9);
    }

    #[test]
    fn unrecognized_service_yields_nothing() {
        let records = [ServiceRecord::new("x", "_weird._udp", 1, ServiceOrigin::DnsSd)];
        assert!(signals_from_mdns(&records).is_empty());
    }

    #[test]
    fn ssdp_server_header_is_considered() {
        let mut record = ServiceRecord::new("uuid:1", "upnp:rootdevice", 0, ServiceOrigin::Ssdp);
        record
            .txt_records
            .insert("server".to_string(), "Roku/9.4 UPnP/1.0".to_string());
        let signals = signals_from_ssdp(&record);
        assert_eq!(signals[0].suggested_type, DeviceType::SmartTv);
    }

    #[test]
    fn printer_ports() {
        let signals = signals_from_ports(&[9100, 80]);
        assert!(signals.iter().any(|s| s.suggested_type == DeviceType::Printer));
    }

    #[test]
    fn no_ports_no_signals() {
        assert!(signals_from_ports(&[]).is_empty());
        assert!(signals_from_port_results(&[]).is_empty());
    }

    #[test]
    fn port_results_carry_scanner_hints() {
        let mut result = PortScanResult::tcp(8009);
        result.inferred_type = Some(DeviceType::SmartTv);
        result.is_smart_indicator = true;
        let signals = signals_from_port_results(&[result]);
        assert!(signals.iter().all(|s| s.suggested_type == DeviceType::SmartTv));
        assert_eq!(signals.len(), 2);
    }

    #[test]
    fn rtsp_banner_is_a_camera() {
        let banners = BannerData {
            rtsp: Some("RTSP/1.0 200 OK".to_string()),
            ..Default::default()
        };
        let signals = signals_from_banners(&banners);
        assert_eq!(signals[0].suggested_type, DeviceType::Camera);
    }

    #[test]
    fn hostname_specific_rules_beat_generic_ones() {
        assert_eq!(signals_from_hostname("Johns-iPad")[0].suggested_type, DeviceType::Tablet);
        assert_eq!(signals_from_hostname("johns-iphone")[0].suggested_type, DeviceType::Phone);
        assert_eq!(signals_from_hostname("diskstation")[0].suggested_type, DeviceType::Nas);
        assert!(signals_from_hostname("host-42").is_empty());
    }

    #[test]
    fn randomized_mac_suggests_phone() {
        let analysis = MacAnalysis {
            vendor: None,
            is_randomized: true,
            is_virtual: false,
        };
        let signals = signals_from_mac_analysis(&analysis);
        assert_eq!(signals[0].suggested_type, DeviceType::Phone);
        assert!((signals[0].confidence - 0.40).abs() < 1e-9);
    }

    #[test]
    fn fingerbank_hierarchy_maps_to_type() {
        let mut fp = Fingerprint::empty(FingerprintSource::Fingerbank);
        fp.device_hierarchy = Some("Printer or Scanner/HP Printer".to_string());
        fp.fingerbank_score = Some(90);
        let signals = signals_from_fingerprint(&fp);
        assert_eq!(signals[0].source, SignalSource::Fingerbank);
        assert_eq!(signals[0].suggested_type, DeviceType::Printer);
    }

    #[test]
    fn hierarchy_class_outranks_os_family() {
        let cases = [
            ("Router, Access Point or Femtocell/Cisco IOS", DeviceType::Router),
            ("Smart TV/Android TV", DeviceType::SmartTv),
            ("Phone, Tablet or Wearable/Apple iOS/iPhone", DeviceType::Phone),
            ("Kiosk/Windows", DeviceType::Computer),
        ];
        for (hierarchy, expected) in cases {
            let mut fp = Fingerprint::empty(FingerprintSource::Fingerbank);
            fp.device_hierarchy = Some(hierarchy.to_string());
            let signals = signals_from_fingerprint(&fp);
            assert_eq!(signals[0].suggested_type, expected, "{hierarchy}");
        }

        let mut fp = Fingerprint::empty(FingerprintSource::Fingerbank);
        fp.os = Some("Android".to_string());
        assert_eq!(signals_from_fingerprint(&fp)[0].suggested_type, DeviceType::Phone);
    }

    #[test]
    fn upnp_device_type_maps_to_type() {
        let mut fp = Fingerprint::empty(FingerprintSource::Upnp);
        fp.upnp_device_type = Some("urn:schemas-upnp-org:device:InternetGatewayDevice:1".to_string());
        let signals = signals_from_fingerprint(&fp);
        assert!(signals
            .iter()
            .any(|s| s.source == SignalSource::Upnp && s.suggested_type == DeviceType::Router));
    }

    #[test]
    fn behavior_table() {
        let one = |class, peaks: &[u32]| signals_from_behavior(class, peaks)[0].clone();
        let s = one(BehaviorClass::Server, &[]);
        assert_eq!((s.suggested_type, s.confidence), (DeviceType::Nas, 0.35));
        let s = one(BehaviorClass::Workstation, &[9, 10, 11]);
        assert_eq!((s.suggested_type, s.confidence), (DeviceType::Computer, 0.35));
        let s = one(BehaviorClass::Workstation, &[19, 20, 21]);
        assert_eq!((s.suggested_type, s.confidence), (DeviceType::SmartTv, 0.35));
        let s = one(BehaviorClass::Workstation, &[2, 3]);
        assert_eq!((s.suggested_type, s.confidence), (DeviceType::Computer, 0.25));
        let s = one(BehaviorClass::Guest, &[]);
        assert_eq!((s.suggested_type, s.confidence), (DeviceType::Phone, 0.15));
        assert!(signals_from_behavior(BehaviorClass::Unknown, &[]).is_empty());
    }
}
