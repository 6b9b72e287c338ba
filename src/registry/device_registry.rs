//! Canonical device map
//!
//! One writer lock guards every device. Each mutation recomputes the device's
//! classification, writes a snapshot to the store and emits exactly one
//! update event. The lock is never held across an `.await`, a store call or
//! an observer callback.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, ReentrantMutex};
use std::collections::{HashMap, HashSet, VecDeque};
use std::net::Ipv4Addr;
use std::sync::Arc;
use tokio::task::JoinHandle;

use super::RegistryError;
use super::events::{DeviceUpdate, EventBus, ObserverId, UpdateKind};
use crate::behavior::{BehaviorClass, BehaviorTracker};
use crate::database::DeviceStore;
use crate::fingerprint::{FingerprintPipeline, FingerprintRequest};
use crate::inference::{
    MAX_SOURCE_WEIGHT, infer_with_confidence, signals_from_banners, signals_from_fingerprint,
    signals_from_hostname, signals_from_mac_analysis, signals_from_mdns, signals_from_port_results,
    signals_from_ssdp,
};
use crate::models::{
    BannerData, Device, Fingerprint, FingerprintSource, MacAddress, PortScanResult, PresenceRecord, ServiceOrigin,
    ServiceRecord, Signal, SignalSource,
};
use crate::network::{analyze_mac, lookup_vendor, normalize_hostname};
use crate::{log_debug, log_warn};

const SMART_SCORE_CAP: u32 = 100;
const SERVICE_BONUS: u32 = 5;
const PORT_BONUS: u32 = 5;

pub struct DeviceRegistry {
    devices: Mutex<HashMap<MacAddress, Device>>,
    events: EventBus,
    behavior: Arc<BehaviorTracker>,
    pipeline: Option<Arc<FingerprintPipeline>>,
    store: Option<Arc<dyn DeviceStore>>,
    in_flight: Mutex<HashSet<MacAddress>>,
    /// Updates in mutation order, queued while `devices` is held
    outbox: Mutex<VecDeque<DeviceUpdate>>,
    /// Single publisher draining `outbox` into the store and event bus
    publisher: ReentrantMutex<()>,
}

impl DeviceRegistry {
    pub fn new(behavior: Arc<BehaviorTracker>) -> Self {
        Self {
            devices: Mutex::new(HashMap::new()),
            events: EventBus::new(),
            behavior,
            pipeline: None,
            store: None,
            in_flight: Mutex::new(HashSet::new()),
            outbox: Mutex::new(VecDeque::new()),
            publisher: ReentrantMutex::new(()),
        }
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn DeviceStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_pipeline(mut self, pipeline: Arc<FingerprintPipeline>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn subscribe<F>(&self, callback: F) -> ObserverId
    where
        F: Fn(&[DeviceUpdate]) + Send + Sync + 'static,
    {
        self.events.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.events.unsubscribe(id)
    }

    pub fn behavior(&self) -> &Arc<BehaviorTracker> {
        &self.behavior
    }

    pub fn pipeline(&self) -> Option<&Arc<FingerprintPipeline>> {
        self.pipeline.as_ref()
    }

    // ====== Mutations ======

    /// Create or refresh a device from a link-layer observation.
    pub fn upsert_from_observation(
        &self,
        mac: &str,
        ip: &str,
        source_label: &str,
    ) -> Result<Device, RegistryError> {
        let mac = MacAddress::parse(mac)?;
        self.observe_at(mac, ip, source_label, Utc::now())
    }

    /// Same as `upsert_from_observation` with an explicit observation time.
    pub fn observe_at(
        &self,
        mac: MacAddress,
        ip: &str,
        source_label: &str,
        seen_at: DateTime<Utc>,
    ) -> Result<Device, RegistryError> {
        let (device, kind) = {
            let mut devices = self.devices.lock();
            match devices.get_mut(&mac) {
                Some(device) => {
                    if !ip.is_empty() {
                        device.ip = ip.to_string();
                    }
                    device.first_seen = device.first_seen.min(seen_at);
                    device.last_seen = device.last_seen.max(seen_at);
                    device.is_online = true;
                    device.sources.insert(source_label.to_string());
                    let device = device.clone();
                    self.enqueue(device.clone(), UpdateKind::Updated);
                    (device, UpdateKind::Updated)
                }
                None => {
                    let mut device = Device::new(mac.clone(), ip.to_string(), seen_at);
                    device.vendor = lookup_vendor(&mac);
                    device.sources.insert(source_label.to_string());
                    devices.insert(mac, device.clone());
                    self.enqueue(device.clone(), UpdateKind::Discovered);
                    (device, UpdateKind::Discovered)
                }
            }
        };

        if kind == UpdateKind::Discovered {
            log_debug!("[REGISTRY] Discovered {} at {} via {}", device.mac, device.ip, source_label);
        }
        self.flush_outbox();
        Ok(device)
    }

    /// Merge open ports and banners, then rescore.
    pub fn apply_port_scan_result(
        &self,
        mac: &MacAddress,
        results: &[PortScanResult],
        banners: Option<&BannerData>,
    ) -> Result<Device, RegistryError> {
        self.mutate(mac, |device| {
            for result in results {
                let known = device
                    .open_ports
                    .iter()
                    .any(|p| p.port == result.port && p.protocol == result.protocol);
                if !known {
                    device.open_ports.push(result.clone());
                }
            }
            device.open_ports.sort_by_key(|p| p.port);

            let mut signals = signals_from_port_results(&device.open_ports);
            if let Some(banners) = banners.filter(|b| !b.is_empty()) {
                let merged = device.banners.get_or_insert_with(BannerData::default);
                if banners.ssh.is_some() {
                    merged.ssh.clone_from(&banners.ssh);
                }
                if banners.http.is_some() {
                    merged.http.clone_from(&banners.http);
                }
                if banners.rtsp.is_some() {
                    merged.rtsp.clone_from(&banners.rtsp);
                }
                signals.extend(signals_from_banners(merged));
            }
            add_signals(device, signals);
            if !results.is_empty() {
                device.sources.insert(SignalSource::PortScan.as_str().to_string());
            }
        })
    }

    /// Merge mDNS / DNS-SD / SSDP service records, then rescore.
    pub fn apply_service_discovery(
        &self,
        mac: &MacAddress,
        records: &[ServiceRecord],
    ) -> Result<Device, RegistryError> {
        self.mutate(mac, |device| {
            for record in records {
                if !device.services.iter().any(|s| s.same_service(record)) {
                    device.services.push(record.clone());
                }
                device.sources.insert(origin_label(record.origin).to_string());
            }

            let (ssdp, mdns): (Vec<ServiceRecord>, Vec<ServiceRecord>) = device
                .services
                .iter()
                .cloned()
                .partition(|s| s.origin == ServiceOrigin::Ssdp);

            let mut signals = signals_from_mdns(&mdns);
            for record in &ssdp {
                signals.extend(signals_from_ssdp(record));
                if device.description_url.is_none()
                    && let Some(location) = record.txt_records.get("location")
                {
                    device.description_url = Some(location.clone());
                }
            }
            add_signals(device, signals);
        })
    }

    pub fn apply_hostname(&self, mac: &MacAddress, hostname: &str) -> Result<Device, RegistryError> {
        let hostname = normalize_hostname(hostname);
        self.mutate(mac, |device| {
            if hostname.is_empty() {
                return;
            }
            add_signals(device, signals_from_hostname(&hostname));
            device.hostname = Some(hostname);
        })
    }

    /// Fold OUI vendor and randomized / virtual address hints into the signals.
    pub fn apply_mac_analysis(&self, mac: &MacAddress) -> Result<Device, RegistryError> {
        let analysis = analyze_mac(mac);
        self.mutate(mac, |device| {
            if device.vendor.is_none() {
                device.vendor.clone_from(&analysis.vendor);
            }
            add_signals(device, signals_from_mac_analysis(&analysis));
        })
    }

    /// DHCP fingerprint and HTTP user agent observed for the device.
    pub fn apply_secondary_signals(
        &self,
        mac: &MacAddress,
        dhcp_fingerprint: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<Device, RegistryError> {
        self.mutate(mac, |device| {
            if let Some(dhcp) = dhcp_fingerprint.map(str::trim).filter(|d| !d.is_empty()) {
                device.secondary.dhcp_fingerprint = Some(dhcp.to_string());
            }
            if let Some(agent) = user_agent.map(str::trim).filter(|a| !a.is_empty()) {
                device.secondary.user_agents.insert(agent.to_string());
            }
        })
    }

    pub fn apply_description_url(&self, mac: &MacAddress, url: &str) -> Result<Device, RegistryError> {
        self.mutate(mac, |device| {
            let url = url.trim();
            if !url.is_empty() {
                device.description_url = Some(url.to_string());
            }
        })
    }

    /// Attach a resolved fingerprint and its signals.
    pub fn apply_fingerprint(
        &self,
        mac: &MacAddress,
        fingerprint: Fingerprint,
    ) -> Result<Device, RegistryError> {
        self.mutate(mac, |device| {
            if device.vendor.is_none() {
                device.vendor.clone_from(&fingerprint.manufacturer);
            }
            add_signals(device, signals_from_fingerprint(&fingerprint));
            device.fingerprint = Some(fingerprint);
        })
    }

    /// Forward a presence sample to the behavior tracker and fold the
    /// resulting behavior signals into the device.
    ///
    /// Emits an update only when the behavior signals changed.
    pub fn record_presence(&self, record: PresenceRecord) -> BehaviorClass {
        let mac = record.mac.clone();
        let class = self.behavior.record_observation(record);
        let signals = self.behavior.signals_for(&mac);

        let changed = self.devices.lock().get(&mac).is_some_and(|device| {
            let current: Vec<&Signal> = device
                .signals
                .iter()
                .filter(|s| s.source == SignalSource::Behavior)
                .collect();
            current.len() != signals.len() || current.iter().zip(&signals).any(|(a, b)| *a != b)
        });

        if changed {
            let result = self.mutate(&mac, |device| {
                // A new classification replaces the old one rather than reinforcing it.
                device.signals.retain(|s| s.source != SignalSource::Behavior);
                add_signals(device, signals);
            });
            if let Err(e) = result {
                log_debug!("[REGISTRY] Presence for {} not folded: {}", mac, e);
            }
        }
        class
    }

    /// Returns true when the device transitioned to offline.
    pub fn mark_offline(&self, mac: &MacAddress) -> Result<bool, RegistryError> {
        {
            let mut devices = self.devices.lock();
            let device = devices
                .get_mut(mac)
                .ok_or_else(|| RegistryError::UnknownDevice(mac.clone()))?;
            if !device.is_online {
                return Ok(false);
            }
            device.is_online = false;
            self.enqueue(device.clone(), UpdateKind::WentOffline);
        }
        self.flush_outbox();
        Ok(true)
    }

    /// Human-only path; automated merges never touch `user_label`.
    pub fn set_user_label(&self, mac: &MacAddress, label: Option<&str>) -> Result<Device, RegistryError> {
        let label = label.map(str::trim).filter(|l| !l.is_empty()).map(str::to_string);
        self.mutate(mac, |device| device.user_label = label)
    }

    /// Start a background fingerprint lookup for the device.
    ///
    /// Returns `None` without spawning when no pipeline or runtime is
    /// available, the device is unknown or already fingerprinted, or a lookup
    /// for it is in flight. An offline-table fingerprint is provisional and
    /// does not block a later lookup.
    pub fn trigger_fingerprint(self: &Arc<Self>, mac: &MacAddress) -> Option<JoinHandle<()>> {
        let pipeline = Arc::clone(self.pipeline.as_ref()?);
        let runtime = tokio::runtime::Handle::try_current().ok()?;

        // Checked and claimed under the devices lock, which apply_fingerprint
        // also takes, so a finishing lookup cannot slip in between.
        let (request, previous) = {
            let devices = self.devices.lock();
            let device = devices.get(mac)?;
            if device
                .fingerprint
                .as_ref()
                .is_some_and(|fp| fp.source != FingerprintSource::Offline)
            {
                return None;
            }
            if !self.in_flight.lock().insert(mac.clone()) {
                return None;
            }
            (FingerprintRequest::from_device(device), device.fingerprint.clone())
        };

        let registry = Arc::clone(self);
        Some(runtime.spawn(async move {
            match pipeline.resolve(&request).await {
                Some(fingerprint)
                    if previous
                        .as_ref()
                        .is_some_and(|old| same_identification(old, &fingerprint)) =>
                {
                    log_debug!("[REGISTRY] Fingerprint for {} unchanged", request.mac);
                }
                Some(fingerprint) => {
                    if let Err(e) = registry.apply_fingerprint(&request.mac, fingerprint) {
                        log_warn!("[REGISTRY] Fingerprint for {} dropped: {}", request.mac, e);
                    }
                }
                None => log_debug!("[REGISTRY] No fingerprint for {}", request.mac),
            }
            registry.in_flight.lock().remove(&request.mac);
        }))
    }

    pub fn fingerprints_in_flight(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Hydrate the map from the store. Loaded devices start offline until
    /// observed again; devices already in memory are kept.
    pub fn load_from_store(&self) -> anyhow::Result<usize> {
        let Some(store) = &self.store else {
            return Ok(0);
        };
        let loaded = store.load_devices()?;
        let mut devices = self.devices.lock();
        let mut count = 0;
        for mut device in loaded {
            if devices.contains_key(&device.mac) {
                continue;
            }
            device.is_online = false;
            devices.insert(device.mac.clone(), device);
            count += 1;
        }
        tracing::info!("[REGISTRY] Loaded {} device(s) from store", count);
        Ok(count)
    }

    // ====== Reads ======

    pub fn device(&self, mac: &MacAddress) -> Option<Device> {
        self.devices.lock().get(mac).cloned()
    }

    /// Every device, ordered by IPv4 address (unparsable addresses last).
    pub fn devices(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.devices.lock().values().cloned().collect();
        devices.sort_by(|a, b| ip_sort_key(&a.ip).cmp(&ip_sort_key(&b.ip)));
        devices
    }

    /// MAC of the device currently holding `ip`, preferring online devices.
    pub fn mac_for_ip(&self, ip: &str) -> Option<MacAddress> {
        let devices = self.devices.lock();
        devices
            .values()
            .filter(|d| d.ip == ip)
            .max_by_key(|d| (d.is_online, d.last_seen))
            .map(|d| d.mac.clone())
    }

    pub fn online_macs(&self) -> Vec<MacAddress> {
        self.devices
            .lock()
            .values()
            .filter(|d| d.is_online)
            .map(|d| d.mac.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.devices.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every in-memory device; the store is untouched.
    pub fn clear(&self) {
        self.devices.lock().clear();
        self.in_flight.lock().clear();
    }

    // ====== Internals ======

    fn mutate<F>(&self, mac: &MacAddress, apply: F) -> Result<Device, RegistryError>
    where
        F: FnOnce(&mut Device),
    {
        let device = {
            let mut devices = self.devices.lock();
            let device = devices
                .get_mut(mac)
                .ok_or_else(|| RegistryError::UnknownDevice(mac.clone()))?;
            apply(device);
            refresh_classification(device);
            let device = device.clone();
            self.enqueue(device.clone(), UpdateKind::Updated);
            device
        };
        self.flush_outbox();
        Ok(device)
    }

    /// Queue an update; callers hold the `devices` lock so queue order is
    /// mutation order.
    fn enqueue(&self, device: Device, kind: UpdateKind) {
        self.outbox.lock().push_back(DeviceUpdate { device, kind });
    }

    /// Persist and emit queued updates in order.
    ///
    /// Observers delivered synchronously may mutate the registry again; the
    /// publisher lock is reentrant so their updates drain in the same pass.
    fn flush_outbox(&self) {
        let _publisher = self.publisher.lock();
        loop {
            let Some(update) = self.outbox.lock().pop_front() else {
                break;
            };
            if let Some(store) = &self.store
                && let Err(e) = store.save_device(&update.device)
            {
                log_warn!("[REGISTRY] Failed to persist {}: {}", update.device.mac, e);
            }
            self.events.emit(update);
        }
    }
}

/// Equal apart from resolution time and cache provenance.
fn same_identification(a: &Fingerprint, b: &Fingerprint) -> bool {
    a.source == b.source
        && a.manufacturer == b.manufacturer
        && a.model == b.model
        && a.model_number == b.model_number
        && a.friendly_name == b.friendly_name
        && a.os == b.os
        && a.os_version == b.os_version
        && a.device_hierarchy == b.device_hierarchy
        && a.upnp_device_type == b.upnp_device_type
        && a.fingerbank_score == b.fingerbank_score
}

fn origin_label(origin: ServiceOrigin) -> &'static str {
    match origin {
        ServiceOrigin::Mdns => "mdns",
        ServiceOrigin::DnsSd => "dns_sd",
        ServiceOrigin::Ssdp => "ssdp",
    }
}

fn ip_sort_key(ip: &str) -> (bool, u32, String) {
    match ip.parse::<Ipv4Addr>() {
        Ok(addr) => (false, u32::from(addr), String::new()),
        Err(_) => (true, 0, ip.to_string()),
    }
}

/// Append signals, keeping one per `(source, type)` at the highest confidence.
fn add_signals(device: &mut Device, signals: Vec<Signal>) {
    for signal in signals {
        match device
            .signals
            .iter_mut()
            .find(|s| s.source == signal.source && s.suggested_type == signal.suggested_type)
        {
            Some(existing) => existing.confidence = existing.confidence.max(signal.confidence),
            None => device.signals.push(signal),
        }
    }
}

fn smart_score(device: &Device) -> u8 {
    let signals: u32 = device.signals.iter().map(Signal::smart_weight).sum();
    let services = if device.services.is_empty() { 0 } else { SERVICE_BONUS };
    let ports = PORT_BONUS.saturating_mul(device.open_ports.len() as u32);
    signals
        .saturating_add(services)
        .saturating_add(ports)
        .min(SMART_SCORE_CAP) as u8
}

/// Rescore and, while the type is still unknown, classify.
fn refresh_classification(device: &mut Device) {
    device.smart_score = smart_score(device);

    let inference = infer_with_confidence(&device.signals);
    if device.device_type.is_unknown() {
        device.device_type = inference.device_type;
    }

    device.confidence = if device.device_type == inference.device_type {
        inference.confidence
    } else {
        // Type was settled earlier; report the support it still has.
        let score = inference
            .scores
            .iter()
            .find(|(ty, _)| *ty == device.device_type)
            .map_or(0.0, |(_, score)| *score);
        let denominator = device.signals.len() as f64 * MAX_SOURCE_WEIGHT;
        if denominator > 0.0 {
            (score / denominator).clamp(0.0, 1.0)
        } else {
            0.0
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::DeviceType;
    use chrono::Duration;

    fn registry() -> DeviceRegistry {
        DeviceRegistry::new(Arc::new(BehaviorTracker::with_limits(100, 1000, 10, 0)))
    }

    fn mac(s: &str) -> MacAddress {
        MacAddress::parse(s).unwrap()
    }

    fn t0() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2026-03-02T09:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn ssdp_tv() -> ServiceRecord {
        ServiceRecord::new(
            "Living Room TV",
            "urn:dial-multiscreen-org:service:dial:1",
            1900,
            ServiceOrigin::Ssdp,
        )
    }

    fn airplay() -> ServiceRecord {
        ServiceRecord::new("Living Room", "_airplay._tcp", 7000, ServiceOrigin::Mdns)
    }

    #[test]
    fn upsert_is_idempotent() {
        let reg = registry();
        let first = reg.observe_at(mac("aa:bb:cc:00:00:01"), "10.0.0.1", "arp", t0()).unwrap();
        let second = reg.observe_at(mac("AA-BB-CC-00-00-01"), "10.0.0.1", "arp", t0()).unwrap();
        assert_eq!(reg.len(), 1);
        assert_eq!(first, second);
    }

    #[test]
    fn last_seen_is_monotonic_and_first_seen_never_moves_later() {
        let reg = registry();
        let m = mac("aa:bb:cc:00:00:02");
        reg.observe_at(m.clone(), "10.0.0.2", "arp", t0()).unwrap();
        reg.observe_at(m.clone(), "10.0.0.2", "arp", t0() + Duration::minutes(5)).unwrap();
        let d = reg.observe_at(m, "10.0.0.2", "mdns", t0() + Duration::minutes(1)).unwrap();
        assert_eq!(d.last_seen, t0() + Duration::minutes(5));
        assert_eq!(d.first_seen, t0());
        assert!(d.sources.contains("arp") && d.sources.contains("mdns"));
    }

    #[test]
    fn arp_only_device_is_unknown_with_zero_score() {
        let reg = registry();
        let d = reg.upsert_from_observation("aa:bb:cc:00:00:03", "10.0.0.3", "arp").unwrap();
        assert_eq!(d.device_type, DeviceType::Unknown);
        assert_eq!(d.smart_score, 0);
        assert_eq!(d.confidence, 0.0);
    }

    #[test]
    fn ssdp_and_airplay_classify_smart_tv() {
        let reg = registry();
        let m = mac("aa:bb:cc:00:00:04");
        reg.observe_at(m.clone(), "10.0.0.4", "arp", t0()).unwrap();
        let d = reg.apply_service_discovery(&m, &[ssdp_tv(), airplay()]).unwrap();
        assert_eq!(d.device_type, DeviceType::SmartTv);
        assert!(d.confidence > 0.0 && d.confidence <= 1.0);
        assert!(d.smart_score > 0 && d.smart_score <= 100);
        assert_eq!(d.services.len(), 2);
    }

    #[test]
    fn services_and_signals_are_deduplicated() {
        let reg = registry();
        let m = mac("aa:bb:cc:00:00:05");
        reg.observe_at(m.clone(), "10.0.0.5", "arp", t0()).unwrap();
        reg.apply_service_discovery(&m, &[airplay()]).unwrap();
        let d = reg.apply_service_discovery(&m, &[airplay()]).unwrap();
        assert_eq!(d.services.len(), 1);
        assert_eq!(d.signals.len(), 1);
    }

    #[test]
    fn smart_score_is_capped() {
        let reg = registry();
        let m = mac("aa:bb:cc:00:00:06");
        reg.observe_at(m.clone(), "10.0.0.6", "arp", t0()).unwrap();
        let ports: Vec<PortScanResult> = (1..=40).map(PortScanResult::tcp).collect();
        let d = reg.apply_port_scan_result(&m, &ports, None).unwrap();
        assert_eq!(d.smart_score, 100);
    }

    #[test]
    fn device_type_is_not_overwritten_once_set() {
        let reg = registry();
        let m = mac("aa:bb:cc:00:00:07");
        reg.observe_at(m.clone(), "10.0.0.7", "arp", t0()).unwrap();
        reg.apply_port_scan_result(&m, &[PortScanResult::tcp(9100)], None).unwrap();
        let d = reg.apply_hostname(&m, "nas-backup.local").unwrap();
        assert_eq!(d.device_type, DeviceType::Printer);
        assert_eq!(d.hostname.as_deref(), Some("nas-backup"));
    }

    #[test]
    fn user_label_survives_automated_merges() {
        let reg = registry();
        let m = mac("aa:bb:cc:00:00:08");
        reg.observe_at(m.clone(), "10.0.0.8", "arp", t0()).unwrap();
        reg.set_user_label(&m, Some("  Office printer ")).unwrap();
        reg.observe_at(m.clone(), "10.0.0.9", "arp", t0()).unwrap();
        let d = reg.apply_hostname(&m, "prn-01").unwrap();
        assert_eq!(d.user_label.as_deref(), Some("Office printer"));
        assert_eq!(d.ip, "10.0.0.9");
    }

    #[test]
    fn mark_offline_emits_once() {
        let reg = registry();
        let kinds = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&kinds);
        reg.subscribe(move |batch: &[DeviceUpdate]| sink.lock().extend(batch.iter().map(|u| u.kind)));

        let m = mac("aa:bb:cc:00:00:09");
        reg.observe_at(m.clone(), "10.0.0.9", "arp", t0()).unwrap();
        assert!(reg.mark_offline(&m).unwrap());
        assert!(!reg.mark_offline(&m).unwrap());
        assert_eq!(
            *kinds.lock(),
            vec![UpdateKind::Discovered, UpdateKind::WentOffline]
        );
    }

    #[test]
    fn invalid_and_unknown_macs_are_rejected() {
        let reg = registry();
        assert!(matches!(
            reg.upsert_from_observation("(incomplete)", "10.0.0.1", "arp"),
            Err(RegistryError::InvalidMac(_))
        ));
        assert!(matches!(
            reg.apply_hostname(&mac("aa:bb:cc:00:00:10"), "x"),
            Err(RegistryError::UnknownDevice(_))
        ));
    }

    #[test]
    fn devices_sorted_by_ip() {
        let reg = registry();
        reg.observe_at(mac("aa:bb:cc:00:00:11"), "10.0.0.20", "arp", t0()).unwrap();
        reg.observe_at(mac("aa:bb:cc:00:00:12"), "10.0.0.3", "arp", t0()).unwrap();
        reg.observe_at(mac("aa:bb:cc:00:00:13"), "10.0.0.100", "arp", t0()).unwrap();
        let ips: Vec<String> = reg.devices().into_iter().map(|d| d.ip).collect();
        assert_eq!(ips, vec!["10.0.0.3", "10.0.0.20", "10.0.0.100"]);
    }

    #[test]
    fn ssdp_location_becomes_description_url() {
        let reg = registry();
        let m = mac("aa:bb:cc:00:00:14");
        reg.observe_at(m.clone(), "10.0.0.14", "arp", t0()).unwrap();
        let mut record = ssdp_tv();
        record
            .txt_records
            .insert("location".into(), "http://10.0.0.14:8060/desc.xml".into());
        let d = reg.apply_service_discovery(&m, &[record]).unwrap();
        assert_eq!(d.description_url.as_deref(), Some("http://10.0.0.14:8060/desc.xml"));
    }

    #[test]
    fn secondary_signals_accumulate_and_change_signal_hash() {
        let reg = registry();
        let m = mac("aa:bb:cc:00:00:16");
        let d = reg.observe_at(m.clone(), "10.0.0.16", "arp", t0()).unwrap();
        let before = crate::cache::signal_hash(&m, &d.secondary);

        reg.apply_secondary_signals(&m, Some("1,3,6,15,119,252"), Some("Roku/DVP-12.0")).unwrap();
        let d = reg.apply_secondary_signals(&m, Some("  "), Some("Roku/DVP-12.0")).unwrap();
        assert_eq!(d.secondary.dhcp_fingerprint.as_deref(), Some("1,3,6,15,119,252"));
        assert_eq!(d.secondary.user_agents.len(), 1);
        assert_ne!(crate::cache::signal_hash(&m, &d.secondary), before);
    }

    #[test]
    fn explicit_description_url_replaces_previous() {
        let reg = registry();
        let m = mac("aa:bb:cc:00:00:17");
        reg.observe_at(m.clone(), "10.0.0.17", "arp", t0()).unwrap();
        reg.apply_description_url(&m, "http://10.0.0.17:49152/old.xml").unwrap();
        let d = reg.apply_description_url(&m, " http://10.0.0.17:49152/new.xml ").unwrap();
        assert_eq!(d.description_url.as_deref(), Some("http://10.0.0.17:49152/new.xml"));
        let d = reg.apply_description_url(&m, "").unwrap();
        assert!(d.description_url.is_some());
    }

    #[test]
    fn trigger_without_pipeline_does_nothing() {
        let reg = Arc::new(registry());
        let m = mac("aa:bb:cc:00:00:15");
        reg.observe_at(m.clone(), "10.0.0.15", "arp", t0()).unwrap();
        assert!(reg.trigger_fingerprint(&m).is_none());
    }

    struct SlowDescription {
        calls: std::sync::atomic::AtomicUsize,
    }

    impl crate::fingerprint::DescriptionFetcher for SlowDescription {
        fn fetch<'a>(
            &'a self,
            _url: &'a str,
        ) -> std::pin::Pin<
            Box<
                dyn std::future::Future<
                        Output = Result<crate::fingerprint::UpnpDescription, crate::fingerprint::FingerprintError>,
                    > + Send
                    + 'a,
            >,
        > {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Box::pin(async {
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                Ok(crate::fingerprint::UpnpDescription {
                    manufacturer: Some("Roku".into()),
                    model_name: Some("Ultra".into()),
                    ..Default::default()
                })
            })
        }
    }

    #[tokio::test]
    async fn concurrent_triggers_share_one_lookup() {
        let fetcher = Arc::new(SlowDescription {
            calls: std::sync::atomic::AtomicUsize::new(0),
        });
        let pipeline = FingerprintPipeline::with_services(
            Arc::clone(&fetcher) as Arc<dyn crate::fingerprint::DescriptionFetcher>,
            None,
            Arc::new(crate::cache::FingerprintCache::new()),
        );
        let reg = Arc::new(registry().with_pipeline(Arc::new(pipeline)));
        let m = mac("aa:bb:cc:00:00:18");
        reg.observe_at(m.clone(), "10.0.0.18", "arp", t0()).unwrap();
        reg.apply_description_url(&m, "http://10.0.0.18:8060/dial/dd.xml").unwrap();

        let first = reg.trigger_fingerprint(&m).expect("first trigger spawns");
        assert!(reg.trigger_fingerprint(&m).is_none());
        assert_eq!(reg.fingerprints_in_flight(), 1);
        first.await.unwrap();

        assert_eq!(fetcher.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(reg.fingerprints_in_flight(), 0);
        let device = reg.device(&m).unwrap();
        assert_eq!(
            device.fingerprint.as_ref().and_then(|fp| fp.manufacturer.as_deref()),
            Some("Roku")
        );
        assert!(reg.trigger_fingerprint(&m).is_none());
    }

    #[tokio::test]
    async fn offline_fingerprint_does_not_block_late_description() {
        let fetcher = Arc::new(SlowDescription {
            calls: std::sync::atomic::AtomicUsize::new(0),
        });
        let pipeline = FingerprintPipeline::with_services(
            Arc::clone(&fetcher) as Arc<dyn crate::fingerprint::DescriptionFetcher>,
            None,
            Arc::new(crate::cache::FingerprintCache::new()),
        );
        let reg = Arc::new(registry().with_pipeline(Arc::new(pipeline)));
        let m = mac("aa:bb:cc:00:00:19");
        reg.observe_at(m.clone(), "10.0.0.19", "arp", t0()).unwrap();
        reg.apply_secondary_signals(&m, None, Some("Mozilla/5.0 (iPhone; CPU iPhone OS 17_0)"))
            .unwrap();

        reg.trigger_fingerprint(&m).expect("first lookup spawns").await.unwrap();
        let device = reg.device(&m).unwrap();
        assert_eq!(
            device.fingerprint.as_ref().map(|fp| fp.source),
            Some(FingerprintSource::Offline)
        );
        assert_eq!(fetcher.calls.load(std::sync::atomic::Ordering::SeqCst), 0);

        // Let earlier updates flush before counting.
        tokio::time::sleep(std::time::Duration::from_millis(300)).await;

        // Same inputs again: the lookup runs but leaves the device untouched.
        let updates = Arc::new(Mutex::new(0usize));
        let counter = Arc::clone(&updates);
        reg.subscribe(move |batch| *counter.lock() += batch.len());
        reg.trigger_fingerprint(&m).expect("offline result is provisional").await.unwrap();

        reg.apply_description_url(&m, "http://10.0.0.19:8060/dd.xml").unwrap();
        reg.trigger_fingerprint(&m).expect("new url is resolved").await.unwrap();
        assert_eq!(fetcher.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
        let device = reg.device(&m).unwrap();
        let fp = device.fingerprint.as_ref().unwrap();
        assert_eq!(fp.source, FingerprintSource::Upnp);
        assert_eq!(fp.manufacturer.as_deref(), Some("Roku"));
        assert!(reg.trigger_fingerprint(&m).is_none());

        tokio::time::sleep(std::time::Duration::from_millis(300)).await;
        // description url + upnp fingerprint; the unchanged offline lookup emitted nothing
        assert_eq!(*updates.lock(), 2);
    }

    /// Records every saved label; saving `slow_label` stalls the writer.
    struct RecordingStore {
        saved: Mutex<Vec<Option<String>>>,
        slow_label: &'static str,
    }

    impl DeviceStore for RecordingStore {
        fn save_device(&self, device: &Device) -> anyhow::Result<()> {
            if device.user_label.as_deref() == Some(self.slow_label) {
                std::thread::sleep(std::time::Duration::from_millis(100));
            }
            self.saved.lock().push(device.user_label.clone());
            Ok(())
        }

        fn load_devices(&self) -> anyhow::Result<Vec<Device>> {
            Ok(Vec::new())
        }

        fn clear_devices(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn same_device_updates_persist_and_emit_in_mutation_order() {
        let store = Arc::new(RecordingStore {
            saved: Mutex::new(Vec::new()),
            slow_label: "first",
        });
        let reg = Arc::new(registry().with_store(Arc::clone(&store) as Arc<dyn DeviceStore>));
        let emitted = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&emitted);
        reg.subscribe(move |batch| {
            sink.lock()
                .extend(batch.iter().map(|u| u.device.user_label.clone()));
        });

        let m = mac("aa:bb:cc:00:00:21");
        reg.observe_at(m.clone(), "10.0.0.21", "arp", t0()).unwrap();

        let slow = {
            let reg = Arc::clone(&reg);
            let m = m.clone();
            std::thread::spawn(move || reg.set_user_label(&m, Some("first")).unwrap())
        };
        std::thread::sleep(std::time::Duration::from_millis(30));
        reg.set_user_label(&m, Some("second")).unwrap();
        slow.join().unwrap();

        let expected = vec![None, Some("first".to_string()), Some("second".to_string())];
        assert_eq!(*store.saved.lock(), expected);
        assert_eq!(*emitted.lock(), expected);
        assert_eq!(reg.device(&m).unwrap().user_label.as_deref(), Some("second"));
    }
}
