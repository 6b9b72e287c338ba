//! Discovery orchestration
//!
//! Drives the source adapters and writes everything back through the
//! registry: scans on demand plus long-running passive listeners.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};

use super::{DeviceRegistry, RegistryError};
use crate::behavior::BehaviorTracker;
use crate::cache::{ArpCache, CacheStats, FingerprintCache};
use crate::config::EngineSettings;
use crate::database::{Database, DeviceStore, FingerprintStore, PresenceStore};
use crate::exports::{ExportFormat, export_devices};
use crate::fingerprint::{FingerprintPipeline, WarningHook};
use crate::models::{ArpEntry, Device, MacAddress, PresenceRecord, ServiceRecord};
use crate::network::{
    HostnameResolver, ReverseDnsResolver, find_interface_by_name, find_valid_interface,
};
use crate::scanner::{
    ArpMonitor, ArpTableSource, MdnsObservation, PassiveScanner, PortProber, SsdpListener,
    SystemArpTable, TcpPortProber, ssdp_search,
};
use crate::{log_debug, log_warn};

const PASSIVE_CHANNEL_CAPACITY: usize = 256;
const SSDP_SEARCH_WINDOW: Duration = Duration::from_secs(3);
const FINGERPRINT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanMode {
    Quick,
    Full,
}

impl ScanMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanMode::Quick => "quick",
            ScanMode::Full => "full",
        }
    }
}

impl fmt::Display for ScanMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A source or device that could not be handled during a scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScanFailure {
    pub target: String,
    pub reason: String,
}

impl ScanFailure {
    fn new(target: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self {
            target: target.into(),
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub mode: ScanMode,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub devices_seen: usize,
    pub new_devices: usize,
    pub went_offline: usize,
    pub hosts_with_open_ports: usize,
    pub hostnames_resolved: usize,
    pub fingerprints_started: usize,
    pub failures: Vec<ScanFailure>,
    /// `stop_scan` detached this session before it finished
    pub cancelled: bool,
}

impl ScanReport {
    fn new(mode: ScanMode, started_at: DateTime<Utc>) -> Self {
        Self {
            mode,
            started_at,
            duration_ms: 0,
            devices_seen: 0,
            new_devices: 0,
            went_offline: 0,
            hosts_with_open_ports: 0,
            hostnames_resolved: 0,
            fingerprints_started: 0,
            failures: Vec::new(),
            cancelled: false,
        }
    }
}

/// Which passive listeners are running
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassiveStatus {
    pub arp: bool,
    pub mdns: bool,
    pub ssdp: bool,
}

impl PassiveStatus {
    pub fn any(&self) -> bool {
        self.arp || self.mdns || self.ssdp
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EngineCacheStats {
    pub arp: CacheStats,
    pub fingerprint: CacheStats,
}

/// Scan-time adapters
pub struct ScanSources {
    pub arp: Arc<dyn ArpTableSource>,
    pub prober: Arc<dyn PortProber>,
    pub resolver: Arc<dyn HostnameResolver>,
}

impl ScanSources {
    pub fn system(settings: &EngineSettings) -> Self {
        Self {
            arp: Arc::new(SystemArpTable),
            prober: Arc::new(TcpPortProber::from_settings(settings)),
            resolver: Arc::new(ReverseDnsResolver),
        }
    }
}

struct PassiveSession {
    stop: Arc<AtomicBool>,
    status: PassiveStatus,
    tasks: Vec<JoinHandle<()>>,
}

pub struct DiscoveryOrchestrator {
    settings: EngineSettings,
    registry: Arc<DeviceRegistry>,
    arp_cache: Arc<ArpCache>,
    fingerprint_cache: Arc<FingerprintCache>,
    fingerprint_store: Option<Arc<dyn FingerprintStore>>,
    sources: ScanSources,
    /// Bumped by every scan start and by `stop_scan`
    generation: AtomicU64,
    passive: Mutex<Option<PassiveSession>>,
}

impl DiscoveryOrchestrator {
    pub fn new(
        settings: EngineSettings,
        registry: Arc<DeviceRegistry>,
        fingerprint_cache: Arc<FingerprintCache>,
        sources: ScanSources,
    ) -> Self {
        let arp_cache = Arc::new(ArpCache::new(
            settings.arp_cache_max_entries,
            settings.arp_cache_ttl(),
        ));
        Self {
            settings,
            registry,
            arp_cache,
            fingerprint_cache,
            fingerprint_store: None,
            sources,
            generation: AtomicU64::new(0),
            passive: Mutex::new(None),
        }
    }

    pub fn with_fingerprint_store(mut self, store: Arc<dyn FingerprintStore>) -> Self {
        self.fingerprint_store = Some(store);
        self
    }

    pub fn with_sources(mut self, sources: ScanSources) -> Self {
        self.sources = sources;
        self
    }

    /// Wire the whole engine over one database: persisted devices, presence
    /// history and fingerprint cache entries are loaded back first.
    pub fn open(
        settings: EngineSettings,
        database: Database,
        warning_hook: Option<WarningHook>,
    ) -> anyhow::Result<Self> {
        let db = Arc::new(database);
        let presence: Arc<dyn PresenceStore> = db.clone();
        let devices: Arc<dyn DeviceStore> = db.clone();
        let fingerprints: Arc<dyn FingerprintStore> = db.clone();

        let fingerprint_cache = Arc::new(FingerprintCache::new());
        match fingerprints.load_fingerprint_entries() {
            Ok(entries) => {
                let loaded = fingerprint_cache.load_entries(entries);
                log_debug!("[ENGINE] Restored {} fingerprint cache entries", loaded);
            }
            Err(e) => log_warn!("[ENGINE] Fingerprint cache not restored: {}", e),
        }

        let behavior = Arc::new(BehaviorTracker::new(&settings).with_store(presence));
        let mut registry = DeviceRegistry::new(behavior)
            .with_events(super::EventBus::with_debounce(settings.event_debounce()))
            .with_store(devices);

        match FingerprintPipeline::from_settings(&settings, Arc::clone(&fingerprint_cache)) {
            Ok(pipeline) => {
                let mut pipeline = pipeline.with_store(Arc::clone(&fingerprints));
                if let Some(hook) = warning_hook {
                    pipeline = pipeline.with_warning_hook(hook);
                }
                registry = registry.with_pipeline(Arc::new(pipeline));
            }
            Err(e) => log_warn!("[ENGINE] Fingerprinting disabled: {}", e),
        }

        let registry = Arc::new(registry);
        if let Err(e) = registry.load_from_store() {
            log_warn!("[ENGINE] Stored devices not loaded: {}", e);
        }

        let sources = ScanSources::system(&settings);
        Ok(Self::new(settings, registry, fingerprint_cache, sources).with_fingerprint_store(fingerprints))
    }

    pub fn registry(&self) -> &Arc<DeviceRegistry> {
        &self.registry
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn arp_cache(&self) -> &Arc<ArpCache> {
        &self.arp_cache
    }

    // ====== Scans ======

    pub async fn quick_scan(&self) -> ScanReport {
        self.scan(ScanMode::Quick).await
    }

    /// Quick scan plus banner grabbing and reverse DNS.
    pub async fn full_scan(&self) -> ScanReport {
        self.scan(ScanMode::Full).await
    }

    /// Detach the running scan from further registry writes. Fingerprint
    /// lookups already started keep running.
    pub fn stop_scan(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        tracing::info!("[SCAN] Stop requested");
    }

    /// Wait until background fingerprint lookups settle. Returns false when
    /// some were still running at the deadline.
    pub async fn wait_for_fingerprints(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.registry.fingerprints_in_flight() > 0 {
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(FINGERPRINT_POLL_INTERVAL).await;
        }
        true
    }

    fn is_current(&self, session: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == session
    }

    async fn scan(&self, mode: ScanMode) -> ScanReport {
        let session = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let started = Instant::now();
        let now = Utc::now();
        let mut report = ScanReport::new(mode, now);
        tracing::info!("[SCAN] {} scan #{} started", mode, session);

        // Phase 1: ARP table through the cache; unexpired cached entries
        // stand in when the table cannot be read.
        let (entries, table_ok) = match self.sources.arp.read_entries().await {
            Ok(entries) => {
                for entry in &entries {
                    self.arp_cache.put_at(entry.clone(), now);
                }
                (entries, true)
            }
            Err(e) => {
                log_warn!("[SCAN] ARP table unavailable: {:#}", e);
                report.failures.push(ScanFailure::new("arp_table", format!("{:#}", e)));
                (self.arp_cache.entries_at(now), false)
            }
        };

        // Phase 2: upsert and presence
        let mut seen: HashSet<MacAddress> = HashSet::new();
        let mut targets: Vec<(MacAddress, Ipv4Addr)> = Vec::new();
        for entry in entries {
            if seen.contains(&entry.mac) {
                continue;
            }
            if !self.is_current(session) {
                return self.finish(report, started, true);
            }
            match self.observe_entry(&entry, "arp", now) {
                Ok(is_new) => {
                    if is_new {
                        report.new_devices += 1;
                    }
                }
                Err(e) => {
                    report.failures.push(ScanFailure::new(entry.mac.as_str(), e));
                    continue;
                }
            }
            match entry.ip.parse::<Ipv4Addr>() {
                Ok(ip) => targets.push((entry.mac.clone(), ip)),
                Err(e) => report.failures.push(ScanFailure::new(entry.ip.as_str(), e)),
            }
            seen.insert(entry.mac);
        }
        report.devices_seen = seen.len();

        // Phase 3: devices missing from a successful table read went offline
        if table_ok {
            for mac in self.registry.online_macs() {
                if seen.contains(&mac) {
                    continue;
                }
                if let Ok(true) = self.registry.mark_offline(&mac) {
                    report.went_offline += 1;
                    self.registry
                        .record_presence(PresenceRecord::new(mac, now, false));
                }
            }
        }

        // Phase 4: port probes, one task per device
        let ports = Arc::new(match mode {
            ScanMode::Quick => self.settings.quick_scan_ports.clone(),
            ScanMode::Full => self.settings.full_scan_ports.clone(),
        });
        let grab_banners = mode == ScanMode::Full;
        let semaphore = Arc::new(Semaphore::new(self.settings.max_concurrent_probes.max(1)));
        let mut probes = JoinSet::new();
        for (mac, ip) in &targets {
            let (mac, ip) = (mac.clone(), *ip);
            let prober = Arc::clone(&self.sources.prober);
            let ports = Arc::clone(&ports);
            let semaphore = Arc::clone(&semaphore);
            probes.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => return (mac, ip, Err(e.to_string())),
                };
                let outcome = prober.probe(ip, &ports, grab_banners).await;
                (mac, ip, Ok(outcome))
            });
        }

        while let Some(joined) = probes.join_next().await {
            match joined {
                Ok((mac, _, Ok(outcome))) => {
                    if !self.is_current(session) {
                        continue;
                    }
                    if outcome.results.is_empty() && outcome.banners.is_none() {
                        continue;
                    }
                    if !outcome.results.is_empty() {
                        report.hosts_with_open_ports += 1;
                    }
                    if let Err(e) =
                        self.registry
                            .apply_port_scan_result(&mac, &outcome.results, outcome.banners.as_ref())
                    {
                        report.failures.push(ScanFailure::new(mac.as_str(), e));
                    }
                }
                Ok((_, ip, Err(reason))) => report.failures.push(ScanFailure::new(ip.to_string(), reason)),
                Err(e) => {
                    log_warn!("[SCAN] Probe task failed: {}", e);
                    report.failures.push(ScanFailure::new("probe", e));
                }
            }
        }
        if !self.is_current(session) {
            return self.finish(report, started, true);
        }

        // Phase 5: reverse DNS (full scans only)
        if mode == ScanMode::Full {
            let ips: Vec<Ipv4Addr> = targets.iter().map(|(_, ip)| *ip).collect();
            let names = self.sources.resolver.resolve(&ips).await;
            if !self.is_current(session) {
                return self.finish(report, started, true);
            }
            for (mac, ip) in &targets {
                let Some(name) = names.get(ip) else {
                    continue;
                };
                match self.registry.apply_hostname(mac, name) {
                    Ok(_) => report.hostnames_resolved += 1,
                    Err(e) => report.failures.push(ScanFailure::new(mac.as_str(), e)),
                }
            }
        }

        // Phase 6: background fingerprinting
        for (mac, _) in &targets {
            if self.registry.trigger_fingerprint(mac).is_some() {
                report.fingerprints_started += 1;
            }
        }

        self.finish(report, started, false)
    }

    fn finish(&self, mut report: ScanReport, started: Instant, cancelled: bool) -> ScanReport {
        report.duration_ms = started.elapsed().as_millis() as u64;
        report.cancelled = cancelled;
        tracing::info!(
            "[SCAN] {} scan {}: {} device(s), {} new, {} offline, {} failure(s) in {}ms",
            report.mode,
            if cancelled { "cancelled" } else { "complete" },
            report.devices_seen,
            report.new_devices,
            report.went_offline,
            report.failures.len(),
            report.duration_ms
        );
        report
    }

    /// Upsert one ARP sighting and record presence. Returns true for a new device.
    fn observe_entry(&self, entry: &ArpEntry, source: &str, now: DateTime<Utc>) -> Result<bool, RegistryError> {
        observe_sighting(&self.registry, entry, source, now)
    }

    // ====== Passive mode ======

    /// Start the passive ARP, mDNS and SSDP listeners plus cache maintenance.
    ///
    /// ARP capture runs on `interface`, or on the best LAN interface when
    /// unset. A listener that fails to start is logged and left disabled;
    /// calling this while passive mode runs returns the current status.
    pub async fn start_passive(&self, interface: Option<&str>) -> PassiveStatus {
        if let Some(session) = self.passive.lock().as_ref() {
            return session.status;
        }

        let stop = Arc::new(AtomicBool::new(false));
        let mut status = PassiveStatus::default();
        let mut tasks = Vec::new();

        // ARP
        let (arp_tx, arp_rx) = mpsc::channel::<ArpEntry>(PASSIVE_CHANNEL_CAPACITY);
        let selected = match interface {
            Some(name) => find_interface_by_name(name),
            None => find_valid_interface(),
        };
        match selected.and_then(|info| ArpMonitor::new(info.pnet_interface).start(arp_tx, Arc::clone(&stop)))
        {
            Ok(handle) => {
                tasks.push(handle);
                status.arp = true;
            }
            Err(e) => log_warn!("[PASSIVE] ARP listener disabled: {:#}", e),
        }
        tasks.push(tokio::spawn(consume_arp(
            arp_rx,
            Arc::clone(&self.registry),
            Arc::clone(&self.arp_cache),
        )));

        // mDNS
        let (mdns_tx, mdns_rx) = mpsc::channel::<MdnsObservation>(PASSIVE_CHANNEL_CAPACITY);
        match PassiveScanner::new().and_then(|scanner| scanner.start(mdns_tx, Arc::clone(&stop))) {
            Ok(handle) => {
                tasks.push(handle);
                status.mdns = true;
            }
            Err(e) => log_warn!("[PASSIVE] mDNS listener disabled: {:#}", e),
        }
        tasks.push(tokio::spawn(consume_mdns(
            mdns_rx,
            Arc::clone(&self.registry),
            Arc::clone(&self.arp_cache),
        )));

        // SSDP: one M-SEARCH burst, then NOTIFY listening
        let (ssdp_tx, ssdp_rx) = mpsc::channel::<ServiceRecord>(PASSIVE_CHANNEL_CAPACITY);
        match SsdpListener::bind().await {
            Ok(listener) => {
                tasks.push(listener.start(ssdp_tx.clone(), Arc::clone(&stop)));
                status.ssdp = true;
            }
            Err(e) => log_warn!("[PASSIVE] SSDP listener disabled: {:#}", e),
        }
        tasks.push(tokio::spawn(async move {
            match ssdp_search(SSDP_SEARCH_WINDOW).await {
                Ok(records) => {
                    for record in records {
                        if ssdp_tx.send(record).await.is_err() {
                            break;
                        }
                    }
                }
                Err(e) => log_debug!("[PASSIVE] SSDP search failed: {:#}", e),
            }
        }));
        tasks.push(tokio::spawn(consume_ssdp(
            ssdp_rx,
            Arc::clone(&self.registry),
            Arc::clone(&self.arp_cache),
        )));

        // Maintenance
        tasks.push(tokio::spawn(maintain_caches(
            Arc::clone(&self.arp_cache),
            Arc::clone(&self.fingerprint_cache),
            self.settings.cache_prune_interval_secs.max(1),
            Arc::clone(&stop),
        )));

        tracing::info!(
            "[PASSIVE] Started (arp: {}, mdns: {}, ssdp: {})",
            status.arp,
            status.mdns,
            status.ssdp
        );
        *self.passive.lock() = Some(PassiveSession { stop, status, tasks });
        status
    }

    /// Stop passive listeners and persist the fingerprint cache. Returns
    /// false when passive mode was not running.
    pub fn stop_passive(&self) -> bool {
        let Some(session) = self.passive.lock().take() else {
            return false;
        };
        session.stop.store(true, Ordering::SeqCst);
        // Listeners poll the stop flag; consumers end once their senders drop.
        log_debug!("[PASSIVE] Stopping {} task(s)", session.tasks.len());
        self.flush_fingerprint_cache();
        tracing::info!("[PASSIVE] Stopped");
        true
    }

    // ====== Management ======

    pub fn devices(&self) -> Vec<Device> {
        self.registry.devices()
    }

    pub fn set_user_label(&self, mac: &str, label: Option<&str>) -> Result<Device, RegistryError> {
        let mac = MacAddress::parse(mac)?;
        self.registry.set_user_label(&mac, label)
    }

    pub fn export_devices(&self, format: ExportFormat) -> anyhow::Result<String> {
        export_devices(&self.registry.devices(), format)
    }

    /// Empty the ARP and fingerprint caches (persisted entries included) and
    /// the in-memory behavior profiles.
    pub fn clear_caches(&self) -> EngineCacheStats {
        let before = self.cache_stats();
        self.arp_cache.clear();
        self.fingerprint_cache.clear();
        self.registry.behavior().clear();
        if let Some(store) = &self.fingerprint_store
            && let Err(e) = store.clear_fingerprint_entries()
        {
            log_warn!("[ENGINE] Failed to clear persisted fingerprint cache: {}", e);
        }
        tracing::info!(
            "[ENGINE] Cleared {} ARP and {} fingerprint cache entries (fingerprint hit rate {:.0}%)",
            before.arp.size,
            before.fingerprint.size,
            before.fingerprint.hit_rate() * 100.0
        );
        before
    }

    pub fn cache_stats(&self) -> EngineCacheStats {
        EngineCacheStats {
            arp: self.arp_cache.stats(),
            fingerprint: self.fingerprint_cache.stats(),
        }
    }

    /// Write every live fingerprint cache entry to the store.
    pub fn flush_fingerprint_cache(&self) {
        let Some(store) = &self.fingerprint_store else {
            return;
        };
        let entries = self.fingerprint_cache.export_entries();
        if let Err(e) = store.save_fingerprint_entries(&entries) {
            log_warn!("[ENGINE] Failed to persist fingerprint cache: {}", e);
        }
    }
}

impl Drop for DiscoveryOrchestrator {
    fn drop(&mut self) {
        if let Some(session) = self.passive.get_mut().take() {
            session.stop.store(true, Ordering::SeqCst);
        }
    }
}

fn observe_sighting(
    registry: &DeviceRegistry,
    entry: &ArpEntry,
    source: &str,
    now: DateTime<Utc>,
) -> Result<bool, RegistryError> {
    let is_new = registry.device(&entry.mac).is_none();
    let device = registry.observe_at(entry.mac.clone(), &entry.ip, source, now)?;
    if is_new {
        registry.apply_mac_analysis(&entry.mac)?;
    }

    let mut record = PresenceRecord::new(entry.mac.clone(), now, true);
    record.ip = Some(entry.ip.clone());
    record.services = device.services.iter().map(|s| s.service_type.clone()).collect();
    registry.record_presence(record);
    Ok(is_new)
}

/// MAC for an announcing host: the ARP cache first, then the registry.
fn resolve_mac(registry: &DeviceRegistry, arp_cache: &ArpCache, ip: &str) -> Option<MacAddress> {
    arp_cache
        .get_by_ip(ip)
        .map(|entry| entry.mac)
        .or_else(|| registry.mac_for_ip(ip))
}

async fn consume_arp(mut rx: mpsc::Receiver<ArpEntry>, registry: Arc<DeviceRegistry>, arp_cache: Arc<ArpCache>) {
    while let Some(entry) = rx.recv().await {
        arp_cache.put(entry.clone());
        if let Err(e) = observe_sighting(&registry, &entry, "passive_arp", Utc::now()) {
            log_debug!("[PASSIVE] ARP sighting of {} skipped: {}", entry.mac, e);
        }
    }
}

async fn consume_mdns(
    mut rx: mpsc::Receiver<MdnsObservation>,
    registry: Arc<DeviceRegistry>,
    arp_cache: Arc<ArpCache>,
) {
    while let Some(observation) = rx.recv().await {
        let ip = observation.ip.to_string();
        let Some(mac) = resolve_mac(&registry, &arp_cache, &ip) else {
            log_debug!("[PASSIVE] No MAC known for mDNS host {}", ip);
            continue;
        };
        let result = registry
            .observe_at(mac.clone(), &ip, "mdns", Utc::now())
            .and_then(|_| registry.apply_service_discovery(&mac, &[observation.record]))
            .and_then(|device| match observation.hostname.as_deref() {
                Some(hostname) if device.hostname.is_none() => registry.apply_hostname(&mac, hostname),
                _ => Ok(device),
            });
        match result {
            Ok(_) => {
                registry.trigger_fingerprint(&mac);
            }
            Err(e) => log_debug!("[PASSIVE] mDNS record for {} skipped: {}", mac, e),
        }
    }
}

async fn consume_ssdp(mut rx: mpsc::Receiver<ServiceRecord>, registry: Arc<DeviceRegistry>, arp_cache: Arc<ArpCache>) {
    while let Some(record) = rx.recv().await {
        let Some(ip) = record.host_ip.clone() else {
            continue;
        };
        let Some(mac) = resolve_mac(&registry, &arp_cache, &ip) else {
            log_debug!("[PASSIVE] No MAC known for SSDP host {}", ip);
            continue;
        };
        match registry
            .observe_at(mac.clone(), &ip, "ssdp", Utc::now())
            .and_then(|_| registry.apply_service_discovery(&mac, &[record]))
        {
            Ok(_) => {
                registry.trigger_fingerprint(&mac);
            }
            Err(e) => log_debug!("[PASSIVE] SSDP record for {} skipped: {}", mac, e),
        }
    }
}

async fn maintain_caches(
    arp_cache: Arc<ArpCache>,
    fingerprint_cache: Arc<FingerprintCache>,
    interval_secs: u64,
    stop: Arc<AtomicBool>,
) {
    while !stop.load(Ordering::SeqCst) {
        // Check every second so stop is noticed quickly
        for _ in 0..interval_secs {
            if stop.load(Ordering::SeqCst) {
                return;
            }
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        let arp = arp_cache.prune();
        let fingerprint = fingerprint_cache.prune();
        if arp + fingerprint > 0 {
            log_debug!("[PASSIVE] Pruned {} ARP and {} fingerprint cache entries", arp, fingerprint);
        }
    }
}
