use std::collections::HashMap;
use std::future::Future;
use std::net::Ipv4Addr;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use lanlens::behavior::{BehaviorClass, BehaviorTracker};
use lanlens::cache::FingerprintCache;
use lanlens::config::EngineSettings;
use lanlens::database::Database;
use lanlens::exports::ExportFormat;
use lanlens::models::{ArpEntry, DeviceType, MacAddress, PresenceRecord, SignalSource};
use lanlens::network::HostnameResolver;
use lanlens::registry::{
    DeviceRegistry, DiscoveryOrchestrator, EventBus, RegistryError, ScanSources, UpdateKind,
};
use lanlens::scanner::{ArpTableSource, PortProber, ProbeOutcome, describe_port};

const PRINTER_MAC: &str = "00:1B:A9:00:00:10";
const LAPTOP_MAC: &str = "3C:22:FB:00:00:20";

fn entry(mac: &str, ip: &str) -> ArpEntry {
    ArpEntry {
        ip: ip.to_string(),
        mac: MacAddress::parse(mac).expect("test MAC should parse"),
        interface: Some("eth0".to_string()),
    }
}

fn mac(raw: &str) -> MacAddress {
    MacAddress::parse(raw).expect("test MAC should parse")
}

/// ARP table whose contents the test swaps between scans; `None` fails the read
#[derive(Default)]
struct StubArpTable {
    entries: Mutex<Option<Vec<ArpEntry>>>,
}

impl StubArpTable {
    fn with(entries: Vec<ArpEntry>) -> Arc<Self> {
        Arc::new(Self {
            entries: Mutex::new(Some(entries)),
        })
    }

    fn set(&self, entries: Option<Vec<ArpEntry>>) {
        *self.entries.lock().expect("stub lock should not be poisoned") = entries;
    }
}

impl ArpTableSource for StubArpTable {
    fn read_entries<'a>(&'a self) -> Pin<Box<dyn Future<Output = anyhow::Result<Vec<ArpEntry>>> + Send + 'a>> {
        let entries = self
            .entries
            .lock()
            .expect("stub lock should not be poisoned")
            .clone();
        Box::pin(async move { entries.ok_or_else(|| anyhow::anyhow!("neighbour table unreadable")) })
    }
}

/// Reports fixed open ports per IP and records how it was called
#[derive(Default)]
struct StubProber {
    open: HashMap<Ipv4Addr, Vec<u16>>,
    delay: Option<Duration>,
    calls: Mutex<Vec<(Ipv4Addr, usize, bool)>>,
}

impl StubProber {
    fn open(mut self, ip: &str, ports: &[u16]) -> Self {
        self.open.insert(ip.parse().expect("test IP should parse"), ports.to_vec());
        self
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl PortProber for StubProber {
    fn probe<'a>(
        &'a self,
        ip: Ipv4Addr,
        ports: &'a [u16],
        grab_banners: bool,
    ) -> Pin<Box<dyn Future<Output = ProbeOutcome> + Send + 'a>> {
        Box::pin(async move {
            self.calls
                .lock()
                .expect("stub lock should not be poisoned")
                .push((ip, ports.len(), grab_banners));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let results = self
                .open
                .get(&ip)
                .map(|open| open.iter().copied().map(describe_port).collect())
                .unwrap_or_default();
            ProbeOutcome { results, banners: None }
        })
    }
}

#[derive(Default)]
struct StubResolver {
    names: HashMap<Ipv4Addr, String>,
}

impl HostnameResolver for StubResolver {
    fn resolve<'a>(
        &'a self,
        ips: &'a [Ipv4Addr],
    ) -> Pin<Box<dyn Future<Output = HashMap<Ipv4Addr, String>> + Send + 'a>> {
        Box::pin(async move {
            ips.iter()
                .filter_map(|ip| self.names.get(ip).map(|name| (*ip, name.clone())))
                .collect()
        })
    }
}

fn sources(arp: Arc<StubArpTable>, prober: Arc<StubProber>, resolver: StubResolver) -> ScanSources {
    ScanSources {
        arp,
        prober,
        resolver: Arc::new(resolver),
    }
}

fn engine_with(registry: DeviceRegistry, sources: ScanSources) -> DiscoveryOrchestrator {
    DiscoveryOrchestrator::new(
        EngineSettings::default(),
        Arc::new(registry),
        Arc::new(FingerprintCache::new()),
        sources,
    )
}

fn plain_registry() -> DeviceRegistry {
    DeviceRegistry::new(Arc::new(BehaviorTracker::new(&EngineSettings::default())))
}

fn two_hosts() -> Vec<ArpEntry> {
    vec![
        entry(PRINTER_MAC, "192.168.1.10"),
        entry(LAPTOP_MAC, "192.168.1.20"),
    ]
}

#[tokio::test]
async fn quick_scan_upserts_table_and_applies_ports() {
    let arp = StubArpTable::with(two_hosts());
    let prober = Arc::new(StubProber::default().open("192.168.1.10", &[9100, 631]));
    let engine = engine_with(plain_registry(), sources(arp, Arc::clone(&prober), StubResolver::default()));

    let report = engine.quick_scan().await;
    assert_eq!(report.devices_seen, 2);
    assert_eq!(report.new_devices, 2);
    assert_eq!(report.went_offline, 0);
    assert_eq!(report.hosts_with_open_ports, 1);
    assert_eq!(report.fingerprints_started, 0);
    assert!(report.failures.is_empty());
    assert!(!report.cancelled);

    let printer = engine.registry().device(&mac(PRINTER_MAC)).expect("printer should exist");
    assert_eq!(printer.device_type, DeviceType::Printer);
    assert_eq!(printer.port_numbers(), vec![631, 9100]);
    assert!(printer.sources.contains("arp"));
    assert!(printer.smart_score <= 100);

    let calls = prober.calls.lock().expect("stub lock should not be poisoned");
    assert_eq!(calls.len(), 2);
    let quick_ports = EngineSettings::default().quick_scan_ports.len();
    assert!(calls.iter().all(|(_, ports, banners)| *ports == quick_ports && !banners));
    drop(calls);

    let again = engine.quick_scan().await;
    assert_eq!(again.new_devices, 0);
    assert_eq!(engine.devices().len(), 2);
}

#[tokio::test]
async fn device_missing_from_next_table_goes_offline() {
    let arp = StubArpTable::with(two_hosts());
    let engine = engine_with(
        plain_registry(),
        sources(Arc::clone(&arp), Arc::new(StubProber::default()), StubResolver::default()),
    );
    engine.quick_scan().await;

    arp.set(Some(vec![entry(PRINTER_MAC, "192.168.1.10")]));
    let report = engine.quick_scan().await;
    assert_eq!(report.devices_seen, 1);
    assert_eq!(report.went_offline, 1);

    let laptop = engine.registry().device(&mac(LAPTOP_MAC)).expect("laptop should be kept");
    assert!(!laptop.is_online);
    let printer = engine.registry().device(&mac(PRINTER_MAC)).expect("printer should exist");
    assert!(printer.is_online);

    // Already offline: not counted twice
    let report = engine.quick_scan().await;
    assert_eq!(report.went_offline, 0);
}

#[tokio::test]
async fn unreadable_table_falls_back_to_cache_and_keeps_devices_online() {
    let arp = StubArpTable::with(two_hosts());
    let engine = engine_with(
        plain_registry(),
        sources(Arc::clone(&arp), Arc::new(StubProber::default()), StubResolver::default()),
    );
    engine.quick_scan().await;
    assert_eq!(engine.arp_cache().len(), 2);

    arp.set(None);
    let report = engine.quick_scan().await;
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].target, "arp_table");
    assert!(report.failures[0].reason.contains("unreadable"));
    assert_eq!(report.devices_seen, 2);
    assert_eq!(report.went_offline, 0);
    assert!(engine.devices().iter().all(|d| d.is_online));
}

#[tokio::test]
async fn full_scan_resolves_hostnames_and_grabs_banners() {
    let arp = StubArpTable::with(two_hosts());
    let prober = Arc::new(StubProber::default());
    let mut resolver = StubResolver::default();
    resolver
        .names
        .insert("192.168.1.20".parse().unwrap(), "Work-Laptop.lan.".to_string());
    let engine = engine_with(plain_registry(), sources(arp, Arc::clone(&prober), resolver));

    let quick = engine.quick_scan().await;
    assert_eq!(quick.hostnames_resolved, 0);
    assert!(engine.registry().device(&mac(LAPTOP_MAC)).unwrap().hostname.is_none());

    let report = engine.full_scan().await;
    assert_eq!(report.hostnames_resolved, 1);
    let laptop = engine.registry().device(&mac(LAPTOP_MAC)).unwrap();
    assert_eq!(laptop.hostname.as_deref(), Some("Work-Laptop"));

    let full_ports = EngineSettings::default().full_scan_ports.len();
    let calls = prober.calls.lock().unwrap();
    assert!(calls.iter().skip(2).all(|(_, ports, banners)| *ports == full_ports && *banners));
}

#[tokio::test]
async fn stop_scan_detaches_running_probes() {
    let arp = StubArpTable::with(two_hosts());
    let prober = StubProber::default()
        .open("192.168.1.10", &[9100])
        .slow(Duration::from_millis(300));
    let engine = engine_with(plain_registry(), sources(arp, Arc::new(prober), StubResolver::default()));

    let (report, _) = tokio::join!(engine.quick_scan(), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.stop_scan();
    });

    assert!(report.cancelled);
    let printer = engine.registry().device(&mac(PRINTER_MAC)).expect("upsert happens before probes");
    assert!(printer.open_ports.is_empty());

    // The next scan runs normally
    let report = engine.quick_scan().await;
    assert!(!report.cancelled);
    assert_eq!(engine.registry().device(&mac(PRINTER_MAC)).unwrap().port_numbers(), vec![9100]);
}

#[tokio::test]
async fn user_label_survives_scans_and_reaches_exports() {
    let arp = StubArpTable::with(two_hosts());
    let engine = engine_with(
        plain_registry(),
        sources(arp, Arc::new(StubProber::default()), StubResolver::default()),
    );
    engine.quick_scan().await;

    let labelled = engine
        .set_user_label("00-1b-a9-00-00-10", Some("  Office printer "))
        .expect("known device should accept a label");
    assert_eq!(labelled.user_label.as_deref(), Some("Office printer"));

    engine.full_scan().await;
    let printer = engine.registry().device(&mac(PRINTER_MAC)).unwrap();
    assert_eq!(printer.user_label.as_deref(), Some("Office printer"));

    let csv = engine.export_devices(ExportFormat::Csv).unwrap();
    assert!(csv.contains("Office printer"));
    let json = engine.export_devices(ExportFormat::Json).unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed["total_devices"], 2);

    assert!(matches!(
        engine.set_user_label("not-a-mac", Some("x")),
        Err(RegistryError::InvalidMac(_))
    ));
    assert!(matches!(
        engine.set_user_label("00:11:22:33:44:55", Some("x")),
        Err(RegistryError::UnknownDevice(_))
    ));
}

#[tokio::test]
async fn scan_updates_arrive_in_one_debounced_batch() {
    let registry = plain_registry().with_events(EventBus::with_debounce(Duration::from_millis(50)));
    let batches: Arc<Mutex<Vec<Vec<UpdateKind>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&batches);
    registry.subscribe(move |updates| {
        sink.lock()
            .unwrap()
            .push(updates.iter().map(|u| u.kind).collect());
    });

    let engine = engine_with(
        registry,
        sources(StubArpTable::with(two_hosts()), Arc::new(StubProber::default()), StubResolver::default()),
    );
    engine.quick_scan().await;
    tokio::time::sleep(Duration::from_millis(250)).await;

    let batches = batches.lock().unwrap();
    assert_eq!(batches.len(), 1);
    let discovered = batches[0].iter().filter(|k| **k == UpdateKind::Discovered).count();
    assert_eq!(discovered, 2);
}

#[tokio::test]
async fn engine_state_survives_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("lanlens.db");
    let settings = EngineSettings {
        db_path: db_path.clone(),
        ..EngineSettings::default()
    };

    {
        let db = Database::new(db_path.clone()).expect("db should initialize");
        let engine = DiscoveryOrchestrator::open(settings.clone(), db, None)
            .expect("engine should open")
            .with_sources(sources(
                StubArpTable::with(two_hosts()),
                Arc::new(StubProber::default().open("192.168.1.10", &[9100])),
                StubResolver::default(),
            ));
        engine.quick_scan().await;
        engine
            .set_user_label(LAPTOP_MAC, Some("Alex's laptop"))
            .expect("label should apply");
        engine.wait_for_fingerprints(Duration::from_secs(5)).await;
    }

    let db = Database::new(db_path).expect("db should reopen");
    let engine = DiscoveryOrchestrator::open(settings, db, None).expect("engine should reopen");
    let devices = engine.devices();
    assert_eq!(devices.len(), 2);
    assert!(devices.iter().all(|d| !d.is_online));

    let laptop = engine.registry().device(&mac(LAPTOP_MAC)).unwrap();
    assert_eq!(laptop.user_label.as_deref(), Some("Alex's laptop"));
    let printer = engine.registry().device(&mac(PRINTER_MAC)).unwrap();
    assert_eq!(printer.port_numbers(), vec![9100]);

    // Presence history was persisted too
    let profile = engine
        .registry()
        .behavior()
        .profile(&mac(PRINTER_MAC))
        .expect("profile should rebuild from stored presence");
    assert_eq!(profile.observation_count, 1);
}

#[tokio::test]
async fn presence_history_feeds_behavior_signal() {
    let db = Arc::new(Database::in_memory().unwrap());
    let tracker = BehaviorTracker::with_limits(100, 1000, 10, 0).with_store(db);
    let registry = DeviceRegistry::new(Arc::new(tracker));
    let nas = mac("00:11:32:00:00:30");
    let start = Utc.with_ymd_and_hms(2026, 5, 4, 0, 0, 0).unwrap();
    registry.observe_at(nas.clone(), "192.168.1.30", "arp", start).unwrap();

    let hours = [9, 10, 11, 12, 13, 14, 15, 16, 17, 9, 10, 11];
    let mut class = BehaviorClass::Unknown;
    for (i, hour) in hours.iter().enumerate() {
        let day = if i < 9 { 0 } else { 1 };
        let ts = start + chrono::Duration::days(day) + chrono::Duration::hours(*hour);
        class = registry.record_presence(PresenceRecord::new(nas.clone(), ts, i != 11));
    }
    assert_eq!(class, BehaviorClass::Server);

    let device = registry.device(&nas).unwrap();
    let behavior: Vec<_> = device
        .signals
        .iter()
        .filter(|s| s.source == SignalSource::Behavior)
        .collect();
    assert_eq!(behavior.len(), 1);
    assert_eq!(behavior[0].suggested_type, DeviceType::Nas);
    assert!((behavior[0].confidence - 0.35).abs() < 1e-9);

    // Evicted profiles come back from the stored history
    registry.behavior().clear();
    let rebuilt = registry.behavior().profile(&nas).expect("profile should rebuild");
    assert_eq!(rebuilt.observation_count, 12);
    assert_eq!(rebuilt.classification, BehaviorClass::Server);
}
