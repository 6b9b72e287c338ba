//! Configuration constants and env-tunable settings for lanlens

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

// ====== Cache Configuration ======

/// Maximum ARP cache entries before oldest-inserted eviction kicks in
pub const ARP_CACHE_MAX_ENTRIES: usize = 500;

/// ARP cache entry lifetime
pub const ARP_CACHE_TTL_SECS: u64 = 300;

/// Lifetime of cached UPnP description lookups (7 days)
pub const DESCRIPTION_CACHE_TTL_SECS: u64 = 7 * 24 * 3600;

/// Lifetime of cached remote fingerprint responses (30 days)
pub const REMOTE_CACHE_TTL_SECS: u64 = 30 * 24 * 3600;

/// How often passive mode prunes expired cache entries
pub const CACHE_PRUNE_INTERVAL_SECS: u64 = 60;

// ====== Probe Configuration ======

/// UPnP description fetch timeout
pub const DESCRIPTION_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Remote fingerprint service timeout
pub const REMOTE_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Banner grab timeout (connect + first read)
pub const BANNER_TIMEOUT: Duration = Duration::from_secs(2);

/// TCP connect timeout used by port probes
pub const TCP_PROBE_TIMEOUT: Duration = Duration::from_millis(400);

/// Maximum devices probed at the same time during a scan
pub const MAX_CONCURRENT_PROBES: usize = 32;

/// Ports probed by a quick scan
pub const QUICK_SCAN_PORTS: &[u16] = &[22, 80, 443, 554, 631, 8008, 8009, 9100, 62078];

/// Ports probed by a full scan
pub const FULL_SCAN_PORTS: &[u16] = &[
    21, 22, 23, 53, 80, 139, 443, 445, 515, 548, 554, 631, 1400, 1883, 3389, 5000, 5001, 5900,
    7000, 8008, 8009, 8060, 8080, 8443, 8554, 9100, 32400, 49152, 62078,
];

// ====== Registry / Event Configuration ======

/// Quiet interval before a burst of device updates is flushed to observers
pub const EVENT_DEBOUNCE_MS: u64 = 100;

// ====== Behavior Configuration ======

/// Presence observations retained per in-memory profile
pub const BEHAVIOR_HISTORY_LIMIT: usize = 100;

/// Profiles kept in the in-memory accelerator before LRU eviction
pub const BEHAVIOR_PROFILE_CACHE_LIMIT: usize = 1000;

/// Observations required before a device can be classified
pub const BEHAVIOR_MIN_OBSERVATIONS: u64 = 10;

// ====== Remote Fingerprinting ======

/// Fingerbank API base URL
pub const FINGERBANK_ENDPOINT: &str = "https://api.fingerbank.org";

fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn env_parse_u64(name: &str, default: u64, min: u64, max: u64) -> u64 {
    match env_var(name).and_then(|v| v.parse::<u64>().ok()) {
        Some(v) => v.clamp(min, max),
        None => default,
    }
}

fn env_parse_usize(name: &str, default: usize, min: usize, max: usize) -> usize {
    match env_var(name).and_then(|v| v.parse::<usize>().ok()) {
        Some(v) => v.clamp(min, max),
        None => default,
    }
}

fn env_parse_i32(name: &str, default: i32, min: i32, max: i32) -> i32 {
    match env_var(name).and_then(|v| v.parse::<i32>().ok()) {
        Some(v) => v.clamp(min, max),
        None => default,
    }
}

fn env_parse_ports(name: &str, default: &[u16]) -> Vec<u16> {
    if let Some(raw) = env_var(name) {
        let ports: Vec<u16> = raw
            .split(',')
            .filter_map(|p| p.trim().parse::<u16>().ok())
            .filter(|p| *p > 0)
            .collect();
        if !ports.is_empty() {
            return ports;
        }
    }
    default.to_vec()
}

/// Host UTC offset in minutes, used to bucket presence observations by hour
fn local_utc_offset_minutes() -> i32 {
    chrono::Local::now().offset().local_minus_utc() / 60
}

/// Runtime settings for the whole engine (env-driven).
///
/// Every field has a compile-time default above; `LANLENS_*` variables
/// override them and are clamped to sane ranges.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    pub arp_cache_max_entries: usize,
    pub arp_cache_ttl_secs: u64,
    pub description_cache_ttl_secs: u64,
    pub remote_cache_ttl_secs: u64,
    pub cache_prune_interval_secs: u64,
    pub description_timeout_ms: u64,
    pub remote_timeout_ms: u64,
    pub banner_timeout_ms: u64,
    pub tcp_probe_timeout_ms: u64,
    pub max_concurrent_probes: usize,
    pub quick_scan_ports: Vec<u16>,
    pub full_scan_ports: Vec<u16>,
    pub event_debounce_ms: u64,
    pub behavior_history_limit: usize,
    pub behavior_profile_cache_limit: usize,
    pub behavior_min_observations: u64,
    pub behavior_utc_offset_minutes: i32,
    pub fingerbank_endpoint: String,
    /// Remote fingerprinting is only attempted when a key is configured.
    #[serde(skip_serializing)]
    pub fingerbank_api_key: Option<String>,
    pub db_path: PathBuf,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            arp_cache_max_entries: ARP_CACHE_MAX_ENTRIES,
            arp_cache_ttl_secs: ARP_CACHE_TTL_SECS,
            description_cache_ttl_secs: DESCRIPTION_CACHE_TTL_SECS,
            remote_cache_ttl_secs: REMOTE_CACHE_TTL_SECS,
            cache_prune_interval_secs: CACHE_PRUNE_INTERVAL_SECS,
            description_timeout_ms: DESCRIPTION_FETCH_TIMEOUT.as_millis() as u64,
            remote_timeout_ms: REMOTE_LOOKUP_TIMEOUT.as_millis() as u64,
            banner_timeout_ms: BANNER_TIMEOUT.as_millis() as u64,
            tcp_probe_timeout_ms: TCP_PROBE_TIMEOUT.as_millis() as u64,
            max_concurrent_probes: MAX_CONCURRENT_PROBES,
            quick_scan_ports: QUICK_SCAN_PORTS.to_vec(),
            full_scan_ports: FULL_SCAN_PORTS.to_vec(),
            event_debounce_ms: EVENT_DEBOUNCE_MS,
            behavior_history_limit: BEHAVIOR_HISTORY_LIMIT,
            behavior_profile_cache_limit: BEHAVIOR_PROFILE_CACHE_LIMIT,
            behavior_min_observations: BEHAVIOR_MIN_OBSERVATIONS,
            behavior_utc_offset_minutes: 0,
            fingerbank_endpoint: FINGERBANK_ENDPOINT.to_string(),
            fingerbank_api_key: None,
            db_path: crate::database::Database::default_path(),
        }
    }
}

impl EngineSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            arp_cache_max_entries: env_parse_usize(
                "LANLENS_ARP_CACHE_MAX_ENTRIES",
                ARP_CACHE_MAX_ENTRIES,
                16,
                65_536,
            ),
            arp_cache_ttl_secs: env_parse_u64(
                "LANLENS_ARP_CACHE_TTL_SECS",
                ARP_CACHE_TTL_SECS,
                5,
                86_400,
            ),
            description_cache_ttl_secs: env_parse_u64(
                "LANLENS_DESCRIPTION_CACHE_TTL_SECS",
                DESCRIPTION_CACHE_TTL_SECS,
                60,
                90 * 86_400,
            ),
            remote_cache_ttl_secs: env_parse_u64(
                "LANLENS_REMOTE_CACHE_TTL_SECS",
                REMOTE_CACHE_TTL_SECS,
                3600,
                365 * 86_400,
            ),
            cache_prune_interval_secs: env_parse_u64(
                "LANLENS_CACHE_PRUNE_INTERVAL_SECS",
                CACHE_PRUNE_INTERVAL_SECS,
                5,
                3600,
            ),
            description_timeout_ms: env_parse_u64(
                "LANLENS_DESCRIPTION_TIMEOUT_MS",
                defaults.description_timeout_ms,
                500,
                5_000,
            ),
            remote_timeout_ms: env_parse_u64(
                "LANLENS_REMOTE_TIMEOUT_MS",
                defaults.remote_timeout_ms,
                500,
                30_000,
            ),
            banner_timeout_ms: env_parse_u64(
                "LANLENS_BANNER_TIMEOUT_MS",
                defaults.banner_timeout_ms,
                200,
                5_000,
            ),
            tcp_probe_timeout_ms: env_parse_u64(
                "LANLENS_TCP_PROBE_TIMEOUT_MS",
                defaults.tcp_probe_timeout_ms,
                50,
                5_000,
            ),
            max_concurrent_probes: env_parse_usize(
                "LANLENS_MAX_CONCURRENT_PROBES",
                MAX_CONCURRENT_PROBES,
                1,
                1024,
            ),
            quick_scan_ports: env_parse_ports("LANLENS_QUICK_SCAN_PORTS", QUICK_SCAN_PORTS),
            full_scan_ports: env_parse_ports("LANLENS_FULL_SCAN_PORTS", FULL_SCAN_PORTS),
            event_debounce_ms: env_parse_u64(
                "LANLENS_EVENT_DEBOUNCE_MS",
                EVENT_DEBOUNCE_MS,
                10,
                5_000,
            ),
            behavior_history_limit: env_parse_usize(
                "LANLENS_BEHAVIOR_HISTORY_LIMIT",
                BEHAVIOR_HISTORY_LIMIT,
                10,
                10_000,
            ),
            behavior_profile_cache_limit: env_parse_usize(
                "LANLENS_BEHAVIOR_PROFILE_CACHE_LIMIT",
                BEHAVIOR_PROFILE_CACHE_LIMIT,
                1,
                100_000,
            ),
            behavior_min_observations: env_parse_u64(
                "LANLENS_BEHAVIOR_MIN_OBSERVATIONS",
                BEHAVIOR_MIN_OBSERVATIONS,
                1,
                1_000,
            ),
            behavior_utc_offset_minutes: env_parse_i32(
                "LANLENS_BEHAVIOR_UTC_OFFSET_MINUTES",
                local_utc_offset_minutes(),
                -14 * 60,
                14 * 60,
            ),
            fingerbank_endpoint: env_var("LANLENS_FINGERBANK_ENDPOINT")
                .unwrap_or_else(|| FINGERBANK_ENDPOINT.to_string()),
            fingerbank_api_key: env_var("LANLENS_FINGERBANK_API_KEY"),
            db_path: env_var("LANLENS_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),
        }
    }

    pub fn description_timeout(&self) -> Duration {
        Duration::from_millis(self.description_timeout_ms)
    }

    pub fn remote_timeout(&self) -> Duration {
        Duration::from_millis(self.remote_timeout_ms)
    }

    pub fn banner_timeout(&self) -> Duration {
        Duration::from_millis(self.banner_timeout_ms)
    }

    pub fn tcp_probe_timeout(&self) -> Duration {
        Duration::from_millis(self.tcp_probe_timeout_ms)
    }

    pub fn event_debounce(&self) -> Duration {
        Duration::from_millis(self.event_debounce_ms)
    }

    pub fn arp_cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.arp_cache_ttl_secs as i64)
    }

    pub fn description_cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.description_cache_ttl_secs as i64)
    }

    pub fn remote_cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.remote_cache_ttl_secs as i64)
    }

    pub fn remote_enabled(&self) -> bool {
        self.fingerbank_api_key.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_limits() {
        let settings = EngineSettings::default();
        assert_eq!(settings.arp_cache_max_entries, 500);
        assert_eq!(settings.remote_cache_ttl_secs, 30 * 24 * 3600);
        assert_eq!(settings.behavior_profile_cache_limit, 1000);
        assert_eq!(settings.behavior_history_limit, 100);
        assert_eq!(settings.event_debounce_ms, 100);
        assert!(!settings.remote_enabled());
    }

    #[test]
    fn probe_timeouts_stay_short() {
        let settings = EngineSettings::default();
        assert!(settings.description_timeout() <= Duration::from_secs(5));
        assert!(settings.banner_timeout() <= Duration::from_secs(5));
    }

    #[test]
    fn api_key_is_never_serialized() {
        let settings = EngineSettings {
            fingerbank_api_key: Some("secret".to_string()),
            ..EngineSettings::default()
        };
        let json = serde_json::to_string(&settings).unwrap();
        assert!(!json.contains("secret"));
    }
}
