//! Reverse DNS hostname resolution
//!
//! `dns_lookup` is synchronous, so lookups run on the blocking pool with a
//! hard timeout each.

use dns_lookup::lookup_addr;
use std::collections::HashMap;
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::{log_debug, log_warn};

/// Maximum concurrent DNS lookups
const MAX_CONCURRENT_DNS: usize = 10;

/// Per-lookup timeout
const DNS_TIMEOUT: Duration = Duration::from_secs(2);

/// Names that carry no information about the device
fn is_useless_hostname(hostname: &str, ip: Ipv4Addr) -> bool {
    let lower = hostname.trim_end_matches('.').to_lowercase();
    lower.is_empty() || lower == ip.to_string() || lower == "localhost"
}

/// Strip the trailing dot and local search domains (`tv.local.` -> `tv`).
pub fn normalize_hostname(hostname: &str) -> String {
    let trimmed = hostname.trim().trim_end_matches('.');
    for suffix in [".local", ".lan", ".home", ".localdomain"] {
        if let Some(stripped) = trimmed.strip_suffix(suffix)
            && !stripped.is_empty()
        {
            return stripped.to_string();
        }
    }
    trimmed.to_string()
}

/// Perform reverse DNS lookup for a single IP address
pub fn reverse_lookup(ip: Ipv4Addr) -> Option<String> {
    match lookup_addr(&IpAddr::V4(ip)) {
        Ok(hostname) if !is_useless_hostname(&hostname, ip) => Some(normalize_hostname(&hostname)),
        _ => None,
    }
}

/// Reverse-resolve many addresses concurrently; unresolvable ones are omitted.
pub async fn dns_scan(ips: &[Ipv4Addr]) -> HashMap<Ipv4Addr, String> {
    let mut resolved = HashMap::new();
    if ips.is_empty() {
        return resolved;
    }

    log_debug!("Reverse DNS lookup for {} hosts...", ips.len());

    let semaphore = Arc::new(Semaphore::new(MAX_CONCURRENT_DNS));
    let mut tasks = JoinSet::new();

    for &ip in ips {
        let semaphore = Arc::clone(&semaphore);
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok()?;
            match tokio::time::timeout(
                DNS_TIMEOUT,
                tokio::task::spawn_blocking(move || reverse_lookup(ip)),
            )
            .await
            {
                Ok(Ok(name)) => name.map(|n| (ip, n)),
                Ok(Err(e)) => {
                    log_warn!("DNS worker join failed for {}: {}", ip, e);
                    None
                }
                Err(_) => None,
            }
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Some((ip, hostname))) => {
                resolved.insert(ip, hostname);
            }
            Ok(None) => {}
            Err(e) => log_warn!("DNS scan task failed: {}", e),
        }
    }

    log_debug!("Reverse DNS complete: {} hostnames resolved", resolved.len());
    resolved
}

/// Hostname lookup seam used by full scans
pub trait HostnameResolver: Send + Sync {
    fn resolve<'a>(
        &'a self,
        ips: &'a [Ipv4Addr],
    ) -> Pin<Box<dyn Future<Output = HashMap<Ipv4Addr, String>> + Send + 'a>>;
}

/// System resolver (PTR lookups through `dns_lookup`)
#[derive(Debug, Clone, Default)]
pub struct ReverseDnsResolver;

impl HostnameResolver for ReverseDnsResolver {
    fn resolve<'a>(
        &'a self,
        ips: &'a [Ipv4Addr],
    ) -> Pin<Box<dyn Future<Output = HashMap<Ipv4Addr, String>> + Send + 'a>> {
        Box::pin(dns_scan(ips))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_hostname_strips_local_suffixes() {
        assert_eq!(normalize_hostname("living-room-tv.local."), "living-room-tv");
        assert_eq!(normalize_hostname("nas.lan"), "nas");
        assert_eq!(normalize_hostname("printer"), "printer");
        assert_eq!(normalize_hostname(".local"), ".local");
    }

    #[test]
    fn test_ip_echo_is_useless() {
        let ip = Ipv4Addr::new(192, 168, 1, 9);
        assert!(is_useless_hostname("192.168.1.9", ip));
        assert!(is_useless_hostname("localhost.", ip));
        assert!(!is_useless_hostname("nas", ip));
    }

    #[tokio::test]
    async fn test_dns_scan_empty_input() {
        assert!(dns_scan(&[]).await.is_empty());
    }
}
