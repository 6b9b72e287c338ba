//! Multi-level fingerprint resolution
//!
//! UPnP description first, then the remote service when the description is
//! missing or incomplete, merged field by field, with the offline tables as
//! the last resort. Every lookup goes through the fingerprint cache.

use chrono::{Duration, Utc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use super::fingerbank::{FingerbankClient, RemoteFingerprintService, RemoteQuery};
use super::offline::offline_fingerprint;
use super::upnp::{DescriptionFetcher, HttpDescriptionFetcher};
use super::FingerprintError;
use crate::cache::{CacheOrigin, CachedLookup, FingerprintCache, signal_hash};
use crate::config::EngineSettings;
use crate::database::FingerprintStore;
use crate::models::{Device, Fingerprint, FingerprintSource, MacAddress, SecondarySignals};
use crate::{log_debug, log_warn};

/// User-visible warning sink (raised at most once per session)
pub type WarningHook = Arc<dyn Fn(&str) + Send + Sync>;

/// Everything the pipeline needs to know about one device
#[derive(Debug, Clone, PartialEq)]
pub struct FingerprintRequest {
    pub mac: MacAddress,
    pub ip: String,
    pub description_url: Option<String>,
    pub secondary: SecondarySignals,
    pub hostname: Option<String>,
    pub vendor: Option<String>,
    /// Bypass both caches
    pub force_refresh: bool,
}

impl FingerprintRequest {
    pub fn from_device(device: &Device) -> Self {
        Self {
            mac: device.mac.clone(),
            ip: device.ip.clone(),
            description_url: device.description_url.clone(),
            secondary: device.secondary.clone(),
            hostname: device.hostname.clone(),
            vendor: device.vendor.clone(),
            force_refresh: false,
        }
    }
}

/// One origin's contribution and whether it came from cache
struct Contribution {
    fingerprint: Fingerprint,
    cache_hit: bool,
}

pub struct FingerprintPipeline {
    description: Arc<dyn DescriptionFetcher>,
    remote: Option<Arc<dyn RemoteFingerprintService>>,
    cache: Arc<FingerprintCache>,
    store: Option<Arc<dyn FingerprintStore>>,
    warning_hook: Option<WarningHook>,
    remote_disabled: AtomicBool,
    warned: AtomicBool,
    description_timeout: std::time::Duration,
    remote_timeout: std::time::Duration,
    description_ttl: Duration,
    remote_ttl: Duration,
}

impl FingerprintPipeline {
    /// Production pipeline: HTTP description fetcher plus Fingerbank when an
    /// API key is configured.
    pub fn from_settings(
        settings: &EngineSettings,
        cache: Arc<FingerprintCache>,
    ) -> Result<Self, FingerprintError> {
        let description: Arc<dyn DescriptionFetcher> =
            Arc::new(HttpDescriptionFetcher::new(settings.description_timeout())?);
        let remote: Option<Arc<dyn RemoteFingerprintService>> = match &settings.fingerbank_api_key {
            Some(key) => Some(Arc::new(FingerbankClient::new(
                settings.fingerbank_endpoint.clone(),
                key.clone(),
                settings.remote_timeout(),
            )?)),
            None => None,
        };

        let mut pipeline = Self::with_services(description, remote, cache);
        pipeline.description_timeout = settings.description_timeout();
        pipeline.remote_timeout = settings.remote_timeout();
        pipeline.description_ttl = settings.description_cache_ttl();
        pipeline.remote_ttl = settings.remote_cache_ttl();
        Ok(pipeline)
    }

    /// Pipeline over arbitrary lookup services, with default timeouts and TTLs.
    pub fn with_services(
        description: Arc<dyn DescriptionFetcher>,
        remote: Option<Arc<dyn RemoteFingerprintService>>,
        cache: Arc<FingerprintCache>,
    ) -> Self {
        let defaults = EngineSettings::default();
        Self {
            description,
            remote,
            cache,
            store: None,
            warning_hook: None,
            remote_disabled: AtomicBool::new(false),
            warned: AtomicBool::new(false),
            description_timeout: defaults.description_timeout(),
            remote_timeout: defaults.remote_timeout(),
            description_ttl: defaults.description_cache_ttl(),
            remote_ttl: defaults.remote_cache_ttl(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn FingerprintStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_warning_hook(mut self, hook: WarningHook) -> Self {
        self.warning_hook = Some(hook);
        self
    }

    pub fn cache(&self) -> &Arc<FingerprintCache> {
        &self.cache
    }

    /// True while a remote service is configured and not disabled.
    pub fn remote_available(&self) -> bool {
        self.remote.is_some() && !self.remote_disabled.load(Ordering::SeqCst)
    }

    /// Resolve a fingerprint; `None` when no origin produced anything.
    pub async fn resolve(&self, request: &FingerprintRequest) -> Option<Fingerprint> {
        let upnp = self.resolve_description(request).await;

        let needs_remote = request.force_refresh
            || upnp
                .as_ref()
                .is_none_or(|c| !c.fingerprint.is_complete());
        let remote = if needs_remote {
            self.resolve_remote(request).await
        } else {
            None
        };

        let merged = match (remote, upnp) {
            (Some(remote), Some(upnp)) => {
                let mut fp = remote.fingerprint;
                fill_missing(&mut fp, &upnp.fingerprint);
                fp.source = FingerprintSource::Both;
                fp.cache_hit = remote.cache_hit && upnp.cache_hit;
                Some(fp)
            }
            (Some(only), None) | (None, Some(only)) => {
                let mut fp = only.fingerprint;
                fp.cache_hit = only.cache_hit;
                Some(fp)
            }
            (None, None) => offline_fingerprint(&request.secondary, request.vendor.as_deref()),
        };

        merged.map(|mut fp| {
            fp.resolved_at = Utc::now();
            fp
        })
    }

    async fn resolve_description(&self, request: &FingerprintRequest) -> Option<Contribution> {
        let url = request.description_url.as_deref()?;

        if !request.force_refresh
            && let Some(CachedLookup::Found(fingerprint)) =
                self.cache.get(&request.mac, CacheOrigin::Description, url)
        {
            return Some(Contribution {
                fingerprint,
                cache_hit: true,
            });
        }

        let fetched = match tokio::time::timeout(self.description_timeout, self.description.fetch(url)).await {
            Ok(result) => result,
            Err(_) => Err(FingerprintError::Timeout),
        };

        match fetched {
            Ok(description) => {
                let fingerprint = description.into_fingerprint();
                self.store_result(
                    &request.mac,
                    CacheOrigin::Description,
                    url,
                    CachedLookup::Found(fingerprint.clone()),
                    self.description_ttl,
                );
                Some(Contribution {
                    fingerprint,
                    cache_hit: false,
                })
            }
            Err(e) => {
                log_debug!("[FINGERPRINT] Description lookup for {} failed: {}", request.mac, e);
                None
            }
        }
    }

    async fn resolve_remote(&self, request: &FingerprintRequest) -> Option<Contribution> {
        let remote = self.remote.as_ref()?;
        if self.remote_disabled.load(Ordering::SeqCst) {
            return None;
        }

        let validator = signal_hash(&request.mac, &request.secondary);
        if !request.force_refresh {
            match self.cache.get(&request.mac, CacheOrigin::Remote, &validator) {
                Some(CachedLookup::Found(fingerprint)) => {
                    return Some(Contribution {
                        fingerprint,
                        cache_hit: true,
                    });
                }
                Some(CachedLookup::NotFound) => return None,
                None => {}
            }
        }

        let query = RemoteQuery {
            mac: request.mac.clone(),
            secondary: request.secondary.clone(),
            hostname: request.hostname.clone(),
        };
        let looked_up = match tokio::time::timeout(self.remote_timeout, remote.lookup(&query)).await {
            Ok(result) => result,
            Err(_) => Err(FingerprintError::Timeout),
        };

        match looked_up {
            Ok(Some(response)) => {
                let fingerprint = response.into_fingerprint();
                self.store_result(
                    &request.mac,
                    CacheOrigin::Remote,
                    &validator,
                    CachedLookup::Found(fingerprint.clone()),
                    self.remote_ttl,
                );
                Some(Contribution {
                    fingerprint,
                    cache_hit: false,
                })
            }
            Ok(None) => {
                self.store_result(
                    &request.mac,
                    CacheOrigin::Remote,
                    &validator,
                    CachedLookup::NotFound,
                    self.remote_ttl,
                );
                None
            }
            Err(e) if e.disables_remote() => {
                self.disable_remote(&e);
                None
            }
            Err(e) => {
                log_debug!("[FINGERPRINT] Remote lookup for {} failed: {}", request.mac, e);
                None
            }
        }
    }

    fn disable_remote(&self, reason: &FingerprintError) {
        self.remote_disabled.store(true, Ordering::SeqCst);
        if !self.warned.swap(true, Ordering::SeqCst) {
            let message = format!(
                "Remote fingerprinting disabled for this session: {}",
                reason
            );
            log_warn!("[FINGERPRINT] {}", message);
            if let Some(hook) = &self.warning_hook {
                hook(&message);
            }
        }
    }

    fn store_result(
        &self,
        mac: &MacAddress,
        origin: CacheOrigin,
        validator: &str,
        value: CachedLookup,
        ttl: Duration,
    ) {
        self.cache.put(mac, origin, validator, value, ttl);
        if let Some(store) = &self.store
            && let Some(entry) = self.cache.stored_entry(mac, origin)
            && let Err(e) = store.save_fingerprint_entry(&entry)
        {
            log_warn!("Failed to persist {} cache entry for {}: {}", origin, mac, e);
        }
    }
}

/// Copy fields `target` lacks from a lower-priority fingerprint.
fn fill_missing(target: &mut Fingerprint, lower: &Fingerprint) {
    fn fill(slot: &mut Option<String>, value: &Option<String>) {
        if slot.is_none() {
            slot.clone_from(value);
        }
    }
    fill(&mut target.manufacturer, &lower.manufacturer);
    fill(&mut target.model, &lower.model);
    fill(&mut target.model_number, &lower.model_number);
    fill(&mut target.friendly_name, &lower.friendly_name);
    fill(&mut target.os, &lower.os);
    fill(&mut target.os_version, &lower.os_version);
    fill(&mut target.device_hierarchy, &lower.device_hierarchy);
    fill(&mut target.upnp_device_type, &lower.upnp_device_type);
    if target.fingerbank_score.is_none() {
        target.fingerbank_score = lower.fingerbank_score;
    }
}
