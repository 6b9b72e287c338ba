//! Fingerbank remote fingerprinting client
//!
//! Queries the `combinations/interrogate` endpoint with the device MAC and
//! whatever secondary signals have been observed.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use super::FingerprintError;
use crate::models::{Fingerprint, FingerprintSource, MacAddress, SecondarySignals};

/// What is sent to the remote service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteQuery {
    pub mac: MacAddress,
    pub secondary: SecondarySignals,
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerbankNamed {
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerbankDevice {
    #[serde(default)]
    pub name: Option<String>,
    /// Most specific parent first
    #[serde(default)]
    pub parents: Vec<FingerbankNamed>,
}

/// Subset of the interrogate response that feeds a fingerprint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerbankResponse {
    #[serde(default)]
    pub device: Option<FingerbankDevice>,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub score: Option<u32>,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub manufacturer: Option<FingerbankNamed>,
    #[serde(default)]
    pub operating_system: Option<FingerbankNamed>,
}

impl FingerbankResponse {
    /// `Parent/Child/Device`, most generic first
    pub fn hierarchy(&self) -> Option<String> {
        let device = self.device.as_ref()?;
        let mut names: Vec<&str> = device
            .parents
            .iter()
            .rev()
            .filter_map(|p| p.name.as_deref())
            .collect();
        if let Some(name) = device.name.as_deref() {
            names.push(name);
        }
        if names.is_empty() {
            None
        } else {
            Some(names.join("/"))
        }
    }

    pub fn into_fingerprint(self) -> Fingerprint {
        let mut fp = Fingerprint::empty(FingerprintSource::Fingerbank);
        fp.device_hierarchy = self.hierarchy().or_else(|| self.device_name.clone());
        fp.model = self
            .device
            .as_ref()
            .and_then(|d| d.name.clone())
            .or_else(|| self.device_name.clone());
        fp.manufacturer = self.manufacturer.and_then(|m| m.name);
        fp.os = self
            .operating_system
            .and_then(|os| os.name)
            .or_else(|| {
                // Top-level Fingerbank families name the OS for phones/computers.
                fp.device_hierarchy
                    .as_deref()
                    .and_then(|h| h.split('/').nth(1))
                    .filter(|family| is_os_family(family))
                    .map(str::to_string)
            });
        fp.os_version = self.version;
        fp.fingerbank_score = self.score;
        fp
    }
}

fn is_os_family(name: &str) -> bool {
    let lower = name.to_lowercase();
    ["windows", "mac os", "macos", "ios", "android", "linux", "chrome os"]
        .iter()
        .any(|os| lower.contains(os))
}

/// Remote fingerprint lookup. `Ok(None)` is an authoritative "not found".
pub trait RemoteFingerprintService: Send + Sync {
    fn lookup<'a>(
        &'a self,
        query: &'a RemoteQuery,
    ) -> Pin<Box<dyn Future<Output = Result<Option<FingerbankResponse>, FingerprintError>> + Send + 'a>>;
}

#[derive(Debug, Clone)]
pub struct FingerbankClient {
    client: Client,
    endpoint: String,
    api_key: String,
}

impl FingerbankClient {
    pub fn new(endpoint: String, api_key: String, timeout: Duration) -> Result<Self, FingerprintError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            endpoint,
            api_key,
        })
    }

    fn query_params(&self, query: &RemoteQuery) -> Vec<(String, String)> {
        let mut params = vec![
            ("key".to_string(), self.api_key.clone()),
            ("mac".to_string(), query.mac.as_str().to_lowercase()),
        ];
        if let Some(dhcp) = query.secondary.dhcp_fingerprint.as_deref() {
            params.push(("dhcp_fingerprint".to_string(), dhcp.to_string()));
        }
        for agent in &query.secondary.user_agents {
            params.push(("user_agents[]".to_string(), agent.clone()));
        }
        if let Some(hostname) = query.hostname.as_deref() {
            params.push(("hostname".to_string(), hostname.to_string()));
        }
        params
    }
}

impl RemoteFingerprintService for FingerbankClient {
    fn lookup<'a>(
        &'a self,
        query: &'a RemoteQuery,
    ) -> Pin<Box<dyn Future<Output = Result<Option<FingerbankResponse>, FingerprintError>> + Send + 'a>> {
        Box::pin(async move {
            let url = format!(
                "{}/api/v2/combinations/interrogate",
                self.endpoint.trim_end_matches('/')
            );
            let response = self
                .client
                .get(url)
                .query(&self.query_params(query))
                .send()
                .await?;

            match response.status() {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                    Err(FingerprintError::InvalidCredentials)
                }
                StatusCode::TOO_MANY_REQUESTS => Err(FingerprintError::RateLimited),
                StatusCode::NOT_FOUND => Ok(None),
                status if status.is_success() => {
                    let body = response.text().await?;
                    serde_json::from_str::<FingerbankResponse>(&body)
                        .map(Some)
                        .map_err(|e| FingerprintError::Malformed(e.to_string()))
                }
                status => Err(FingerprintError::HttpStatus(status.as_u16())),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "device": {
            "id": 33,
            "name": "Apple iPhone",
            "parents": [
                {"id": 20, "name": "Apple iOS"},
                {"id": 1, "name": "Phone, Tablet or Wearable"}
            ]
        },
        "device_name": "Phone, Tablet or Wearable/Apple iOS/Apple iPhone",
        "score": 87,
        "version": "17",
        "manufacturer": {"id": 5, "name": "Apple, Inc."},
        "unknown_field": true
    }"#;

    #[test]
    fn parses_interrogate_response() {
        let response: FingerbankResponse = serde_json::from_str(SAMPLE).unwrap();
        assert_eq!(
            response.hierarchy().as_deref(),
            Some("Phone, Tablet or Wearable/Apple iOS/Apple iPhone")
        );
        let fp = response.into_fingerprint();
        assert_eq!(fp.source, FingerprintSource::Fingerbank);
        assert_eq!(fp.model.as_deref(), Some("Apple iPhone"));
        assert_eq!(fp.manufacturer.as_deref(), Some("Apple, Inc."));
        assert_eq!(fp.os.as_deref(), Some("Apple iOS"));
        assert_eq!(fp.os_version.as_deref(), Some("17"));
        assert_eq!(fp.fingerbank_score, Some(87));
        assert!(fp.is_complete());
    }

    #[test]
    fn empty_response_has_no_hierarchy() {
        let response: FingerbankResponse = serde_json::from_str("{}").unwrap();
        assert!(response.hierarchy().is_none());
        assert!(!response.into_fingerprint().has_content());
    }

    #[test]
    fn query_includes_secondary_signals() {
        let client = FingerbankClient::new(
            "https://fingerbank.invalid".into(),
            "k".into(),
            Duration::from_secs(1),
        )
        .unwrap();
        let mut secondary = SecondarySignals::default();
        secondary.dhcp_fingerprint = Some("1,3,6".into());
        secondary.user_agents.insert("UA".into());
        let query = RemoteQuery {
            mac: MacAddress::parse("AA:BB:CC:00:00:01").unwrap(),
            secondary,
            hostname: None,
        };
        let params = client.query_params(&query);
        assert!(params.contains(&("mac".to_string(), "aa:bb:cc:00:00:01".to_string())));
        assert!(params.contains(&("dhcp_fingerprint".to_string(), "1,3,6".to_string())));
        assert!(params.contains(&("user_agents[]".to_string(), "UA".to_string())));
    }
}
