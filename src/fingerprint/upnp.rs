//! UPnP device description fetcher
//!
//! Fetches the XML document an SSDP `LOCATION` header points at and pulls
//! the identification fields out of the first `<device>` element.

use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::OnceLock;
use std::time::Duration;

use super::FingerprintError;
use crate::models::{Fingerprint, FingerprintSource};

/// Upper bound on description documents we are willing to parse
const MAX_DESCRIPTION_BYTES: usize = 256 * 1024;

/// Identification fields of a UPnP root device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpnpDescription {
    pub device_type: Option<String>,
    pub friendly_name: Option<String>,
    pub manufacturer: Option<String>,
    pub model_name: Option<String>,
    pub model_number: Option<String>,
    pub model_description: Option<String>,
}

impl UpnpDescription {
    pub fn into_fingerprint(self) -> Fingerprint {
        let mut fp = Fingerprint::empty(FingerprintSource::Upnp);
        fp.manufacturer = self.manufacturer;
        fp.model = self.model_name.or(self.model_description);
        fp.model_number = self.model_number;
        fp.friendly_name = self.friendly_name;
        fp.upnp_device_type = self.device_type;
        fp
    }
}

/// Source of UPnP description documents
pub trait DescriptionFetcher: Send + Sync {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<UpnpDescription, FingerprintError>> + Send + 'a>>;
}

fn tag_regex(tag: &str) -> Option<Regex> {
    Regex::new(&format!(r"(?is)<(?:\w+:)?{tag}\s*>\s*([^<]*?)\s*</(?:\w+:)?{tag}\s*>")).ok()
}

struct TagPatterns {
    device_type: Option<Regex>,
    friendly_name: Option<Regex>,
    manufacturer: Option<Regex>,
    model_name: Option<Regex>,
    model_number: Option<Regex>,
    model_description: Option<Regex>,
}

fn patterns() -> &'static TagPatterns {
    static PATTERNS: OnceLock<TagPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| TagPatterns {
        device_type: tag_regex("deviceType"),
        friendly_name: tag_regex("friendlyName"),
        manufacturer: tag_regex("manufacturer"),
        model_name: tag_regex("modelName"),
        model_number: tag_regex("modelNumber"),
        model_description: tag_regex("modelDescription"),
    })
}

fn decode_entities(raw: &str) -> String {
    raw.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn capture(re: &Option<Regex>, xml: &str) -> Option<String> {
    re.as_ref()?
        .captures(xml)
        .and_then(|c| c.get(1))
        .map(|m| decode_entities(m.as_str().trim()))
        .filter(|v| !v.is_empty())
}

/// Parse a description document.
///
/// Fails with `Malformed` when the document has no `<device>` element or
/// carries none of the identification fields.
pub fn parse_description(xml: &str) -> Result<UpnpDescription, FingerprintError> {
    let lower = xml.to_ascii_lowercase();
    let start = lower
        .find("<device>")
        .or_else(|| lower.find("<device "))
        .ok_or_else(|| FingerprintError::Malformed("missing <device> element".to_string()))?;
    // Embedded devices repeat these tags; only the root device counts.
    let root = &xml[start..];

    let p = patterns();
    let description = UpnpDescription {
        device_type: capture(&p.device_type, root),
        friendly_name: capture(&p.friendly_name, root),
        manufacturer: capture(&p.manufacturer, root),
        model_name: capture(&p.model_name, root),
        model_number: capture(&p.model_number, root),
        model_description: capture(&p.model_description, root),
    };

    if description == UpnpDescription::default() {
        return Err(FingerprintError::Malformed(
            "description carries no identification fields".to_string(),
        ));
    }
    Ok(description)
}

/// Plain HTTP fetcher used in production
#[derive(Debug, Clone)]
pub struct HttpDescriptionFetcher {
    client: Client,
}

impl HttpDescriptionFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FingerprintError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

impl DescriptionFetcher for HttpDescriptionFetcher {
    fn fetch<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<UpnpDescription, FingerprintError>> + Send + 'a>> {
        Box::pin(async move {
            let response = self.client.get(url).send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(FingerprintError::HttpStatus(status.as_u16()));
            }
            let body = response.text().await?;
            if body.len() > MAX_DESCRIPTION_BYTES {
                return Err(FingerprintError::Malformed(format!(
                    "description too large ({} bytes)",
                    body.len()
                )));
            }
            parse_description(&body)
        })
    }
}
