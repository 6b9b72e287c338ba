//! Fingerprint resolution: UPnP descriptions, the Fingerbank service and
//! bundled offline tables

mod error;
pub mod fingerbank;
pub mod offline;
mod pipeline;
pub mod upnp;

pub use error::FingerprintError;
pub use fingerbank::{FingerbankClient, FingerbankResponse, RemoteFingerprintService, RemoteQuery};
pub use pipeline::{FingerprintPipeline, FingerprintRequest, WarningHook};
pub use upnp::{DescriptionFetcher, HttpDescriptionFetcher, UpnpDescription, parse_description};
