use thiserror::Error;

use crate::models::MacAddress;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("invalid MAC address: {0:?}")]
    InvalidMac(String),
    #[error("unknown device {0}")]
    UnknownDevice(MacAddress),
}
