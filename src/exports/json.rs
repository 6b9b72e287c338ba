//! JSON export functionality

use crate::models::Device;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Export envelope
#[derive(Debug, Serialize)]
pub struct DeviceExport<'a> {
    pub export_date: DateTime<Utc>,
    pub total_devices: usize,
    pub online_devices: usize,
    pub devices: &'a [Device],
}

/// Export devices to pretty-printed JSON
pub fn export_devices_json(devices: &[Device]) -> Result<String> {
    let export = DeviceExport {
        export_date: Utc::now(),
        total_devices: devices.len(),
        online_devices: devices.iter().filter(|d| d.is_online).count(),
        devices,
    };
    Ok(serde_json::to_string_pretty(&export)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MacAddress;

    #[test]
    fn envelope_counts_devices() {
        let a = Device::new(MacAddress::parse("aa:bb:cc:00:00:01").unwrap(), "10.0.0.1".into(), Utc::now());
        let mut b = Device::new(MacAddress::parse("aa:bb:cc:00:00:02").unwrap(), "10.0.0.2".into(), Utc::now());
        b.is_online = false;

        let json = export_devices_json(&[a, b]).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["total_devices"], 2);
        assert_eq!(value["online_devices"], 1);
        assert_eq!(value["devices"][0]["mac"], "AA:BB:CC:00:00:01");
        assert_eq!(value["devices"][1]["device_type"], "UNKNOWN");
    }
}
