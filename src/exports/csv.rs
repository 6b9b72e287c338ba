//! CSV export functionality
//!
//! One row per device, ports and sources joined with `;`.

use crate::models::Device;
use anyhow::Result;
use csv::Writer;

fn join<I, T>(items: I) -> String
where
    I: IntoIterator<Item = T>,
    T: ToString,
{
    items
        .into_iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join(";")
}

/// Export devices to CSV format
pub fn export_devices_csv(devices: &[Device]) -> Result<String> {
    let mut writer = Writer::from_writer(vec![]);

    writer.write_record([
        "IP Address",
        "MAC Address",
        "Name",
        "Hostname",
        "Vendor",
        "Device Type",
        "Confidence",
        "Smart Score",
        "Manufacturer",
        "Model",
        "Operating System",
        "Open Ports",
        "Sources",
        "First Seen",
        "Last Seen",
        "Status",
    ])?;

    for device in devices {
        let fp = device.fingerprint.as_ref();
        let status = if device.is_online { "Online" } else { "Offline" };
        let confidence = format!("{:.2}", device.confidence);
        let smart_score = device.smart_score.to_string();
        let ports = join(device.port_numbers());
        let sources = join(&device.sources);
        let first_seen = device.first_seen.to_rfc3339();
        let last_seen = device.last_seen.to_rfc3339();
        writer.write_record([
            device.ip.as_str(),
            device.mac.as_str(),
            device.display_name(),
            device.hostname.as_deref().unwrap_or(""),
            device.vendor.as_deref().unwrap_or("Unknown"),
            device.device_type.as_str(),
            confidence.as_str(),
            smart_score.as_str(),
            fp.and_then(|f| f.manufacturer.as_deref()).unwrap_or(""),
            fp.and_then(|f| f.model.as_deref()).unwrap_or(""),
            fp.and_then(|f| f.os.as_deref()).unwrap_or(""),
            ports.as_str(),
            sources.as_str(),
            first_seen.as_str(),
            last_seen.as_str(),
            status,
        ])?;
    }

    let csv_data = String::from_utf8(writer.into_inner()?)?;
    Ok(csv_data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MacAddress, PortScanResult};
    use chrono::Utc;

    #[test]
    fn writes_header_and_quoted_rows() {
        let mac = MacAddress::parse("aa:bb:cc:00:00:01").unwrap();
        let mut device = Device::new(mac, "10.0.0.1".into(), Utc::now());
        device.user_label = Some("Printer, upstairs".into());
        device.open_ports = vec![PortScanResult::tcp(631), PortScanResult::tcp(9100)];
        device.sources.insert("arp".into());

        let csv = export_devices_csv(&[device]).unwrap();
        let mut lines = csv.lines();
        assert!(lines.next().unwrap().starts_with("IP Address,MAC Address,Name"));
        let row = lines.next().unwrap();
        assert!(row.contains("\"Printer, upstairs\""));
        assert!(row.contains("631;9100"));
        assert!(row.ends_with("Online"));
    }
}
