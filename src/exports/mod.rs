//! Device list exports
//!
//! JSON and CSV renderings of the registry's device snapshots.

pub mod csv;
pub mod json;

pub use csv::export_devices_csv;
pub use json::{DeviceExport, export_devices_json};

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Csv,
}

impl ExportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::Csv => "csv",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ExportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(format!("Unsupported export format: {} (expected json or csv)", other)),
        }
    }
}

/// Render devices in the requested format.
pub fn export_devices(devices: &[crate::models::Device], format: ExportFormat) -> anyhow::Result<String> {
    match format {
        ExportFormat::Json => export_devices_json(devices),
        ExportFormat::Csv => export_devices_csv(devices),
    }
}
