//! MAC address vendor lookup using the OUI database
//!
//! Also derives the MAC-analysis flags consumed by the inference rules.

use mac_oui::Oui;
use std::sync::OnceLock;

use crate::models::MacAddress;

/// Global OUI database instance (loaded once)
static OUI_DB: OnceLock<Option<Oui>> = OnceLock::new();

fn get_oui_db() -> Option<&'static Oui> {
    OUI_DB
        .get_or_init(|| match Oui::default() {
            Ok(db) => Some(db),
            Err(e) => {
                tracing::warn!("OUI database unavailable, vendor lookup disabled: {}", e);
                None
            }
        })
        .as_ref()
}

/// Facts derived from the MAC address alone
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MacAnalysis {
    pub vendor: Option<String>,
    /// Locally administered bit set (randomized / private address)
    pub is_randomized: bool,
    /// OUI belongs to a hypervisor or container runtime
    pub is_virtual: bool,
}

const VIRTUAL_OUIS: &[&str] = &[
    "00:05:69", "00:0C:29", "00:1C:14", "00:50:56", // VMware
    "08:00:27", "0A:00:27", // VirtualBox
    "00:15:5D", // Hyper-V
    "52:54:00", // QEMU/KVM
    "02:42:AC", // Docker bridge
    "00:16:3E", // Xen
];

/// Look up the vendor/manufacturer for a MAC address.
///
/// Randomized addresses have no meaningful OUI and return `None`.
pub fn lookup_vendor(mac: &MacAddress) -> Option<String> {
    if mac.is_locally_administered() {
        return None;
    }

    let db = get_oui_db()?;
    match db.lookup_by_mac(mac.as_str()) {
        Ok(Some(entry)) => Some(entry.company_name.clone()),
        _ => None,
    }
}

/// Analyze a MAC address: vendor plus randomization/virtualization flags.
pub fn analyze_mac(mac: &MacAddress) -> MacAnalysis {
    MacAnalysis {
        vendor: lookup_vendor(mac),
        is_randomized: mac.is_locally_administered(),
        is_virtual: VIRTUAL_OUIS.contains(&mac.oui()),
    }
}
