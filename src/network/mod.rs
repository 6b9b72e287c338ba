//! Network module - interface detection, vendor lookup, DNS resolution

mod dns;
mod interface;
mod vendor;

pub use dns::{HostnameResolver, ReverseDnsResolver, dns_scan, normalize_hostname, reverse_lookup};
pub use interface::{
    InterfaceInfo, find_interface_by_name, find_valid_interface, interface_score,
    list_valid_interfaces,
};
pub use vendor::{MacAnalysis, analyze_mac, lookup_vendor};
