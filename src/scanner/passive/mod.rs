//! Passive listeners: ARP traffic and mDNS announcements

mod arp;
mod mdns;

pub use arp::{ArpMonitor, parse_arp_frame};
pub use mdns::{MdnsObservation, PassiveScanner, service_record};
