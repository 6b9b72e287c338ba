//! Source adapters: ARP table, TCP probes, SSDP and passive listeners

mod arp_table;
pub mod passive;
mod ssdp;
mod tcp;

pub use arp_table::{ArpTableSource, SystemArpTable, parse_arp_a, parse_proc_net_arp};
pub use passive::{ArpMonitor, MdnsObservation, PassiveScanner};
pub use ssdp::{SsdpListener, parse_ssdp_message, ssdp_search};
pub use tcp::{PortProber, ProbeOutcome, TcpPortProber, describe_port, server_header};
