//! Signal-based device type inference
//!
//! Signals produced by the rule tables are combined by weighted voting
//! into a single device type plus a normalized confidence.

mod engine;
mod rules;

pub use engine::{Inference, MAX_SOURCE_WEIGHT, infer, infer_with_confidence, source_weight};
pub use rules::{
    signals_from_banners, signals_from_behavior, signals_from_fingerprint, signals_from_hostname,
    signals_from_mac_analysis, signals_from_mdns, signals_from_port_results, signals_from_ports,
    signals_from_ssdp,
};
