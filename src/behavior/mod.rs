//! Behavioral presence tracking
//!
//! Online/offline samples per device are folded into a profile whose uptime
//! and daily rhythm classify the device's role on the network.

mod profile;
mod tracker;

pub use profile::{BehaviorClass, BehaviorProfile};
pub use tracker::BehaviorTracker;
