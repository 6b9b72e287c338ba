//! lanlens: local network device discovery, fingerprinting and classification
//!
//! This crate provides:
//! - A single-writer device registry with debounced update events
//! - Discovery from the ARP table, passive ARP, mDNS/DNS-SD and SSDP
//! - TCP port probing and banner grabbing
//! - Weighted signal-based device type inference
//! - UPnP, Fingerbank and offline fingerprint resolution with caching
//! - Behavioral presence tracking
//! - SQLite persistence and JSON/CSV exports

pub mod app;
pub mod behavior;
pub mod cache;
mod cli;
mod command_handlers;
pub mod config;
pub mod database;
pub mod exports;
pub mod fingerprint;
pub mod inference;
pub mod logging;
pub mod models;
pub mod network;
pub mod registry;
pub mod scanner;

pub use app::{AppContext, OutputHook, run, run_with};
pub use behavior::{BehaviorClass, BehaviorProfile, BehaviorTracker};
pub use cache::{ArpCache, CacheStats, FingerprintCache, signal_hash};
pub use config::EngineSettings;
pub use database::Database;
pub use exports::{ExportFormat, export_devices};
pub use fingerprint::{FingerprintError, FingerprintPipeline};
pub use inference::{Inference, infer, infer_with_confidence};
pub use models::*;
pub use registry::{
    DeviceRegistry, DeviceUpdate, DiscoveryOrchestrator, PassiveStatus, RegistryError, ScanMode,
    ScanReport, ScanSources, UpdateKind,
};

// Re-export logging macros for use across crate
pub use crate::logging::macros;
