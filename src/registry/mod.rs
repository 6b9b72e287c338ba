//! Device registry, update events and discovery orchestration

mod device_registry;
mod error;
mod events;
mod orchestrator;

pub use device_registry::DeviceRegistry;
pub use error::RegistryError;
pub use events::{DeviceUpdate, EventBus, ObserverId, UpdateCallback, UpdateKind};
pub use orchestrator::{
    DiscoveryOrchestrator, EngineCacheStats, PassiveStatus, ScanFailure, ScanMode, ScanReport,
    ScanSources,
};
