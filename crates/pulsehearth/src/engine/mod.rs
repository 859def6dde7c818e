mod config_entries;
mod device;
// Private module - allowed by clippy.toml allow-private-module-inception
#[allow(clippy::module_inception)]
mod engine;
mod entity;
mod integration;
mod message;
pub mod state;

pub use config_entries::ConfigEntries;
pub use config_entries::ConfigEntry;
pub use config_entries::EntryError;
pub use config_entries::EntryMap;
pub use config_entries::EntrySource;
pub use config_entries::EntryState;
pub use device::DeviceInfo;
pub use engine::Engine;
pub use engine::EngineError;
pub use entity::Entity;
pub use entity::Platform;
pub use integration::ConfigFlow;
pub use integration::FlowError;
pub use integration::FlowResult;
pub use integration::FromIntegrationSender;
pub use integration::Integration;
pub use integration::IntegrationContext;
pub use integration::IntegrationFactory;
pub use integration::IntegrationFactoryResult;
pub use integration::REGISTRY as INTEGRATION_REGISTRY;
pub use message::AlarmCommand;
pub use message::AlarmCommandError;
pub use message::FromIntegrationMessage;
pub use message::ToIntegrationMessage;
pub use state::State;
