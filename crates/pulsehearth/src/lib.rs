pub mod api;
pub mod config;
mod engine;
mod integrations;

pub use config::Config;
pub use config::ConfigError;
pub use config::Diagnostic;
pub use config::LogLevel;
pub use config::format_diagnostics;
pub use config::render_diagnostics;
pub use engine::AlarmCommand;
pub use engine::AlarmCommandError;
pub use engine::ConfigEntries;
pub use engine::ConfigEntry;
pub use engine::Engine;
pub use engine::EngineError;
pub use engine::EntryError;
pub use engine::EntryMap;
pub use engine::EntryState;
pub use engine::FlowError;
pub use engine::State;
pub use engine::state;
