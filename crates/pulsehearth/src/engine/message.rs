//! Type-safe message system for pulsehearth
//!
//! Messages are split by direction to enforce correct usage at compile time:
//! - `FromIntegrationMessage`: Events from integrations to the engine
//! - `ToIntegrationMessage`: Commands from the engine to integrations

use std::str::FromStr;

use tokio::sync::oneshot;

use super::device::DeviceInfo;
use super::state::EntityState;
use super::state::Notification;

/// Messages FROM integrations TO the engine (events/state updates)
#[derive(Debug)]
pub enum FromIntegrationMessage {
    /// An entity was discovered and registered
    EntityDiscovered {
        entity_id: String,
        integration_name: String,
        device: Option<DeviceInfo>,
        state: EntityState,
    },

    /// An entity went away (zone deleted from the account, etc.)
    EntityRemoved { entity_id: String },

    EntityStateChanged {
        entity_id: String,
        state: EntityState,
    },

    /// Credentials stopped working; the user must supply new ones
    ReauthRequired { entry_id: String, reason: String },

    /// Show a message to the user
    Notify(Notification),
}

/// Commands accepted by alarm control panels
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum AlarmCommand {
    Disarm,
    ArmHome,
    ArmAway,
    /// Arm away, bypassing open or troubled zones
    ArmCustomBypass,
}

impl AlarmCommand {
    pub fn parse(s: &str) -> Option<Self> {
        Self::from_str(s).ok()
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AlarmCommandError {
    #[error("no alarm control panel named {0}")]
    UnknownEntity(String),

    #[error("integration for {0} is not running")]
    Unavailable(String),

    /// The panel has no data yet or its connection is degraded
    #[error("alarm panel is not ready: {0}")]
    NotReady(String),

    /// Refused before reaching the service (zones open, unsupported)
    #[error("{0}")]
    Rejected(String),

    /// The service was asked and said no, or failed
    #[error("alarm service error: {0}")]
    Service(String),
}

pub type AlarmCommandReply = oneshot::Sender<Result<(), AlarmCommandError>>;

/// Messages FROM the engine TO integrations (commands)
#[derive(Debug)]
pub enum ToIntegrationMessage {
    AlarmCommand {
        entity_id: String,
        command: AlarmCommand,
        reply: AlarmCommandReply,
    },
}

impl ToIntegrationMessage {
    /// Entity the message is addressed to, used for routing
    pub fn entity_id(&self) -> &str {
        match self {
            ToIntegrationMessage::AlarmCommand { entity_id, .. } => entity_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alarm_command_parse() {
        assert_eq!(AlarmCommand::parse("arm_away"), Some(AlarmCommand::ArmAway));
        assert_eq!(
            AlarmCommand::parse("arm_custom_bypass"),
            Some(AlarmCommand::ArmCustomBypass)
        );
        assert_eq!(AlarmCommand::parse("arm_night"), None);
        assert_eq!(AlarmCommand::Disarm.to_string(), "disarm");
    }
}
