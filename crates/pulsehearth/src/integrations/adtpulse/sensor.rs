//! Diagnostic sensors derived from the coordinator's last error.

use std::sync::Arc;

use chrono::DateTime;
use chrono::Utc;
use pulsehearth_client::ErrorKind;
use pulsehearth_client::PulseError;

use super::DOMAIN;
use super::coordinator::Coordinator;
use super::entity::gateway_identifier;
use super::entity::gateway_unique_id;
use crate::engine::DeviceInfo;
use crate::engine::Entity;
use crate::engine::Platform;
use crate::engine::state::EntityState;
use crate::engine::state::EntityValue;
use crate::engine::state::SensorDeviceClass;
use crate::engine::state::SensorValue;

const CONNECTION_OK: (&str, &str) = ("Connection OK", "mdi:hand-okay");
const UNKNOWN_ERROR_ICON: &str = "mdi:alert-octogram";

/// Status text and icon for errors the sensor knows how to name.
fn connection_status(kind: ErrorKind) -> Option<(&'static str, &'static str)> {
    match kind {
        ErrorKind::AccountLocked => Some(("Account Locked", "mdi:account-network-off")),
        ErrorKind::ClientConnection => Some(("Client Connection Error", "mdi:network-off")),
        ErrorKind::ServerConnection => Some(("Server Connection Error", "mdi:server-network-off")),
        ErrorKind::GatewayOffline => Some(("Gateway Offline", "mdi:cloud-lock")),
        ErrorKind::ServiceTemporarilyUnavailable => {
            Some(("Service Temporarily Unavailable", "mdi:lan-pending"))
        }
        ErrorKind::Authentication => Some(("Authentication Error", "mdi:account-alert")),
        ErrorKind::MfaRequired => Some(("MFA Required", "mdi:account-reactivate")),
        ErrorKind::NotLoggedIn => Some(("Not Logged In", "mdi:account-off")),
        ErrorKind::Unknown => None,
    }
}

const STATUS_KINDS: [ErrorKind; 8] = [
    ErrorKind::AccountLocked,
    ErrorKind::ClientConnection,
    ErrorKind::ServerConnection,
    ErrorKind::GatewayOffline,
    ErrorKind::ServiceTemporarilyUnavailable,
    ErrorKind::Authentication,
    ErrorKind::MfaRequired,
    ErrorKind::NotLoggedIn,
];

/// Every value the connection status sensor can take.
fn status_options() -> Vec<String> {
    STATUS_KINDS
        .iter()
        .filter_map(|kind| connection_status(*kind))
        .map(|(status, _)| status)
        .chain(std::iter::once(CONNECTION_OK.0))
        .map(str::to_string)
        .collect()
}

/// Diagnostic sensors live on the gateway device.
fn gateway_device(coordinator: &Coordinator, site_id: &str) -> DeviceInfo {
    let identifier = match coordinator.site() {
        Some(site) => gateway_identifier(&site),
        None => (DOMAIN.to_string(), gateway_unique_id(site_id)),
    };
    DeviceInfo {
        identifiers: vec![identifier],
        ..Default::default()
    }
}

/// Health of the link to ADT Pulse. Always available.
pub struct ConnectionStatusSensor {
    coordinator: Arc<Coordinator>,
    site_id: String,
}

impl ConnectionStatusSensor {
    pub fn new(coordinator: Arc<Coordinator>, site_id: &str) -> Self {
        Self {
            coordinator,
            site_id: site_id.to_string(),
        }
    }
}

impl Entity for ConnectionStatusSensor {
    fn platform(&self) -> Platform {
        Platform::Sensor
    }

    fn unique_id(&self) -> String {
        format!("{}-connection-status", self.site_id)
    }

    fn device_info(&self) -> Option<DeviceInfo> {
        Some(gateway_device(&self.coordinator, &self.site_id))
    }

    fn state(&self) -> EntityState {
        let (value, icon) = match self.coordinator.last_error() {
            None => (Some(CONNECTION_OK.0), CONNECTION_OK.1),
            Some(error) => match connection_status(error.kind()) {
                Some((status, icon)) => (Some(status), icon),
                None => (None, UNKNOWN_ERROR_ICON),
            },
        };

        EntityState {
            name: "Pulse Connection Status".to_string(),
            unique_id: self.unique_id(),
            available: true,
            icon: Some(icon.to_string()),
            value: EntityValue::Sensor {
                value: value.map(|v| SensorValue::Text(v.to_string())),
                device_class: SensorDeviceClass::Enum,
                options: status_options(),
            },
            attributes: serde_json::Map::new(),
        }
    }
}

/// When the client will next try to reach ADT Pulse after a failure.
pub struct NextRefreshSensor {
    coordinator: Arc<Coordinator>,
    site_id: String,
}

impl NextRefreshSensor {
    pub fn new(coordinator: Arc<Coordinator>, site_id: &str) -> Self {
        Self {
            coordinator,
            site_id: site_id.to_string(),
        }
    }
}

/// Retry time worth showing, or `None` when it is under a minute away.
fn next_refresh(error: &PulseError, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let delta = match error {
        PulseError::Retry {
            retry_at: Some(at), ..
        } => *at - now,
        PulseError::Backoff { interval, .. } => chrono::Duration::from_std(*interval).ok()?,
        _ => return None,
    };
    if delta < chrono::Duration::seconds(60) {
        return None;
    }
    Some(now + delta)
}

impl Entity for NextRefreshSensor {
    fn platform(&self) -> Platform {
        Platform::Sensor
    }

    fn unique_id(&self) -> String {
        format!("{}-next-refresh", self.site_id)
    }

    fn device_info(&self) -> Option<DeviceInfo> {
        Some(gateway_device(&self.coordinator, &self.site_id))
    }

    fn state(&self) -> EntityState {
        let error = self.coordinator.last_error();
        let value = error
            .as_deref()
            .and_then(|e| next_refresh(e, self.coordinator.now()));

        EntityState {
            name: "Pulse Next Refresh".to_string(),
            unique_id: self.unique_id(),
            available: error.is_some(),
            icon: None,
            value: EntityValue::Sensor {
                value: value.map(SensorValue::Timestamp),
                device_class: SensorDeviceClass::Timestamp,
                options: Vec::new(),
            },
            attributes: serde_json::Map::new(),
        }
    }
}
