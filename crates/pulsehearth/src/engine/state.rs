use std::collections::BTreeMap;

use chrono::DateTime;
use chrono::Utc;
use serde::Serialize;

use super::device::Device;

/// Display state of an alarm control panel.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlarmPanelState {
    Disarmed,
    Arming,
    ArmedHome,
    ArmedAway,
    Disarming,
    Unknown,
}

/// Device class for binary sensors, matching Home Assistant's binary_sensor device classes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum BinarySensorDeviceClass {
    CarbonMonoxide,
    Connectivity,
    Door,
    GarageDoor,
    Heat,
    Moisture,
    Motion,
    Smoke,
    Tamper,
    Vibration,
    Window,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum SensorDeviceClass {
    /// Value is one of a fixed set of strings
    Enum,
    Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SensorValue {
    Text(String),
    Timestamp(DateTime<Utc>),
}

/// Platform-specific part of an entity's state.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "platform", rename_all = "snake_case")]
pub enum EntityValue {
    AlarmControlPanel {
        state: AlarmPanelState,
        supported_features: Vec<AlarmFeature>,
    },
    BinarySensor {
        is_on: bool,
        device_class: BinarySensorDeviceClass,
    },
    Sensor {
        value: Option<SensorValue>,
        device_class: SensorDeviceClass,
        /// Allowed values for enum sensors
        #[serde(skip_serializing_if = "Vec::is_empty")]
        options: Vec<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmFeature {
    ArmHome,
    ArmAway,
    ArmCustomBypass,
}

/// State of one entity as published to the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityState {
    pub name: String,
    pub unique_id: String,
    pub available: bool,
    pub icon: Option<String>,
    #[serde(flatten)]
    pub value: EntityValue,
    pub attributes: serde_json::Map<String, serde_json::Value>,
}

/// Persistent, user-visible message (errors from commands, re-auth requests).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub id: String,
    pub title: String,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

/// Centralized snapshot of the entire engine state.
#[derive(Debug, Clone, Default, Serialize)]
pub struct State {
    pub entities: BTreeMap<String, EntityState>,
    pub devices: BTreeMap<String, Device>,
    pub notifications: BTreeMap<String, Notification>,
}
