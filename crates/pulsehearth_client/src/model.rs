//! Live view of an ADT Pulse site as reported by the cloud client.
//!
//! These are snapshots: the client replaces the whole `Site` after every
//! update, so readers hold an `Arc<Site>` and never observe a half-applied
//! change.

use std::collections::BTreeMap;
use std::net::IpAddr;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// Zone state reported when nothing is tripped.
pub const ZONE_STATE_OK: &str = "OK";

/// Zone status reported when the sensor is healthy.
pub const ZONE_STATUS_ONLINE: &str = "Online";

/// Arming state of the alarm panel.
///
/// Wire names follow the cloud client ("stay" is armed home, "away" is armed
/// away). Anything unrecognised deserializes as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum AlarmStatus {
    #[serde(rename = "off")]
    Off,
    #[serde(rename = "arming")]
    Arming,
    #[serde(rename = "stay")]
    ArmedHome,
    #[serde(rename = "away")]
    ArmedAway,
    #[serde(rename = "disarming")]
    Disarming,
    #[default]
    #[serde(rename = "unknown", other)]
    Unknown,
}

/// The alarm panel of a site.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlarmPanel {
    pub status: AlarmStatus,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    /// When the panel status last changed
    pub last_update: Option<DateTime<Utc>>,
}

/// One sensor (door, window, motion, smoke, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: u32,
    pub name: String,

    /// Classification tags, e.g. `["sensor", "doorWindow"]`
    #[serde(default)]
    pub tags: Vec<String>,

    /// Trip state, `ZONE_STATE_OK` when clear
    pub state: String,

    /// Health status, `ZONE_STATUS_ONLINE` when healthy
    pub status: String,

    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
}

/// Connectivity and diagnostic data for the on-premises gateway.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Gateway {
    pub is_online: bool,
    pub serial_number: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub firmware_version: Option<String>,
    pub hardware_version: Option<String>,
    pub primary_connection_type: Option<String>,
    pub broadband_connection_status: Option<String>,
    pub cellular_connection_status: Option<String>,
    pub cellular_signal_strength: Option<f64>,
    pub broadband_lan_ip_address: Option<IpAddr>,
    pub broadband_lan_mac: Option<String>,
    pub device_lan_ip_address: Option<IpAddr>,
    pub device_lan_mac: Option<String>,
    pub router_lan_ip_address: Option<IpAddr>,
    pub router_wan_ip_address: Option<IpAddr>,

    /// Current gateway poll interval in seconds
    pub poll_interval: Option<f64>,
    pub next_update: Option<DateTime<Utc>>,
    pub last_update: Option<DateTime<Utc>>,
}

/// One security-system installation under the account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub alarm_control_panel: AlarmPanel,
    #[serde(default)]
    pub gateway: Gateway,
    #[serde(default)]
    pub zones: BTreeMap<u32, Zone>,
}

impl Site {
    pub fn zone(&self, id: u32) -> Option<&Zone> {
        self.zones.get(&id)
    }
}
