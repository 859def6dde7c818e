//! Entity abstraction for pulsehearth
//!
//! Integrations expose their data as entities. An entity is a projection: it
//! reads whatever live data its integration holds and renders an
//! `EntityState` on demand.

use serde::Serialize;

use super::device::DeviceInfo;
use super::state::EntityState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Platform {
    AlarmControlPanel,
    BinarySensor,
    Sensor,
}

/// Base trait that all entities must implement
pub trait Entity: Send + Sync {
    fn platform(&self) -> Platform;

    /// Stable id, unique within the platform
    fn unique_id(&self) -> String;

    /// Device this entity belongs to, if any
    fn device_info(&self) -> Option<DeviceInfo> {
        None
    }

    /// Render the current state
    fn state(&self) -> EntityState;

    /// Engine-wide id, e.g. `binary_sensor.adt_pulse_160301z_3`
    fn entity_id(&self) -> String {
        format!("{}.{}", self.platform(), slugify(&self.unique_id()))
    }
}

/// Lowercase, with runs of anything but ASCII letters and digits collapsed to `_`.
pub fn slugify(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut pending_sep = false;
    for c in s.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}
