use std::sync::Arc;

use pulsehearth_client::Zone;
use serde_json::Value;
use serde_json::json;

use super::DOMAIN;
use super::coordinator::Coordinator;
use super::entity::gateway_identifier;
use super::entity::gateway_unique_id;
use super::entity::zone_open;
use super::entity::zone_unique_id;
use crate::engine::DeviceInfo;
use crate::engine::Entity;
use crate::engine::Platform;
use crate::engine::state::BinarySensorDeviceClass;
use crate::engine::state::EntityState;
use crate::engine::state::EntityValue;

/// What kind of sensor a zone is, from its type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    Door,
    Window,
    Motion,
    Smoke,
    CarbonMonoxide,
    Heat,
    Flood,
    GlassBreak,
    GarageDoor,
    Shock,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unrecognized zone tag '{0}'")]
pub struct UnrecognizedTag(pub String);

impl SensorKind {
    pub fn from_tag(tag: &str) -> Result<Self, UnrecognizedTag> {
        match tag {
            "doorWindow" => Ok(Self::Door),
            "window" => Ok(Self::Window),
            "motion" => Ok(Self::Motion),
            "smoke" => Ok(Self::Smoke),
            "co" => Ok(Self::CarbonMonoxide),
            "fire" => Ok(Self::Heat),
            "flood" => Ok(Self::Flood),
            "glass" => Ok(Self::GlassBreak),
            "garage" => Ok(Self::GarageDoor),
            "shock" => Ok(Self::Shock),
            other => Err(UnrecognizedTag(other.to_string())),
        }
    }

    /// Classify a zone by its first tag other than the generic `sensor`.
    pub fn classify(zone: &Zone) -> Result<Self, UnrecognizedTag> {
        let tag = zone
            .tags
            .iter()
            .find(|t| t.as_str() != "sensor")
            .ok_or_else(|| UnrecognizedTag(zone.tags.join(",")))?;
        Self::from_tag(tag)
    }

    pub fn device_class(self) -> BinarySensorDeviceClass {
        match self {
            Self::Door => BinarySensorDeviceClass::Door,
            Self::Window => BinarySensorDeviceClass::Window,
            Self::Motion => BinarySensorDeviceClass::Motion,
            Self::Smoke => BinarySensorDeviceClass::Smoke,
            Self::CarbonMonoxide => BinarySensorDeviceClass::CarbonMonoxide,
            Self::Heat => BinarySensorDeviceClass::Heat,
            Self::Flood => BinarySensorDeviceClass::Moisture,
            Self::GlassBreak => BinarySensorDeviceClass::Tamper,
            Self::GarageDoor => BinarySensorDeviceClass::GarageDoor,
            Self::Shock => BinarySensorDeviceClass::Vibration,
        }
    }

    /// `(on, off)` icons
    pub fn icons(self) -> (&'static str, &'static str) {
        match self {
            Self::Door => ("mdi:door-open", "mdi:door"),
            Self::Window => ("mdi:window-open", "mdi:window-closed"),
            Self::Motion => ("mdi:run-fast", "mdi:motion-sensor"),
            Self::Smoke => ("mdi:smoke-detector-alert", "mdi:smoke-detector"),
            Self::CarbonMonoxide => ("mdi:molecule-co", "mdi:check-circle-outline"),
            Self::Heat => ("mdi:fire", "mdi:fire-off"),
            Self::Flood => ("mdi:home-flood", "mdi:water-off"),
            Self::GlassBreak => ("mdi:glass-fragile", "mdi:window-closed-variant"),
            Self::GarageDoor => ("mdi:garage-open", "mdi:garage"),
            Self::Shock => ("mdi:vibrate", "mdi:vibrate-off"),
        }
    }
}

/// One zone as a binary sensor; on while the zone is not clear.
pub struct ZoneSensor {
    coordinator: Arc<Coordinator>,
    site_id: String,
    zone_id: u32,
    kind: SensorKind,
}

impl ZoneSensor {
    pub fn new(coordinator: Arc<Coordinator>, site_id: &str, zone_id: u32, kind: SensorKind) -> Self {
        Self {
            coordinator,
            site_id: site_id.to_string(),
            zone_id,
            kind,
        }
    }

    pub fn zone_id(&self) -> u32 {
        self.zone_id
    }

    fn zone(&self) -> Option<Zone> {
        self.coordinator
            .site()
            .and_then(|site| site.zone(self.zone_id).cloned())
    }
}

impl Entity for ZoneSensor {
    fn platform(&self) -> Platform {
        Platform::BinarySensor
    }

    fn unique_id(&self) -> String {
        zone_unique_id(&self.site_id, self.zone_id)
    }

    fn device_info(&self) -> Option<DeviceInfo> {
        let zone = self.zone()?;
        Some(DeviceInfo {
            identifiers: vec![(DOMAIN.to_string(), self.unique_id())],
            name: Some(zone.name),
            manufacturer: Some("ADT".to_string()),
            model: Some(self.kind.device_class().to_string()),
            via_device: Some((DOMAIN.to_string(), self.site_id.clone())),
            ..Default::default()
        })
    }

    fn state(&self) -> EntityState {
        let zone = self.zone();
        let is_on = zone.as_ref().is_some_and(zone_open);
        let (on_icon, off_icon) = self.kind.icons();

        let mut attributes = serde_json::Map::new();
        if let Some(zone) = &zone {
            attributes.insert("status".into(), json!(zone.status));
            attributes.insert(
                "last_activity_timestamp".into(),
                json!(zone.last_activity.map(|t| t.to_rfc3339())),
            );
            attributes.insert("tags".into(), json!(zone.tags));
        }

        EntityState {
            name: zone
                .as_ref()
                .map(|z| z.name.clone())
                .unwrap_or_else(|| format!("Zone {}", self.zone_id)),
            unique_id: self.unique_id(),
            available: zone.is_some() && self.coordinator.last_error().is_none(),
            icon: Some(if is_on { on_icon } else { off_icon }.to_string()),
            value: EntityValue::BinarySensor {
                is_on,
                device_class: self.kind.device_class(),
            },
            attributes,
        }
    }
}

/// Gateway connectivity.
pub struct GatewaySensor {
    coordinator: Arc<Coordinator>,
    site_id: String,
}

impl GatewaySensor {
    pub fn new(coordinator: Arc<Coordinator>, site_id: &str) -> Self {
        Self {
            coordinator,
            site_id: site_id.to_string(),
        }
    }
}

impl Entity for GatewaySensor {
    fn platform(&self) -> Platform {
        Platform::BinarySensor
    }

    fn unique_id(&self) -> String {
        gateway_unique_id(&self.site_id)
    }

    fn device_info(&self) -> Option<DeviceInfo> {
        let site = self.coordinator.site()?;
        let gateway = &site.gateway;
        Some(DeviceInfo {
            identifiers: vec![gateway_identifier(&site)],
            name: Some("ADT Pulse Gateway".to_string()),
            manufacturer: gateway.manufacturer.clone(),
            model: gateway.model.clone(),
            sw_version: gateway.firmware_version.clone(),
            hw_version: gateway.hardware_version.clone(),
            via_device: None,
        })
    }

    fn state(&self) -> EntityState {
        let site = self.coordinator.site();
        let is_on = site.as_ref().is_some_and(|s| s.gateway.is_online);

        let mut attributes = match site.as_ref().map(|s| serde_json::to_value(&s.gateway)) {
            Some(Ok(Value::Object(map))) => map,
            _ => serde_json::Map::new(),
        };
        attributes.remove("is_online");

        EntityState {
            name: "Pulse Gateway Status".to_string(),
            unique_id: self.unique_id(),
            available: site.is_some() && self.coordinator.last_error().is_none(),
            icon: Some(if is_on { "mdi:lan-connect" } else { "mdi:lan-disconnect" }.to_string()),
            value: EntityValue::BinarySensor {
                is_on,
                device_class: BinarySensorDeviceClass::Connectivity,
            },
            attributes,
        }
    }
}
