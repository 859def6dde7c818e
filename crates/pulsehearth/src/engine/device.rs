use serde::Serialize;

/// Device description supplied by an integration alongside an entity.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DeviceInfo {
    /// `(domain, id)` pairs; the first one names the device
    pub identifiers: Vec<(String, String)>,
    pub name: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub sw_version: Option<String>,
    pub hw_version: Option<String>,
    /// Identifier of the device this one talks through
    pub via_device: Option<(String, String)>,
}

impl DeviceInfo {
    /// Registry id derived from the primary identifier.
    pub fn device_id(&self) -> Option<String> {
        self.identifiers
            .first()
            .map(|(domain, id)| format!("{}:{}", domain, id))
    }
}

/// A device in the pulsehearth registry.
///
/// A device groups one or more entities that belong to the same physical thing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Device {
    pub id: String,
    pub identifiers: Vec<(String, String)>,
    pub name: Option<String>,
    pub manufacturer: Option<String>,
    pub model: Option<String>,
    pub sw_version: Option<String>,
    pub hw_version: Option<String>,
    pub via_device_id: Option<String>,
    pub entity_ids: Vec<String>,
}

impl Device {
    pub fn new(id: String) -> Self {
        Self {
            id,
            identifiers: Vec::new(),
            name: None,
            manufacturer: None,
            model: None,
            sw_version: None,
            hw_version: None,
            via_device_id: None,
            entity_ids: Vec::new(),
        }
    }

    /// Merge in what an entity knows about its device.
    ///
    /// Entities often carry partial info (a sensor may only name the
    /// identifier), so only fields that are set overwrite.
    pub fn merge(&mut self, info: &DeviceInfo) {
        for identifier in &info.identifiers {
            if !self.identifiers.contains(identifier) {
                self.identifiers.push(identifier.clone());
            }
        }
        if info.name.is_some() {
            self.name = info.name.clone();
        }
        if info.manufacturer.is_some() {
            self.manufacturer = info.manufacturer.clone();
        }
        if info.model.is_some() {
            self.model = info.model.clone();
        }
        if info.sw_version.is_some() {
            self.sw_version = info.sw_version.clone();
        }
        if info.hw_version.is_some() {
            self.hw_version = info.hw_version.clone();
        }
        if let Some((domain, id)) = &info.via_device {
            self.via_device_id = Some(format!("{}:{}", domain, id));
        }
    }

    pub fn add_entity(&mut self, entity_id: String) {
        if !self.entity_ids.contains(&entity_id) {
            self.entity_ids.push(entity_id);
        }
    }

    /// Returns true when no entities are left.
    pub fn remove_entity(&mut self, entity_id: &str) -> bool {
        self.entity_ids.retain(|e| e != entity_id);
        self.entity_ids.is_empty()
    }
}
