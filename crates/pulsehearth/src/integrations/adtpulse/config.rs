use pulsehearth_client::ConnectionSettings;
use pulsehearth_client::Credentials;
use pulsehearth_client::ServiceHost;
use serde::Deserialize;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::engine::EntryMap;

/// Credentials stored in the config entry's `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryData {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub fingerprint: String,
    #[serde(default)]
    pub hostname: ServiceHost,
}

impl EntryData {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone(),
            password: self.password.clone(),
            fingerprint: self.fingerprint.clone(),
        }
    }
}

/// Tunables stored in the config entry's `options`. Unset means default.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EntryOptions {
    /// Seconds between polls
    #[serde(
        rename = "scan_interval",
        alias = "poll_interval",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub poll_interval: Option<f64>,

    /// Minutes between keepalives
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keepalive_interval: Option<u32>,

    /// Minutes between forced re-logins
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relogin_interval: Option<u32>,
}

impl EntryOptions {
    /// Fields set in `self` win over `fallback`.
    pub fn or(self, fallback: EntryOptions) -> EntryOptions {
        EntryOptions {
            poll_interval: self.poll_interval.or(fallback.poll_interval),
            keepalive_interval: self.keepalive_interval.or(fallback.keepalive_interval),
            relogin_interval: self.relogin_interval.or(fallback.relogin_interval),
        }
    }

    pub fn settings(&self, service_host: ServiceHost) -> ConnectionSettings {
        let defaults = ConnectionSettings::default();
        ConnectionSettings {
            service_host,
            poll_interval: self.poll_interval.unwrap_or(defaults.poll_interval),
            keepalive_interval: self
                .keepalive_interval
                .unwrap_or(defaults.keepalive_interval),
            relogin_interval: self.relogin_interval.unwrap_or(defaults.relogin_interval),
        }
    }
}

/// Decode a stored JSON object.
pub fn from_map<T: DeserializeOwned>(map: &EntryMap) -> Result<T, serde_json::Error> {
    serde_json::from_value(serde_json::Value::Object(map.clone()))
}

pub fn to_map<T: Serialize>(value: &T) -> EntryMap {
    match serde_json::to_value(value) {
        Ok(serde_json::Value::Object(map)) => map,
        _ => EntryMap::new(),
    }
}
