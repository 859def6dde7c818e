use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

/// Seconds between polls when push updates are unavailable.
pub const DEFAULT_POLL_INTERVAL: f64 = 2.0;

/// Minutes between session keepalives.
pub const DEFAULT_KEEPALIVE_INTERVAL: u32 = 5;
pub const MAX_KEEPALIVE_INTERVAL: u32 = 15;

/// Minutes between forced re-logins.
pub const DEFAULT_RELOGIN_INTERVAL: u32 = 120;
pub const MIN_RELOGIN_INTERVAL: u32 = 20;

/// Regional ADT Pulse portal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ServiceHost {
    #[default]
    #[serde(rename = "https://portal.adtpulse.com")]
    Us,
    #[serde(rename = "https://portal-ca.adtpulse.com")]
    Ca,
}

impl ServiceHost {
    pub fn url(self) -> &'static str {
        match self {
            Self::Us => "https://portal.adtpulse.com",
            Self::Ca => "https://portal-ca.adtpulse.com",
        }
    }
}

impl fmt::Display for ServiceHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url())
    }
}

impl FromStr for ServiceHost {
    type Err = String;

    /// Accepts either the region code or the full portal URL.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().trim_end_matches('/') {
            "us" | "https://portal.adtpulse.com" => Ok(Self::Us),
            "ca" | "https://portal-ca.adtpulse.com" => Ok(Self::Ca),
            other => Err(format!(
                "unknown ADT Pulse host '{}' (expected us, ca or a portal URL)",
                other
            )),
        }
    }
}

/// Account credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,

    /// Browser fingerprint registered with the account for 2FA bypass
    pub fingerprint: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("fingerprint", &"<redacted>")
            .finish()
    }
}

/// Tunables handed to the cloud client.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConnectionSettings {
    pub service_host: ServiceHost,

    /// Seconds
    pub poll_interval: f64,

    /// Minutes
    pub keepalive_interval: u32,

    /// Minutes
    pub relogin_interval: u32,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            service_host: ServiceHost::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            relogin_interval: DEFAULT_RELOGIN_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SettingsError {
    #[error("poll interval must be a positive number of seconds, got {0}")]
    PollInterval(f64),

    #[error("keepalive interval {got} exceeds the maximum of {max} minutes")]
    KeepaliveTooLong { got: u32, max: u32 },

    #[error("keepalive interval must be at least 1 minute")]
    KeepaliveZero,

    #[error("relogin interval {got} is below the minimum of {min} minutes")]
    ReloginTooShort { got: u32, min: u32 },

    #[error("relogin interval ({relogin} min) must be longer than keepalive interval ({keepalive} min)")]
    ReloginNotAfterKeepalive { relogin: u32, keepalive: u32 },
}

impl ConnectionSettings {
    /// Check the intervals against the bounds the cloud client enforces.
    ///
    /// Returns every violation, not just the first.
    pub fn validate(&self) -> Result<(), Vec<SettingsError>> {
        let mut errors = Vec::new();

        if !(self.poll_interval.is_finite() && self.poll_interval > 0.0) {
            errors.push(SettingsError::PollInterval(self.poll_interval));
        }
        if self.keepalive_interval == 0 {
            errors.push(SettingsError::KeepaliveZero);
        }
        if self.keepalive_interval > MAX_KEEPALIVE_INTERVAL {
            errors.push(SettingsError::KeepaliveTooLong {
                got: self.keepalive_interval,
                max: MAX_KEEPALIVE_INTERVAL,
            });
        }
        if self.relogin_interval < MIN_RELOGIN_INTERVAL {
            errors.push(SettingsError::ReloginTooShort {
                got: self.relogin_interval,
                min: MIN_RELOGIN_INTERVAL,
            });
        }
        if self.relogin_interval <= self.keepalive_interval {
            errors.push(SettingsError::ReloginNotAfterKeepalive {
                relogin: self.relogin_interval,
                keepalive: self.keepalive_interval,
            });
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
