//! Wire protocol between pulsehearth and the client helper process.
//!
//! Newline-delimited JSON over the helper's stdin/stdout. Every request
//! carries a `request_id`; the helper answers each with exactly one
//! `completed` or `failed` message carrying the same id. Replies may arrive
//! out of order (a `wait_for_update` can be outstanding while an arm command
//! completes).

use std::time::Duration;

use chrono::DateTime;
use serde::Deserialize;
use serde::Serialize;

use crate::ErrorKind;
use crate::PulseError;
use crate::Site;

/// A request sent from Rust to the helper.
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    pub request_id: u64,
    #[serde(flatten)]
    pub command: Command,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Create the client object. Must be the first request.
    Configure {
        username: String,
        password: String,
        fingerprint: String,
        service_host: String,
        poll_interval: f64,
        keepalive_interval: u32,
        relogin_interval: u32,
    },
    Login,
    Logout,
    WaitForUpdate,
    ArmHome { force_arm: bool },
    ArmAway { force_arm: bool },
    Disarm,
}

/// Messages sent from the helper to Rust.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Helper started and imported the client library
    Ready {
        #[serde(default)]
        version: Option<String>,
    },

    /// A request finished
    Completed {
        request_id: u64,
        /// Result of calls that return a bool (login, arm, disarm)
        #[serde(default)]
        success: Option<bool>,
        /// Site snapshot after the call, when one is available
        #[serde(default)]
        site: Option<Site>,
    },

    /// A request raised
    Failed { request_id: u64, error: WireError },

    /// Log line from the helper's logging
    Log {
        level: LogLevel,
        logger: String,
        message: String,
    },
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Error as reported by the helper.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,

    /// Unix timestamp (seconds) at which the client will retry
    #[serde(default)]
    pub retry_at: Option<f64>,

    /// Backoff the client computed, in seconds
    #[serde(default)]
    pub backoff_seconds: Option<f64>,
}

impl From<WireError> for PulseError {
    fn from(e: WireError) -> Self {
        let WireError {
            kind,
            message,
            retry_at,
            backoff_seconds,
        } = e;

        if kind.is_login() {
            return PulseError::Login { kind, message };
        }
        if let Some(ts) = retry_at {
            let secs = ts.floor();
            let nanos = ((ts - secs) * 1e9) as u32;
            return PulseError::Retry {
                kind,
                message,
                retry_at: DateTime::from_timestamp(secs as i64, nanos),
            };
        }
        if let Some(secs) = backoff_seconds {
            return match Duration::try_from_secs_f64(secs.max(0.0)) {
                Ok(interval) => PulseError::Backoff {
                    kind,
                    message,
                    interval,
                },
                Err(_) => PulseError::Transport(format!(
                    "backoff of {} seconds out of range ({})",
                    secs, message
                )),
            };
        }

        match kind {
            ErrorKind::ServiceTemporarilyUnavailable => PulseError::Retry {
                kind,
                message,
                retry_at: None,
            },
            ErrorKind::ClientConnection | ErrorKind::ServerConnection | ErrorKind::GatewayOffline => {
                PulseError::Backoff {
                    kind,
                    message,
                    interval: Duration::ZERO,
                }
            }
            _ => PulseError::Other(message),
        }
    }
}
