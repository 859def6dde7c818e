use std::time::Duration;

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;

/// What went wrong, independent of how the caller should recover.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display, strum::AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    Authentication,
    AccountLocked,
    MfaRequired,
    NotLoggedIn,
    ServiceTemporarilyUnavailable,
    ClientConnection,
    ServerConnection,
    GatewayOffline,
    #[serde(other)]
    Unknown,
}

impl ErrorKind {
    /// Kinds that can only be fixed by new credentials or user action.
    pub fn is_login(self) -> bool {
        matches!(
            self,
            Self::Authentication | Self::AccountLocked | Self::MfaRequired | Self::NotLoggedIn
        )
    }
}

/// Errors raised by the cloud client.
///
/// The variant says how to recover; `kind()` says what happened.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PulseError {
    /// Credentials rejected or session lost. Never retried automatically.
    #[error("login failed ({kind}): {message}")]
    Login { kind: ErrorKind, message: String },

    /// Transient failure; the client knows when to try again.
    #[error("{kind}: {message}")]
    Retry {
        kind: ErrorKind,
        message: String,
        retry_at: Option<DateTime<Utc>>,
    },

    /// Transient failure; the client computed how long to back off.
    #[error("{kind}: {message} (backing off {interval:?})")]
    Backoff {
        kind: ErrorKind,
        message: String,
        interval: Duration,
    },

    /// Anything the client did not classify.
    #[error("{0}")]
    Other(String),

    /// The link to the client itself failed (helper process, pipe, framing).
    #[error("client transport error: {0}")]
    Transport(String),
}

impl PulseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Login { kind, .. } | Self::Retry { kind, .. } | Self::Backoff { kind, .. } => {
                *kind
            }
            Self::Other(_) | Self::Transport(_) => ErrorKind::Unknown,
        }
    }
}

impl From<std::io::Error> for PulseError {
    fn from(e: std::io::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for PulseError {
    fn from(e: serde_json::Error) -> Self {
        Self::Transport(e.to_string())
    }
}
