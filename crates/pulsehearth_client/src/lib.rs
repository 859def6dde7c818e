//! Contract between pulsehearth and the ADT Pulse cloud client.
//!
//! The cloud protocol itself (login, session keepalive, push/poll waiting and
//! backoff) lives in the vendor client library. This crate describes what the
//! hub needs from it:
//! - the live data model (`Site`, `Zone`, `AlarmPanel`, `Gateway`)
//! - the typed error taxonomy (`PulseError`)
//! - connection settings and their bounds
//! - the `PulseService` and `PulseConnector` traits
//!
//! `SidecarConnector` is the production connector. It runs the vendor library
//! in a helper process and talks to it over newline-delimited JSON.

mod error;
mod model;
mod service;
mod settings;
pub mod sidecar;

pub use error::ErrorKind;
pub use error::PulseError;
pub use model::AlarmPanel;
pub use model::AlarmStatus;
pub use model::Gateway;
pub use model::Site;
pub use model::ZONE_STATE_OK;
pub use model::ZONE_STATUS_ONLINE;
pub use model::Zone;
pub use service::PulseConnector;
pub use service::PulseService;
pub use settings::ConnectionSettings;
pub use settings::Credentials;
pub use settings::DEFAULT_KEEPALIVE_INTERVAL;
pub use settings::DEFAULT_POLL_INTERVAL;
pub use settings::DEFAULT_RELOGIN_INTERVAL;
pub use settings::MAX_KEEPALIVE_INTERVAL;
pub use settings::MIN_RELOGIN_INTERVAL;
pub use settings::ServiceHost;
pub use settings::SettingsError;
pub use sidecar::SidecarConnector;
