use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use linkme::distributed_slice;
use pulsehearth_client::PulseConnector;
use tokio::sync::mpsc;

use super::config_entries::ConfigEntry;
use super::config_entries::EntryMap;
use super::message::FromIntegrationMessage;
use super::message::ToIntegrationMessage;

/// Channel types for messages FROM integrations TO the engine
/// These are bounded channels (capacity 1024) to provide backpressure
pub type FromIntegrationSender = mpsc::Sender<FromIntegrationMessage>;
pub type FromIntegrationReceiver = mpsc::Receiver<FromIntegrationMessage>;

/// Channel types for messages FROM the engine TO integrations (unbounded - engine must not block)
pub type ToIntegrationSender = mpsc::UnboundedSender<ToIntegrationMessage>;

/// Result type for integration factory functions
pub type IntegrationFactoryResult = anyhow::Result<Option<Box<dyn Integration>>>;

pub struct IntegrationContext<'a> {
    pub connector: &'a Arc<dyn PulseConnector>,
}

/// Registry entry for one integration domain.
pub struct IntegrationFactory {
    pub domain: &'static str,

    /// Build an integration instance for a config entry
    pub create: fn(&IntegrationContext, &ConfigEntry) -> IntegrationFactoryResult,

    /// Setup, options and re-auth validation
    pub flow: &'static dyn ConfigFlow,
}

#[distributed_slice]
pub static REGISTRY: [IntegrationFactory];

pub fn find_factory(domain: &str) -> Option<&'static IntegrationFactory> {
    REGISTRY.iter().find(|f| f.domain == domain)
}

/// Integration trait that all integrations must implement
#[async_trait]
pub trait Integration: Send + Sync {
    /// Get the name/identifier of this integration instance
    fn name(&self) -> &str;

    /// Set up the integration - log in, start background tasks, announce entities
    ///
    /// The integration receives a sender to report events back to the engine
    /// (discovery, state changes, etc.)
    async fn setup(&mut self, tx: FromIntegrationSender) -> Result<(), Box<dyn Error + Send>>;

    /// Handle a command from the engine
    async fn handle_message(
        &mut self,
        msg: ToIntegrationMessage,
    ) -> Result<(), Box<dyn Error + Send>>;

    /// Shut down the integration gracefully
    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>>;
}

/// Validated outcome of a setup or re-auth form.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowResult {
    pub title: String,
    pub unique_id: Option<String>,
    pub data: EntryMap,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FlowError {
    #[error("failed to connect")]
    CannotConnect,

    #[error("invalid authentication")]
    InvalidAuth,

    #[error("unexpected error: {0}")]
    Unknown(String),

    #[error("account is already configured")]
    AlreadyConfigured,

    /// New credentials belong to a different account than the entry
    #[error("credentials are for a different account")]
    WrongAccount,

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Interactive setup for an integration domain.
#[async_trait]
pub trait ConfigFlow: Send + Sync {
    /// Check user input by talking to the service. Used for both initial
    /// setup and re-auth.
    async fn validate_input(
        &self,
        connector: &dyn PulseConnector,
        input: &EntryMap,
    ) -> Result<FlowResult, FlowError>;

    /// Merge `input` over `current` options and check bounds.
    fn validate_options(&self, current: &EntryMap, input: &EntryMap)
    -> Result<EntryMap, FlowError>;
}
