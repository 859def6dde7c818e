use async_trait::async_trait;
use pulsehearth_client::ConnectionSettings;
use pulsehearth_client::PulseConnector;
use pulsehearth_client::PulseError;
use tracing::debug;
use tracing::error;
use tracing::warn;

use super::config::EntryData;
use super::config::EntryOptions;
use super::config::from_map;
use super::config::to_map;
use crate::engine::ConfigFlow;
use crate::engine::EntryMap;
use crate::engine::FlowError;
use crate::engine::FlowResult;

pub struct AdtPulseFlow;

#[async_trait]
impl ConfigFlow for AdtPulseFlow {
    /// Log in with the submitted credentials, read the site id and log out.
    async fn validate_input(
        &self,
        connector: &dyn PulseConnector,
        input: &EntryMap,
    ) -> Result<FlowResult, FlowError> {
        let data: EntryData =
            from_map(input).map_err(|e| FlowError::InvalidInput(e.to_string()))?;
        if data.username.is_empty() || data.password.is_empty() {
            return Err(FlowError::InvalidInput(
                "username and password are required".to_string(),
            ));
        }

        let settings = ConnectionSettings {
            service_host: data.hostname,
            ..Default::default()
        };
        let service = connector
            .connect(&data.credentials(), &settings)
            .await
            .map_err(|e| {
                error!("Failed to start ADT Pulse client: {}", e);
                FlowError::CannotConnect
            })?;

        let login = service.login().await;
        let site_id = service.site().map(|site| site.id.clone());
        if let Err(e) = service.logout().await {
            warn!("Logout after validation failed: {}", e);
        }

        match login {
            Ok(true) => {}
            Ok(false) | Err(PulseError::Login { .. }) => return Err(FlowError::InvalidAuth),
            Err(e) => {
                error!("Could not log in to ADT Pulse: {}", e);
                return Err(FlowError::CannotConnect);
            }
        }

        let site_id = site_id.ok_or_else(|| {
            FlowError::Unknown("ADT Pulse returned no site for this account".to_string())
        })?;
        debug!("Validated ADT Pulse account for site {}", site_id);

        Ok(FlowResult {
            title: format!("ADT: Site {}", site_id),
            unique_id: Some(site_id),
            data: to_map(&data),
        })
    }

    fn validate_options(
        &self,
        current: &EntryMap,
        input: &EntryMap,
    ) -> Result<EntryMap, FlowError> {
        let current: EntryOptions = from_map(current).unwrap_or_else(|e| {
            warn!("Ignoring malformed stored options: {}", e);
            EntryOptions::default()
        });
        let input: EntryOptions =
            from_map(input).map_err(|e| FlowError::InvalidInput(e.to_string()))?;

        let merged = input.or(current);
        let settings = merged.settings(Default::default());
        if let Err(errors) = settings.validate() {
            let message = errors
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("; ");
            return Err(FlowError::InvalidInput(message));
        }

        Ok(to_map(&EntryOptions {
            poll_interval: Some(settings.poll_interval),
            keepalive_interval: Some(settings.keepalive_interval),
            relogin_interval: Some(settings.relogin_interval),
        }))
    }
}
