mod alarm;
mod binary_sensor;
mod config;
mod config_flow;
mod coordinator;
mod entity;
mod sensor;
#[cfg(test)]
mod testing;
// Private module - allowed by clippy.toml allow-private-module-inception
#[allow(clippy::module_inception)]
mod adtpulse;

use std::sync::Arc;

use adtpulse::AdtPulseIntegration;
use anyhow::Context;
use config_flow::AdtPulseFlow;
use linkme::distributed_slice;

use crate::engine;

pub const DOMAIN: &str = "adtpulse";

#[distributed_slice(engine::INTEGRATION_REGISTRY)]
static ADTPULSE: engine::IntegrationFactory = engine::IntegrationFactory {
    domain: DOMAIN,
    create: create_adtpulse,
    flow: &AdtPulseFlow,
};

fn create_adtpulse(
    ctx: &engine::IntegrationContext,
    entry: &engine::ConfigEntry,
) -> engine::IntegrationFactoryResult {
    let data: config::EntryData =
        config::from_map(&entry.data).context("Invalid ADT Pulse entry data")?;
    let options: config::EntryOptions =
        config::from_map(&entry.options).context("Invalid ADT Pulse entry options")?;

    let settings = options.settings(data.hostname);
    if let Err(errors) = settings.validate() {
        let message = errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        anyhow::bail!("Invalid ADT Pulse connection settings: {}", message);
    }

    Ok(Some(Box::new(AdtPulseIntegration::new(
        entry.entry_id.clone(),
        data.credentials(),
        settings,
        Arc::clone(ctx.connector),
    ))))
}
