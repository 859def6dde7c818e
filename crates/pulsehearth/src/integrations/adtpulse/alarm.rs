use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use chrono::Utc;
use pulsehearth_client::AlarmStatus;
use pulsehearth_client::Site;
use serde_json::json;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::DOMAIN;
use super::coordinator::Coordinator;
use super::entity::ATTRIBUTION;
use super::entity::alarm_unique_id;
use super::entity::gateway_identifier;
use super::entity::system_can_be_armed;
use crate::engine::AlarmCommand;
use crate::engine::AlarmCommandError;
use crate::engine::DeviceInfo;
use crate::engine::Entity;
use crate::engine::FromIntegrationMessage;
use crate::engine::FromIntegrationSender;
use crate::engine::Platform;
use crate::engine::state::AlarmFeature;
use crate::engine::state::AlarmPanelState;
use crate::engine::state::EntityState;
use crate::engine::state::EntityValue;
use crate::engine::state::Notification;

pub const NOTIFICATION_TITLE: &str = "ADT Pulse";

fn panel_state(status: AlarmStatus) -> AlarmPanelState {
    match status {
        AlarmStatus::Off => AlarmPanelState::Disarmed,
        AlarmStatus::Arming => AlarmPanelState::Arming,
        AlarmStatus::ArmedHome => AlarmPanelState::ArmedHome,
        AlarmStatus::ArmedAway => AlarmPanelState::ArmedAway,
        AlarmStatus::Disarming => AlarmPanelState::Disarming,
        AlarmStatus::Unknown => AlarmPanelState::Unknown,
    }
}

fn panel_icon(status: AlarmStatus) -> &'static str {
    match status {
        AlarmStatus::ArmedAway => "mdi:shield-lock",
        AlarmStatus::ArmedHome => "mdi:shield-home",
        AlarmStatus::Off => "mdi:shield-off",
        AlarmStatus::Unknown => "mdi:shield-bug",
        AlarmStatus::Arming | AlarmStatus::Disarming => "mdi:shield-alert",
    }
}

/// Display state shown instead of the reported one while a command runs,
/// and after it succeeds until the next update arrives.
#[derive(Debug, Default)]
struct Display {
    shown: Option<AlarmPanelState>,
    in_flight: bool,
}

pub struct AlarmPanel {
    coordinator: Arc<Coordinator>,
    site_id: String,
    display: Mutex<Display>,
}

impl AlarmPanel {
    pub fn new(coordinator: Arc<Coordinator>, site_id: &str) -> Self {
        Self {
            coordinator,
            site_id: site_id.to_string(),
            display: Mutex::new(Display::default()),
        }
    }

    /// Drop the optimistic display state once fresh data is in.
    pub fn on_coordinator_update(&self) {
        let mut display = self.lock_display();
        if !display.in_flight {
            display.shown = None;
        }
    }

    /// Run an arm/disarm command, publishing the transient state first.
    ///
    /// Failures revert the display, raise a notification and are returned;
    /// nothing is retried.
    pub async fn execute(
        &self,
        command: AlarmCommand,
        tx: &FromIntegrationSender,
    ) -> Result<(), AlarmCommandError> {
        let site = self.ready_site()?;

        let force = command == AlarmCommand::ArmCustomBypass;
        let unforced_arm = matches!(command, AlarmCommand::ArmHome | AlarmCommand::ArmAway);
        if unforced_arm && !system_can_be_armed(&site) {
            return Err(AlarmCommandError::Rejected(
                "zones are open or in trouble; use arm_custom_bypass to force arm".to_string(),
            ));
        }

        let (transient, target) = match command {
            AlarmCommand::Disarm => (AlarmPanelState::Disarming, AlarmPanelState::Disarmed),
            AlarmCommand::ArmHome => (AlarmPanelState::Arming, AlarmPanelState::ArmedHome),
            AlarmCommand::ArmAway | AlarmCommand::ArmCustomBypass => {
                (AlarmPanelState::Arming, AlarmPanelState::ArmedAway)
            }
        };

        let prior = {
            let mut display = self.lock_display();
            if display.in_flight {
                return Err(AlarmCommandError::Rejected(
                    "another alarm command is in progress".to_string(),
                ));
            }
            display.in_flight = true;
            display.shown.replace(transient)
        };
        debug!("[{}] Setting alarm to {}", self.site_id, command);
        self.publish(tx).await;

        let service = self.coordinator.service();
        let result = match command {
            AlarmCommand::Disarm => service.disarm().await,
            AlarmCommand::ArmHome => service.arm_home(false).await,
            AlarmCommand::ArmAway | AlarmCommand::ArmCustomBypass => service.arm_away(force).await,
        };

        let failure = match result {
            Ok(true) => None,
            Ok(false) => Some("ADT Pulse did not accept the command".to_string()),
            Err(e) => Some(e.to_string()),
        };

        {
            let mut display = self.lock_display();
            display.in_flight = false;
            display.shown = if failure.is_none() { Some(target) } else { prior };
        }
        self.publish(tx).await;

        match failure {
            None => {
                info!("[{}] Alarm {} confirmed", self.site_id, command);
                Ok(())
            }
            Some(reason) => {
                let message = format!("Could not {} ADT Pulse alarm: {}", command, reason);
                warn!("[{}] {}", self.site_id, message);
                let notification = Notification {
                    id: format!("{}_alarm_{}", DOMAIN, self.site_id),
                    title: NOTIFICATION_TITLE.to_string(),
                    message: message.clone(),
                    created_at: Utc::now(),
                };
                if tx
                    .send(FromIntegrationMessage::Notify(notification))
                    .await
                    .is_err()
                {
                    debug!("[{}] Engine gone, notification dropped", self.site_id);
                }
                Err(AlarmCommandError::Service(message))
            }
        }
    }

    fn ready_site(&self) -> Result<Arc<Site>, AlarmCommandError> {
        if let Some(error) = self.coordinator.last_error() {
            return Err(AlarmCommandError::NotReady(error.to_string()));
        }
        self.coordinator
            .site()
            .ok_or_else(|| AlarmCommandError::NotReady("no data from ADT Pulse yet".to_string()))
    }

    async fn publish(&self, tx: &FromIntegrationSender) {
        let msg = FromIntegrationMessage::EntityStateChanged {
            entity_id: self.entity_id(),
            state: self.state(),
        };
        if tx.send(msg).await.is_err() {
            debug!("[{}] Engine gone, state update dropped", self.site_id);
        }
    }

    fn lock_display(&self) -> std::sync::MutexGuard<'_, Display> {
        self.display.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Entity for AlarmPanel {
    fn platform(&self) -> Platform {
        Platform::AlarmControlPanel
    }

    fn unique_id(&self) -> String {
        alarm_unique_id(&self.site_id)
    }

    fn device_info(&self) -> Option<DeviceInfo> {
        let site = self.coordinator.site()?;
        Some(DeviceInfo {
            identifiers: vec![(DOMAIN.to_string(), site.id.clone())],
            name: Some(site.name.clone()),
            manufacturer: site.alarm_control_panel.manufacturer.clone(),
            model: site.alarm_control_panel.model.clone(),
            via_device: Some(gateway_identifier(&site)),
            ..Default::default()
        })
    }

    fn state(&self) -> EntityState {
        let site = self.coordinator.site();
        let status = site
            .as_ref()
            .map(|s| s.alarm_control_panel.status)
            .unwrap_or_default();
        let shown = self
            .lock_display()
            .shown
            .unwrap_or_else(|| panel_state(status));

        let mut attributes = serde_json::Map::new();
        attributes.insert("site_id".into(), json!(self.site_id));
        attributes.insert(
            "last_update_time".into(),
            json!(site
                .as_ref()
                .and_then(|s| s.alarm_control_panel.last_update)
                .map(|t| t.to_rfc3339())),
        );
        attributes.insert("alarm_state".into(), json!(status));
        attributes.insert("attribution".into(), json!(ATTRIBUTION));

        EntityState {
            name: site
                .as_ref()
                .map(|s| format!("ADT {}", s.name))
                .unwrap_or_else(|| format!("ADT {}", self.site_id)),
            unique_id: self.unique_id(),
            available: site.is_some() && self.coordinator.last_error().is_none(),
            icon: Some(panel_icon(status).to_string()),
            value: EntityValue::AlarmControlPanel {
                state: shown,
                supported_features: vec![
                    AlarmFeature::ArmHome,
                    AlarmFeature::ArmAway,
                    AlarmFeature::ArmCustomBypass,
                ],
            },
            attributes,
        }
    }
}
