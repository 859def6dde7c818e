use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::error::Error;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;

use async_trait::async_trait;
use pulsehearth_client::ConnectionSettings;
use pulsehearth_client::Credentials;
use pulsehearth_client::PulseConnector;
use pulsehearth_client::PulseError;
use pulsehearth_client::PulseService;
use pulsehearth_client::Site;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::alarm::AlarmPanel;
use super::binary_sensor::GatewaySensor;
use super::binary_sensor::SensorKind;
use super::binary_sensor::ZoneSensor;
use super::coordinator::Clock;
use super::coordinator::Coordinator;
use super::coordinator::CoordinatorUpdate;
use super::coordinator::SystemClock;
use super::sensor::ConnectionStatusSensor;
use super::sensor::NextRefreshSensor;
use crate::engine::AlarmCommandError;
use crate::engine::Entity;
use crate::engine::FromIntegrationMessage;
use crate::engine::FromIntegrationSender;
use crate::engine::Integration;
use crate::engine::ToIntegrationMessage;

#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("failed to start ADT Pulse client: {0}")]
    Connect(#[source] PulseError),

    #[error("ADT Pulse rejected the credentials")]
    InvalidAuth,

    #[error("ADT Pulse login failed: {0}")]
    Login(#[source] PulseError),

    #[error("ADT Pulse returned no site after login")]
    NoSite,

    #[error("engine channel closed")]
    EngineGone,
}

fn boxed(e: SetupError) -> Box<dyn Error + Send> {
    Box::new(e)
}

/// Entities of one site and the channel they publish through.
struct SiteEntities {
    entry_id: String,
    site_id: String,
    coordinator: Arc<Coordinator>,
    alarm: Arc<AlarmPanel>,
    fixed: Vec<Arc<dyn Entity>>,
    zones: Mutex<BTreeMap<u32, Arc<ZoneSensor>>>,
    tx: FromIntegrationSender,
}

impl SiteEntities {
    fn all(&self) -> Vec<Arc<dyn Entity>> {
        let zones = self.lock_zones();
        self.fixed
            .iter()
            .cloned()
            .chain(zones.values().map(|z| Arc::clone(z) as Arc<dyn Entity>))
            .collect()
    }

    async fn announce(&self, entity: &dyn Entity) -> Result<(), SetupError> {
        self.tx
            .send(FromIntegrationMessage::EntityDiscovered {
                entity_id: entity.entity_id(),
                integration_name: self.entry_id.clone(),
                device: entity.device_info(),
                state: entity.state(),
            })
            .await
            .map_err(|_| SetupError::EngineGone)
    }

    async fn publish_all(&self) -> Result<(), SetupError> {
        for entity in self.all() {
            self.tx
                .send(FromIntegrationMessage::EntityStateChanged {
                    entity_id: entity.entity_id(),
                    state: entity.state(),
                })
                .await
                .map_err(|_| SetupError::EngineGone)?;
        }
        Ok(())
    }

    /// Add sensors for new zones and drop those whose zone disappeared.
    async fn sync_zones(&self, site: &Site) -> Result<(), SetupError> {
        let (added, removed) = {
            let mut zones = self.lock_zones();
            let mut added = Vec::new();
            for zone in site.zones.values() {
                if zones.contains_key(&zone.id) {
                    continue;
                }
                match SensorKind::classify(zone) {
                    Ok(kind) => {
                        let sensor = Arc::new(ZoneSensor::new(
                            Arc::clone(&self.coordinator),
                            &self.site_id,
                            zone.id,
                            kind,
                        ));
                        zones.insert(zone.id, Arc::clone(&sensor));
                        added.push(sensor);
                    }
                    Err(e) => {
                        warn!(
                            "[{}] Skipping zone {} ({}): {}",
                            self.entry_id, zone.id, zone.name, e
                        );
                    }
                }
            }

            let gone: BTreeSet<u32> = zones
                .keys()
                .filter(|id| site.zone(**id).is_none())
                .copied()
                .collect();
            let removed: Vec<Arc<ZoneSensor>> =
                gone.iter().filter_map(|id| zones.remove(id)).collect();
            (added, removed)
        };

        for sensor in added {
            info!("[{}] Adding zone sensor {}", self.entry_id, sensor.entity_id());
            self.announce(sensor.as_ref()).await?;
        }
        for sensor in removed {
            info!(
                "[{}] Zone {} no longer reported, removing",
                self.entry_id,
                sensor.zone_id()
            );
            self.tx
                .send(FromIntegrationMessage::EntityRemoved {
                    entity_id: sensor.entity_id(),
                })
                .await
                .map_err(|_| SetupError::EngineGone)?;
        }
        Ok(())
    }

    fn lock_zones(&self) -> std::sync::MutexGuard<'_, BTreeMap<u32, Arc<ZoneSensor>>> {
        self.zones.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Republish entity state after every coordinator update.
async fn forward_updates(
    entities: Arc<SiteEntities>,
    mut rx: broadcast::Receiver<CoordinatorUpdate>,
) {
    loop {
        match rx.recv().await {
            Ok(update) => {
                if update == CoordinatorUpdate::DataUpdated {
                    entities.alarm.on_coordinator_update();
                    if let Some(site) = entities.coordinator.site() {
                        if let Err(e) = entities.sync_zones(&site).await {
                            debug!("[{}] {}", entities.entry_id, e);
                            return;
                        }
                    }
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                debug!("[{}] Skipped {} coordinator updates", entities.entry_id, skipped);
            }
            Err(RecvError::Closed) => return,
        }
        if entities.publish_all().await.is_err() {
            return;
        }
    }
}

struct Running {
    service: Arc<dyn PulseService>,
    coordinator: Arc<Coordinator>,
    entities: Arc<SiteEntities>,
    forwarder: JoinHandle<()>,
}

/// ADT Pulse integration for one config entry.
pub struct AdtPulseIntegration {
    entry_id: String,
    credentials: Credentials,
    settings: ConnectionSettings,
    connector: Arc<dyn PulseConnector>,
    clock: Arc<dyn Clock>,
    running: Option<Running>,
}

impl AdtPulseIntegration {
    pub fn new(
        entry_id: impl Into<String>,
        credentials: Credentials,
        settings: ConnectionSettings,
        connector: Arc<dyn PulseConnector>,
    ) -> Self {
        Self {
            entry_id: entry_id.into(),
            credentials,
            settings,
            connector,
            clock: Arc::new(SystemClock),
            running: None,
        }
    }

    async fn request_reauth(&self, tx: &FromIntegrationSender, reason: String) {
        let msg = FromIntegrationMessage::ReauthRequired {
            entry_id: self.entry_id.clone(),
            reason,
        };
        if tx.send(msg).await.is_err() {
            debug!("[{}] Engine gone, re-auth request dropped", self.entry_id);
        }
    }

    async fn login(
        &self,
        service: &Arc<dyn PulseService>,
        tx: &FromIntegrationSender,
    ) -> Result<Arc<Site>, SetupError> {
        match service.login().await {
            Ok(true) => {}
            Ok(false) => {
                self.request_reauth(tx, SetupError::InvalidAuth.to_string())
                    .await;
                return Err(SetupError::InvalidAuth);
            }
            Err(e @ PulseError::Login { .. }) => {
                self.request_reauth(tx, e.to_string()).await;
                return Err(SetupError::Login(e));
            }
            Err(e) => return Err(SetupError::Login(e)),
        }
        service.site().ok_or(SetupError::NoSite)
    }
}

#[async_trait]
impl Integration for AdtPulseIntegration {
    fn name(&self) -> &str {
        &self.entry_id
    }

    async fn setup(&mut self, tx: FromIntegrationSender) -> Result<(), Box<dyn Error + Send>> {
        info!(
            "[{}] Connecting to {} as {}",
            self.entry_id, self.settings.service_host, self.credentials.username
        );
        let service = self
            .connector
            .connect(&self.credentials, &self.settings)
            .await
            .map_err(|e| boxed(SetupError::Connect(e)))?;

        let site = match self.login(&service, &tx).await {
            Ok(site) => site,
            Err(e) => {
                if let Err(logout) = service.logout().await {
                    debug!("[{}] Logout after failed setup: {}", self.entry_id, logout);
                }
                return Err(boxed(e));
            }
        };
        info!(
            "[{}] Logged in to site {} ({}, {} zones)",
            self.entry_id,
            site.id,
            site.name,
            site.zones.len()
        );

        let reauth_tx = tx.clone();
        let entry_id = self.entry_id.clone();
        let coordinator = Arc::new(Coordinator::new(
            self.entry_id.clone(),
            Arc::clone(&service),
            Arc::clone(&self.clock),
            Box::new(move |error| {
                let msg = FromIntegrationMessage::ReauthRequired {
                    entry_id: entry_id.clone(),
                    reason: error.to_string(),
                };
                if let Err(e) = reauth_tx.try_send(msg) {
                    error!("[{}] Could not request re-authentication: {}", entry_id, e);
                }
            }),
        ));

        let alarm = Arc::new(AlarmPanel::new(Arc::clone(&coordinator), &site.id));
        let fixed: Vec<Arc<dyn Entity>> = vec![
            Arc::clone(&alarm) as Arc<dyn Entity>,
            Arc::new(GatewaySensor::new(Arc::clone(&coordinator), &site.id)),
            Arc::new(ConnectionStatusSensor::new(Arc::clone(&coordinator), &site.id)),
            Arc::new(NextRefreshSensor::new(Arc::clone(&coordinator), &site.id)),
        ];
        let entities = Arc::new(SiteEntities {
            entry_id: self.entry_id.clone(),
            site_id: site.id.clone(),
            coordinator: Arc::clone(&coordinator),
            alarm,
            fixed,
            zones: Mutex::new(BTreeMap::new()),
            tx,
        });

        for entity in entities.fixed.iter() {
            entities.announce(entity.as_ref()).await.map_err(boxed)?;
        }
        entities.sync_zones(&site).await.map_err(boxed)?;

        let updates = coordinator.subscribe();
        let forwarder = tokio::spawn(forward_updates(Arc::clone(&entities), updates));
        coordinator.start();

        self.running = Some(Running {
            service,
            coordinator,
            entities,
            forwarder,
        });
        Ok(())
    }

    async fn handle_message(
        &mut self,
        msg: ToIntegrationMessage,
    ) -> Result<(), Box<dyn Error + Send>> {
        match msg {
            ToIntegrationMessage::AlarmCommand {
                entity_id,
                command,
                reply,
            } => {
                let result = match &self.running {
                    None => Err(AlarmCommandError::Unavailable(entity_id)),
                    Some(running) if running.entities.alarm.entity_id() != entity_id => {
                        Err(AlarmCommandError::UnknownEntity(entity_id))
                    }
                    Some(running) => {
                        running
                            .entities
                            .alarm
                            .execute(command, &running.entities.tx)
                            .await
                    }
                };
                if reply.send(result).is_err() {
                    debug!("[{}] Caller went away before the command finished", self.entry_id);
                }
            }
        }
        Ok(())
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };

        debug!(
            "[{}] Stopping update coordinator ({})",
            self.entry_id,
            running.coordinator.state()
        );
        // The update loop must be gone before the session is closed
        running.coordinator.stop().await;
        running.forwarder.abort();
        drop(running.entities);

        if let Err(e) = running.service.logout().await {
            warn!("[{}] Logout failed: {}", self.entry_id, e);
        }
        info!("[{}] ADT Pulse integration shut down", self.entry_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pulsehearth_client::AlarmStatus;
    use pulsehearth_client::ErrorKind;
    use tokio::sync::mpsc;
    use tokio::sync::oneshot;

    use super::*;
    use crate::engine::AlarmCommand;
    use crate::engine::FromIntegrationMessage as Msg;
    use crate::integrations::adtpulse::testing::MockConnector;
    use crate::integrations::adtpulse::testing::MockService;
    use crate::integrations::adtpulse::testing::site;
    use crate::integrations::adtpulse::testing::zone;

    fn integration(service: &Arc<MockService>) -> AdtPulseIntegration {
        AdtPulseIntegration::new(
            "entry1",
            Credentials {
                username: "me@example.com".into(),
                password: "hunter2".into(),
                fingerprint: "fp".into(),
            },
            ConnectionSettings::default(),
            Arc::new(MockConnector::new(Arc::clone(service))),
        )
    }

    fn discovered(msgs: &[Msg]) -> Vec<String> {
        msgs.iter()
            .filter_map(|m| match m {
                Msg::EntityDiscovered { entity_id, .. } => Some(entity_id.clone()),
                _ => None,
            })
            .collect()
    }

    fn drain(rx: &mut mpsc::Receiver<Msg>) -> Vec<Msg> {
        let mut msgs = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            msgs.push(msg);
        }
        msgs
    }

    #[tokio::test]
    async fn test_setup_announces_entities() {
        let mut data = site(AlarmStatus::Off);
        data.zones.insert(3, zone(3, "Keypad", "keypad", "OK", "Online"));
        let service = Arc::new(MockService::with_site(data));
        let mut integration = integration(&service);
        let (tx, mut rx) = mpsc::channel(64);

        integration.setup(tx).await.unwrap();

        let ids = discovered(&drain(&mut rx));
        assert_eq!(
            ids,
            vec![
                "alarm_control_panel.adt_pulse_alarm_160301z",
                "binary_sensor.adt_pulse_gateway_160301z",
                "sensor.160301z_connection_status",
                "sensor.160301z_next_refresh",
                "binary_sensor.adt_pulse_160301z_1",
                "binary_sensor.adt_pulse_160301z_2",
            ]
        );

        integration.shutdown().await.unwrap();
        assert_eq!(service.calls(), vec!["login", "logout"]);
    }

    #[tokio::test]
    async fn test_rejected_login_requests_reauth() {
        let service = Arc::new(MockService::with_site(site(AlarmStatus::Off)));
        service.push_login(Ok(false));
        let mut integration = integration(&service);
        let (tx, mut rx) = mpsc::channel(64);

        assert!(integration.setup(tx).await.is_err());
        match rx.try_recv().unwrap() {
            Msg::ReauthRequired { entry_id, .. } => assert_eq!(entry_id, "entry1"),
            other => panic!("unexpected message: {:?}", other),
        }
        assert_eq!(service.calls(), vec!["login", "logout"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_updates_sync_zones() {
        let service = Arc::new(MockService::with_site(site(AlarmStatus::Off)));
        // Hold the loop in backoff until the new site is in place
        service.push_update(Err(PulseError::Backoff {
            kind: ErrorKind::ServerConnection,
            message: "502".into(),
            interval: Duration::from_secs(1),
        }));
        let mut integration = integration(&service);
        let (tx, mut rx) = mpsc::channel(256);
        integration.setup(tx).await.unwrap();

        let mut changed = site(AlarmStatus::ArmedAway);
        changed.zones.remove(&2);
        changed
            .zones
            .insert(4, zone(4, "Smoke", "smoke", "OK", "Online"));
        service.set_site(changed);
        service.push_update(Ok(()));

        let mut added = false;
        let mut removed = false;
        while !(added && removed) {
            match tokio::time::timeout(Duration::from_secs(10), rx.recv()).await {
                Ok(Some(Msg::EntityDiscovered { entity_id, .. }))
                    if entity_id == "binary_sensor.adt_pulse_160301z_4" =>
                {
                    added = true;
                }
                Ok(Some(Msg::EntityRemoved { entity_id }))
                    if entity_id == "binary_sensor.adt_pulse_160301z_2" =>
                {
                    removed = true;
                }
                Ok(Some(_)) => {}
                Ok(None) | Err(_) => panic!("zones not synced: added={added} removed={removed}"),
            }
        }
        integration.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_login_error_during_updates_requests_reauth() {
        let service = Arc::new(MockService::with_site(site(AlarmStatus::Off)));
        service.push_update(Err(PulseError::Login {
            kind: ErrorKind::NotLoggedIn,
            message: "session expired".into(),
        }));
        let mut integration = integration(&service);
        let (tx, mut rx) = mpsc::channel(64);
        integration.setup(tx).await.unwrap();

        let reason = loop {
            match tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
                Ok(Some(Msg::ReauthRequired { reason, .. })) => break reason,
                Ok(Some(_)) => continue,
                Ok(None) | Err(_) => panic!("no re-auth request"),
            }
        };
        assert!(reason.contains("session expired"));
        integration.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_alarm_command_routing() {
        let service = Arc::new(MockService::with_site(site(AlarmStatus::Off)));
        let mut integration = integration(&service);
        let (tx, _rx) = mpsc::channel(64);
        integration.setup(tx).await.unwrap();

        let (reply, reply_rx) = oneshot::channel();
        integration
            .handle_message(ToIntegrationMessage::AlarmCommand {
                entity_id: "alarm_control_panel.adt_pulse_alarm_160301z".into(),
                command: AlarmCommand::ArmHome,
                reply,
            })
            .await
            .unwrap();
        assert_eq!(reply_rx.await.unwrap(), Ok(()));

        let (reply, reply_rx) = oneshot::channel();
        integration
            .handle_message(ToIntegrationMessage::AlarmCommand {
                entity_id: "alarm_control_panel.other".into(),
                command: AlarmCommand::Disarm,
                reply,
            })
            .await
            .unwrap();
        assert!(matches!(
            reply_rx.await.unwrap(),
            Err(AlarmCommandError::UnknownEntity(_))
        ));

        integration.shutdown().await.unwrap();
        assert_eq!(service.calls(), vec!["login", "arm_home(force=false)", "logout"]);
    }
}
