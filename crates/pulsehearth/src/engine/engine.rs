use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use std::sync::PoisonError;

use arc_swap::ArcSwap;
use chrono::Utc;
use pulsehearth_client::PulseConnector;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::config_entries::ConfigEntries;
use super::config_entries::ConfigEntry;
use super::config_entries::EntryError;
use super::config_entries::EntryMap;
use super::config_entries::EntrySource;
use super::config_entries::EntryState;
use super::device::Device;
use super::integration::FlowError;
use super::integration::FromIntegrationReceiver;
use super::integration::FromIntegrationSender;
use super::integration::Integration;
use super::integration::IntegrationContext;
use super::integration::IntegrationFactory;
use super::integration::ToIntegrationSender;
use super::integration::find_factory;
use super::message::AlarmCommand;
use super::message::AlarmCommandError;
use super::message::FromIntegrationMessage;
use super::message::ToIntegrationMessage;
use super::state::EntityValue;
use super::state::Notification;
use super::state::State;

/// Capacity for the integration→engine message channel
/// Provides backpressure when integrations send faster than the engine can process
const FROM_INTEGRATION_CHANNEL_SIZE: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("no integration registered for domain '{0}'")]
    UnknownDomain(String),

    #[error(transparent)]
    Entry(#[from] EntryError),

    #[error(transparent)]
    Flow(#[from] FlowError),

    #[error("failed to create integration for entry {entry_id}: {error:#}")]
    Create {
        entry_id: String,
        error: anyhow::Error,
    },
}

struct RunningIntegration {
    tx: ToIntegrationSender,
    handle: JoinHandle<()>,
}

/// pulsehearth engine
///
/// Owns the config entries, runs one task per loaded entry, keeps the
/// entity/device/notification view of the world in `State` and routes alarm
/// commands to the integration that owns the entity.
pub struct Engine {
    /// Centralized state snapshot (readers load the Arc, writers swap in a new one)
    state: ArcSwap<State>,

    /// Map of entity_id -> entry_id for routing messages
    entity_integration_map: std::sync::Mutex<HashMap<String, String>>,

    /// Running integrations keyed by entry_id
    integrations: std::sync::Mutex<HashMap<String, RunningIntegration>>,

    /// Receive messages from integrations (events)
    message_rx: Mutex<FromIntegrationReceiver>,

    /// Sender for integrations to report events back to the engine
    message_tx: FromIntegrationSender,

    entries: Arc<ConfigEntries>,
    connector: Arc<dyn PulseConnector>,
}

impl Engine {
    pub fn new(connector: Arc<dyn PulseConnector>, entries: Arc<ConfigEntries>) -> Self {
        let (message_tx, message_rx) = mpsc::channel(FROM_INTEGRATION_CHANNEL_SIZE);
        Self {
            state: ArcSwap::new(Arc::default()),
            entity_integration_map: std::sync::Mutex::new(HashMap::new()),
            integrations: std::sync::Mutex::new(HashMap::new()),
            message_rx: Mutex::new(message_rx),
            message_tx,
            entries,
            connector,
        }
    }

    /// Get a snapshot of the current engine state.
    ///
    /// Clones the `Arc` (atomic refcount bump), essentially free.
    pub fn state_snapshot(&self) -> Arc<State> {
        self.state.load_full()
    }

    pub fn entries(&self) -> Vec<ConfigEntry> {
        self.entries.all()
    }

    pub fn entry(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.entries.get(entry_id)
    }

    /// Set up every stored entry. Failures are logged and do not stop the others.
    pub fn setup_entries(&self) {
        for entry in self.entries.all() {
            if let Err(e) = self.setup_entry(&entry.entry_id) {
                error!("[{}] Failed to set up {}: {}", entry.entry_id, entry.title, e);
            }
        }
    }

    /// Create and start the integration for a stored entry.
    ///
    /// Setup itself runs in the integration's task; its outcome is recorded
    /// on the entry state.
    pub fn setup_entry(&self, entry_id: &str) -> Result<(), EngineError> {
        let entry = self
            .entries
            .get(entry_id)
            .ok_or_else(|| EntryError::NotFound(entry_id.to_string()))?;
        let factory = factory_for(&entry.domain)?;

        if self.lock_integrations().contains_key(entry_id) {
            warn!("[{}] Entry is already loaded", entry_id);
            return Ok(());
        }

        let ctx = IntegrationContext {
            connector: &self.connector,
        };
        let integration = match (factory.create)(&ctx, &entry) {
            Ok(Some(i)) => i,
            Ok(None) => {
                info!("[{}] {} has nothing to set up", entry_id, entry.domain);
                return Ok(());
            }
            Err(error) => {
                self.entries
                    .set_state(entry_id, EntryState::SetupError, Some(format!("{:#}", error)));
                return Err(EngineError::Create {
                    entry_id: entry_id.to_string(),
                    error,
                });
            }
        };

        self.register_integration(entry_id.to_string(), integration);
        Ok(())
    }

    /// Register an integration with the engine
    ///
    /// This spawns the integration in a background task, wires up channels,
    /// and starts its setup process.
    pub fn register_integration(&self, entry_id: String, mut integration: Box<dyn Integration>) {
        let (to_integration_tx, mut to_integration_rx) = mpsc::unbounded_channel();
        let from_integration_tx = self.message_tx.clone();
        let entries = Arc::clone(&self.entries);

        // Held until the entry is inserted so early discoveries find it
        let mut integrations = self.lock_integrations();

        let name = entry_id.clone();
        let handle = tokio::spawn(async move {
            // Setup integration (gives it the sender for events)
            if let Err(e) = integration.setup(from_integration_tx).await {
                warn!("[{}] Integration setup failed: {}", name, e);
                // A re-auth request sent during setup says more than the error
                let reauth = entries
                    .get(&name)
                    .is_some_and(|entry| entry.state == EntryState::ReauthRequired);
                if !reauth {
                    entries.set_state(&name, EntryState::SetupError, Some(e.to_string()));
                }
                return;
            }
            entries.set_state(&name, EntryState::Loaded, None);

            // Process commands from engine
            while let Some(msg) = to_integration_rx.recv().await {
                if let Err(e) = integration.handle_message(msg).await {
                    warn!("[{}] Integration failed to handle message: {}", name, e);
                }
            }

            if let Err(e) = integration.shutdown().await {
                warn!("[{}] Integration shutdown failed: {}", name, e);
            }
            debug!("[{}] Integration task finished", name);
        });

        integrations.insert(
            entry_id,
            RunningIntegration {
                tx: to_integration_tx,
                handle,
            },
        );
    }

    /// Stop an entry's integration and drop its entities.
    ///
    /// Closing the command channel ends the integration task, which shuts
    /// the integration down; this waits for that to finish.
    pub async fn unload_entry(&self, entry_id: &str) -> bool {
        let running = self.lock_integrations().remove(entry_id);
        let Some(running) = running else {
            return false;
        };
        drop(running.tx);
        if let Err(e) = running.handle.await {
            error!("[{}] Integration task failed: {}", entry_id, e);
        }

        let owned: Vec<String> = {
            let mut map = self.lock_entity_map();
            let owned = map
                .iter()
                .filter(|(_, owner)| owner.as_str() == entry_id)
                .map(|(entity_id, _)| entity_id.clone())
                .collect::<Vec<_>>();
            for entity_id in &owned {
                map.remove(entity_id);
            }
            owned
        };
        self.update_state(|state| {
            for entity_id in &owned {
                remove_entity(state, entity_id);
            }
        });

        self.entries.set_state(entry_id, EntryState::NotLoaded, None);
        info!("[{}] Unloaded entry ({} entities)", entry_id, owned.len());
        true
    }

    pub async fn reload_entry(&self, entry_id: &str) -> Result<(), EngineError> {
        self.unload_entry(entry_id).await;
        self.setup_entry(entry_id)
    }

    /// Unload every running integration.
    pub async fn shutdown(&self) {
        let ids: Vec<String> = self.lock_integrations().keys().cloned().collect();
        for entry_id in ids {
            self.unload_entry(&entry_id).await;
        }
    }

    /// Validate setup input for `domain` and store a new entry.
    ///
    /// The entry is not loaded; call `setup_entry` for that.
    pub async fn create_entry(
        &self,
        domain: &str,
        input: &EntryMap,
    ) -> Result<ConfigEntry, EngineError> {
        let factory = factory_for(domain)?;
        let result = factory
            .flow
            .validate_input(self.connector.as_ref(), input)
            .await?;

        let mut entry = ConfigEntry::new(domain, result.title, result.data);
        if let Some(unique_id) = result.unique_id {
            if self.entries.get_by_unique_id(domain, &unique_id).is_some() {
                return Err(FlowError::AlreadyConfigured.into());
            }
            entry = entry.with_unique_id(unique_id);
        }
        Ok(self.entries.add(entry).await?)
    }

    /// Validate and store new options, then reload the entry if it is running.
    pub async fn update_options(
        &self,
        entry_id: &str,
        input: &EntryMap,
    ) -> Result<ConfigEntry, EngineError> {
        let entry = self
            .entries
            .get(entry_id)
            .ok_or_else(|| EntryError::NotFound(entry_id.to_string()))?;
        let factory = factory_for(&entry.domain)?;
        let options = factory.flow.validate_options(&entry.options, input)?;
        let updated = self.entries.update_options(entry_id, options).await?;

        if self.lock_integrations().contains_key(entry_id) {
            self.reload_entry(entry_id).await?;
        }
        Ok(updated)
    }

    /// Replace an entry's credentials and restart it.
    pub async fn reauth_entry(
        &self,
        entry_id: &str,
        input: &EntryMap,
    ) -> Result<ConfigEntry, EngineError> {
        let entry = self
            .entries
            .get(entry_id)
            .ok_or_else(|| EntryError::NotFound(entry_id.to_string()))?;
        let factory = factory_for(&entry.domain)?;
        let result = factory
            .flow
            .validate_input(self.connector.as_ref(), input)
            .await?;

        if entry.unique_id.is_some() && entry.unique_id != result.unique_id {
            return Err(FlowError::WrongAccount.into());
        }

        let updated = self
            .entries
            .update_data(entry_id, result.data, EntrySource::Reauth)
            .await?;
        self.dismiss_notification(&reauth_notification_id(entry_id));
        info!("[{}] Re-authenticated, reloading", entry_id);
        self.reload_entry(entry_id).await?;
        Ok(updated)
    }

    pub async fn remove_entry(&self, entry_id: &str) -> Result<ConfigEntry, EngineError> {
        self.unload_entry(entry_id).await;
        let removed = self.entries.remove(entry_id).await?;
        self.dismiss_notification(&reauth_notification_id(entry_id));
        Ok(removed)
    }

    /// Send an alarm command and wait for the integration's verdict.
    pub async fn alarm_command(
        &self,
        entity_id: &str,
        command: AlarmCommand,
    ) -> Result<(), AlarmCommandError> {
        let is_panel = matches!(
            self.state.load().entities.get(entity_id).map(|e| &e.value),
            Some(EntityValue::AlarmControlPanel { .. })
        );
        if !is_panel {
            return Err(AlarmCommandError::UnknownEntity(entity_id.to_string()));
        }

        let (reply, reply_rx) = oneshot::channel();
        let msg = ToIntegrationMessage::AlarmCommand {
            entity_id: entity_id.to_string(),
            command,
            reply,
        };
        self.send_command(msg)
            .map_err(|_| AlarmCommandError::Unavailable(entity_id.to_string()))?;

        reply_rx
            .await
            .map_err(|_| AlarmCommandError::Unavailable(entity_id.to_string()))?
    }

    /// Send a command to an integration
    ///
    /// Routes the command to the appropriate integration based on entity_id.
    fn send_command(&self, msg: ToIntegrationMessage) -> Result<(), Box<dyn Error + Send>> {
        let entry_id = self
            .lock_entity_map()
            .get(msg.entity_id())
            .cloned()
            .ok_or_else(|| -> Box<dyn Error + Send> {
                Box::new(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("No integration found for entity: {}", msg.entity_id()),
                ))
            })?;

        let integrations = self.lock_integrations();
        let running = integrations
            .get(&entry_id)
            .ok_or_else(|| -> Box<dyn Error + Send> {
                Box::new(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("Integration channel not found: {}", entry_id),
                ))
            })?;

        running
            .tx
            .send(msg)
            .map_err(|e| -> Box<dyn Error + Send> { Box::new(e) })
    }

    pub fn dismiss_notification(&self, id: &str) -> bool {
        let mut removed = false;
        self.update_state(|state| removed = state.notifications.remove(id).is_some());
        removed
    }

    /// Run the engine's main event loop
    ///
    /// Processes incoming events from integrations and updates state.
    pub async fn run(&self) -> Result<(), Box<dyn Error + Send>> {
        info!("Engine starting");

        let mut rx = self.message_rx.lock().await;
        while let Some(msg) = rx.recv().await {
            self.handle_event(msg);
        }

        info!("Engine shutting down");
        Ok(())
    }

    /// Handle an event from an integration
    fn handle_event(&self, msg: FromIntegrationMessage) {
        match msg {
            FromIntegrationMessage::EntityDiscovered {
                entity_id,
                integration_name,
                device,
                state,
            } => {
                // Late discovery from an integration that has since been unloaded
                if !self.lock_integrations().contains_key(&integration_name) {
                    debug!(
                        "[{}] Ignoring discovery of {} from unloaded entry",
                        integration_name, entity_id
                    );
                    return;
                }
                info!("[{}] Entity discovered: {}", integration_name, entity_id);

                self.lock_entity_map()
                    .insert(entity_id.clone(), integration_name);

                let device_id = device.as_ref().and_then(|d| d.device_id());
                self.update_state(|s| {
                    if let (Some(info), Some(device_id)) = (&device, &device_id) {
                        let entry = s
                            .devices
                            .entry(device_id.clone())
                            .or_insert_with(|| Device::new(device_id.clone()));
                        entry.merge(info);
                        entry.add_entity(entity_id.clone());
                    }
                    s.entities.insert(entity_id.clone(), state.clone());
                });
            }
            FromIntegrationMessage::EntityRemoved { entity_id } => {
                info!("Entity removed: {}", entity_id);
                self.lock_entity_map().remove(&entity_id);
                self.update_state(|s| remove_entity(s, &entity_id));
            }
            FromIntegrationMessage::EntityStateChanged { entity_id, state } => {
                if !self.lock_entity_map().contains_key(&entity_id) {
                    debug!("State change for unknown entity {}, ignoring", entity_id);
                    return;
                }
                debug!("Entity state changed: {} (available={})", entity_id, state.available);
                self.update_state(|s| {
                    s.entities.insert(entity_id.clone(), state.clone());
                });
            }
            FromIntegrationMessage::ReauthRequired { entry_id, reason } => {
                warn!("[{}] Re-authentication required: {}", entry_id, reason);
                let title = self
                    .entries
                    .get(&entry_id)
                    .map(|e| e.title)
                    .unwrap_or_else(|| entry_id.clone());
                self.entries
                    .set_state(&entry_id, EntryState::ReauthRequired, Some(reason.clone()));
                self.add_notification(Notification {
                    id: reauth_notification_id(&entry_id),
                    title: format!("{}: re-authentication required", title),
                    message: reason,
                    created_at: Utc::now(),
                });
            }
            FromIntegrationMessage::Notify(notification) => {
                info!("Notification {}: {}", notification.id, notification.message);
                self.add_notification(notification);
            }
        }
    }

    fn add_notification(&self, notification: Notification) {
        self.update_state(|s| {
            s.notifications
                .insert(notification.id.clone(), notification.clone());
        });
    }

    /// Apply `f` to a copy of the current state and publish it.
    fn update_state(&self, mut f: impl FnMut(&mut State)) {
        self.state.rcu(|current| {
            let mut next = State::clone(current);
            f(&mut next);
            next
        });
    }

    fn lock_integrations(
        &self,
    ) -> std::sync::MutexGuard<'_, HashMap<String, RunningIntegration>> {
        self.integrations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_entity_map(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.entity_integration_map
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

fn factory_for(domain: &str) -> Result<&'static IntegrationFactory, EngineError> {
    find_factory(domain).ok_or_else(|| EngineError::UnknownDomain(domain.to_string()))
}

fn reauth_notification_id(entry_id: &str) -> String {
    format!("reauth_{}", entry_id)
}

/// Drop an entity and forget devices left without entities.
fn remove_entity(state: &mut State, entity_id: &str) {
    state.entities.remove(entity_id);
    state
        .devices
        .retain(|_, device| !device.remove_entity(entity_id));
}
