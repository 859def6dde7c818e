//! Scripted stand-ins for the cloud client.

use std::collections::BTreeMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use chrono::DateTime;
use chrono::TimeZone;
use chrono::Utc;
use pulsehearth_client::AlarmPanel;
use pulsehearth_client::AlarmStatus;
use pulsehearth_client::ConnectionSettings;
use pulsehearth_client::Credentials;
use pulsehearth_client::Gateway;
use pulsehearth_client::PulseConnector;
use pulsehearth_client::PulseError;
use pulsehearth_client::PulseService;
use pulsehearth_client::Site;
use pulsehearth_client::Zone;
use tokio::time::Instant;

use super::coordinator::Clock;

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 2, 23, 9, 34, 0).unwrap()
}

pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

pub fn zone(id: u32, name: &str, tag: &str, state: &str, status: &str) -> Zone {
    Zone {
        id,
        name: name.to_string(),
        tags: vec!["sensor".to_string(), tag.to_string()],
        state: state.to_string(),
        status: status.to_string(),
        last_activity: Some(t0()),
    }
}

/// Site 160301z with a door and a motion sensor, both clear.
pub fn site(status: AlarmStatus) -> Site {
    let zones = [
        zone(1, "Front Door", "doorWindow", "OK", "Online"),
        zone(2, "Hall Motion", "motion", "OK", "Online"),
    ];
    Site {
        id: "160301z".to_string(),
        name: "Home".to_string(),
        alarm_control_panel: AlarmPanel {
            status,
            manufacturer: Some("ADT".to_string()),
            model: Some("Safewatch Pro 3000/3000CN".to_string()),
            last_update: Some(t0()),
        },
        gateway: Gateway {
            is_online: true,
            serial_number: Some("5U020CN3007E3".to_string()),
            manufacturer: Some("ADT".to_string()),
            model: Some("PGZNG1".to_string()),
            firmware_version: Some("24.0.0-9".to_string()),
            primary_connection_type: Some("Broadband".to_string()),
            ..Default::default()
        },
        zones: zones.into_iter().map(|z| (z.id, z)).collect::<BTreeMap<_, _>>(),
    }
}

/// `PulseService` driven by queued results.
///
/// `wait_for_update` pends forever once its script runs out.
pub struct MockService {
    site: ArcSwapOption<Site>,
    login: Mutex<VecDeque<Result<bool, PulseError>>>,
    updates: Mutex<VecDeque<Result<(), PulseError>>>,
    commands: Mutex<VecDeque<Result<bool, PulseError>>>,
    calls: Mutex<Vec<String>>,
    wait_calls: Mutex<Vec<Instant>>,
}

impl MockService {
    pub fn new() -> Self {
        Self {
            site: ArcSwapOption::empty(),
            login: Mutex::new(VecDeque::new()),
            updates: Mutex::new(VecDeque::new()),
            commands: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            wait_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_site(site: Site) -> Self {
        let service = Self::new();
        service.set_site(site);
        service
    }

    pub fn set_site(&self, site: Site) {
        self.site.store(Some(Arc::new(site)));
    }

    pub fn push_login(&self, result: Result<bool, PulseError>) {
        self.login.lock().unwrap().push_back(result);
    }

    pub fn push_update(&self, result: Result<(), PulseError>) {
        self.updates.lock().unwrap().push_back(result);
    }

    pub fn push_command(&self, result: Result<bool, PulseError>) {
        self.commands.lock().unwrap().push_back(result);
    }

    /// Names of the calls made so far, e.g. `arm_away(force=true)`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// When each `wait_for_update` call started
    pub fn wait_calls(&self) -> Vec<Instant> {
        self.wait_calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn next_command(&self) -> Result<bool, PulseError> {
        self.commands.lock().unwrap().pop_front().unwrap_or(Ok(true))
    }
}

#[async_trait]
impl PulseService for MockService {
    async fn login(&self) -> Result<bool, PulseError> {
        self.record("login".to_string());
        self.login.lock().unwrap().pop_front().unwrap_or(Ok(true))
    }

    async fn logout(&self) -> Result<(), PulseError> {
        self.record("logout".to_string());
        Ok(())
    }

    async fn wait_for_update(&self) -> Result<(), PulseError> {
        self.wait_calls.lock().unwrap().push(Instant::now());
        let next = self.updates.lock().unwrap().pop_front();
        match next {
            Some(result) => result,
            None => std::future::pending().await,
        }
    }

    fn site(&self) -> Option<Arc<Site>> {
        self.site.load_full()
    }

    async fn arm_home(&self, force_arm: bool) -> Result<bool, PulseError> {
        self.record(format!("arm_home(force={})", force_arm));
        self.next_command()
    }

    async fn arm_away(&self, force_arm: bool) -> Result<bool, PulseError> {
        self.record(format!("arm_away(force={})", force_arm));
        self.next_command()
    }

    async fn disarm(&self) -> Result<bool, PulseError> {
        self.record("disarm".to_string());
        self.next_command()
    }
}

/// Hands out one shared `MockService`, or fails to connect.
pub struct MockConnector {
    pub service: Option<Arc<MockService>>,
    pub connections: Mutex<Vec<(Credentials, ConnectionSettings)>>,
}

impl MockConnector {
    pub fn new(service: Arc<MockService>) -> Self {
        Self {
            service: Some(service),
            connections: Mutex::new(Vec::new()),
        }
    }

    pub fn unreachable() -> Self {
        Self {
            service: None,
            connections: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl PulseConnector for MockConnector {
    async fn connect(
        &self,
        credentials: &Credentials,
        settings: &ConnectionSettings,
    ) -> Result<Arc<dyn PulseService>, PulseError> {
        self.connections
            .lock()
            .unwrap()
            .push((credentials.clone(), *settings));
        match &self.service {
            Some(service) => Ok(Arc::clone(service) as Arc<dyn PulseService>),
            None => Err(PulseError::Transport("connection refused".to_string())),
        }
    }
}
