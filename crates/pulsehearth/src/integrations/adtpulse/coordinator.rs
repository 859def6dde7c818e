//! Bridges the client's `wait_for_update` to entity refreshes.
//!
//! One background task per entry waits on the client, records the last
//! error and broadcasts a `CoordinatorUpdate` after each wake-up. The client
//! owns retry timing; the coordinator only honours the delay it reports.

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::DateTime;
use chrono::Utc;
use pulsehearth_client::PulseError;
use pulsehearth_client::PulseService;
use pulsehearth_client::Site;
use tokio::sync::broadcast;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

const UPDATE_CHANNEL_SIZE: usize = 64;

/// Source of wall-clock time, replaceable in tests.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CoordinatorUpdate {
    /// Fresh data is available
    DataUpdated,
    /// A transient error was recorded; entities should show degraded state
    Degraded(PulseError),
    /// Credentials failed; the loop has stopped
    ReauthRequired(PulseError),
    /// Unclassified error; the loop has stopped
    Failed(PulseError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum CoordinatorState {
    Idle,
    Waiting,
    Backoff,
    Stopped,
}

pub type ReauthCallback = Box<dyn Fn(&PulseError) + Send + Sync>;

/// What the loop does after `wait_for_update` fails.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Recovery {
    Reauth,
    Wait(Duration),
    Fatal,
}

fn recovery(error: &PulseError, now: DateTime<Utc>) -> Recovery {
    match error {
        PulseError::Login { .. } => Recovery::Reauth,
        PulseError::Retry { retry_at, .. } => Recovery::Wait(
            retry_at
                .and_then(|at| (at - now).to_std().ok())
                .unwrap_or(Duration::ZERO),
        ),
        PulseError::Backoff { interval, .. } => Recovery::Wait(*interval),
        PulseError::Other(_) | PulseError::Transport(_) => Recovery::Fatal,
    }
}

pub struct Coordinator {
    name: String,
    service: Arc<dyn PulseService>,
    clock: Arc<dyn Clock>,
    last_error: ArcSwapOption<PulseError>,
    state: watch::Sender<CoordinatorState>,
    updates: broadcast::Sender<CoordinatorUpdate>,
    on_reauth: ReauthCallback,
    task: Mutex<Option<JoinHandle<Result<(), PulseError>>>>,
}

impl Coordinator {
    pub fn new(
        name: impl Into<String>,
        service: Arc<dyn PulseService>,
        clock: Arc<dyn Clock>,
        on_reauth: ReauthCallback,
    ) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_SIZE);
        let (state, _) = watch::channel(CoordinatorState::Idle);
        Self {
            name: name.into(),
            service,
            clock,
            last_error: ArcSwapOption::empty(),
            state,
            updates,
            on_reauth,
            task: Mutex::new(None),
        }
    }

    pub fn service(&self) -> &Arc<dyn PulseService> {
        &self.service
    }

    pub fn site(&self) -> Option<Arc<Site>> {
        self.service.site()
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Error from the most recent wait, cleared by the next successful update
    pub fn last_error(&self) -> Option<Arc<PulseError>> {
        self.last_error.load_full()
    }

    pub fn state(&self) -> CoordinatorState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorUpdate> {
        self.updates.subscribe()
    }

    #[cfg(test)]
    pub fn watch_state(&self) -> watch::Receiver<CoordinatorState> {
        self.state.subscribe()
    }

    /// Launch the update loop unless it is already running.
    pub fn start(self: &Arc<Self>) {
        let mut task = self.lock_task();
        if task.as_ref().is_some_and(|handle| !handle.is_finished()) {
            warn!("[{}] Update coordinator already running", self.name);
            return;
        }

        let this = Arc::clone(self);
        self.state.send_replace(CoordinatorState::Idle);
        *task = Some(tokio::spawn(async move { this.run().await }));
    }

    /// Abort the update loop and wait for it to finish. Safe to call repeatedly.
    pub async fn stop(&self) {
        let handle = self.lock_task().take();
        let Some(handle) = handle else {
            return;
        };

        handle.abort();
        match handle.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("[{}] Update loop had already failed: {}", self.name, e),
            Err(e) if e.is_cancelled() => debug!("[{}] Update loop cancelled", self.name),
            Err(e) => error!("[{}] Update loop panicked: {}", self.name, e),
        }
        self.state.send_replace(CoordinatorState::Stopped);
        info!("[{}] Update coordinator stopped", self.name);
    }

    async fn run(&self) -> Result<(), PulseError> {
        info!("[{}] Update coordinator started", self.name);
        let result = self.run_loop().await;
        self.state.send_replace(CoordinatorState::Stopped);
        result
    }

    async fn run_loop(&self) -> Result<(), PulseError> {
        loop {
            self.state.send_replace(CoordinatorState::Waiting);
            debug!("[{}] Waiting for updates", self.name);

            let error = match self.service.wait_for_update().await {
                Ok(()) => {
                    if self.last_error.swap(None).is_some() {
                        info!("[{}] Connection recovered", self.name);
                    }
                    debug!("[{}] Received update notification", self.name);
                    self.notify(CoordinatorUpdate::DataUpdated);
                    continue;
                }
                Err(e) => e,
            };

            match recovery(&error, self.clock.now()) {
                Recovery::Reauth => {
                    error!(
                        "[{}] Login failed during update, re-authentication required: {}",
                        self.name, error
                    );
                    self.last_error.store(Some(Arc::new(error.clone())));
                    (self.on_reauth)(&error);
                    self.notify(CoordinatorUpdate::ReauthRequired(error));
                    return Ok(());
                }
                Recovery::Wait(delay) => {
                    self.degrade(error);
                    if !delay.is_zero() {
                        debug!("[{}] Retrying in {:?}", self.name, delay);
                        self.state.send_replace(CoordinatorState::Backoff);
                        tokio::time::sleep(delay).await;
                    }
                }
                Recovery::Fatal => {
                    error!("[{}] Unexpected error, update loop exiting: {}", self.name, error);
                    self.last_error.store(Some(Arc::new(error.clone())));
                    self.notify(CoordinatorUpdate::Failed(error.clone()));
                    return Err(error);
                }
            }
        }
    }

    /// Record a transient error, telling listeners only when it changed.
    fn degrade(&self, error: PulseError) {
        if self.last_error.load().as_deref() == Some(&error) {
            debug!("[{}] Still degraded: {}", self.name, error);
            return;
        }
        warn!("[{}] Update failed: {}", self.name, error);
        self.last_error.store(Some(Arc::new(error.clone())));
        self.notify(CoordinatorUpdate::Degraded(error));
    }

    fn notify(&self, update: CoordinatorUpdate) {
        // No subscribers is fine
        let _ = self.updates.send(update);
    }

    fn lock_task(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<Result<(), PulseError>>>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[cfg(test)]
    pub fn set_last_error(&self, error: Option<PulseError>) {
        self.last_error.store(error.map(Arc::new));
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use pulsehearth_client::ErrorKind;
    use tokio::sync::broadcast::error::TryRecvError;

    use super::*;
    use crate::integrations::adtpulse::testing::FixedClock;
    use crate::integrations::adtpulse::testing::MockService;
    use crate::integrations::adtpulse::testing::t0;

    fn coordinator(service: Arc<MockService>) -> (Arc<Coordinator>, Arc<AtomicUsize>) {
        let reauths = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&reauths);
        let coordinator = Arc::new(Coordinator::new(
            "test",
            service,
            Arc::new(FixedClock(t0())),
            Box::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        ));
        (coordinator, reauths)
    }

    fn retry_error(seconds: i64) -> PulseError {
        PulseError::Retry {
            kind: ErrorKind::ServiceTemporarilyUnavailable,
            message: "service unavailable".into(),
            retry_at: Some(t0() + chrono::Duration::seconds(seconds)),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_waits_until_retry_time_and_degrades_once() {
        let service = Arc::new(MockService::new());
        service.push_update(Err(retry_error(30)));
        service.push_update(Err(retry_error(30)));
        service.push_update(Ok(()));
        let (coordinator, _) = coordinator(Arc::clone(&service));
        let mut rx = coordinator.subscribe();

        coordinator.start();

        assert_eq!(
            rx.recv().await.unwrap(),
            CoordinatorUpdate::Degraded(retry_error(30))
        );
        assert_eq!(rx.recv().await.unwrap(), CoordinatorUpdate::DataUpdated);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
        assert!(coordinator.last_error().is_none());

        let calls = service.wait_calls();
        assert!(calls.len() >= 3);
        assert!(calls[1] - calls[0] >= Duration::from_secs(30));
        assert!(calls[2] - calls[1] >= Duration::from_secs(30));

        coordinator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_in_the_past_rewaits_immediately() {
        let service = Arc::new(MockService::new());
        service.push_update(Err(retry_error(-10)));
        service.push_update(Ok(()));
        let (coordinator, _) = coordinator(Arc::clone(&service));
        let mut rx = coordinator.subscribe();

        coordinator.start();
        assert!(matches!(
            rx.recv().await.unwrap(),
            CoordinatorUpdate::Degraded(_)
        ));
        assert_eq!(rx.recv().await.unwrap(), CoordinatorUpdate::DataUpdated);

        let calls = service.wait_calls();
        assert_eq!(calls[1] - calls[0], Duration::ZERO);
        coordinator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_sleeps_interval() {
        let backoff = PulseError::Backoff {
            kind: ErrorKind::GatewayOffline,
            message: "gateway offline".into(),
            interval: Duration::from_secs(90),
        };
        let service = Arc::new(MockService::new());
        service.push_update(Err(backoff.clone()));
        service.push_update(Ok(()));
        let (coordinator, _) = coordinator(Arc::clone(&service));
        let mut state = coordinator.watch_state();
        let mut rx = coordinator.subscribe();

        coordinator.start();
        assert_eq!(rx.recv().await.unwrap(), CoordinatorUpdate::Degraded(backoff));
        state
            .wait_for(|s| *s == CoordinatorState::Backoff)
            .await
            .unwrap();
        assert_eq!(rx.recv().await.unwrap(), CoordinatorUpdate::DataUpdated);

        let calls = service.wait_calls();
        assert!(calls[1] - calls[0] >= Duration::from_secs(90));
        coordinator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_error_escalates_once_without_retry() {
        let login = PulseError::Login {
            kind: ErrorKind::Authentication,
            message: "bad password".into(),
        };
        let service = Arc::new(MockService::new());
        service.push_update(Err(login.clone()));
        service.push_update(Ok(()));
        let (coordinator, reauths) = coordinator(Arc::clone(&service));
        let mut rx = coordinator.subscribe();
        let mut state = coordinator.watch_state();

        coordinator.start();
        assert_eq!(
            rx.recv().await.unwrap(),
            CoordinatorUpdate::ReauthRequired(login.clone())
        );
        state
            .wait_for(|s| *s == CoordinatorState::Stopped)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(reauths.load(Ordering::SeqCst), 1);
        assert_eq!(service.wait_calls().len(), 1);
        assert_eq!(coordinator.last_error().as_deref(), Some(&login));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unclassified_error_ends_loop() {
        let service = Arc::new(MockService::new());
        service.push_update(Err(PulseError::Other("boom".into())));
        let (coordinator, reauths) = coordinator(Arc::clone(&service));
        let mut rx = coordinator.subscribe();

        coordinator.start();
        assert_eq!(
            rx.recv().await.unwrap(),
            CoordinatorUpdate::Failed(PulseError::Other("boom".into()))
        );
        coordinator.stop().await;
        assert_eq!(reauths.load(Ordering::SeqCst), 0);
        assert_eq!(coordinator.state(), CoordinatorState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_and_stop_twice() {
        let service = Arc::new(MockService::new());
        let (coordinator, _) = coordinator(Arc::clone(&service));
        let mut state = coordinator.watch_state();

        coordinator.start();
        coordinator.start();
        state
            .wait_for(|s| *s == CoordinatorState::Waiting)
            .await
            .unwrap();
        tokio::task::yield_now().await;
        assert_eq!(service.wait_calls().len(), 1);

        coordinator.stop().await;
        assert_eq!(coordinator.state(), CoordinatorState::Stopped);
        coordinator.stop().await;
        assert_eq!(coordinator.state(), CoordinatorState::Stopped);

        // A stopped coordinator can be started again
        coordinator.start();
        state
            .wait_for(|s| *s == CoordinatorState::Waiting)
            .await
            .unwrap();
        coordinator.stop().await;
    }

    #[test]
    fn test_recovery_classification() {
        let now = t0();
        assert_eq!(
            recovery(&retry_error(30), now),
            Recovery::Wait(Duration::from_secs(30))
        );
        let no_time = PulseError::Retry {
            kind: ErrorKind::ServiceTemporarilyUnavailable,
            message: String::new(),
            retry_at: None,
        };
        assert_eq!(recovery(&no_time, now), Recovery::Wait(Duration::ZERO));
        assert_eq!(
            recovery(&PulseError::Transport("eof".into()), now),
            Recovery::Fatal
        );
    }
}
