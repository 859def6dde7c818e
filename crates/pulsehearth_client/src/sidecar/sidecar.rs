use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use arc_swap::ArcSwapOption;
use async_trait::async_trait;
use tokio::io::AsyncBufReadExt;
use tokio::io::AsyncRead;
use tokio::io::AsyncWrite;
use tokio::io::AsyncWriteExt;
use tokio::io::BufReader;
use tokio::process::Child;
use tokio::sync::Mutex;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::protocol::Command;
use super::protocol::LogLevel;
use super::protocol::Message;
use super::protocol::Request;
use crate::ConnectionSettings;
use crate::Credentials;
use crate::PulseConnector;
use crate::PulseError;
use crate::PulseService;
use crate::Site;

type Reply = Result<Option<bool>, PulseError>;

/// Spawns one helper process per session.
#[derive(Debug, Clone)]
pub struct SidecarConnector {
    /// Python interpreter with the vendor client library installed
    pub python_path: PathBuf,

    /// Helper script speaking the sidecar protocol
    pub script_path: PathBuf,
}

impl SidecarConnector {
    pub fn new(python_path: PathBuf, script_path: PathBuf) -> Self {
        Self {
            python_path,
            script_path,
        }
    }
}

#[async_trait]
impl PulseConnector for SidecarConnector {
    async fn connect(
        &self,
        credentials: &Credentials,
        settings: &ConnectionSettings,
    ) -> Result<Arc<dyn PulseService>, PulseError> {
        info!(
            "Starting client helper {} for {}",
            self.script_path.display(),
            credentials.username
        );

        let mut child = tokio::process::Command::new(&self.python_path)
            .arg(&self.script_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                PulseError::Transport(format!(
                    "failed to start {}: {}",
                    self.python_path.display(),
                    e
                ))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| PulseError::Transport("helper stdin not captured".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| PulseError::Transport("helper stdout not captured".into()))?;

        let mut service = SidecarService::from_io(stdout, stdin);
        service.child = Some(child);
        service.configure(credentials, settings).await?;

        Ok(Arc::new(service))
    }
}

/// `PulseService` backed by a helper process.
pub struct SidecarService {
    inner: Arc<Inner>,
    reader_task: JoinHandle<()>,
    /// Killed on drop
    child: Option<Child>,
}

struct Inner {
    writer: Mutex<Pin<Box<dyn AsyncWrite + Send>>>,
    pending: std::sync::Mutex<HashMap<u64, oneshot::Sender<Reply>>>,
    next_request_id: AtomicU64,
    closed: AtomicBool,
    site: ArcSwapOption<Site>,
}

impl SidecarService {
    /// Wrap an already-running helper's output and input streams.
    pub fn from_io<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + 'static,
    {
        let inner = Arc::new(Inner {
            writer: Mutex::new(Box::pin(writer)),
            pending: std::sync::Mutex::new(HashMap::new()),
            next_request_id: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            site: ArcSwapOption::empty(),
        });

        let reader_task = tokio::spawn(Self::read_messages_task(inner.clone(), reader));

        Self {
            inner,
            reader_task,
            child: None,
        }
    }

    /// Hand credentials and settings to the helper so it can build its client.
    pub async fn configure(
        &self,
        credentials: &Credentials,
        settings: &ConnectionSettings,
    ) -> Result<(), PulseError> {
        self.inner
            .request(Command::Configure {
                username: credentials.username.clone(),
                password: credentials.password.clone(),
                fingerprint: credentials.fingerprint.clone(),
                service_host: settings.service_host.url().to_string(),
                poll_interval: settings.poll_interval,
                keepalive_interval: settings.keepalive_interval,
                relogin_interval: settings.relogin_interval,
            })
            .await
            .map(|_| ())
    }

    /// Read helper output until it closes, routing replies to their requests.
    async fn read_messages_task<R: AsyncRead + Unpin>(inner: Arc<Inner>, reader: R) {
        let _close = CloseOnExit(Arc::clone(&inner));
        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<Message>(&line) {
                        Ok(msg) => inner.dispatch(msg),
                        Err(e) => inner.reject_malformed(&line, e),
                    }
                }
                Ok(None) => {
                    info!("Client helper closed its output");
                    break;
                }
                Err(e) => {
                    error!("Failed to read from client helper: {}", e);
                    break;
                }
            }
        }
    }
}

/// Fails everything in flight once the reader stops, however it stops.
struct CloseOnExit(Arc<Inner>);

impl Drop for CloseOnExit {
    fn drop(&mut self) {
        self.0.close("client helper exited");
    }
}

impl Inner {
    fn dispatch(&self, msg: Message) {
        match msg {
            Message::Ready { version } => {
                info!("Client helper ready (library version {:?})", version);
            }
            Message::Completed {
                request_id,
                success,
                site,
            } => {
                if let Some(site) = site {
                    self.site.store(Some(Arc::new(site)));
                }
                self.resolve(request_id, Ok(success));
            }
            Message::Failed { request_id, error } => {
                debug!("Request {} failed: {:?}", request_id, error);
                self.resolve(request_id, Err(error.into()));
            }
            Message::Log {
                level,
                logger,
                message,
            } => match level {
                LogLevel::Debug => debug!("[{}] {}", logger, message),
                LogLevel::Info => info!("[{}] {}", logger, message),
                LogLevel::Warning => warn!("[{}] {}", logger, message),
                LogLevel::Error => error!("[{}] {}", logger, message),
            },
        }
    }

    /// Fail the request an undecodable reply was meant for, if it names one.
    fn reject_malformed(&self, line: &str, e: serde_json::Error) {
        let request_id = serde_json::from_str::<serde_json::Value>(line)
            .ok()
            .and_then(|v| v.get("request_id").and_then(serde_json::Value::as_u64));
        match request_id {
            Some(request_id) => {
                warn!("Malformed reply to request {}: {}", request_id, e);
                self.resolve(
                    request_id,
                    Err(PulseError::Transport(format!("malformed reply: {}", e))),
                );
            }
            None => warn!("Ignoring malformed helper message: {} ({})", e, line),
        }
    }

    fn resolve(&self, request_id: u64, reply: Reply) {
        let tx = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&request_id);
        match tx {
            // Receiver gone means the caller was cancelled
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => warn!("Reply for unknown request {}", request_id),
        }
    }

    /// Fail everything in flight and refuse new requests.
    fn close(&self, reason: &str) {
        self.closed.store(true, Ordering::SeqCst);
        let pending: Vec<_> = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (_, tx) in pending {
            let _ = tx.send(Err(PulseError::Transport(reason.to_string())));
        }
    }

    async fn request(&self, command: Command) -> Reply {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();

        {
            let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
            // Checked under the lock so close() cannot miss this entry
            if self.closed.load(Ordering::SeqCst) {
                return Err(PulseError::Transport("client helper is not running".into()));
            }
            pending.insert(request_id, tx);
        }

        let mut line = serde_json::to_string(&Request {
            request_id,
            command,
        })?;
        line.push('\n');

        let written = {
            let mut writer = self.writer.lock().await;
            match writer.write_all(line.as_bytes()).await {
                Ok(()) => writer.flush().await,
                Err(e) => Err(e),
            }
        };
        if let Err(e) = written {
            self.pending
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&request_id);
            return Err(e.into());
        }

        rx.await
            .map_err(|_| PulseError::Transport("client helper dropped the request".into()))?
    }
}

#[async_trait]
impl PulseService for SidecarService {
    async fn login(&self) -> Result<bool, PulseError> {
        Ok(self.inner.request(Command::Login).await?.unwrap_or(false))
    }

    async fn logout(&self) -> Result<(), PulseError> {
        self.inner.request(Command::Logout).await.map(|_| ())
    }

    async fn wait_for_update(&self) -> Result<(), PulseError> {
        self.inner.request(Command::WaitForUpdate).await.map(|_| ())
    }

    fn site(&self) -> Option<Arc<Site>> {
        self.inner.site.load_full()
    }

    async fn arm_home(&self, force_arm: bool) -> Result<bool, PulseError> {
        let reply = self.inner.request(Command::ArmHome { force_arm }).await?;
        Ok(reply.unwrap_or(false))
    }

    async fn arm_away(&self, force_arm: bool) -> Result<bool, PulseError> {
        let reply = self.inner.request(Command::ArmAway { force_arm }).await?;
        Ok(reply.unwrap_or(false))
    }

    async fn disarm(&self) -> Result<bool, PulseError> {
        Ok(self.inner.request(Command::Disarm).await?.unwrap_or(false))
    }
}

impl Drop for SidecarService {
    fn drop(&mut self) {
        self.reader_task.abort();
        if let Some(child) = self.child.as_mut() {
            if let Err(e) = child.start_kill() {
                debug!("Client helper already gone: {}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::Value;
    use serde_json::json;
    use tokio::io::AsyncBufReadExt;
    use tokio::io::AsyncWriteExt;
    use tokio::io::BufReader;
    use tokio::io::DuplexStream;
    use tokio::io::ReadHalf;
    use tokio::io::WriteHalf;

    use super::*;
    use crate::AlarmStatus;
    use crate::ErrorKind;

    /// Test double for the helper process: the other end of an in-memory pipe.
    struct FakeHelper {
        lines: tokio::io::Lines<BufReader<ReadHalf<DuplexStream>>>,
        writer: WriteHalf<DuplexStream>,
    }

    impl FakeHelper {
        async fn next_request(&mut self) -> Value {
            let line = self.lines.next_line().await.unwrap().unwrap();
            serde_json::from_str(&line).unwrap()
        }

        async fn send(&mut self, msg: Value) {
            let mut line = msg.to_string();
            line.push('\n');
            self.writer.write_all(line.as_bytes()).await.unwrap();
        }
    }

    fn pair() -> (SidecarService, FakeHelper) {
        let (ours, theirs) = tokio::io::duplex(64 * 1024);
        let (our_read, our_write) = tokio::io::split(ours);
        let (their_read, their_write) = tokio::io::split(theirs);
        let service = SidecarService::from_io(our_read, our_write);
        let helper = FakeHelper {
            lines: BufReader::new(their_read).lines(),
            writer: their_write,
        };
        (service, helper)
    }

    fn site_json() -> Value {
        json!({
            "id": "160301z",
            "name": "Home",
            "alarm_control_panel": {"status": "away"},
            "zones": {}
        })
    }

    #[tokio::test]
    async fn test_login_stores_site() {
        let (service, mut helper) = pair();
        assert!(service.site().is_none());

        let helper_task = tokio::spawn(async move {
            let req = helper.next_request().await;
            assert_eq!(req["type"], "login");
            helper
                .send(json!({
                    "type": "completed",
                    "request_id": req["request_id"],
                    "success": true,
                    "site": site_json(),
                }))
                .await;
            helper
        });

        assert!(service.login().await.unwrap());
        let site = service.site().unwrap();
        assert_eq!(site.id, "160301z");
        assert_eq!(site.alarm_control_panel.status, AlarmStatus::ArmedAway);
        helper_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_configure_sends_settings() {
        let (service, mut helper) = pair();
        let credentials = Credentials {
            username: "user@example.com".into(),
            password: "secret".into(),
            fingerprint: "fp".into(),
        };
        let settings = ConnectionSettings::default();

        let helper_task = tokio::spawn(async move {
            let req = helper.next_request().await;
            helper
                .send(json!({"type": "completed", "request_id": req["request_id"]}))
                .await;
            req
        });

        service.configure(&credentials, &settings).await.unwrap();
        let req = helper_task.await.unwrap();
        assert_eq!(req["type"], "configure");
        assert_eq!(req["username"], "user@example.com");
        assert_eq!(req["service_host"], "https://portal.adtpulse.com");
        assert_eq!(req["keepalive_interval"], 5);
        assert_eq!(req["relogin_interval"], 120);
    }

    #[tokio::test]
    async fn test_replies_out_of_order() {
        let (service, mut helper) = pair();
        let service = Arc::new(service);

        let waiter = {
            let service = service.clone();
            tokio::spawn(async move { service.wait_for_update().await })
        };

        let wait_req = helper.next_request().await;
        assert_eq!(wait_req["type"], "wait_for_update");

        let disarm = {
            let service = service.clone();
            tokio::spawn(async move { service.disarm().await })
        };
        let disarm_req = helper.next_request().await;
        assert_eq!(disarm_req["type"], "disarm");

        // Answer the later request first
        helper
            .send(json!({"type": "completed", "request_id": disarm_req["request_id"], "success": true}))
            .await;
        assert!(disarm.await.unwrap().unwrap());
        assert!(!waiter.is_finished());

        helper
            .send(json!({"type": "completed", "request_id": wait_req["request_id"]}))
            .await;
        waiter.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_failed_reply_maps_error() {
        let (service, mut helper) = pair();

        let helper_task = tokio::spawn(async move {
            let req = helper.next_request().await;
            helper
                .send(json!({
                    "type": "failed",
                    "request_id": req["request_id"],
                    "error": {"kind": "server_connection", "message": "502", "backoff_seconds": 30},
                }))
                .await;
            helper
        });

        let err = service.wait_for_update().await.unwrap_err();
        assert_eq!(
            err,
            PulseError::Backoff {
                kind: ErrorKind::ServerConnection,
                message: "502".into(),
                interval: Duration::from_secs(30),
            }
        );
        helper_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_helper_exit_fails_pending_requests() {
        let (service, mut helper) = pair();
        let service = Arc::new(service);

        let waiter = {
            let service = service.clone();
            tokio::spawn(async move { service.wait_for_update().await })
        };
        let _ = helper.next_request().await;
        drop(helper);

        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, PulseError::Transport(_)));

        // Later requests fail straight away
        let err = service.login().await.unwrap_err();
        assert!(matches!(err, PulseError::Transport(_)));
    }

    #[tokio::test]
    async fn test_malformed_reply_fails_its_request() {
        let (service, mut helper) = pair();

        let helper_task = tokio::spawn(async move {
            let req = helper.next_request().await;
            let mut site = site_json();
            site["zones"] = json!({"3": {"id": 3, "name": "Back Door", "state": null}});
            helper
                .send(json!({"type": "completed", "request_id": req["request_id"], "site": site}))
                .await;

            let req = helper.next_request().await;
            helper
                .send(json!({"type": "completed", "request_id": req["request_id"], "success": true}))
                .await;
            helper
        });

        let err = tokio::time::timeout(Duration::from_secs(5), service.wait_for_update())
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, PulseError::Transport(msg) if msg.starts_with("malformed reply")));
        assert!(service.site().is_none());

        // The reader keeps going
        assert!(service.disarm().await.unwrap());
        helper_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_unrepresentable_backoff_fails_its_request() {
        let (service, mut helper) = pair();

        let helper_task = tokio::spawn(async move {
            let req = helper.next_request().await;
            helper
                .send(json!({
                    "type": "failed",
                    "request_id": req["request_id"],
                    "error": {"kind": "gateway_offline", "message": "offline", "backoff_seconds": 1e300},
                }))
                .await;

            let req = helper.next_request().await;
            helper
                .send(json!({"type": "completed", "request_id": req["request_id"], "success": true}))
                .await;
            helper
        });

        let err = tokio::time::timeout(Duration::from_secs(5), service.wait_for_update())
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(err, PulseError::Transport(_)));

        assert!(service.login().await.unwrap());
        helper_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_lines_are_skipped() {
        let (service, mut helper) = pair();

        let helper_task = tokio::spawn(async move {
            let req = helper.next_request().await;
            helper.send(json!({"type": "bogus"})).await;
            helper
                .send(json!({"type": "log", "level": "info", "logger": "pyadtpulse", "message": "hi"}))
                .await;
            helper
                .send(json!({"type": "completed", "request_id": req["request_id"], "success": false}))
                .await;
            helper
        });

        assert!(!service.arm_home(false).await.unwrap());
        helper_task.await.unwrap();
    }
}
