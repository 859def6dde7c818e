use std::sync::Arc;

use async_trait::async_trait;

use crate::ConnectionSettings;
use crate::Credentials;
use crate::PulseError;
use crate::Site;

/// Operations the hub needs from the ADT Pulse cloud client.
///
/// Implementations must be safe to call from several tasks at once: the
/// update coordinator sits in `wait_for_update` while alarm commands run.
#[async_trait]
pub trait PulseService: Send + Sync {
    /// Log in and load the site. `Ok(false)` means the credentials were refused.
    async fn login(&self) -> Result<bool, PulseError>;

    async fn logout(&self) -> Result<(), PulseError>;

    /// Suspend until the client has new data (push or poll driven).
    async fn wait_for_update(&self) -> Result<(), PulseError>;

    /// Current snapshot of the site, `None` before the first login.
    fn site(&self) -> Option<Arc<Site>>;

    async fn arm_home(&self, force_arm: bool) -> Result<bool, PulseError>;

    async fn arm_away(&self, force_arm: bool) -> Result<bool, PulseError>;

    async fn disarm(&self) -> Result<bool, PulseError>;
}

/// Creates `PulseService` sessions.
///
/// Connecting does not log in; callers decide when to call `login`.
#[async_trait]
pub trait PulseConnector: Send + Sync {
    async fn connect(
        &self,
        credentials: &Credentials,
        settings: &ConnectionSettings,
    ) -> Result<Arc<dyn PulseService>, PulseError>;
}
