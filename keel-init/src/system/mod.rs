//! Service runtime: data model, lifecycle state machine and the
//! process-wide supervisor.

pub mod conditions;
pub mod events;
pub mod health;
pub mod logging;
pub mod runner;
pub mod service_runner;
pub mod supervisor;

use async_trait::async_trait;

use crate::config::UserData;
use crate::error::ServiceError;
use conditions::Condition;
use runner::Runner;

pub use service_runner::ServiceRunner;
pub use supervisor::Supervisor;

/// Health checking for a service: probe settings plus the probe itself.
pub struct HealthSpec {
    pub settings: health::Settings,
    pub check: health::Check,
}

/// Static declaration of a supervised workload.
///
/// Implementations are immutable; all state lives in the
/// [`ServiceRunner`] that drives them.
#[async_trait]
pub trait Service: Send + Sync + 'static {
    /// Stable identifier; map key and log/file name stem.
    fn id(&self, data: &UserData) -> String;

    /// Runs before the condition wait: creates directories, writes
    /// config files, imports images.
    async fn pre(&self, data: &UserData) -> Result<(), ServiceError>;

    /// Gate evaluated before the runner is created. `None` means the
    /// service starts unconditionally.
    fn condition(&self, data: &UserData) -> Option<Box<dyn Condition>>;

    /// Names of services that must be up before this one. Advisory:
    /// honored for list ordering and shutdown phasing only.
    fn depends_on(&self, _data: &UserData) -> Vec<String> {
        Vec::new()
    }

    /// Builds the execution back-end. `Ok(None)` skips the service.
    fn runner(&self, data: &UserData) -> Result<Option<Box<dyn Runner>>, ServiceError>;

    /// Runs after the runner returns, regardless of its outcome.
    async fn post(&self, data: &UserData) -> Result<(), ServiceError>;

    /// Health checking; `None` when the service is not health-checked.
    fn health(&self, _data: &UserData) -> Option<HealthSpec> {
        None
    }
}
