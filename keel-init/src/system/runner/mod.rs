//! Runner back-ends for executing service workloads.

pub mod crt;
pub mod inproc;
pub mod process;
pub mod restart;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::RunnerError;
use crate::proto;
use crate::system::events::Recorder;

pub use restart::RestartType;

/// Execution contract shared by all runner variants.
///
/// A runner is opened once, run (possibly repeatedly, under the restart
/// decorator), stopped cooperatively, and closed on every exit path.
#[async_trait]
pub trait Runner: fmt::Display + Send + Sync {
    /// Acquires resources. Must be called before `run`.
    async fn open(&self) -> Result<(), RunnerError>;

    /// Blocks until the workload exits, reporting observable state
    /// changes through `recorder`.
    async fn run(&self, recorder: Arc<dyn Recorder>) -> Result<(), RunnerError>;

    /// Signals the workload to terminate and returns once `run` has
    /// reached its return point. Idempotent; a no-op after `run`
    /// returns.
    async fn stop(&self) -> Result<(), RunnerError>;

    /// Releases resources acquired in `open`.
    async fn close(&self) -> Result<(), RunnerError>;
}

/// Required per-service arguments.
#[derive(Debug, Clone)]
pub struct Args {
    /// Stable service identifier; log/file name stem and container id.
    pub id: String,
    /// argv of the workload.
    pub process_args: Vec<String>,
}

/// Runner configuration with explicit fields and consuming setters.
#[derive(Clone)]
pub struct Options {
    /// KEY=VALUE environment assignments. The default PATH is always
    /// prepended by the runner.
    pub env: Vec<String>,
    /// Restart policy applied by the containerized runner's internal
    /// loop and by the restart decorator.
    pub restart_type: RestartType,
    /// Root directory for per-service log files.
    pub log_path: PathBuf,
    /// Wait between restart attempts.
    pub restart_interval: Duration,
    /// Time from SIGTERM to SIGKILL.
    pub graceful_shutdown_timeout: Duration,
    /// Logical partition on the container-runtime daemon.
    pub namespace: String,
    /// Image reference for the containerized variant.
    pub container_image: String,
    /// UNIX socket of the container-runtime daemon.
    pub crt_address: PathBuf,
    /// Pass-through mounts for the container spec.
    pub mounts: Vec<proto::crt::Mount>,
    /// Pass-through labels for the container.
    pub labels: Vec<(String, String)>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            env: Vec::new(),
            restart_type: RestartType::Forever,
            log_path: PathBuf::from(crate::constants::DEFAULT_LOG_PATH),
            restart_interval: Duration::from_secs(5),
            graceful_shutdown_timeout: Duration::from_secs(10),
            namespace: crate::constants::SYSTEM_NAMESPACE.to_string(),
            container_image: String::new(),
            crt_address: PathBuf::from(crate::constants::CRT_SOCKET),
            mounts: Vec::new(),
            labels: Vec::new(),
        }
    }
}

impl Options {
    pub fn with_env(mut self, env: Vec<String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_restart_type(mut self, restart_type: RestartType) -> Self {
        self.restart_type = restart_type;
        self
    }

    pub fn with_log_path(mut self, log_path: impl Into<PathBuf>) -> Self {
        self.log_path = log_path.into();
        self
    }

    pub fn with_restart_interval(mut self, interval: Duration) -> Self {
        self.restart_interval = interval;
        self
    }

    pub fn with_graceful_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.graceful_shutdown_timeout = timeout;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_container_image(mut self, image: impl Into<String>) -> Self {
        self.container_image = image.into();
        self
    }

    pub fn with_crt_address(mut self, address: impl Into<PathBuf>) -> Self {
        self.crt_address = address.into();
        self
    }

    pub fn with_mounts(mut self, mounts: Vec<proto::crt::Mount>) -> Self {
        self.mounts = mounts;
        self
    }

    pub fn with_labels(mut self, labels: Vec<(String, String)>) -> Self {
        self.labels = labels;
        self
    }

    /// Environment with the default PATH prepended.
    pub(crate) fn env_with_path(&self) -> Vec<String> {
        let mut env = Vec::with_capacity(self.env.len() + 1);
        env.push(format!("PATH={}", crate::constants::PATH));
        env.extend(self.env.iter().cloned());
        env
    }
}
