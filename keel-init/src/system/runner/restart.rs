//! Restart decorator: re-invokes the wrapped runner per policy.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::Runner;
use crate::error::RunnerError;
use crate::system::events::Recorder;

use async_trait::async_trait;

/// Restart policy of the decorator.
///
/// `UntilSuccess` retries failures until the first clean exit; `Once`
/// is the strict variant where the first result, success or error, is
/// final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RestartType {
    #[default]
    Forever,
    Once,
    UntilSuccess,
}

pub struct RestartRunner {
    inner: Arc<dyn Runner>,
    restart_type: RestartType,
    restart_interval: Duration,
    stop: CancellationToken,
}

impl RestartRunner {
    pub fn new(inner: Arc<dyn Runner>) -> Self {
        Self {
            inner,
            restart_type: RestartType::Forever,
            restart_interval: Duration::from_secs(5),
            stop: CancellationToken::new(),
        }
    }

    pub fn with_type(mut self, restart_type: RestartType) -> Self {
        self.restart_type = restart_type;
        self
    }

    pub fn with_restart_interval(mut self, interval: Duration) -> Self {
        self.restart_interval = interval;
        self
    }
}

impl fmt::Display for RestartRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.inner.fmt(f)
    }
}

#[async_trait]
impl Runner for RestartRunner {
    async fn open(&self) -> Result<(), RunnerError> {
        self.inner.open().await
    }

    // The inner runner is never invoked concurrently with itself: each
    // iteration awaits the previous run before sleeping and re-entering.
    async fn run(&self, recorder: Arc<dyn Recorder>) -> Result<(), RunnerError> {
        loop {
            let result = self.inner.run(recorder.clone()).await;

            match self.restart_type {
                RestartType::Once => return result,
                RestartType::UntilSuccess if result.is_ok() => return result,
                _ => {}
            }

            tokio::select! {
                _ = self.stop.cancelled() => return result,
                _ = tokio::time::sleep(self.restart_interval) => {}
            }
        }
    }

    async fn stop(&self) -> Result<(), RunnerError> {
        self.stop.cancel();
        self.inner.stop().await
    }

    async fn close(&self) -> Result<(), RunnerError> {
        self.inner.close().await
    }
}
