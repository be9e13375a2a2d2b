//! Conditions gate a service's start until prerequisites hold.
//!
//! A condition is a cancellable wait: it either resolves once the
//! prerequisite is observed or returns the cancellation sentinel when
//! the supplied token fires.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::ConditionError;

/// Default cadence for polling conditions.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// A cancellable predicate evaluated before a service starts.
#[async_trait]
pub trait Condition: fmt::Display + Send + Sync {
    /// Blocks until the condition holds or the token is cancelled.
    async fn wait(&self, token: &CancellationToken) -> Result<(), ConditionError>;
}

/// Single stat of `path`. Returns `Ok(true)` when present, `Ok(false)`
/// when absent, and the underlying error for any other I/O failure.
pub async fn file_exists(path: &Path) -> Result<bool, ConditionError> {
    match tokio::fs::metadata(path).await {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(ConditionError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// A condition that always holds.
pub fn none() -> Box<dyn Condition> {
    Box::new(NoneCondition)
}

struct NoneCondition;

impl fmt::Display for NoneCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("nothing")
    }
}

#[async_trait]
impl Condition for NoneCondition {
    async fn wait(&self, _token: &CancellationToken) -> Result<(), ConditionError> {
        Ok(())
    }
}

/// Waits for a single file to appear, polling at `poll_interval`.
pub struct WaitForFileToExist {
    path: PathBuf,
    poll_interval: Duration,
}

/// Waits for every path in the set to appear. All paths are re-checked
/// each tick; already-satisfied paths stay satisfied.
pub struct WaitForFilesToExist {
    paths: Vec<PathBuf>,
    poll_interval: Duration,
}

pub fn wait_for_file_to_exist(path: impl Into<PathBuf>) -> WaitForFileToExist {
    WaitForFileToExist {
        path: path.into(),
        poll_interval: DEFAULT_POLL_INTERVAL,
    }
}

pub fn wait_for_files_to_exist<I, P>(paths: I) -> WaitForFilesToExist
where
    I: IntoIterator<Item = P>,
    P: Into<PathBuf>,
{
    WaitForFilesToExist {
        paths: paths.into_iter().map(Into::into).collect(),
        poll_interval: DEFAULT_POLL_INTERVAL,
    }
}

impl WaitForFileToExist {
    /// Overrides the polling cadence (used by tests).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl WaitForFilesToExist {
    /// Overrides the polling cadence (used by tests).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl fmt::Display for WaitForFileToExist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file {:?} to exist", self.path)
    }
}

impl fmt::Display for WaitForFilesToExist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = self.paths.iter().map(|p| format!("{p:?}")).collect();
        write!(f, "files {} to exist", names.join(", "))
    }
}

#[async_trait]
impl Condition for WaitForFileToExist {
    async fn wait(&self, token: &CancellationToken) -> Result<(), ConditionError> {
        loop {
            if file_exists(&self.path).await? {
                return Ok(());
            }

            tokio::select! {
                _ = token.cancelled() => return Err(ConditionError::Canceled),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}

#[async_trait]
impl Condition for WaitForFilesToExist {
    async fn wait(&self, token: &CancellationToken) -> Result<(), ConditionError> {
        loop {
            let mut all = true;
            for path in &self.paths {
                if !file_exists(path).await? {
                    all = false;
                    break;
                }
            }
            if all {
                return Ok(());
            }

            tokio::select! {
                _ = token.cancelled() => return Err(ConditionError::Canceled),
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }
}
