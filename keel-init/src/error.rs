//! Error types for keel-init.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors produced while waiting on a service condition.
#[derive(Debug, Error)]
pub enum ConditionError {
    /// The wait was interrupted by cancellation. The display string is
    /// the cancellation sentinel tests compare against.
    #[error("operation canceled")]
    Canceled,

    #[error("failed to stat {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
}

/// Errors produced by the health-check loop.
#[derive(Debug, Error)]
pub enum HealthError {
    #[error("operation canceled")]
    Canceled,

    #[error("health check timed out")]
    Timeout,

    #[error("{0}")]
    Check(String),
}

/// Errors produced by runner back-ends.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Internal sentinel: the workload terminated because `stop` was
    /// requested. Mapped to a clean return by the callers.
    #[error("service stopped")]
    Stopped,

    #[error("operation canceled")]
    Canceled,

    #[error("failed to open log file {path}: {source}")]
    Log { path: PathBuf, source: io::Error },

    #[error("failed to spawn {command}: {source}")]
    Spawn { command: String, source: io::Error },

    #[error("process {id} exited with code {code}")]
    ProcessExit { id: String, code: i32 },

    #[error("failed to connect to container runtime at {address}: {source}")]
    Connect {
        address: PathBuf,
        source: tonic::transport::Error,
    },

    #[error("image {image} is not available in the runtime store")]
    ImageNotFound { image: String },

    #[error("container runtime request failed: {0}")]
    Rpc(#[from] tonic::Status),

    #[error("task {id} failed with exit code {code}")]
    TaskExit { id: String, code: i32 },

    #[error("panic in service entrypoint: {message}")]
    Panic { message: String },

    #[error("service entrypoint failed: {0}")]
    Entrypoint(String),

    #[error("condition failed: {0}")]
    Condition(#[from] ConditionError),

    #[error("missing runner option: {0}")]
    MissingOption(&'static str),
}

/// Errors produced by service hooks (pre/post, runner factories) and
/// in-process entrypoints.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("operation canceled")]
    Canceled,

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Runner(#[from] RunnerError),

    #[error("{0}")]
    Other(String),
}

/// Errors fetching an upgrade artifact.
#[derive(Debug, Error)]
pub enum UpgradeError {
    #[error("failed to fetch {url}: {source}")]
    Fetch { url: String, source: reqwest::Error },

    #[error("failed to stage artifact at {path}: {source}")]
    Stage { path: PathBuf, source: io::Error },
}
