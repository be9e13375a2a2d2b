//! Test helpers for the service runtime integration tests.

// not every test binary uses every helper
#![allow(dead_code)]

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use keel_init::UserData;
use keel_init::error::{RunnerError, ServiceError};
use keel_init::system::Service;
use keel_init::system::conditions::{self, Condition};
use keel_init::system::events::{Recorder, ServiceState};
use keel_init::system::runner::{Args, Options, Runner};

/// Recorder that logs transitions, mirroring the production sink.
pub struct MockEventSink;

impl Recorder for MockEventSink {
    fn update(&self, state: ServiceState, message: String) {
        eprintln!("state {state}: {message}");
    }
}

/// A workload that blocks until stopped, or exits with a scripted
/// result delivered through [`MockRunner::exit`].
pub struct MockRunner {
    stop: CancellationToken,
    exit: Mutex<Option<tokio::sync::oneshot::Receiver<Result<(), RunnerError>>>>,
    /// Number of extra Running events to emit on startup; exercises the
    /// event-history bound.
    pub chatter: usize,
    pub opens: AtomicUsize,
    pub closes: AtomicUsize,
}

impl MockRunner {
    pub fn new() -> (Arc<Self>, tokio::sync::oneshot::Sender<Result<(), RunnerError>>) {
        Self::with_chatter(0)
    }

    pub fn with_chatter(
        chatter: usize,
    ) -> (Arc<Self>, tokio::sync::oneshot::Sender<Result<(), RunnerError>>) {
        let (tx, rx) = tokio::sync::oneshot::channel();
        (
            Arc::new(Self {
                stop: CancellationToken::new(),
                exit: Mutex::new(Some(rx)),
                chatter,
                opens: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
            }),
            tx,
        )
    }
}

impl fmt::Display for MockRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MockRunner")
    }
}

#[async_trait]
impl Runner for MockRunner {
    async fn open(&self) -> Result<(), RunnerError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn run(&self, recorder: Arc<dyn Recorder>) -> Result<(), RunnerError> {
        recorder.update(ServiceState::Running, "Service started".to_string());
        for i in 0..self.chatter {
            recorder.update(ServiceState::Running, format!("chatter {i}"));
        }

        let exit = self.exit.lock().await.take();
        match exit {
            Some(exit) => tokio::select! {
                _ = self.stop.cancelled() => Ok(()),
                result = exit => match result {
                    Ok(result) => result,
                    // sender dropped: block until stopped
                    Err(_) => {
                        self.stop.cancelled().await;
                        Ok(())
                    }
                },
            },
            // a restarted runner only waits for stop
            None => {
                self.stop.cancelled().await;
                Ok(())
            }
        }
    }

    async fn stop(&self) -> Result<(), RunnerError> {
        self.stop.cancel();
        Ok(())
    }

    async fn close(&self) -> Result<(), RunnerError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Delegating wrapper so tests can keep a handle to the shared runner
/// the service hands out.
pub struct SharedRunner(pub Arc<dyn Runner>);

impl fmt::Display for SharedRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[async_trait]
impl Runner for SharedRunner {
    async fn open(&self) -> Result<(), RunnerError> {
        self.0.open().await
    }

    async fn run(&self, recorder: Arc<dyn Recorder>) -> Result<(), RunnerError> {
        self.0.run(recorder).await
    }

    async fn stop(&self) -> Result<(), RunnerError> {
        self.0.stop().await
    }

    async fn close(&self) -> Result<(), RunnerError> {
        self.0.close().await
    }
}

/// Which condition a [`MockService`] presents.
#[derive(Clone, Copy)]
pub enum MockCondition {
    None,
    Trivial,
    /// A file that never appears; the wait only ends on cancellation.
    NeverSatisfied,
}

pub struct MockService {
    pub id: String,
    pub condition: MockCondition,
    pub pre_fail: bool,
    pub post_fail: bool,
    pub runner_fail: bool,
    pub skip: bool,
    pub runner: Option<Arc<dyn Runner>>,
    pub pre_calls: AtomicUsize,
    pub post_calls: AtomicUsize,
}

impl MockService {
    pub fn new(id: &str, runner: Arc<dyn Runner>) -> Self {
        Self {
            id: id.to_string(),
            condition: MockCondition::Trivial,
            pre_fail: false,
            post_fail: false,
            runner_fail: false,
            skip: false,
            runner: Some(runner),
            pre_calls: AtomicUsize::new(0),
            post_calls: AtomicUsize::new(0),
        }
    }

    pub fn without_runner(id: &str) -> Self {
        Self {
            id: id.to_string(),
            condition: MockCondition::None,
            pre_fail: false,
            post_fail: false,
            runner_fail: false,
            skip: true,
            runner: None,
            pre_calls: AtomicUsize::new(0),
            post_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Service for MockService {
    fn id(&self, _data: &UserData) -> String {
        self.id.clone()
    }

    async fn pre(&self, _data: &UserData) -> Result<(), ServiceError> {
        self.pre_calls.fetch_add(1, Ordering::SeqCst);
        if self.pre_fail {
            return Err(ServiceError::Other("pre failed".to_string()));
        }
        Ok(())
    }

    fn condition(&self, _data: &UserData) -> Option<Box<dyn Condition>> {
        match self.condition {
            MockCondition::None => None,
            MockCondition::Trivial => Some(conditions::none()),
            MockCondition::NeverSatisfied => Some(Box::new(
                conditions::wait_for_file_to_exist("/doesntexistever")
                    .with_poll_interval(Duration::from_millis(5)),
            )),
        }
    }

    fn runner(&self, _data: &UserData) -> Result<Option<Box<dyn Runner>>, ServiceError> {
        if self.runner_fail {
            return Err(ServiceError::Other("runner failed".to_string()));
        }
        if self.skip {
            return Ok(None);
        }
        match &self.runner {
            Some(runner) => Ok(Some(Box::new(SharedRunner(runner.clone())))),
            None => Ok(None),
        }
    }

    async fn post(&self, _data: &UserData) -> Result<(), ServiceError> {
        self.post_calls.fetch_add(1, Ordering::SeqCst);
        if self.post_fail {
            return Err(ServiceError::Other("post failed".to_string()));
        }
        Ok(())
    }
}

/// Polls `probe` every 10 ms until it returns true or `timeout` passes.
pub async fn wait_until<F>(timeout: Duration, mut probe: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if probe() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn test_user_data(log_dir: &std::path::Path) -> Arc<UserData> {
    let mut data = UserData::default();
    data.log_path = log_dir.to_path_buf();
    Arc::new(data)
}

pub fn states(runner: &keel_init::ServiceRunner) -> Vec<ServiceState> {
    runner
        .get_event_history(1000)
        .iter()
        .map(|e| e.state)
        .collect()
}

/// Options with short timings suitable for tests.
pub fn fast_opts(log_dir: &std::path::Path) -> Options {
    Options::default()
        .with_log_path(log_dir)
        .with_restart_interval(Duration::from_millis(5))
        .with_graceful_shutdown_timeout(Duration::from_millis(10))
}

pub fn shell_args(id: &str, script: &str) -> Args {
    Args {
        id: id.to_string(),
        process_args: vec!["/bin/sh".to_string(), "-c".to_string(), script.to_string()],
    }
}
