//! Periodic health probes with subscriber fan-out.
//!
//! The probe loop owns nothing: it drives a shared [`State`] that the
//! service runner (and any other subscriber) observes through change
//! notifications.

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use futures::future::BoxFuture;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::HealthError;
use crate::proto;
use crate::system::events::unix_nanos;

/// Probe timing settings.
#[derive(Debug, Clone, Copy)]
pub struct Settings {
    pub initial_delay: Duration,
    pub period: Duration,
    pub timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            period: Duration::from_secs(5),
            timeout: Duration::from_millis(500),
        }
    }
}

/// A single health probe. Receives a token cancelled when the service
/// shuts down; must return promptly on cancellation.
pub type Check =
    Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<(), HealthError>> + Send + Sync>;

/// Momentary health of a service. `healthy == None` means unknown:
/// either no probe has completed yet, or the service is not running.
#[derive(Debug, Clone)]
pub struct Status {
    pub healthy: Option<bool>,
    pub last_change: SystemTime,
    pub last_message: String,
}

impl Status {
    fn initial() -> Self {
        Self {
            healthy: None,
            last_change: SystemTime::now(),
            last_message: "Unknown".to_string(),
        }
    }

    pub fn as_proto(&self) -> proto::machine::ServiceHealth {
        proto::machine::ServiceHealth {
            unknown: self.healthy.is_none(),
            healthy: self.healthy.unwrap_or(false),
            last_message: self.last_message.clone(),
            last_change_ns: unix_nanos(self.last_change),
        }
    }
}

/// A health transition delivered to subscribers.
#[derive(Debug, Clone)]
pub struct StateChange {
    pub old: Status,
    pub new: Status,
}

/// Shared health state with subscriber sinks.
pub struct State {
    status: Mutex<Status>,
    subscribers: Mutex<Vec<mpsc::Sender<StateChange>>>,
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    pub fn new() -> Self {
        Self {
            status: Mutex::new(Status::initial()),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    pub fn get(&self) -> Status {
        self.status.lock().expect("health status lock poisoned").clone()
    }

    /// Records a probe result. `last_message` is always updated;
    /// `healthy` and `last_change` only change on an actual transition,
    /// and only transitions are fanned out to subscribers.
    pub fn update(&self, healthy: bool, message: &str) {
        let change = {
            let mut status = self.status.lock().expect("health status lock poisoned");
            let old = status.clone();

            status.last_message = message.to_string();
            if old.healthy != Some(healthy) {
                status.healthy = Some(healthy);
                status.last_change = SystemTime::now();
                Some(StateChange {
                    old,
                    new: status.clone(),
                })
            } else {
                None
            }
        };

        if let Some(change) = change {
            let subscribers = self
                .subscribers
                .lock()
                .expect("health subscribers lock poisoned")
                .clone();
            for sink in subscribers {
                // Non-blocking send: full sinks drop the notification.
                let _ = sink.try_send(change.clone());
            }
        }
    }

    pub fn subscribe(&self, sink: mpsc::Sender<StateChange>) {
        let mut subscribers = self
            .subscribers
            .lock()
            .expect("health subscribers lock poisoned");
        if !subscribers.iter().any(|s| s.same_channel(&sink)) {
            subscribers.push(sink);
        }
    }

    /// No-op when the sink is not subscribed.
    pub fn unsubscribe(&self, sink: &mpsc::Sender<StateChange>) {
        self.subscribers
            .lock()
            .expect("health subscribers lock poisoned")
            .retain(|s| !s.same_channel(sink));
    }

    pub fn as_proto(&self) -> proto::machine::ServiceHealth {
        self.get().as_proto()
    }
}

/// Runs the probe loop until the token is cancelled.
pub async fn run(
    token: CancellationToken,
    settings: Settings,
    state: &State,
    check: Check,
) -> Result<(), HealthError> {
    tokio::select! {
        _ = token.cancelled() => return Err(HealthError::Canceled),
        _ = tokio::time::sleep(settings.initial_delay) => {}
    }

    loop {
        let probe = check(token.child_token());
        let result = match tokio::time::timeout(settings.timeout, probe).await {
            Ok(result) => result,
            Err(_) => Err(HealthError::Timeout),
        };

        match result {
            Ok(()) => state.update(true, ""),
            Err(e) => state.update(false, &e.to_string()),
        }

        tokio::select! {
            _ = token.cancelled() => return Err(HealthError::Canceled),
            _ = tokio::time::sleep(settings.period) => {}
        }
    }
}
