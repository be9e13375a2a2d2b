//! Per-service state machine.
//!
//! A `ServiceRunner` owns one service's lifecycle: pre hook, condition
//! wait, runner construction and execution, post hook. It records every
//! transition in the bounded event history and mirrors the most recent
//! event as the current state.

use std::sync::{Arc, Mutex};

use log::{info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::UserData;
use crate::error::ServiceError;
use crate::proto;
use crate::system::events::{Recorder, ServiceEvent, ServiceEvents, ServiceState};
use crate::system::health;
use crate::system::runner::Runner;
use crate::system::Service;

pub struct ServiceRunner {
    id: String,
    service: Arc<dyn Service>,
    data: Arc<UserData>,
    inner: Mutex<Inner>,
    health_state: Arc<health::State>,
    run_token: Mutex<CancellationToken>,
}

struct Inner {
    state: ServiceState,
    events: ServiceEvents,
}

impl ServiceRunner {
    pub fn new(service: Arc<dyn Service>, data: Arc<UserData>) -> Self {
        let id = service.id(&data);
        Self {
            id,
            service,
            data,
            inner: Mutex::new(Inner {
                state: ServiceState::Initialized,
                events: ServiceEvents::default(),
            }),
            health_state: Arc::new(health::State::new()),
            run_token: Mutex::new(CancellationToken::new()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ServiceState {
        self.inner.lock().expect("service runner lock poisoned").state
    }

    pub fn health_state(&self) -> &health::State {
        &self.health_state
    }

    /// Returns up to `count` most recent events in chronological order.
    pub fn get_event_history(&self, count: usize) -> Vec<ServiceEvent> {
        self.inner
            .lock()
            .expect("service runner lock poisoned")
            .events
            .get(count)
    }

    pub fn as_proto(&self) -> proto::machine::ServiceInfo {
        let inner = self.inner.lock().expect("service runner lock poisoned");
        proto::machine::ServiceInfo {
            id: self.id.clone(),
            state: inner.state.to_string(),
            events: inner
                .events
                .as_proto(crate::system::events::MAX_EVENTS_TO_KEEP),
            health: Some(self.health_state.as_proto()),
        }
    }

    /// Interrupts the current lifecycle, whichever phase it is in.
    pub fn shutdown(&self) {
        self.run_token
            .lock()
            .expect("service runner token lock poisoned")
            .cancel();
    }

    /// Drives the service from declaration to termination. Runs in its
    /// own task; every terminal path leaves a `Failed`, `Finished` or
    /// `Skipped` event behind.
    pub async fn start(self: Arc<Self>) {
        let token = {
            let mut guard = self
                .run_token
                .lock()
                .expect("service runner token lock poisoned");
            // a cancelled token belongs to a previous lifecycle; a live
            // one may already carry a shutdown requested before our
            // first poll
            if guard.is_cancelled() {
                *guard = CancellationToken::new();
            }
            guard.clone()
        };

        self.update(ServiceState::Preparing, "Running pre state".to_string());
        if let Err(e) = self.service.pre(&self.data).await {
            // post is intentionally not invoked when pre fails
            self.update(
                ServiceState::Failed,
                format!("Failed to run pre stage: {e}"),
            );
            return;
        }

        if let Some(condition) = self.service.condition(&self.data) {
            self.update(ServiceState::Waiting, format!("Waiting for {condition}"));
            if let Err(e) = condition.wait(&token).await {
                self.update(ServiceState::Failed, format!("Condition failed: {e}"));
                return;
            }
        }

        self.update(
            ServiceState::Preparing,
            "Creating service runner".to_string(),
        );
        let runner: Arc<dyn Runner> = match self.service.runner(&self.data) {
            Ok(Some(runner)) => Arc::from(runner),
            Ok(None) => {
                self.update(ServiceState::Skipped, "Service skipped".to_string());
                return;
            }
            Err(e) => {
                self.update(ServiceState::Failed, format!("Failed to create runner: {e}"));
                return;
            }
        };

        match self.clone().run(token, runner).await {
            Ok(()) => self.update(
                ServiceState::Finished,
                "Service finished successfully".to_string(),
            ),
            Err(e) => self.update(ServiceState::Failed, format!("Failed running service: {e}")),
        }

        if let Err(e) = self.service.post(&self.data).await {
            self.update(
                ServiceState::Failed,
                format!("Failed to run post stage: {e}"),
            );
        }
    }

    async fn run(
        self: Arc<Self>,
        token: CancellationToken,
        runner: Arc<dyn Runner>,
    ) -> Result<(), ServiceError> {
        runner
            .open()
            .await
            .map_err(|e| ServiceError::Other(format!("error opening runner: {e}")))?;

        let result = self.clone().run_opened(token, runner.clone()).await;

        // close runs on every exit path once open succeeded
        if let Err(e) = runner.close().await {
            warn!("service[{}]: error closing runner: {}", self.id, e);
        }

        result
    }

    async fn run_opened(
        self: Arc<Self>,
        token: CancellationToken,
        runner: Arc<dyn Runner>,
    ) -> Result<(), ServiceError> {
        let health_token = CancellationToken::new();
        let mut health_tasks = Vec::new();
        let mut health_sink = None;

        if let Some(spec) = self.service.health(&self.data) {
            let state = self.health_state.clone();
            let loop_token = health_token.clone();
            health_tasks.push(tokio::spawn(async move {
                let _ = health::run(loop_token, spec.settings, &state, spec.check).await;
            }));

            let (tx, mut rx) = mpsc::channel::<health::StateChange>(2);
            self.health_state.subscribe(tx.clone());
            health_sink = Some(tx);

            let this = self.clone();
            let forward_token = health_token.clone();
            health_tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = forward_token.cancelled() => break,
                        change = rx.recv() => match change {
                            Some(change) => this.health_update(change),
                            None => break,
                        },
                    }
                }
            }));
        }

        let mut run_handle = tokio::spawn({
            let runner = runner.clone();
            let recorder: Arc<dyn Recorder> = self.clone();
            async move { runner.run(recorder).await }
        });

        let result = tokio::select! {
            _ = token.cancelled() => {
                let stop_result = runner.stop().await;
                // drain the run result
                let _ = (&mut run_handle).await;

                stop_result
                    .map_err(|e| ServiceError::Other(format!("error stopping service: {e}")))
            }
            run_result = &mut run_handle => match run_result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(ServiceError::Other(format!("error running service: {e}"))),
                Err(e) => Err(ServiceError::Other(format!("service task failed: {e}"))),
            },
        };

        health_token.cancel();
        for task in health_tasks {
            let _ = task.await;
        }
        if let Some(sink) = health_sink {
            self.health_state.unsubscribe(&sink);
        }

        result
    }

    /// Records a health transition as an event while the service is
    /// running; transitions outside `Running` are suppressed.
    fn health_update(&self, change: health::StateChange) {
        let mut inner = self.inner.lock().expect("service runner lock poisoned");
        if inner.state != ServiceState::Running {
            return;
        }

        let message = match change.new.healthy {
            Some(true) => "Health check successful".to_string(),
            _ => format!("Health check failed: {}", change.new.last_message),
        };

        let event = ServiceEvent {
            state: inner.state,
            message,
            timestamp: std::time::SystemTime::now(),
        };
        info!("service[{}]({}): {}", self.id, inner.state, event.message);
        inner.events.push(event);
    }

    fn update(&self, state: ServiceState, message: String) {
        Recorder::update(self, state, message);
    }
}

impl Recorder for ServiceRunner {
    fn update(&self, state: ServiceState, message: String) {
        let mut inner = self.inner.lock().expect("service runner lock poisoned");

        inner.state = state;
        inner.events.push(ServiceEvent {
            state,
            message: message.clone(),
            timestamp: std::time::SystemTime::now(),
        });

        info!("service[{}]({}): {}", self.id, state, message);
    }
}
