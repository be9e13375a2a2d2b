//! Process-wide supervisor: owns the running set and coordinates
//! global shutdown.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use log::info;
use tokio_util::task::TaskTracker;

use crate::config::UserData;
use crate::system::{Service, ServiceRunner};

/// Services whose shutdown is deferred so other services can terminate
/// cleanly through them. A dependency-graph shutdown will replace this
/// two-phase arrangement.
const CRITICAL_SERVICES: &[&str] = &["crtd", "devd"];

/// Default wait between cancelling non-critical and critical services.
const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

static INSTANCE: OnceLock<Arc<Supervisor>> = OnceLock::new();

pub struct Supervisor {
    data: Arc<UserData>,
    inner: Mutex<Inner>,
    tracker: TaskTracker,
    shutdown_grace: Duration,
}

struct Inner {
    state: HashMap<String, Arc<ServiceRunner>>,
    terminating: bool,
}

impl Supervisor {
    /// Process-wide instance; the first call binds `data`.
    pub fn instance(data: Arc<UserData>) -> Arc<Supervisor> {
        INSTANCE.get_or_init(|| Supervisor::new(data)).clone()
    }

    /// Builds an isolated supervisor. Tests use this instead of the
    /// process-wide instance.
    pub fn new(data: Arc<UserData>) -> Arc<Supervisor> {
        Self::with_shutdown_grace(data, DEFAULT_SHUTDOWN_GRACE)
    }

    pub fn with_shutdown_grace(data: Arc<UserData>, grace: Duration) -> Arc<Supervisor> {
        Arc::new(Supervisor {
            data,
            inner: Mutex::new(Inner {
                state: HashMap::new(),
                terminating: false,
            }),
            tracker: TaskTracker::new(),
            shutdown_grace: grace,
        })
    }

    /// Starts the given services, each in its own task. Ids already
    /// present are skipped; after shutdown has begun this is a no-op.
    pub fn start(&self, services: impl IntoIterator<Item = Arc<dyn Service>>) {
        let mut inner = self.inner.lock().expect("supervisor lock poisoned");
        if inner.terminating {
            return;
        }

        for service in services {
            let id = service.id(&self.data);
            if inner.state.contains_key(&id) {
                continue;
            }

            let runner = Arc::new(ServiceRunner::new(service, self.data.clone()));
            inner.state.insert(id, runner.clone());
            self.tracker.spawn(runner.start());
        }
    }

    /// Cancels all services in two phases (non-critical first, critical
    /// after the grace window) and waits for every lifecycle task to
    /// return.
    pub async fn shutdown(&self) {
        {
            let mut inner = self.inner.lock().expect("supervisor lock poisoned");
            if inner.terminating {
                return;
            }
            inner.terminating = true;

            for (id, runner) in inner.state.iter() {
                if !CRITICAL_SERVICES.contains(&id.as_str()) {
                    runner.shutdown();
                }
            }
        }

        info!(
            "waiting {:?} before stopping critical services",
            self.shutdown_grace
        );
        tokio::time::sleep(self.shutdown_grace).await;

        {
            let inner = self.inner.lock().expect("supervisor lock poisoned");
            for runner in inner.state.values() {
                runner.shutdown();
            }
        }

        self.tracker.close();
        self.tracker.wait().await;
    }

    /// Snapshot of all service runners, sorted by id.
    pub fn list(&self) -> Vec<Arc<ServiceRunner>> {
        let inner = self.inner.lock().expect("supervisor lock poisoned");
        let mut runners: Vec<Arc<ServiceRunner>> = inner.state.values().cloned().collect();
        runners.sort_by(|a, b| a.id().cmp(b.id()));
        runners
    }

    pub fn lookup(&self, id: &str) -> Option<Arc<ServiceRunner>> {
        self.inner
            .lock()
            .expect("supervisor lock poisoned")
            .state
            .get(id)
            .cloned()
    }
}
