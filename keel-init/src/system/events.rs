//! Service states and the bounded per-service event history.

use std::collections::VecDeque;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::proto;

/// Number of events kept per service by default.
pub const MAX_EVENTS_TO_KEEP: usize = 16;

/// Records observable state changes of a workload. Implemented by the
/// service runner; passed into every runner's `run`. Must not block.
pub trait Recorder: Send + Sync {
    fn update(&self, state: ServiceState, message: String);
}

/// Lifecycle states of a supervised service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Initialized,
    Preparing,
    Waiting,
    Running,
    Finished,
    Failed,
    Skipped,
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceState::Initialized => "Initialized",
            ServiceState::Preparing => "Preparing",
            ServiceState::Waiting => "Waiting",
            ServiceState::Running => "Running",
            ServiceState::Finished => "Finished",
            ServiceState::Failed => "Failed",
            ServiceState::Skipped => "Skipped",
        };
        f.write_str(s)
    }
}

/// A single state transition with its operator-facing message.
#[derive(Debug, Clone)]
pub struct ServiceEvent {
    pub state: ServiceState,
    pub message: String,
    pub timestamp: SystemTime,
}

impl ServiceEvent {
    pub fn as_proto(&self) -> proto::machine::ServiceEvent {
        proto::machine::ServiceEvent {
            state: self.state.to_string(),
            message: self.message.clone(),
            timestamp_ns: unix_nanos(self.timestamp),
        }
    }
}

pub(crate) fn unix_nanos(t: SystemTime) -> i64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

/// Fixed-capacity FIFO of service events. The oldest event is dropped
/// on overflow.
#[derive(Debug)]
pub struct ServiceEvents {
    events: VecDeque<ServiceEvent>,
    capacity: usize,
}

impl Default for ServiceEvents {
    fn default() -> Self {
        Self::new(MAX_EVENTS_TO_KEEP)
    }
}

impl ServiceEvents {
    pub fn new(capacity: usize) -> Self {
        Self {
            events: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, event: ServiceEvent) {
        if self.events.len() == self.capacity {
            self.events.pop_front();
        }
        self.events.push_back(event);
    }

    /// Returns up to `count` most recent events in chronological order.
    pub fn get(&self, count: usize) -> Vec<ServiceEvent> {
        let n = count.min(self.events.len());
        self.events.iter().skip(self.events.len() - n).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn as_proto(&self, count: usize) -> Vec<proto::machine::ServiceEvent> {
        self.get(count).iter().map(ServiceEvent::as_proto).collect()
    }
}
