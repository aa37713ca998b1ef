//! Recording of significant host lifecycle events.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

/// Sink for user-visible lifecycle events of a host.
pub trait EventPublisher: Send + Sync {
    /// Record an event. Publishing never fails the calling operation.
    fn publish(&self, reason: &str, message: &str);
}

/// A recorded event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Event {
    /// Short machine-readable reason, e.g. `ProvisioningStarted`.
    pub reason: String,
    /// Human-readable description.
    pub message: String,
    /// When the event was recorded.
    pub timestamp: DateTime<Utc>,
}

/// Publisher that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullEventPublisher;

impl EventPublisher for NullEventPublisher {
    fn publish(&self, _reason: &str, _message: &str) {}
}

/// Publisher that writes events to the log.
#[derive(Debug, Clone)]
pub struct TracingEventPublisher {
    host: String,
}

impl TracingEventPublisher {
    /// Create a publisher labelling events with `host`.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl EventPublisher for TracingEventPublisher {
    fn publish(&self, reason: &str, message: &str) {
        info!(host = %self.host, reason, message, "host event");
    }
}

/// Publisher that keeps events in memory.
#[derive(Debug, Default)]
pub struct EventRecorder {
    events: Mutex<Vec<Event>>,
}

impl EventRecorder {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Events recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    /// Reasons of the events recorded so far, in order.
    #[must_use]
    pub fn reasons(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.reason).collect()
    }
}

impl EventPublisher for EventRecorder {
    fn publish(&self, reason: &str, message: &str) {
        if let Ok(mut events) = self.events.lock() {
            events.push(Event {
                reason: reason.to_string(),
                message: message.to_string(),
                timestamp: Utc::now(),
            });
        }
    }
}
