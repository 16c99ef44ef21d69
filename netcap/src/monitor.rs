//! Capture of events dispatched by the system under test.
//!
//! Network traffic is only half of what an integration test asserts on; the
//! client also reports results (for example service errors) as events. The
//! [`EventMonitor`] records those with the same expectation and await
//! semantics as [`CapturingNetwork`](crate::CapturingNetwork).

use crate::expectation::ExpectationSet;
use crate::watch::Watched;
use netcap_common::config::{DEFAULT_POLL_INTERVAL, DEFAULT_WAIT_TIMEOUT};
use netcap_common::{ExpectationStatus, UnmetExpectations};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// An event dispatched by the system under test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub name: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    #[serde(default)]
    pub data: Value,
    /// Arrival order within the monitor; 0 until recorded.
    #[serde(default)]
    pub sequence: u64,
}

impl Event {
    pub fn new(name: impl Into<String>, event_type: &str, source: &str, data: Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            event_type: event_type.to_string(),
            source: source.to_string(),
            data,
            sequence: 0,
        }
    }

    pub fn key(&self) -> EventKey {
        EventKey::new(&self.event_type, &self.source)
    }
}

/// (type, source) pair identifying a kind of event, case-insensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventKey {
    event_type: String,
    source: String,
}

impl EventKey {
    pub fn new(event_type: &str, source: &str) -> Self {
        Self {
            event_type: event_type.to_ascii_lowercase(),
            source: source.to_ascii_lowercase(),
        }
    }
}

impl std::fmt::Display for EventKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} / {}", self.event_type, self.source)
    }
}

#[derive(Default)]
struct MonitorState {
    events: Vec<Event>,
    expectations: ExpectationSet<EventKey>,
    next_sequence: u64,
}

/// Records dispatched events; clones share the same log.
#[derive(Clone)]
pub struct EventMonitor {
    inner: Arc<Watched<MonitorState>>,
    wait_timeout: Duration,
    poll_interval: Duration,
}

impl Default for EventMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl EventMonitor {
    pub fn new() -> Self {
        Self::with_timeouts(DEFAULT_WAIT_TIMEOUT, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_timeouts(wait_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            inner: Arc::new(Watched::new(MonitorState {
                next_sequence: 1,
                ..MonitorState::default()
            })),
            wait_timeout,
            poll_interval,
        }
    }

    /// Record a dispatched event and return its sequence number.
    pub fn record(&self, mut event: Event) -> u64 {
        self.inner.update(|state| {
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            event.sequence = sequence;

            let key = event.key();
            state.expectations.observe(&key);
            debug!(
                sequence,
                key = %key,
                name = %event.name,
                "Captured event"
            );
            state.events.push(event);
            sequence
        })
    }

    pub fn set_expectation(&self, key: EventKey, expected_count: usize) {
        debug!(key = %key, expected_count, "Registering event expectation");
        self.inner
            .update(|state| state.expectations.set(key, expected_count));
    }

    pub fn await_expectations(&self, timeout: Duration) -> bool {
        self.inner.wait_until(timeout, self.poll_interval, |state| {
            state.expectations.is_satisfied()
        })
    }

    pub async fn wait_for_expectations(&self, timeout: Duration) -> bool {
        self.inner
            .wait_until_async(timeout, self.poll_interval, |state| {
                state.expectations.is_satisfied()
            })
            .await
    }

    /// Wait with the default timeout, then fail on unmet expectations.
    ///
    /// Events with no expectation are tolerated; use
    /// [`EventMonitor::verify_expectations`] to reject them.
    pub fn assert_all_expectations(&self) -> Result<(), UnmetExpectations> {
        self.verify_expectations(self.wait_timeout, true)
    }

    pub fn verify_expectations(
        &self,
        timeout: Duration,
        ignore_unexpected: bool,
    ) -> Result<(), UnmetExpectations> {
        let start = Instant::now();
        self.await_expectations(timeout);
        let result = self.inner.read(|state| {
            state
                .expectations
                .verify("event", start.elapsed(), ignore_unexpected)
        });
        if let Err(failure) = &result {
            warn!(
                unmet = failure.unmet.len(),
                unexpected = failure.unexpected.len(),
                "Event expectations not met"
            );
        }
        result
    }

    pub fn expectation_report(&self) -> Vec<ExpectationStatus> {
        self.inner.read(|state| state.expectations.report())
    }

    /// Events of the given kind, in arrival order.
    pub fn events_for(&self, key: &EventKey) -> Vec<Event> {
        self.inner.read(|state| {
            state
                .events
                .iter()
                .filter(|event| event.key() == *key)
                .cloned()
                .collect()
        })
    }

    pub fn events(&self) -> Vec<Event> {
        self.inner.read(|state| state.events.clone())
    }

    pub fn reset(&self) {
        self.inner.update(|state| {
            let dropped = state.events.len();
            *state = MonitorState {
                next_sequence: 1,
                ..MonitorState::default()
            };
            info!(dropped, "Event monitor reset");
        });
    }
}
