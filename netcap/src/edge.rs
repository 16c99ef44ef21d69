//! Edge Network helpers for integration tests.
//!
//! URL construction for the interact endpoint, environment-driven settings
//! for live runs, the error payload the service returns for rejected
//! requests, and shortcuts for querying Edge events from an
//! [`EventMonitor`].

use crate::monitor::{Event, EventKey, EventMonitor};
use netcap_common::config::{EnvError, EnvParser};
use netcap_common::{RequestMatcher, Sourced};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Event type of everything the Edge extension dispatches.
pub const EVENT_TYPE_EDGE: &str = "com.adobe.eventType.edge";

/// Source of events carrying an error returned by the service.
pub const EVENT_SOURCE_ERROR_RESPONSE_CONTENT: &str = "com.adobe.eventSource.errorResponseContent";

/// Source of request events sent to the Edge extension.
pub const EVENT_SOURCE_REQUEST_CONTENT: &str = "com.adobe.eventSource.requestContent";

/// Name given to error-response events.
pub const ERROR_RESPONSE_EVENT_NAME: &str = "AEP Error Response";

/// Edge Network deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeEnvironment {
    #[default]
    Prod,
    Int,
}

impl EdgeEnvironment {
    pub fn host(self) -> &'static str {
        match self {
            Self::Prod => "edge.adobedc.net",
            Self::Int => "edge-int.adobedc.net",
        }
    }
}

impl std::fmt::Display for EdgeEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Prod => write!(f, "prod"),
            Self::Int => write!(f, "int"),
        }
    }
}

impl std::str::FromStr for EdgeEnvironment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "prod" | "" => Ok(Self::Prod),
            "int" => Ok(Self::Int),
            other => Err(format!("unknown Edge environment: {other}")),
        }
    }
}

/// Interact endpoint URL, with the location hint as a path segment when set.
pub fn interact_url(environment: EdgeEnvironment, location_hint: Option<&str>) -> String {
    let host = environment.host();
    match location_hint.map(str::trim).filter(|hint| !hint.is_empty()) {
        Some(hint) => format!("https://{host}/ee/{hint}/v1/interact"),
        None => format!("https://{host}/ee/v1/interact"),
    }
}

/// Settings for runs against the real Edge Network.
///
/// Variables are unprefixed to match the names CI already exports:
/// `TAGS_MOBILE_PROPERTY_ID`, `EDGE_LOCATION_HINT`, `EDGE_ENVIRONMENT`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EdgeSettings {
    pub tags_mobile_property_id: Sourced<Option<String>>,
    pub location_hint: Sourced<Option<String>>,
    pub environment: Sourced<EdgeEnvironment>,
}

impl EdgeSettings {
    pub fn from_env() -> Result<Self, Vec<EnvError>> {
        let mut parser = EnvParser::with_prefix("");
        let settings = Self {
            tags_mobile_property_id: parser.get_optional_string("TAGS_MOBILE_PROPERTY_ID"),
            location_hint: parser.get_optional_string("EDGE_LOCATION_HINT"),
            environment: parser.get_parsed(
                "EDGE_ENVIRONMENT",
                EdgeEnvironment::Prod,
                "prod or int",
            ),
        };
        if parser.has_errors() {
            return Err(parser.take_errors());
        }
        Ok(settings)
    }

    pub fn interact_url(&self) -> String {
        interact_url(self.environment.value, self.location_hint.value.as_deref())
    }

    /// POST matcher for the interact endpoint.
    pub fn interact_matcher(&self) -> RequestMatcher {
        RequestMatcher::post(&self.interact_url())
    }
}

/// Error payload returned by the Edge Network for a rejected request.
#[derive(Debug, Clone, PartialEq, Error, Serialize, Deserialize)]
#[error("{status} {title} ({error_type})")]
pub struct EdgeError {
    pub status: u16,
    pub title: String,
    #[serde(rename = "type")]
    pub error_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub report: Option<Value>,
}

impl EdgeError {
    pub fn new(status: u16, title: impl Into<String>, error_type: impl Into<String>) -> Self {
        Self {
            status,
            title: title.into(),
            error_type: error_type.into(),
            detail: None,
            report: None,
        }
    }

    /// Error code at the end of the type URI, e.g. `EXEG-0003-400`.
    pub fn code(&self) -> &str {
        self.error_type
            .rsplit('/')
            .next()
            .unwrap_or(&self.error_type)
    }

    /// Event data as dispatched to listeners: the payload minus the
    /// diagnostic `detail` and `report` fields.
    pub fn to_event_data(&self) -> Value {
        serde_json::json!({
            "status": self.status,
            "title": self.title,
            "type": self.error_type,
        })
    }

    pub fn to_event(&self) -> Event {
        Event::new(
            ERROR_RESPONSE_EVENT_NAME,
            EVENT_TYPE_EDGE,
            EVENT_SOURCE_ERROR_RESPONSE_CONTENT,
            self.to_event_data(),
        )
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        serde_json::from_value(value.clone()).ok()
    }
}

/// Expect `count` Edge events from `source`.
pub fn expect_edge_event_handle(monitor: &EventMonitor, source: &str, count: usize) {
    monitor.set_expectation(EventKey::new(EVENT_TYPE_EDGE, source), count);
}

/// Error-response events captured so far, in dispatch order.
pub fn edge_response_errors(monitor: &EventMonitor) -> Vec<Event> {
    monitor.events_for(&EventKey::new(
        EVENT_TYPE_EDGE,
        EVENT_SOURCE_ERROR_RESPONSE_CONTENT,
    ))
}
