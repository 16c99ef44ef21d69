//! Minimal Edge client used as the system under test.
//!
//! It builds interact requests the way the mobile SDK does (datastream id
//! override in the `configId` query, config overrides under
//! `meta.configOverrides`), sends them fire-and-forget on a worker thread, and
//! dispatches service errors as events to an [`EventMonitor`].

use netcap::edge::EdgeError;
use netcap::{EventMonitor, NetworkRequest, NetworkResponse, Transport, TransportError};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use uuid::Uuid;

/// An experience event as passed to `send_event`.
#[derive(Debug, Clone, Default)]
pub struct ExperienceEvent {
    pub xdm: Map<String, Value>,
    pub data: Option<Value>,
    pub datastream_id_override: Option<String>,
    pub datastream_config_override: Option<Value>,
}

impl ExperienceEvent {
    pub fn new(xdm: Value) -> Self {
        Self {
            xdm: xdm.as_object().cloned().unwrap_or_default(),
            ..Self::default()
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_datastream_id_override(mut self, id: &str) -> Self {
        self.datastream_id_override = Some(id.to_string());
        self
    }

    pub fn with_datastream_config_override(mut self, overrides: Value) -> Self {
        self.datastream_config_override = Some(overrides);
        self
    }
}

pub struct EdgeClient {
    transport: Arc<dyn Transport>,
    monitor: EventMonitor,
    interact_url: String,
    datastream_id: String,
}

impl EdgeClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        monitor: EventMonitor,
        interact_url: impl Into<String>,
        datastream_id: impl Into<String>,
    ) -> Self {
        Self {
            transport,
            monitor,
            interact_url: interact_url.into(),
            datastream_id: datastream_id.into(),
        }
    }

    /// Build the interact request for `event`.
    pub fn build_request(&self, event: &ExperienceEvent) -> NetworkRequest {
        let config_id = event
            .datastream_id_override
            .as_deref()
            .unwrap_or(&self.datastream_id);
        let url = format!(
            "{}?configId={}&requestId={}",
            self.interact_url,
            config_id,
            Uuid::new_v4()
        );

        let mut xdm = event.xdm.clone();
        xdm.insert("_id".to_string(), json!(Uuid::new_v4().to_string()));
        xdm.insert("timestamp".to_string(), json!(chrono::Utc::now().to_rfc3339()));

        let mut event_body = Map::new();
        event_body.insert("xdm".to_string(), Value::Object(xdm));
        if let Some(data) = &event.data {
            event_body.insert("data".to_string(), data.clone());
        }

        let mut meta = Map::new();
        meta.insert(
            "konductorConfig".to_string(),
            json!({"streaming": {"enabled": false}}),
        );
        if let Some(overrides) = &event.datastream_config_override {
            meta.insert("configOverrides".to_string(), overrides.clone());
        }
        if event.datastream_id_override.is_some() {
            meta.insert(
                "sdkConfig".to_string(),
                json!({"datastream": {"original": self.datastream_id}}),
            );
        }

        NetworkRequest::post(url).with_json(&json!({
            "meta": meta,
            "events": [event_body],
        }))
    }

    /// Send `event` without waiting; the outcome arrives on the channel.
    pub fn send_event(
        &self,
        event: ExperienceEvent,
    ) -> mpsc::Receiver<Result<NetworkResponse, TransportError>> {
        let request = self.build_request(&event);
        let transport = Arc::clone(&self.transport);
        let monitor = self.monitor.clone();
        let (tx, rx) = mpsc::channel();

        thread::spawn(move || {
            let result = transport.send(request);
            if let Ok(response) = &result {
                dispatch_errors(&monitor, response);
            }
            let _ = tx.send(result);
        });
        rx
    }
}

/// Errors arrive either as the body of a 4xx/5xx or in an `errors` array of
/// a 2xx body.
fn dispatch_errors(monitor: &EventMonitor, response: &NetworkResponse) {
    let Some(body) = response.body_json() else {
        return;
    };
    let errors: Vec<EdgeError> = if response.is_success() {
        body.get("errors")
            .and_then(Value::as_array)
            .map(|errors| errors.iter().filter_map(EdgeError::from_value).collect())
            .unwrap_or_default()
    } else {
        EdgeError::from_value(&body).into_iter().collect()
    };
    for error in errors {
        monitor.record(error.to_event());
    }
}
