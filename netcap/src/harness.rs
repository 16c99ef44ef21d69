//! Capturing network harness.
//!
//! [`CapturingNetwork`] stands in for the real transport of the system under
//! test. Every request is recorded with a gapless sequence number, answered
//! from a per-matcher FIFO of scripted responses (or the default response, or
//! a live transport when forwarding), and counted against the registered
//! expectations. Test code then waits for the expectations and inspects what
//! was captured.
//!
//! Nothing here fails the caller: an unmatched request is captured and
//! answered with the default response, and an unmet expectation is reported
//! as `false` / [`UnmetExpectations`] to the test, never to the system under
//! test.
//!
//! # Example
//!
//! ```ignore
//! let network = CapturingNetwork::new();
//! let interact = RequestMatcher::post("https://edge.example/ee/v1/interact");
//! network.set_expectation(interact.clone(), 1);
//! network.set_mock_response(interact.clone(), NetworkResponse::new(200));
//!
//! client_under_test(Arc::new(network.clone())).send_event();
//!
//! network.assert_all_expectations()?;
//! assert_eq!(network.responses_for(&interact)[0].status, 200);
//! ```

use crate::expectation::ExpectationSet;
use crate::transport::Transport;
use crate::watch::Watched;
use chrono::{DateTime, Utc};
use netcap_common::config::EnvError;
use netcap_common::util::{body_preview, redact_headers};
use netcap_common::{
    CaptureLogError, ExpectationStatus, HarnessSettings, Headers, HttpMethod, NetworkRequest,
    NetworkResponse, QueryMatching, RequestMatcher, Sourced, TransportError, UnmetExpectations,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const LOG_BODY_PREVIEW: usize = 256;

/// A request as received by the harness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapturedRequest {
    /// Arrival order, starting at 1.
    pub sequence: u64,
    pub method: HttpMethod,
    pub url: String,
    pub headers: Headers,
    pub body: Vec<u8>,
    /// Canonical matcher of this request, including its query.
    pub matcher: RequestMatcher,
    pub captured_at: DateTime<Utc>,
}

impl CapturedRequest {
    fn new(sequence: u64, request: &NetworkRequest, matcher: RequestMatcher) -> Self {
        Self {
            sequence,
            method: request.method,
            url: request.url.clone(),
            headers: request.headers.clone(),
            body: request.body.clone(),
            matcher,
            captured_at: Utc::now(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn body_json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }

    /// Value of a decoded query parameter.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.matcher
            .query()
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Where a captured response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseOrigin {
    /// Popped from the matcher's scripted queue.
    Scripted,
    /// The harness default response.
    Default,
    /// Returned by the live transport.
    Forwarded,
}

/// A response returned to the system under test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapturedResponse {
    /// Sequence number of the originating request.
    pub sequence: u64,
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub origin: ResponseOrigin,
}

impl CapturedResponse {
    fn new(sequence: u64, response: &NetworkResponse, origin: ResponseOrigin) -> Self {
        Self {
            sequence,
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.clone(),
            origin,
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn body_json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// A request paired with its outcome.
///
/// `response` and `error` are both `None` while a forwarded call is in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exchange {
    pub request: CapturedRequest,
    pub response: Option<CapturedResponse>,
    pub error: Option<TransportError>,
}

struct HarnessState {
    exchanges: Vec<Exchange>,
    expectations: ExpectationSet<RequestMatcher>,
    scripted: HashMap<RequestMatcher, VecDeque<NetworkResponse>>,
    default_response: NetworkResponse,
    next_sequence: u64,
}

impl HarnessState {
    fn new(default_response: NetworkResponse) -> Self {
        Self {
            exchanges: Vec::new(),
            expectations: ExpectationSet::default(),
            scripted: HashMap::new(),
            default_response,
            next_sequence: 1,
        }
    }
}

struct Shared {
    state: Watched<HarnessState>,
    settings: HarnessSettings,
    initial_default: NetworkResponse,
    forward: Option<Arc<dyn Transport>>,
}

/// What `send` does after the request has been recorded.
enum Dispatch {
    Respond(NetworkResponse, ResponseOrigin),
    Forward(Arc<dyn Transport>),
}

/// Capturing stand-in for a network transport.
///
/// Cheap to clone; clones share the same captured state, so one clone can be
/// handed to the system under test while the test keeps another.
#[derive(Clone)]
pub struct CapturingNetwork {
    inner: Arc<Shared>,
}

impl Default for CapturingNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CapturingNetwork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let captured = self.inner.state.read(|state| state.exchanges.len());
        f.debug_struct("CapturingNetwork")
            .field("settings", &self.inner.settings)
            .field("forwarding", &self.inner.forward.is_some())
            .field("captured", &captured)
            .finish()
    }
}

impl CapturingNetwork {
    pub fn builder() -> CapturingNetworkBuilder {
        CapturingNetworkBuilder::default()
    }

    /// Harness with default settings.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Harness configured from `NETCAP_*` environment variables.
    pub fn from_env() -> Result<Self, Vec<EnvError>> {
        Ok(Self::builder().settings(HarnessSettings::from_env()?).build())
    }

    pub fn settings(&self) -> &HarnessSettings {
        &self.inner.settings
    }

    fn query_matching(&self) -> QueryMatching {
        self.inner.settings.query_matching.value
    }

    fn key(&self, matcher: &RequestMatcher) -> RequestMatcher {
        matcher.project(self.query_matching())
    }

    // ------------------------------------------------------------------
    // Test setup
    // ------------------------------------------------------------------

    /// Register or replace the expected count for `matcher`.
    ///
    /// Matching exchanges captured before registration count toward it.
    pub fn set_expectation(&self, matcher: RequestMatcher, expected_count: usize) {
        let key = self.key(&matcher);
        debug!(matcher = %key, expected_count, "Registering network expectation");
        self.inner
            .state
            .update(|state| state.expectations.set(key, expected_count));
    }

    /// Queue a scripted response for `matcher`. Responses are used in the
    /// order they were queued.
    pub fn set_mock_response(&self, matcher: RequestMatcher, response: NetworkResponse) {
        let key = self.key(&matcher);
        debug!(matcher = %key, status = response.status, "Queueing scripted response");
        self.inner.state.update(|state| {
            state.scripted.entry(key).or_default().push_back(response);
        });
    }

    /// Replace the response used when no scripted response is queued.
    pub fn set_default_response(&self, response: NetworkResponse) {
        self.inner
            .state
            .update(|state| state.default_response = response);
    }

    // ------------------------------------------------------------------
    // Transport
    // ------------------------------------------------------------------

    /// Capture `request` and answer it.
    ///
    /// Only fails when forwarding to a live transport fails; the failure is
    /// recorded on the exchange before it is returned.
    pub fn send(&self, request: NetworkRequest) -> Result<NetworkResponse, TransportError> {
        let delay = self.inner.settings.response_delay.value;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let matcher = RequestMatcher::from_request(&request);
        let key = self.key(&matcher);
        let forward = self.inner.forward.clone();

        let (sequence, expected, dispatch) = self.inner.state.update(|state| {
            let sequence = state.next_sequence;
            state.next_sequence += 1;
            let expected = state.expectations.is_expected(&key);
            let scripted = state.scripted.get_mut(&key).and_then(VecDeque::pop_front);

            let dispatch = match (scripted, forward) {
                (Some(response), _) => Dispatch::Respond(response, ResponseOrigin::Scripted),
                (None, Some(transport)) => Dispatch::Forward(transport),
                (None, None) => {
                    Dispatch::Respond(state.default_response.clone(), ResponseOrigin::Default)
                }
            };

            let response = match &dispatch {
                Dispatch::Respond(response, origin) => {
                    state.expectations.observe(&key);
                    Some(CapturedResponse::new(sequence, response, *origin))
                }
                Dispatch::Forward(_) => None,
            };
            state.exchanges.push(Exchange {
                request: CapturedRequest::new(sequence, &request, matcher.clone()),
                response,
                error: None,
            });
            (sequence, expected, dispatch)
        });

        debug!(
            sequence,
            method = %request.method,
            url = %request.url,
            headers = ?redact_headers(&request.headers),
            body = %body_preview(&request.body, LOG_BODY_PREVIEW),
            "Captured request"
        );
        if !expected {
            warn!(sequence, matcher = %key, "Request matched no expectation");
        }

        match dispatch {
            Dispatch::Respond(response, origin) => {
                debug!(sequence, status = response.status, ?origin, "Responded");
                Ok(response)
            }
            Dispatch::Forward(transport) => self.forward(sequence, &key, request, &*transport),
        }
    }

    fn forward(
        &self,
        sequence: u64,
        key: &RequestMatcher,
        request: NetworkRequest,
        transport: &dyn Transport,
    ) -> Result<NetworkResponse, TransportError> {
        // The lock is not held while the live call is in flight.
        let result = transport.send(request);

        let recorded = self.inner.state.update(|state| {
            let Some(exchange) = state
                .exchanges
                .iter_mut()
                .rev()
                .find(|exchange| exchange.request.sequence == sequence)
            else {
                return false;
            };
            match &result {
                Ok(response) => {
                    exchange.response = Some(CapturedResponse::new(
                        sequence,
                        response,
                        ResponseOrigin::Forwarded,
                    ));
                }
                Err(err) => exchange.error = Some(err.clone()),
            }
            state.expectations.observe(key);
            true
        });

        match &result {
            Ok(response) => debug!(sequence, status = response.status, "Forwarded response"),
            Err(err) => warn!(sequence, error = %err, "Forwarded request failed"),
        }
        if !recorded {
            debug!(sequence, "Harness was reset while request was in flight");
        }
        result
    }

    // ------------------------------------------------------------------
    // Waiting and verification
    // ------------------------------------------------------------------

    /// Block until every expectation is satisfied or `timeout` elapses.
    pub fn await_expectations(&self, timeout: Duration) -> bool {
        let poll = self.inner.settings.poll_interval.value;
        self.inner
            .state
            .wait_until(timeout, poll, |state| state.expectations.is_satisfied())
    }

    /// Async variant of [`CapturingNetwork::await_expectations`].
    pub async fn wait_for_expectations(&self, timeout: Duration) -> bool {
        let poll = self.inner.settings.poll_interval.value;
        self.inner
            .state
            .wait_until_async(timeout, poll, |state| state.expectations.is_satisfied())
            .await
    }

    /// Wait up to the configured timeout for every expectation.
    ///
    /// Requests with no expectation are tolerated.
    pub fn assert_all_expectations(&self) -> Result<(), UnmetExpectations> {
        self.verify_expectations(self.inner.settings.wait_timeout.value, true)
    }

    /// Wait up to `timeout`, then report every unmet expectation. With
    /// `ignore_unexpected == false`, requests nobody expected and
    /// expectations exceeded also fail.
    pub fn verify_expectations(
        &self,
        timeout: Duration,
        ignore_unexpected: bool,
    ) -> Result<(), UnmetExpectations> {
        let start = Instant::now();
        self.await_expectations(timeout);
        let result = self.inner.state.read(|state| {
            state
                .expectations
                .verify("network request", start.elapsed(), ignore_unexpected)
        });
        if let Err(failure) = &result {
            for status in &failure.unmet {
                warn!(%status, "Network expectation not met");
            }
            for status in &failure.unexpected {
                warn!(%status, "Unexpected network request");
            }
        }
        result
    }

    /// Expected vs. observed count per registered expectation.
    pub fn expectation_report(&self) -> Vec<ExpectationStatus> {
        self.inner.state.read(|state| state.expectations.report())
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    /// Responses to requests matching `matcher`, in arrival order.
    pub fn responses_for(&self, matcher: &RequestMatcher) -> Vec<CapturedResponse> {
        let key = self.key(matcher);
        self.inner.state.read(|state| {
            state
                .exchanges
                .iter()
                .filter(|exchange| self.key(&exchange.request.matcher) == key)
                .filter_map(|exchange| exchange.response.clone())
                .collect()
        })
    }

    /// Requests matching `matcher`, in arrival order.
    pub fn requests_for(&self, matcher: &RequestMatcher) -> Vec<CapturedRequest> {
        let key = self.key(matcher);
        self.inner.state.read(|state| {
            state
                .exchanges
                .iter()
                .filter(|exchange| self.key(&exchange.request.matcher) == key)
                .map(|exchange| exchange.request.clone())
                .collect()
        })
    }

    pub fn requests(&self) -> Vec<CapturedRequest> {
        self.inner.state.read(|state| {
            state
                .exchanges
                .iter()
                .map(|exchange| exchange.request.clone())
                .collect()
        })
    }

    pub fn exchanges(&self) -> Vec<Exchange> {
        self.inner.state.read(|state| state.exchanges.clone())
    }

    /// Requests whose matcher has no registered expectation.
    pub fn unmatched_requests(&self) -> Vec<CapturedRequest> {
        self.inner.state.read(|state| {
            state
                .exchanges
                .iter()
                .filter(|exchange| {
                    !state
                        .expectations
                        .is_expected(&self.key(&exchange.request.matcher))
                })
                .map(|exchange| exchange.request.clone())
                .collect()
        })
    }

    /// Write every exchange as one JSON object per line.
    ///
    /// Sensitive headers are redacted; JSON bodies are embedded as JSON,
    /// other bodies as lossy text.
    pub fn write_capture_log(&self, path: &Path) -> Result<usize, CaptureLogError> {
        let exchanges = self.exchanges();
        let io_err = |source: std::io::Error| CaptureLogError::Io {
            path: path.to_path_buf(),
            source,
        };

        let mut out = Vec::new();
        for exchange in &exchanges {
            serde_json::to_writer(&mut out, &CaptureLogEntry::from(exchange))?;
            out.push(b'\n');
        }

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let mut file = std::fs::File::create(path).map_err(io_err)?;
        file.write_all(&out).map_err(io_err)?;

        info!(path = %path.display(), exchanges = exchanges.len(), "Wrote capture log");
        Ok(exchanges.len())
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Drop all captured data, expectations and scripted responses.
    ///
    /// Sequence numbers restart at 1 and the default response is restored.
    /// Only call between tests: a request still in flight from a previous
    /// test is dropped when it completes.
    pub fn reset(&self) {
        let initial_default = self.inner.initial_default.clone();
        let dropped = self.inner.state.update(|state| {
            let dropped = state.exchanges.len();
            *state = HarnessState::new(initial_default);
            dropped
        });
        info!(dropped, "Capturing network reset");
    }
}

impl Transport for CapturingNetwork {
    fn send(&self, request: NetworkRequest) -> Result<NetworkResponse, TransportError> {
        CapturingNetwork::send(self, request)
    }
}

#[derive(Serialize)]
struct CaptureLogEntry<'a> {
    sequence: u64,
    captured_at: &'a DateTime<Utc>,
    method: HttpMethod,
    url: &'a str,
    request_headers: Headers,
    request_body: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    origin: Option<ResponseOrigin>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_headers: Option<Headers>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_body: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<'a> From<&'a Exchange> for CaptureLogEntry<'a> {
    fn from(exchange: &'a Exchange) -> Self {
        let request = &exchange.request;
        let response = exchange.response.as_ref();
        Self {
            sequence: request.sequence,
            captured_at: &request.captured_at,
            method: request.method,
            url: &request.url,
            request_headers: redact_headers(&request.headers),
            request_body: log_body(&request.body),
            status: response.map(|r| r.status),
            origin: response.map(|r| r.origin),
            response_headers: response.map(|r| redact_headers(&r.headers)),
            response_body: response.map(|r| log_body(&r.body)),
            error: exchange.error.as_ref().map(ToString::to_string),
        }
    }
}

fn log_body(body: &[u8]) -> Value {
    if body.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(body).into_owned()))
}

/// Builder for [`CapturingNetwork`].
#[derive(Default)]
pub struct CapturingNetworkBuilder {
    settings: HarnessSettings,
    default_response: Option<NetworkResponse>,
    forward: Option<Arc<dyn Transport>>,
}

impl CapturingNetworkBuilder {
    /// Start from loaded settings; later setters override individual values.
    pub fn settings(mut self, settings: HarnessSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Default timeout of [`CapturingNetwork::assert_all_expectations`].
    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        self.settings.wait_timeout = Sourced::explicit(timeout);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.settings.poll_interval = Sourced::explicit(interval.max(Duration::from_millis(1)));
        self
    }

    /// Simulated latency added to every `send`.
    pub fn response_delay(mut self, delay: Duration) -> Self {
        self.settings.response_delay = Sourced::explicit(delay);
        self
    }

    pub fn query_matching(mut self, mode: QueryMatching) -> Self {
        self.settings.query_matching = Sourced::explicit(mode);
        self
    }

    /// Response used when nothing is scripted, also restored by `reset`.
    pub fn default_response(mut self, response: NetworkResponse) -> Self {
        self.default_response = Some(response);
        self
    }

    /// Forward unscripted requests to a live transport and capture the real
    /// responses.
    pub fn forward_to(mut self, transport: Arc<dyn Transport>) -> Self {
        self.forward = Some(transport);
        self
    }

    pub fn build(self) -> CapturingNetwork {
        let initial_default = self.default_response.unwrap_or_default();
        CapturingNetwork {
            inner: Arc::new(Shared {
                state: Watched::new(HarnessState::new(initial_default.clone())),
                settings: self.settings,
                initial_default,
                forward: self.forward,
            }),
        }
    }
}
