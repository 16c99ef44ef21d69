//! Datastream override scenarios against a scripted Edge Network.
//!
//! Each test scripts the service's answer for the interact endpoint, sends
//! one experience event through the Edge client, then checks the captured
//! exchange and any dispatched error events.

mod common;

use common::{EdgeClient, ExperienceEvent, assert_error_event, assert_single_response};
use netcap::edge::{
    EVENT_SOURCE_ERROR_RESPONSE_CONTENT, EdgeEnvironment, EdgeError, EdgeSettings,
    edge_response_errors, expect_edge_event_handle, interact_url,
};
use netcap::{CapturingNetwork, EventMonitor, LiveTransport, NetworkResponse, RequestMatcher};
use netcap_common::config::EnvParser;
use netcap_common::testing::{TestPhase, init_global_test_logging};
use netcap_common::test_guard;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

#[ctor::ctor]
fn setup() {
    init_global_test_logging();
}

const LOCATION_HINT: &str = "or2";
const DATASTREAM_ID: &str = "3849362c-f325-4418-8cc8-993342b254f7";
const VALID_DATASTREAM_ID_OVERRIDE: &str = "15d7bce0-3e2c-447b-bbda-129c57c60820";
const VALID_DATASET_ID_CONFIGURED_AS_OVERRIDE: &str = "6515e1dbfeb3b128d19bb1e4";
const VALID_DATASET_ID_NOT_CONFIGURED_AS_OVERRIDE: &str = "6515e1f6296d1e28d3209b9f";
const VALID_RSID_CONFIGURED_AS_OVERRIDE: &str = "mobile5.e2e.rsid2";
const VALID_RSID_NOT_CONFIGURED_AS_OVERRIDE: &str = "mobile5e2e.rsid3";

const INVALID_DATASTREAM_TYPE: &str = "https://ns.adobe.com/aep/errors/EXEG-0003-400";
const INVALID_REQUEST_TYPE: &str = "https://ns.adobe.com/aep/errors/EXEG-0113-400";

struct Fixture {
    network: CapturingNetwork,
    monitor: EventMonitor,
    client: EdgeClient,
    interact: RequestMatcher,
}

impl Fixture {
    fn new() -> Self {
        let url = interact_url(EdgeEnvironment::Prod, Some(LOCATION_HINT));
        Self::with_network(CapturingNetwork::new(), url)
    }

    fn with_network(network: CapturingNetwork, url: String) -> Self {
        let monitor = EventMonitor::new();
        let client = EdgeClient::new(
            Arc::new(network.clone()),
            monitor.clone(),
            url.clone(),
            DATASTREAM_ID,
        );
        let fixture = Self {
            network,
            monitor,
            client,
            interact: RequestMatcher::post(&url),
        };
        fixture.network.reset();
        fixture.monitor.reset();
        fixture
    }

    fn script_error(&self, title: &str, error_type: &str, detail: &str) {
        self.network.set_mock_response(
            self.interact.clone(),
            NetworkResponse::json(
                400,
                &json!({
                    "type": error_type,
                    "status": 400,
                    "title": title,
                    "detail": detail,
                    "report": {"requestId": "d81c93e5-7558-4996-a93c-489d550748b8"}
                }),
            ),
        );
    }

    fn script_success(&self) {
        self.network.set_mock_response(
            self.interact.clone(),
            NetworkResponse::json(
                200,
                &json!({"requestId": "d81c93e5-7558-4996-a93c-489d550748b8", "handle": []}),
            ),
        );
    }

    /// Send and wait for the client to finish handling the response.
    fn send(&self, event: ExperienceEvent) {
        let outcome = self.client.send_event(event);
        let result = outcome
            .recv_timeout(Duration::from_secs(5))
            .expect("send_event did not complete");
        assert!(result.is_ok(), "transport failed: {result:?}");
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        self.network.reset();
        self.monitor.reset();
    }
}

fn base_event() -> ExperienceEvent {
    ExperienceEvent::new(json!({"xdmtest": "data"})).with_data(json!({"data": {"test": "data"}}))
}

fn config_overrides(dataset_id: &str, report_suites: &[&str]) -> Value {
    json!({
        "com_adobe_experience_platform": {
            "datasets": {
                "event": {
                    "datasetId": dataset_id
                }
            }
        },
        "com_adobe_analytics": {
            "reportSuites": report_suites
        }
    })
}

/// Shared body of the invalid-override scenarios.
fn assert_rejected(fixture: &Fixture, title: &str, error_type: &str) {
    fixture
        .network
        .assert_all_expectations()
        .unwrap_or_else(|err| panic!("{err}"));
    fixture
        .monitor
        .assert_all_expectations()
        .unwrap_or_else(|err| panic!("{err}"));

    assert_single_response(&fixture.network, &fixture.interact, 400);

    let errors = edge_response_errors(&fixture.monitor);
    assert_eq!(errors.len(), 1);
    assert_error_event(
        &errors[0],
        &json!({
            "status": 400,
            "title": title,
            "type": error_type
        }),
    );
}

// ----------------------------------------------------------------------
// Datastream id override
// ----------------------------------------------------------------------

#[test]
fn test_send_event_with_valid_datastream_id_override_receives_expected_response() {
    let guard = test_guard!();
    let fixture = Fixture::new();
    fixture
        .network
        .set_expectation(fixture.interact.clone(), 1);
    fixture.script_success();

    guard.log(TestPhase::Execute, "sending event with datastream id override");
    fixture.send(base_event().with_datastream_id_override(VALID_DATASTREAM_ID_OVERRIDE));

    guard.log_expectations(TestPhase::Verify, &fixture.network.expectation_report());
    fixture
        .network
        .assert_all_expectations()
        .unwrap_or_else(|err| panic!("{err}"));
    assert_single_response(&fixture.network, &fixture.interact, 200);

    let request = &fixture.network.requests_for(&fixture.interact)[0];
    assert_eq!(request.query_param("configId"), Some(VALID_DATASTREAM_ID_OVERRIDE));
    let body = request.body_json().unwrap();
    assert_eq!(body["meta"]["sdkConfig"]["datastream"]["original"], DATASTREAM_ID);
    assert_eq!(body["events"][0]["xdm"]["xdmtest"], "data");
    assert_eq!(body["events"][0]["data"], json!({"data": {"test": "data"}}));
    assert!(edge_response_errors(&fixture.monitor).is_empty());
}

#[test]
fn test_send_event_with_invalid_datastream_id_override_receives_error_response() {
    let guard = test_guard!();
    let fixture = Fixture::new();
    fixture
        .network
        .set_expectation(fixture.interact.clone(), 1);
    expect_edge_event_handle(&fixture.monitor, EVENT_SOURCE_ERROR_RESPONSE_CONTENT, 1);
    fixture.script_error(
        "Invalid datastream ID",
        INVALID_DATASTREAM_TYPE,
        "The datastream ID DummyDatastreamID is not valid.",
    );

    guard.log(TestPhase::Execute, "sending event with dummy datastream id");
    fixture.send(base_event().with_datastream_id_override("DummyDatastreamID"));

    assert_rejected(&fixture, "Invalid datastream ID", INVALID_DATASTREAM_TYPE);
    let request = &fixture.network.requests_for(&fixture.interact)[0];
    assert_eq!(request.query_param("configId"), Some("DummyDatastreamID"));
}

// ----------------------------------------------------------------------
// Datastream config override
// ----------------------------------------------------------------------

#[test]
fn test_send_event_with_valid_datastream_config_override_receives_expected_response() {
    let _guard = test_guard!();
    let fixture = Fixture::new();
    fixture
        .network
        .set_expectation(fixture.interact.clone(), 1);
    fixture.script_success();

    let overrides = config_overrides(
        VALID_DATASET_ID_CONFIGURED_AS_OVERRIDE,
        &[VALID_RSID_CONFIGURED_AS_OVERRIDE],
    );
    fixture.send(base_event().with_datastream_config_override(overrides.clone()));

    fixture
        .network
        .assert_all_expectations()
        .unwrap_or_else(|err| panic!("{err}"));
    assert_single_response(&fixture.network, &fixture.interact, 200);

    let request = &fixture.network.requests_for(&fixture.interact)[0];
    assert_eq!(request.query_param("configId"), Some(DATASTREAM_ID));
    assert_eq!(request.body_json().unwrap()["meta"]["configOverrides"], overrides);
}

#[test]
fn test_send_event_with_invalid_datastream_config_override_dummy_values_receives_error_response() {
    let _guard = test_guard!();
    let fixture = Fixture::new();
    fixture
        .network
        .set_expectation(fixture.interact.clone(), 1);
    expect_edge_event_handle(&fixture.monitor, EVENT_SOURCE_ERROR_RESPONSE_CONTENT, 1);
    fixture.script_error(
        "Invalid request",
        INVALID_REQUEST_TYPE,
        "Invalid request. Reason: datasetId DummyDataset is not configured as an override.",
    );

    fixture.send(
        base_event().with_datastream_config_override(config_overrides(
            "DummyDataset",
            &["DummyRSID1", "DummyRSID2"],
        )),
    );

    assert_rejected(&fixture, "Invalid request", INVALID_REQUEST_TYPE);
}

#[test]
fn test_send_event_with_invalid_datastream_config_override_not_configured_values_receives_error_response()
 {
    let _guard = test_guard!();
    let fixture = Fixture::new();
    fixture
        .network
        .set_expectation(fixture.interact.clone(), 1);
    expect_edge_event_handle(&fixture.monitor, EVENT_SOURCE_ERROR_RESPONSE_CONTENT, 1);
    fixture.script_error(
        "Invalid request",
        INVALID_REQUEST_TYPE,
        "Invalid request. Reason: report suite is not configured as an override.",
    );

    fixture.send(
        base_event().with_datastream_config_override(config_overrides(
            VALID_DATASET_ID_NOT_CONFIGURED_AS_OVERRIDE,
            &[VALID_RSID_NOT_CONFIGURED_AS_OVERRIDE],
        )),
    );

    assert_rejected(&fixture, "Invalid request", INVALID_REQUEST_TYPE);
}

#[test]
fn test_send_event_with_invalid_datastream_config_override_valid_and_dummy_values_receives_error_response()
 {
    let _guard = test_guard!();
    let fixture = Fixture::new();
    fixture
        .network
        .set_expectation(fixture.interact.clone(), 1);
    expect_edge_event_handle(&fixture.monitor, EVENT_SOURCE_ERROR_RESPONSE_CONTENT, 1);
    fixture.script_error(
        "Invalid request",
        INVALID_REQUEST_TYPE,
        "Invalid request. Reason: DummyRSID2 is not configured as an override.",
    );

    let overrides = config_overrides(
        VALID_DATASET_ID_CONFIGURED_AS_OVERRIDE,
        &[VALID_RSID_CONFIGURED_AS_OVERRIDE, "DummyRSID2"],
    );
    fixture.send(base_event().with_datastream_config_override(overrides.clone()));

    assert_rejected(&fixture, "Invalid request", INVALID_REQUEST_TYPE);
    let body = fixture.network.requests_for(&fixture.interact)[0]
        .body_json()
        .unwrap();
    assert_eq!(body["meta"]["configOverrides"], overrides);
}

// ----------------------------------------------------------------------
// Error events carried in a successful response
// ----------------------------------------------------------------------

#[test]
fn test_errors_inside_success_body_are_dispatched() {
    let _guard = test_guard!();
    let fixture = Fixture::new();
    expect_edge_event_handle(&fixture.monitor, EVENT_SOURCE_ERROR_RESPONSE_CONTENT, 1);
    fixture.network.set_mock_response(
        fixture.interact.clone(),
        NetworkResponse::json(
            200,
            &json!({
                "handle": [],
                "errors": [{
                    "type": INVALID_REQUEST_TYPE,
                    "status": 400,
                    "title": "Invalid request"
                }]
            }),
        ),
    );

    fixture.send(base_event());

    fixture
        .monitor
        .assert_all_expectations()
        .unwrap_or_else(|err| panic!("{err}"));
    let errors = edge_response_errors(&fixture.monitor);
    let error = EdgeError::from_value(&errors[0].data).unwrap();
    assert_eq!(error.code(), "EXEG-0113-400");
}

// ----------------------------------------------------------------------
// Live Edge Network
// ----------------------------------------------------------------------

/// Requires `EDGE_DATASTREAM_ID` (and optionally `EDGE_LOCATION_HINT`,
/// `EDGE_ENVIRONMENT`) pointing at a real datastream.
#[test]
#[ignore = "talks to the real Edge Network"]
fn test_live_invalid_datastream_id_override_receives_error_response() {
    let guard = test_guard!();
    let settings = EdgeSettings::from_env().unwrap_or_else(|errors| panic!("{errors:?}"));
    let datastream_id = EnvParser::with_prefix("").get_optional_string("EDGE_DATASTREAM_ID");
    let Some(datastream_id) = datastream_id.value else {
        guard.log(TestPhase::Setup, "EDGE_DATASTREAM_ID not set, skipping");
        return;
    };

    let network = CapturingNetwork::builder()
        .forward_to(Arc::new(LiveTransport::new()))
        .wait_timeout(Duration::from_secs(10))
        .build();
    let monitor = EventMonitor::with_timeouts(Duration::from_secs(10), Duration::from_millis(50));
    let client = EdgeClient::new(
        Arc::new(network.clone()),
        monitor.clone(),
        settings.interact_url(),
        datastream_id,
    );
    let interact = settings.interact_matcher();
    network.set_expectation(interact.clone(), 1);
    expect_edge_event_handle(&monitor, EVENT_SOURCE_ERROR_RESPONSE_CONTENT, 1);

    let outcome = client.send_event(base_event().with_datastream_id_override("DummyDatastreamID"));
    let _ = outcome.recv_timeout(Duration::from_secs(15));

    network
        .assert_all_expectations()
        .unwrap_or_else(|err| panic!("{err}"));
    monitor
        .assert_all_expectations()
        .unwrap_or_else(|err| panic!("{err}"));
    assert_single_response(&network, &interact, 400);

    let capture_log = netcap_common::testing::test_log_dir().join("live_edge_capture.jsonl");
    if let Err(err) = network.write_capture_log(&capture_log) {
        guard.log(TestPhase::Teardown, format!("capture log not written: {err}"));
    }
}
