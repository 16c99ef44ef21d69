use netcap::{CapturedResponse, CapturingNetwork, Event, RequestMatcher};
use serde_json::Value;

/// Exactly one response was captured for `matcher`, with `status`.
pub fn assert_single_response(
    network: &CapturingNetwork,
    matcher: &RequestMatcher,
    status: u16,
) -> CapturedResponse {
    let responses = network.responses_for(matcher);
    assert_eq!(
        responses.len(),
        1,
        "Expected one response for {matcher}, got: {responses:?}"
    );
    let response = responses.into_iter().next().unwrap();
    assert_eq!(
        response.status,
        status,
        "Unexpected status for {matcher}, body: {}",
        response.body_text()
    );
    response
}

/// The event data equals `expected` exactly.
pub fn assert_error_event(event: &Event, expected: &Value) {
    assert_eq!(
        &event.data, expected,
        "Error event data mismatch for event {} ({})",
        event.name, event.id
    );
}
