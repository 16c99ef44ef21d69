//! Capturing network harness for expectation-based integration tests.
//!
//! The system under test talks to the network through a [`Transport`]; tests
//! give it a [`CapturingNetwork`] instead of a real client, register
//! expectations and scripted responses, trigger the action under test, then
//! wait for the expectations and assert on what was captured.

pub mod edge;
mod expectation;
pub mod harness;
pub mod monitor;
pub mod transport;
mod watch;

pub use harness::{
    CapturedRequest, CapturedResponse, CapturingNetwork, CapturingNetworkBuilder, Exchange,
    ResponseOrigin,
};
pub use monitor::{Event, EventKey, EventMonitor};
pub use transport::{LiveTransport, Transport};

pub use netcap_common::{
    ExpectationStatus, HttpMethod, NetworkRequest, NetworkResponse, QueryMatching,
    RequestMatcher, TransportError, UnmetExpectations,
};
