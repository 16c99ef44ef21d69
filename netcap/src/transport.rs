//! The transport seam between the system under test and the network.
//!
//! Code under test sends requests through a [`Transport`]. Tests hand it a
//! [`CapturingNetwork`](crate::CapturingNetwork); live runs hand it a
//! [`LiveTransport`], or a capturing network that forwards to one.

use netcap_common::{Headers, NetworkRequest, NetworkResponse, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Send a request and receive its response.
///
/// HTTP error statuses are responses, not errors. `Err` means no response
/// was received at all.
pub trait Transport: Send + Sync {
    fn send(&self, request: NetworkRequest) -> Result<NetworkResponse, TransportError>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(&self, request: NetworkRequest) -> Result<NetworkResponse, TransportError> {
        (**self).send(request)
    }
}

/// Blocking HTTP transport performing real network calls.
///
/// Connect and read timeouts are taken from each request.
#[derive(Debug, Clone, Default)]
pub struct LiveTransport {
    _private: (),
}

impl LiveTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn agent(connect_timeout: Duration, read_timeout: Duration) -> ureq::Agent {
        ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_connect(Some(connect_timeout))
            .timeout_recv_response(Some(read_timeout))
            .timeout_recv_body(Some(read_timeout))
            .build()
            .into()
    }
}

impl Transport for LiveTransport {
    fn send(&self, request: NetworkRequest) -> Result<NetworkResponse, TransportError> {
        let NetworkRequest {
            method,
            url,
            headers,
            body,
            connect_timeout,
            read_timeout,
        } = request;

        let mut builder = ureq::http::Request::builder()
            .method(method.as_str())
            .uri(url.as_str());
        for (name, value) in &headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let http_request = builder
            .body(body)
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

        debug!(%method, %url, "Forwarding request to live network");
        let agent = Self::agent(connect_timeout, read_timeout);
        let mut response = agent
            .run(http_request)
            .map_err(|e| map_error(&e, connect_timeout + read_timeout))?;

        let status = response.status().as_u16();
        let headers: Headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_ascii_lowercase(), value.to_string()))
            })
            .collect();
        let body = response
            .body_mut()
            .read_to_vec()
            .map_err(|e| map_error(&e, read_timeout))?;

        debug!(%url, status, body_len = body.len(), "Live response received");
        Ok(NetworkResponse {
            status,
            headers,
            body,
        })
    }
}

fn map_error(err: &ureq::Error, timeout: Duration) -> TransportError {
    match err {
        ureq::Error::Timeout(_) => TransportError::Timeout(timeout),
        ureq::Error::HostNotFound | ureq::Error::ConnectionFailed => {
            TransportError::Connect(err.to_string())
        }
        ureq::Error::BadUri(_) | ureq::Error::Http(_) => {
            TransportError::InvalidRequest(err.to_string())
        }
        ureq::Error::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
            TransportError::Connect(io.to_string())
        }
        _ => TransportError::Io(err.to_string()),
    }
}
