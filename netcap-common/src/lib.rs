//! Shared types and utilities for the netcap capture harness.
//!
//! - [`types`]: requests and responses passed through the transport seam
//! - [`matcher`]: canonical (method, URL) keys used for matching
//! - [`errors`]: transport and verification errors
//! - [`config`]: `NETCAP_*` environment settings with source tracking
//! - [`testing`]: JSONL test logging built on `tracing`

pub mod config;
pub mod errors;
pub mod matcher;
pub mod testing;
pub mod types;
pub mod util;

pub use config::{ConfigSource, HarnessSettings, Sourced};
pub use errors::{CaptureLogError, ExpectationStatus, TransportError, UnmetExpectations};
pub use matcher::{QueryMatching, RequestMatcher};
pub use types::{Headers, HttpMethod, NetworkRequest, NetworkResponse};
