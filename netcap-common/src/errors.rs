//! Error types shared by the harness and its transports.
//!
//! The harness itself never fails the system under test: unmatched requests
//! and unmet expectations are data. The types here cover the places where a
//! failure has to be reported to someone:
//!
//! | Type                  | Raised by                       | Seen by               |
//! |-----------------------|---------------------------------|-----------------------|
//! | [`TransportError`]    | live transports                 | system under test     |
//! | [`UnmetExpectations`] | expectation verification        | test code             |
//! | [`CaptureLogError`]   | capture-log export              | test code             |

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Failure of a real network call.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum TransportError {
    /// The request could not be built (bad URL, bad header).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Connection could not be established.
    #[error("Connection failed: {0}")]
    Connect(String),

    /// The call did not finish in time.
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// I/O failure while sending or reading the body.
    #[error("I/O error: {0}")]
    Io(String),
}

/// Observed vs. expected count for a single expectation key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectationStatus {
    /// Display form of the key (matcher or event key).
    pub key: String,
    /// Occurrences the test asked for.
    pub expected: usize,
    /// Occurrences captured so far.
    pub observed: usize,
}

impl ExpectationStatus {
    pub fn is_satisfied(&self) -> bool {
        self.observed >= self.expected
    }
}

impl std::fmt::Display for ExpectationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: expected {}, observed {}",
            self.key, self.expected, self.observed
        )
    }
}

/// Verification failure listing every offending key.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub struct UnmetExpectations {
    /// What was being counted ("network request", "event").
    pub subject: String,
    /// How long verification waited.
    pub waited: Duration,
    /// Expectations whose observed count stayed below the expected count.
    pub unmet: Vec<ExpectationStatus>,
    /// Keys seen more often than expected, or seen with no expectation at all
    /// (`expected == 0`). Only populated by strict verification.
    pub unexpected: Vec<ExpectationStatus>,
}

impl UnmetExpectations {
    pub fn is_empty(&self) -> bool {
        self.unmet.is_empty() && self.unexpected.is_empty()
    }
}

impl std::fmt::Display for UnmetExpectations {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} expectations failed after waiting {}ms",
            self.subject,
            self.waited.as_millis()
        )?;
        if !self.unmet.is_empty() {
            write!(f, "\n  unmet:")?;
            for status in &self.unmet {
                write!(f, "\n    {status}")?;
            }
        }
        if !self.unexpected.is_empty() {
            write!(f, "\n  unexpected:")?;
            for status in &self.unexpected {
                write!(f, "\n    {status}")?;
            }
        }
        Ok(())
    }
}

/// Failure writing the JSONL capture log.
#[derive(Debug, Error)]
pub enum CaptureLogError {
    #[error("Failed to write capture log {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to serialize capture entry: {0}")]
    Serialize(#[from] serde_json::Error),
}
