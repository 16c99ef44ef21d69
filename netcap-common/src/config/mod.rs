//! Configuration for the capture harness.
//!
//! Settings come from `NETCAP_*` environment variables with typed parsing,
//! error collection and source tracking, so a surprising timeout in CI can be
//! traced back to the variable that set it.

pub mod env;
pub mod source;

pub use env::{EnvError, EnvParser};
pub use source::{ConfigSource, Sourced};

use crate::matcher::QueryMatching;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default time to wait for expectations before failing verification.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Default upper bound between expectation re-checks.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runtime settings of a capture harness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarnessSettings {
    /// Timeout used by `assert_all_expectations` (`NETCAP_WAIT_TIMEOUT_MS`).
    pub wait_timeout: Sourced<Duration>,
    /// Maximum sleep between re-checks while waiting (`NETCAP_POLL_INTERVAL_MS`).
    pub poll_interval: Sourced<Duration>,
    /// Simulated latency added to every `send` (`NETCAP_RESPONSE_DELAY_MS`).
    pub response_delay: Sourced<Duration>,
    /// Query-string participation in matching (`NETCAP_QUERY_MATCHING`).
    pub query_matching: Sourced<QueryMatching>,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            wait_timeout: Sourced::default_value(DEFAULT_WAIT_TIMEOUT),
            poll_interval: Sourced::default_value(DEFAULT_POLL_INTERVAL),
            response_delay: Sourced::default_value(Duration::ZERO),
            query_matching: Sourced::default_value(QueryMatching::Ignore),
        }
    }
}

impl HarnessSettings {
    /// Load settings from the environment.
    ///
    /// Every variable is checked; all problems are returned together.
    pub fn from_env() -> Result<Self, Vec<EnvError>> {
        let mut parser = EnvParser::new();
        let settings = Self {
            wait_timeout: parser.get_duration_ms(
                "WAIT_TIMEOUT_MS",
                DEFAULT_WAIT_TIMEOUT,
                Duration::from_millis(1),
                Duration::from_secs(600),
            ),
            poll_interval: parser.get_duration_ms(
                "POLL_INTERVAL_MS",
                DEFAULT_POLL_INTERVAL,
                Duration::from_millis(1),
                Duration::from_secs(5),
            ),
            response_delay: parser.get_duration_ms(
                "RESPONSE_DELAY_MS",
                Duration::ZERO,
                Duration::ZERO,
                Duration::from_secs(60),
            ),
            query_matching: parser.get_parsed(
                "QUERY_MATCHING",
                QueryMatching::Ignore,
                "ignore or exact",
            ),
        };
        if parser.has_errors() {
            return Err(parser.take_errors());
        }
        Ok(settings)
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use crate::testing::env_test_lock;

    const VARS: [&str; 4] = [
        "NETCAP_WAIT_TIMEOUT_MS",
        "NETCAP_POLL_INTERVAL_MS",
        "NETCAP_RESPONSE_DELAY_MS",
        "NETCAP_QUERY_MATCHING",
    ];

    fn cleanup_env() {
        for var in VARS {
            // SAFETY: Tests are serialized via env_test_lock
            unsafe { std::env::remove_var(var) };
        }
    }

    #[test]
    fn test_settings_defaults_without_env() {
        let _guard = env_test_lock();
        cleanup_env();

        let settings = HarnessSettings::from_env().unwrap();
        assert_eq!(settings, HarnessSettings::default());
        assert_eq!(settings.wait_timeout.value, Duration::from_millis(2000));
        assert_eq!(settings.poll_interval.value, Duration::from_millis(50));
        assert_eq!(settings.response_delay.value, Duration::ZERO);
        assert_eq!(settings.query_matching.value, QueryMatching::Ignore);
    }

    #[test]
    fn test_settings_from_env() {
        let _guard = env_test_lock();
        cleanup_env();

        // SAFETY: Tests are serialized via env_test_lock
        unsafe {
            std::env::set_var("NETCAP_WAIT_TIMEOUT_MS", "5000");
            std::env::set_var("NETCAP_QUERY_MATCHING", "exact");
        }
        let settings = HarnessSettings::from_env().unwrap();
        assert_eq!(settings.wait_timeout.value, Duration::from_secs(5));
        assert_eq!(settings.wait_timeout.source, ConfigSource::Environment);
        assert_eq!(settings.query_matching.value, QueryMatching::Exact);
        assert_eq!(settings.poll_interval.source, ConfigSource::Default);

        cleanup_env();
    }

    #[test]
    fn test_settings_collect_all_errors() {
        let _guard = env_test_lock();
        cleanup_env();

        // SAFETY: Tests are serialized via env_test_lock
        unsafe {
            std::env::set_var("NETCAP_WAIT_TIMEOUT_MS", "0");
            std::env::set_var("NETCAP_POLL_INTERVAL_MS", "soon");
            std::env::set_var("NETCAP_QUERY_MATCHING", "fuzzy");
        }
        let errors = HarnessSettings::from_env().unwrap_err();
        assert_eq!(errors.len(), 3);

        cleanup_env();
    }
}
