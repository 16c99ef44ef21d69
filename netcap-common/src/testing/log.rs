//! Structured test logging for CI debugging.
//!
//! Harness activity is emitted through `tracing`; this module wires those
//! events to JSONL files so a failed network expectation in CI can be read
//! back with the exact request/response sequence that led to it.
//!
//! # Global JSONL Logging
//!
//! ```ignore
//! use netcap_common::testing::init_global_test_logging;
//!
//! #[ctor::ctor]
//! fn setup() {
//!     init_global_test_logging();
//! }
//! ```
//!
//! # Per-test logging
//!
//! ```ignore
//! #[test]
//! fn test_send_event() {
//!     let guard = netcap_common::test_guard!();
//!     guard.log(TestPhase::Execute, "sending event");
//!     // TEST PASS / TEST FAIL logged when the guard drops
//! }
//! ```

use crate::config::EnvParser;
use crate::errors::ExpectationStatus;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Mutex, Once};
use std::time::Instant;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::prelude::*;

/// Test execution phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TestPhase {
    /// Harness construction, expectations and scripted responses.
    Setup,
    /// The system under test runs against the harness.
    Execute,
    /// Awaiting expectations and asserting on captured data.
    Verify,
    /// Harness reset.
    Teardown,
}

impl std::fmt::Display for TestPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Setup => write!(f, "setup"),
            Self::Execute => write!(f, "execute"),
            Self::Verify => write!(f, "verify"),
            Self::Teardown => write!(f, "teardown"),
        }
    }
}

static GLOBAL_LOGGING_INIT: Once = Once::new();

/// Initialize global JSONL logging for all tests.
///
/// Installs a subscriber writing JSON events to
/// `target/test-logs/all_tests.jsonl` and compact lines to the test writer.
/// Safe to call multiple times - initialization only happens once.
///
/// # Environment Variables
///
/// - `NETCAP_TEST_LOG_FILE`: Override the log file path
/// - `NETCAP_TEST_LOG_LEVEL`: Level for netcap crates (default: `info`)
pub fn init_global_test_logging() {
    GLOBAL_LOGGING_INIT.call_once(|| {
        let log_file = create_global_log_file();

        let file_layer = log_file.map(|file| {
            tracing_subscriber::fmt::layer()
                .json()
                .with_writer(Mutex::new(file))
                .with_span_events(FmtSpan::CLOSE)
                .with_current_span(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
        });

        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_test_writer()
            .with_target(true)
            .with_level(true)
            .compact();

        let level = test_log_level();
        let filter = tracing_subscriber::EnvFilter::try_new(format!(
            "netcap={level},netcap_common={level},test={level}"
        ))
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(file_layer)
            .with(stderr_layer);

        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}

/// `NETCAP_TEST_LOG_LEVEL`, falling back to `info` when unset or invalid.
fn test_log_level() -> String {
    EnvParser::new().get_log_level("TEST_LOG_LEVEL", "info").value
}

fn create_global_log_file() -> Option<std::fs::File> {
    if let Ok(custom_path) = std::env::var("NETCAP_TEST_LOG_FILE") {
        if let Some(parent) = PathBuf::from(&custom_path).parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        return std::fs::File::create(&custom_path).ok();
    }

    let log_dir = test_log_dir();
    let _ = std::fs::create_dir_all(&log_dir);
    std::fs::File::create(log_dir.join("all_tests.jsonl")).ok()
}

/// `target/test-logs`, resolved from CARGO_TARGET_DIR or the nearest
/// `target/` above the current directory.
pub fn test_log_dir() -> PathBuf {
    if let Ok(target_dir) = std::env::var("CARGO_TARGET_DIR") {
        return PathBuf::from(target_dir).join("test-logs");
    }

    let mut cwd = std::env::current_dir().unwrap_or_default();
    loop {
        let target = cwd.join("target");
        if target.is_dir() {
            return target.join("test-logs");
        }
        if !cwd.pop() {
            return PathBuf::from("target/test-logs");
        }
    }
}

/// A structured log entry for test execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestLogEntry {
    /// RFC 3339 timestamp.
    pub timestamp: String,
    pub test_name: String,
    pub phase: TestPhase,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Milliseconds since the test started.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl TestLogEntry {
    pub fn new(test_name: &str, phase: TestPhase, message: impl Into<String>) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            test_name: test_name.to_string(),
            phase,
            message: message.into(),
            data: None,
            duration_ms: None,
        }
    }

    #[must_use]
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    #[must_use]
    pub fn with_duration(mut self, duration_ms: u64) -> Self {
        self.duration_ms = Some(duration_ms);
        self
    }
}

/// Summary of one test's logged run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub test_name: String,
    pub passed: bool,
    pub duration_ms: u64,
    pub logs: Vec<TestLogEntry>,
}

/// Structured test logger that writes JSONL output.
///
/// Creates a log file per test in `target/test-logs/`.
pub struct TestLogger {
    test_name: String,
    start_time: Instant,
    logs: Mutex<Vec<TestLogEntry>>,
    log_file: Option<Mutex<std::fs::File>>,
}

impl TestLogger {
    pub fn for_test(test_name: &str) -> Self {
        let log_file = Self::create_log_file(test_name).ok();

        let logger = Self {
            test_name: test_name.to_string(),
            start_time: Instant::now(),
            logs: Mutex::new(Vec::new()),
            log_file: log_file.map(Mutex::new),
        };

        logger.log(TestPhase::Setup, "TEST START");

        logger
    }

    fn create_log_file(test_name: &str) -> std::io::Result<std::fs::File> {
        let log_dir = test_log_dir();
        std::fs::create_dir_all(&log_dir)?;

        let safe_name = test_name.replace("::", "_").replace(['/', '\\'], "_");
        std::fs::File::create(log_dir.join(format!("{safe_name}.jsonl")))
    }

    pub fn log(&self, phase: TestPhase, message: impl Into<String>) {
        let entry = TestLogEntry::new(&self.test_name, phase, message)
            .with_duration(self.elapsed_ms());
        self.write_entry(&entry);
    }

    pub fn log_with_data(
        &self,
        phase: TestPhase,
        message: impl Into<String>,
        data: serde_json::Value,
    ) {
        let entry = TestLogEntry::new(&self.test_name, phase, message)
            .with_duration(self.elapsed_ms())
            .with_data(data);
        self.write_entry(&entry);
    }

    /// Log an expectation report (expected vs. observed per key).
    pub fn log_expectations(&self, phase: TestPhase, report: &[ExpectationStatus]) {
        let unmet = report.iter().filter(|status| !status.is_satisfied()).count();
        self.log_with_data(
            phase,
            format!("expectations: {} registered, {unmet} unmet", report.len()),
            serde_json::to_value(report).unwrap_or_default(),
        );
    }

    fn write_entry(&self, entry: &TestLogEntry) {
        if let Ok(mut logs) = self.logs.lock() {
            logs.push(entry.clone());
        }

        if let Some(file) = &self.log_file
            && let Ok(mut f) = file.lock()
            && let Ok(json) = serde_json::to_string(entry)
        {
            let _ = writeln!(f, "{json}");
        }

        tracing::info!(
            target: "test",
            test = %self.test_name,
            phase = %entry.phase,
            duration_ms = entry.duration_ms,
            "{}",
            entry.message
        );
    }

    pub fn pass(self) {
        self.log(TestPhase::Verify, "TEST PASS");
    }

    pub fn fail(self, reason: impl Into<String>) {
        self.log_with_data(
            TestPhase::Verify,
            "TEST FAIL",
            serde_json::json!({ "reason": reason.into() }),
        );
    }

    pub fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.start_time.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    pub fn into_result(self, passed: bool) -> TestResult {
        let duration_ms = self.elapsed_ms();
        let logs = self.logs.lock().map(|l| l.clone()).unwrap_or_default();

        TestResult {
            test_name: self.test_name.clone(),
            passed,
            duration_ms,
            logs,
        }
    }
}

/// Test logger that logs pass/fail on drop.
///
/// Logs TEST PASS when dropped normally and TEST FAIL when dropped during a
/// panic, so assertion failures in harness tests are recorded without
/// explicit calls.
///
/// # Environment Variables
///
/// - `NETCAP_TEST_LOGGING=1`: Enable logging (default: enabled in CI, disabled locally)
/// - `NETCAP_TEST_LOGGING=0`: Disable logging
pub struct TestGuard {
    inner: Option<TestLogger>,
}

impl TestGuard {
    pub fn new(test_name: &str) -> Self {
        Self {
            inner: if Self::is_enabled() {
                init_global_test_logging();
                Some(TestLogger::for_test(test_name))
            } else {
                None
            },
        }
    }

    fn is_enabled() -> bool {
        let in_ci = std::env::var_os("CI").is_some();
        EnvParser::new().get_bool("TEST_LOGGING", in_ci).value
    }

    pub fn log(&self, phase: TestPhase, message: impl Into<String>) {
        if let Some(logger) = &self.inner {
            logger.log(phase, message);
        }
    }

    pub fn log_with_data(
        &self,
        phase: TestPhase,
        message: impl Into<String>,
        data: serde_json::Value,
    ) {
        if let Some(logger) = &self.inner {
            logger.log_with_data(phase, message, data);
        }
    }

    pub fn log_expectations(&self, phase: TestPhase, report: &[ExpectationStatus]) {
        if let Some(logger) = &self.inner {
            logger.log_expectations(phase, report);
        }
    }
}

impl Drop for TestGuard {
    fn drop(&mut self) {
        if let Some(logger) = self.inner.take() {
            if std::thread::panicking() {
                logger.fail("test panicked");
            } else {
                logger.pass();
            }
        }
    }
}

/// Create a [`TestGuard`] named after the enclosing function.
#[macro_export]
macro_rules! test_guard {
    () => {{
        fn _f() {}
        fn _type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        let name = _type_name_of(_f);
        let name = name.strip_suffix("::_f").unwrap_or(name);
        let name = name.rsplit("::").next().unwrap_or(name);
        $crate::testing::TestGuard::new(name)
    }};
}
