//! Test-support utilities shared by harness tests.

pub mod log;

use std::sync::{Mutex, MutexGuard, OnceLock, PoisonError};

pub use log::{
    TestGuard, TestLogEntry, TestLogger, TestPhase, TestResult, init_global_test_logging,
    test_log_dir,
};

/// Serializes tests that mutate process environment variables.
///
/// Shared by every crate in the workspace so `NETCAP_*` and `EDGE_*`
/// settings tests cannot interleave within one test binary.
#[doc(hidden)]
pub fn env_test_lock() -> MutexGuard<'static, ()> {
    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
}
