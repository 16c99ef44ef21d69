#![allow(dead_code)]

pub mod assertions;
pub mod edge_client;
pub mod logging;

// Each test binary uses a different slice of these.
#[allow(unused_imports)]
pub use assertions::{assert_error_event, assert_single_response};
#[allow(unused_imports)]
pub use edge_client::{EdgeClient, ExperienceEvent};
#[allow(unused_imports)]
pub use logging::init_test_logging;
