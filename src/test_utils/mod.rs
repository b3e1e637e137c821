//! Shared fakes for unit tests.
//!
//! The mockall-generated mocks cover single-call expectations; the fakes
//! here keep state across calls (scripted list pages, recorded sink puts,
//! checkpoint history) for the loop-level tests.

mod fakes;
pub use fakes::*;

use tracing_subscriber::EnvFilter;

pub fn enable_logger() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}
