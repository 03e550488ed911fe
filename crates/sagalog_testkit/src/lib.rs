//! # SagaLog Testkit
//!
//! Test utilities for SagaLog.
//!
//! This crate provides:
//! - Test fixtures for pools and logs
//! - Canonical saga scenarios
//! - Property-based test generators using proptest
//! - Crash recovery harnesses
//! - Stress testing utilities
//! - Tracing setup for tests
//!
//! ## Usage
//!
//! ```rust
//! use sagalog_testkit::prelude::*;
//!
//! init_tracing();
//! let test_pool = TestPool::memory();
//! let log = test_pool.log("orders");
//! let entries = write_vanilla_saga(&log, &new_execution_id());
//! assert_eq!(log.read_incomplete_sagas().unwrap(), entries);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod stress;

use std::sync::Once;
use tracing_subscriber::EnvFilter;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::crash::*;
    pub use crate::fixtures::scenarios::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use crate::init_tracing;
    pub use crate::stress::*;
}

pub use fixtures::*;
pub use generators::*;

/// Installs a test-friendly tracing subscriber once per process.
///
/// Output goes through the test harness capture and is filtered by
/// `RUST_LOG`, defaulting to `warn`.
pub fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
