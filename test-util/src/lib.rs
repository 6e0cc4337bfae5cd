//! Utilities for integration tests.
//!
//! The `test-util` crate is the abort-on-failure layer over `mysqltest`:
//! helpers that turn a [`HarnessError`](mysqltest::HarnessError) into an
//! immediate test failure, `rstest` fixtures, a skip-if-unavailable launcher
//! for suites that need a real MySQL install, and scripted stand-ins for the
//! server programs so lifecycle behaviour can be tested without one.

#[cfg(unix)]
pub mod fake;
pub mod fixtures;
pub mod server;

pub use server::{
    Fatal,
    OrFatal,
    Panic,
    db,
    mysql_available,
    mysql_available_or_skip,
    new_server_db,
    new_started_server,
    new_started_server_with,
    start_server_or_skip,
};

/// Error type used throughout the test helpers.
pub type AnyError = anyhow::Error;
