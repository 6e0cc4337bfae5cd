//! Abort-on-failure helpers around [`MySqlServer`].
//!
//! The core library reports every failure as a `Result`. Tests usually want
//! the opposite: stop right there with a readable message. [`Fatal`] is that
//! sink, and the helpers here route every error into it.

use mysqltest::{HarnessConfig, MySqlServer, mysql::Conn};
use tracing::warn;

mod env;

pub use env::mysql_available;

use crate::AnyError;

/// Receives unrecoverable failures and aborts the current test.
pub trait Fatal {
    /// Reports `message` and never returns.
    fn fatal(&self, message: &str) -> !;
}

/// Sink that panics, failing the running test.
#[derive(Debug, Default, Clone, Copy)]
pub struct Panic;

impl Fatal for Panic {
    fn fatal(&self, message: &str) -> ! { panic!("{message}") }
}

/// Unwraps a result or hands the error, with its source chain, to a sink.
pub trait OrFatal<T> {
    /// Returns the value or aborts via `sink`.
    fn or_fatal(self, sink: &impl Fatal) -> T;
}

impl<T, E> OrFatal<T> for Result<T, E>
where
    E: Into<AnyError>,
{
    fn or_fatal(self, sink: &impl Fatal) -> T {
        match self {
            Ok(value) => value,
            Err(e) => sink.fatal(&format!("{:#}", e.into())),
        }
    }
}

/// Starts a server configured by [`HarnessConfig::load`].
pub fn new_started_server(sink: &impl Fatal) -> MySqlServer {
    let config = HarnessConfig::load().or_fatal(sink);
    new_started_server_with(sink, config)
}

/// Starts a server with an explicit configuration.
pub fn new_started_server_with(sink: &impl Fatal, config: HarnessConfig) -> MySqlServer {
    MySqlServer::launch(config).or_fatal(sink)
}

/// Starts a server, creates database `name`, and returns a connection to it.
pub fn new_server_db(sink: &impl Fatal, name: &str) -> (MySqlServer, Conn) {
    let config = HarnessConfig::load().or_fatal(sink);
    MySqlServer::launch_with_database(config, name).or_fatal(sink)
}

/// Opens a connection to `server`, retrying while it is refused. The suffix
/// has the form `dbname?param=value`.
pub fn db(sink: &impl Fatal, server: &MySqlServer, suffix: &str) -> Conn {
    server.connect_with_retry(suffix).or_fatal(sink)
}

/// Returns `true` when the configured programs are installed. Otherwise logs
/// that the calling test is being skipped and returns `false`.
#[must_use]
pub fn mysql_available_or_skip(config: &HarnessConfig) -> bool {
    let available = mysql_available(config);
    if !available {
        warn!(
            server = %config.server_binary.display(),
            "skipping test: mysqld is not installed"
        );
    }
    available
}

/// Starts a server, or returns `None` when the configured programs are not
/// installed so the caller can skip the test.
///
/// # Errors
///
/// Returns any launch error once the programs have been found.
pub fn start_server_or_skip(config: HarnessConfig) -> Result<Option<MySqlServer>, AnyError> {
    if !mysql_available_or_skip(&config) {
        return Ok(None);
    }
    Ok(Some(MySqlServer::launch(config)?))
}

#[cfg(test)]
mod tests {
    use std::{
        io,
        panic::{self, AssertUnwindSafe},
        path::PathBuf,
    };

    use mysqltest::HarnessConfig;
    use rstest::rstest;
    use tracing_test::traced_test;

    use super::{OrFatal, Panic, mysql_available_or_skip, start_server_or_skip};

    fn not_installed() -> HarnessConfig {
        HarnessConfig {
            init_binary: PathBuf::from("/nonexistent/mysql_install_db"),
            server_binary: PathBuf::from("/nonexistent/mysqld"),
            ..HarnessConfig::default()
        }
    }

    #[rstest]
    fn ok_values_pass_through() {
        let value: Result<u8, io::Error> = Ok(7);
        assert_eq!(value.or_fatal(&Panic), 7);
    }

    #[rstest]
    fn errors_abort_with_their_message() {
        let failing: Result<(), io::Error> = Err(io::Error::other("disk on fire"));
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| failing.or_fatal(&Panic)));
        let payload = outcome.expect_err("sink should panic");
        let message = payload
            .downcast_ref::<String>()
            .cloned()
            .unwrap_or_default();
        assert!(message.contains("disk on fire"), "{message}");
    }

    #[rstest]
    #[traced_test]
    fn missing_programs_log_the_skip() {
        assert!(!mysql_available_or_skip(&not_installed()));
        assert!(logs_contain("skipping test: mysqld is not installed"));
    }

    #[rstest]
    #[traced_test]
    fn launcher_skips_without_starting() {
        let started = start_server_or_skip(not_installed()).expect("skip is not an error");
        assert!(started.is_none());
        assert!(logs_contain("skipping test"));
    }
}
