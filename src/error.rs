//! Error types returned by the harness.
//!
//! Every fallible operation in the crate reports a [`HarnessError`]. The
//! variants follow the lifecycle: environment problems are process-wide and
//! cached, provisioning and launch problems are fatal to a single instance,
//! and connection problems distinguish a refused connection (transient while
//! the server boots) from everything else.

use std::{io, path::PathBuf, process::ExitStatus, time::Duration};

use thiserror::Error;

use crate::server::State;

/// Convenience alias for results produced by this crate.
pub type Result<T, E = HarnessError> = std::result::Result<T, E>;

/// Failure to resolve the server installation.
///
/// These are cached for the lifetime of the process by
/// [`basedir::cached`](crate::basedir::cached), so the type is `Clone`.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnvironmentError {
    /// The server binary could not be executed.
    #[error("cannot run `{binary}`: {reason}")]
    BinaryMissing {
        /// Program that was invoked.
        binary: PathBuf,
        /// Rendered I/O error.
        reason: String,
    },
    /// The `--verbose --help` output carried no `basedir` line.
    #[error("`{binary} --verbose --help` did not report a basedir")]
    BaseDirNotFound {
        /// Program that was invoked.
        binary: PathBuf,
    },
}

/// The server never announced that it accepts connections.
#[derive(Debug, Error)]
pub enum ReadinessError {
    /// The diagnostic stream reached EOF before the marker appeared, which
    /// means the server exited during startup.
    #[error("server output closed before it became ready; last lines: {tail:?}")]
    StreamClosed {
        /// Most recent diagnostic lines, oldest first.
        tail: Vec<String>,
    },
    /// A startup timeout was configured and elapsed.
    #[error("server not ready after {after:?}; last lines: {tail:?}")]
    TimedOut {
        /// Configured bound.
        after: Duration,
        /// Most recent diagnostic lines, oldest first.
        tail: Vec<String>,
    },
    /// The server process exited while connections were being retried.
    #[error("server exited before accepting connections ({status})")]
    Exited {
        /// Exit status reported by the OS.
        status: ExitStatus,
    },
}

/// Errors raised while provisioning, starting, or talking to an instance.
#[derive(Debug, Error)]
pub enum HarnessError {
    /// The server installation could not be resolved.
    #[error(transparent)]
    Environment(#[from] EnvironmentError),
    /// No free loopback port could be reserved.
    #[error("allocating a free port: {0}")]
    PortAllocation(#[source] io::Error),
    /// The private data directory could not be created.
    #[error("creating data directory: {0}")]
    DataDir(#[source] io::Error),
    /// The defaults file could not be written.
    #[error("writing {path}: {source}")]
    ConfigRender {
        /// Destination of the defaults file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// A helper program could not be spawned.
    #[error("spawning `{program}`: {source}")]
    Spawn {
        /// Program that failed to spawn.
        program: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The initialization program exited unsuccessfully.
    #[error("`{program}` failed ({status}):\n{output}")]
    Initialization {
        /// Initialization program.
        program: PathBuf,
        /// Exit status it reported.
        status: ExitStatus,
        /// Combined stdout and stderr.
        output: String,
    },
    /// The server program could not be spawned.
    #[error("starting `{program}`: {source}")]
    Start {
        /// Server program.
        program: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },
    /// The server did not reach the ready state.
    #[error(transparent)]
    Readiness(#[from] ReadinessError),
    /// Opening or using a client connection failed.
    #[error("connecting to mysqld: {0}")]
    Connection(#[source] Box<mysql::Error>),
    /// Harness configuration could not be loaded.
    #[error("loading harness configuration: {0}")]
    Config(#[source] Box<figment::Error>),
    /// A configuration value is unusable.
    #[error("invalid configuration: `{key}` {reason}")]
    InvalidConfig {
        /// Offending key.
        key: &'static str,
        /// What is wrong with it.
        reason: &'static str,
    },
    /// The operation is not allowed in the instance's current state.
    #[error("cannot {operation} a server in state {state:?}")]
    InvalidState {
        /// Attempted operation.
        operation: &'static str,
        /// State at the time of the attempt.
        state: State,
    },
}

impl From<mysql::Error> for HarnessError {
    fn from(value: mysql::Error) -> Self { Self::Connection(Box::new(value)) }
}

impl From<figment::Error> for HarnessError {
    fn from(value: figment::Error) -> Self { Self::Config(Box::new(value)) }
}

impl HarnessError {
    /// Returns `true` when the error is a refused TCP connection, the one
    /// condition worth retrying while the server is still booting.
    #[must_use]
    pub fn is_connection_refused(&self) -> bool {
        match self {
            Self::Connection(err) => is_refused(err),
            _ => false,
        }
    }
}

/// The driver reports a refused TCP connect either as a raw I/O error or
/// wrapped in `CouldNotConnect`, depending on where the connect failed.
pub(crate) fn is_refused(err: &mysql::Error) -> bool {
    match err {
        mysql::Error::IoError(io) => io.kind() == io::ErrorKind::ConnectionRefused,
        mysql::Error::DriverError(mysql::DriverError::CouldNotConnect(Some((_, _, kind)))) => {
            *kind == io::ErrorKind::ConnectionRefused
        }
        _ => false,
    }
}
