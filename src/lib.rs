//! Disposable `mysqld` instances for integration tests.
//!
//! Each [`MySqlServer`] gets its own loopback port and a private data
//! directory, runs the initialization program and then the server, and
//! returns once the server reports that it accepts connections. Stopping an
//! instance (or dropping it) kills the process and deletes the directory, so
//! tests running in parallel never share state.
//!
//! Everything here returns [`HarnessError`]; the `test-util` crate layers
//! abort-on-failure helpers and `rstest` fixtures on top.
//!
//! ```no_run
//! use mysqltest::mysql::prelude::Queryable;
//! use mysqltest::{HarnessConfig, MySqlServer};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let (mut server, mut conn) = MySqlServer::launch_with_database(HarnessConfig::load()?, "metadb")?;
//! conn.query_drop("CREATE TABLE t (id INT)")?;
//! server.stop();
//! # Ok(())
//! # }
//! ```

pub mod basedir;
pub mod config;
pub mod connection;
pub mod error;
pub mod mycnf;
pub mod ports;
pub mod readiness;
pub mod server;
pub mod supervisor;

pub use config::{HarnessConfig, Readiness};
pub use error::{EnvironmentError, HarnessError, ReadinessError, Result};
pub use mysql;
pub use server::{MySqlServer, State};
