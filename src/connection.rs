//! Connection strings and client connections.
//!
//! Two string forms are produced: the `user@tcp(host:port)/suffix` DSN that
//! other tooling expects, and the `mysql://` URL understood by the `mysql`
//! crate. In both, the suffix is `dbname` optionally followed by
//! `?param=value` pairs.

use mysql::{Conn, Opts, OptsBuilder, prelude::Queryable};
use tracing::trace;

use crate::error::{HarnessError, Result, is_refused};

/// Loopback address every instance listens on.
pub const HOST: &str = "127.0.0.1";

const PING: &str = "/* ping */ SELECT 1";

/// Formats `user@tcp(127.0.0.1:port)/suffix`.
#[must_use]
pub fn dsn(user: &str, port: u16, suffix: &str) -> String {
    format!("{user}@tcp({HOST}:{port})/{suffix}")
}

/// Formats `mysql://user@127.0.0.1:port/suffix`.
#[must_use]
pub fn url(user: &str, port: u16, suffix: &str) -> String {
    if suffix.is_empty() {
        format!("mysql://{user}@{HOST}:{port}")
    } else {
        format!("mysql://{user}@{HOST}:{port}/{suffix}")
    }
}

/// Opens a connection over TCP and checks it with a trivial query.
///
/// # Errors
///
/// Returns [`HarnessError::Connection`] when the URL is invalid, the
/// connection fails, or the ping query fails.
pub fn connect(url: &str) -> Result<Conn> {
    let opts = OptsBuilder::from_opts(Opts::from_url(url).map_err(mysql::Error::from)?)
        .prefer_socket(false);
    let mut conn = Conn::new(opts)?;
    conn.query_drop(PING)?;
    Ok(conn)
}

/// Calls [`connect`] until it stops failing with a refused connection.
///
/// `pause` runs between attempts; it normally sleeps, and may return an
/// error to give up (for instance when the server process has died).
///
/// # Errors
///
/// Returns the first error that is not a refused connection, or the error
/// returned by `pause`.
pub fn connect_with_retry<F>(url: &str, mut pause: F) -> Result<Conn>
where
    F: FnMut() -> Result<()>,
{
    let mut attempts: u64 = 0;
    loop {
        attempts += 1;
        match connect(url) {
            Ok(conn) => {
                trace!(attempts, "connection accepted");
                return Ok(conn);
            }
            Err(HarnessError::Connection(err)) if is_refused(&err) => pause()?,
            Err(err) => return Err(err),
        }
    }
}

/// Quotes `name` as a MySQL identifier.
pub(crate) fn quote_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Creates database `name` on the connection.
///
/// # Errors
///
/// Returns [`HarnessError::Connection`] when the statement fails.
pub fn create_database(conn: &mut Conn, name: &str) -> Result<()> {
    conn.query_drop(format!("CREATE DATABASE {}", quote_identifier(name)))?;
    Ok(())
}
