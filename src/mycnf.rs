//! Rendering of the per-instance defaults file.
//!
//! The tuning values keep each server small enough that a test suite can run
//! many of them side by side. Options that newer releases of the server no
//! longer recognise carry the `loose-` prefix, which makes the server skip
//! them with a warning instead of refusing to start.

use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
};

use tracing::debug;

use crate::error::{HarnessError, Result};

/// File name of the defaults file inside the data directory.
pub const FILE_NAME: &str = "my.cnf";

const TUNING: &[(&str, &str)] = &[
    ("bind-address", "127.0.0.1"),
    ("innodb-buffer-pool-size", "5M"),
    ("innodb-buffer-pool-stats", "0"),
    ("innodb-log-file-size", "1M"),
    ("innodb-read-io-threads", "2"),
    ("loose-innodb_additional_mem_pool_size", "1M"),
    ("loose-innodb_mirrored_log_groups", "1"),
    ("key_buffer_size", "16K"),
    ("max-binlog-size", "256K"),
    ("max-delayed-threads", "5"),
    ("max_allowed_packet", "256K"),
    ("net_buffer_length", "2K"),
    ("sort_buffer_size", "32K"),
    ("sql_mode", "''"),
    ("loose-table_cache", "2"),
    ("thread_cache_size", "2"),
    ("thread_stack", "128K"),
];

/// Instance-specific values substituted into the template.
#[derive(Debug, Clone, Copy)]
pub struct ConfigValues<'a> {
    /// Server data directory.
    pub data_dir: &'a Path,
    /// TCP port to listen on.
    pub port: u16,
    /// Local socket path.
    pub socket: &'a Path,
}

/// Writes the defaults file for `values` to `path`, normally
/// [`FILE_NAME`] inside the data directory.
///
/// # Errors
///
/// Returns [`HarnessError::ConfigRender`] when the file cannot be created or
/// written.
pub fn render(path: &Path, values: &ConfigValues<'_>) -> Result<()> {
    write_file(path, values).map_err(|source| HarnessError::ConfigRender {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(path = %path.display(), port = values.port, "wrote defaults file");
    Ok(())
}

fn write_file(path: &Path, values: &ConfigValues<'_>) -> io::Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    write_section(&mut out, values)?;
    out.into_inner().map_err(io::IntoInnerError::into_error)?.sync_all()
}

fn write_section(out: &mut impl Write, values: &ConfigValues<'_>) -> io::Result<()> {
    writeln!(out, "[mysqld]")?;
    write_entry(out, "datadir", values.data_dir.display())?;
    write_entry(out, "port", values.port)?;
    write_entry(out, "socket", values.socket.display())?;
    for (key, value) in TUNING {
        write_entry(out, key, value)?;
    }
    Ok(())
}

fn write_entry(out: &mut impl Write, key: &str, value: impl std::fmt::Display) -> io::Result<()> {
    writeln!(out, "{key:<39} = {value}")
}
