//! Discovery of the server's installation root.
//!
//! Some initialization programs need `--basedir` to find their support
//! files. The value is the same for every instance started from the same
//! server binary, so it is looked up once per binary from
//! `mysqld --verbose --help` and cached for the process, errors included.

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    process::{Command, Stdio},
    sync::{Mutex, PoisonError},
};

use tracing::{debug, warn};

use crate::error::EnvironmentError;

type Lookup = Result<PathBuf, EnvironmentError>;

static BASEDIRS: Mutex<BTreeMap<PathBuf, Lookup>> = Mutex::new(BTreeMap::new());

/// Returns the cached installation root for `server_binary`, running
/// [`discover`] on first use.
///
/// The lock is held across the lookup, so concurrent first callers block
/// until a single lookup finishes and then share its result.
///
/// # Errors
///
/// Returns the (cached) [`EnvironmentError`] from the first lookup.
pub fn cached(server_binary: &Path) -> Result<PathBuf, EnvironmentError> {
    let mut cache = BASEDIRS.lock().unwrap_or_else(PoisonError::into_inner);
    cache
        .entry(server_binary.to_path_buf())
        .or_insert_with(|| discover(server_binary))
        .clone()
}

/// Runs `<server_binary> --verbose --help` and extracts the `basedir` value.
///
/// # Errors
///
/// Returns [`EnvironmentError::BinaryMissing`] when the program cannot be
/// executed and [`EnvironmentError::BaseDirNotFound`] when its output has no
/// `basedir` line.
pub fn discover(server_binary: &Path) -> Result<PathBuf, EnvironmentError> {
    let output = Command::new(server_binary)
        .args(["--verbose", "--help"])
        .stdin(Stdio::null())
        .output()
        .map_err(|e| {
            warn!(binary = %server_binary.display(), error = %e, "cannot run server binary");
            EnvironmentError::BinaryMissing {
                binary: server_binary.to_path_buf(),
                reason: e.to_string(),
            }
        })?;
    let text = String::from_utf8_lossy(&output.stdout);
    let basedir = parse(&text).ok_or_else(|| EnvironmentError::BaseDirNotFound {
        binary: server_binary.to_path_buf(),
    })?;
    debug!(basedir = %basedir.display(), "discovered server basedir");
    Ok(basedir)
}

/// Finds the `basedir  <path>` row of the variables table printed by
/// `--verbose --help`.
fn parse(help: &str) -> Option<PathBuf> {
    help.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        if fields.next() != Some("basedir") {
            return None;
        }
        fields.last().map(PathBuf::from)
    })
}
