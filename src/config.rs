//! Harness configuration.
//!
//! Values are layered with `figment`: built-in defaults, then an optional
//! `mysqltest.toml` in the working directory (with the `toml` feature), then
//! `MYSQLTEST_*` environment variables. Tests that need something unusual can
//! also build a [`HarnessConfig`] directly.

use std::{path::PathBuf, time::Duration};

use figment::{
    Figment,
    providers::{Env, Serialized},
};
#[cfg(feature = "toml")]
use figment::providers::Format as _;
use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

/// Prefix for environment overrides, e.g. `MYSQLTEST_SERVER_BINARY`.
pub const ENV_PREFIX: &str = "MYSQLTEST_";

/// Optional configuration file read from the working directory.
pub const CONFIG_FILE: &str = "mysqltest.toml";

/// How `start` decides that the server can take connections.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Readiness {
    /// Watch the server's stderr for [`HarnessConfig::ready_marker`].
    #[default]
    Marker,
    /// Retry connecting until the server stops refusing connections.
    Connect,
}

/// Settings shared by every instance started with them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Program that creates the system tables in a fresh data directory.
    pub init_binary: PathBuf,
    /// The server program.
    pub server_binary: PathBuf,
    /// Installation root passed as `--basedir`. When unset and
    /// `discover_basedir` is true it is read from the server's help output.
    pub basedir: Option<PathBuf>,
    /// Whether to look up the installation root when `basedir` is unset.
    pub discover_basedir: bool,
    /// Readiness strategy.
    pub readiness: Readiness,
    /// Byte sequence the server logs once it accepts connections.
    pub ready_marker: String,
    /// Upper bound on waiting for readiness. Unbounded when unset.
    pub startup_timeout_ms: Option<u64>,
    /// Pause between connection attempts while the server refuses them.
    pub retry_interval_ms: u64,
    /// Copy server output to this process's stdout and stderr.
    pub echo_output: bool,
    /// Leave the data directory behind after teardown.
    pub keep_data_dir: bool,
    /// Account used for connections.
    pub user: String,
    /// Prefix for data directory names under the system temp dir.
    pub data_dir_prefix: String,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            init_binary: PathBuf::from("mysql_install_db"),
            server_binary: PathBuf::from("mysqld"),
            basedir: None,
            discover_basedir: true,
            readiness: Readiness::Marker,
            ready_marker: "ready for connections".to_owned(),
            startup_timeout_ms: None,
            retry_interval_ms: 2,
            echo_output: false,
            keep_data_dir: false,
            user: "root".to_owned(),
            data_dir_prefix: "mysql-datadir-".to_owned(),
        }
    }
}

impl HarnessConfig {
    /// Loads defaults, the optional configuration file, and environment
    /// overrides, in that order of precedence (last wins).
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Config`] when a layer cannot be parsed into the
    /// expected types, or [`HarnessError::InvalidConfig`] when the result
    /// fails [`HarnessConfig::validate`].
    pub fn load() -> Result<Self> {
        let config: Self = Self::figment().extract()?;
        config.validate()?;
        Ok(config)
    }

    /// Rejects values that would make an instance misbehave instead of fail.
    /// A blank marker would match the first line the server logs.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::InvalidConfig`] naming the offending key.
    pub fn validate(&self) -> Result<()> {
        if self.readiness == Readiness::Marker && self.ready_marker.trim().is_empty() {
            return Err(HarnessError::InvalidConfig {
                key: "ready_marker",
                reason: "must not be blank when readiness = \"marker\"",
            });
        }
        Ok(())
    }

    /// The layered provider used by [`HarnessConfig::load`].
    #[must_use]
    pub fn figment() -> Figment {
        let figment = Figment::from(Serialized::defaults(Self::default()));
        #[cfg(feature = "toml")]
        let figment = figment.merge(figment::providers::Toml::file(CONFIG_FILE));
        figment.merge(Env::prefixed(ENV_PREFIX))
    }

    /// Configured startup bound, if any.
    #[must_use]
    pub fn startup_timeout(&self) -> Option<Duration> {
        self.startup_timeout_ms.map(Duration::from_millis)
    }

    /// Pause between connection attempts.
    #[must_use]
    pub const fn retry_interval(&self) -> Duration { Duration::from_millis(self.retry_interval_ms) }
}
