//! Scripted stand-ins for `mysql_install_db` and `mysqld`.
//!
//! The scripts log their arguments into the fake's directory and then act
//! out a chosen behaviour, which lets the lifecycle be exercised on machines
//! without MySQL. They also answer `--verbose --help` with a `basedir` row.

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use mysqltest::HarnessConfig;
use nix::{sys::signal::kill, unistd::Pid};
use tempfile::TempDir;

use crate::AnyError;

/// How the fake initialization program ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InitBehaviour {
    /// Exit 0.
    Succeed,
    /// Print `message` to stderr and exit with `code`.
    Fail {
        /// Exit code.
        code: i32,
        /// Diagnostic printed before exiting.
        message: String,
    },
}

/// What the fake server does after it starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerBehaviour {
    /// Log the readiness marker, then idle until killed.
    Ready,
    /// Log `lines` filler lines before the marker, enough to overflow a
    /// pipe buffer that nobody drains.
    ReadyAfterNoise {
        /// Number of filler lines.
        lines: u32,
    },
    /// Idle without ever logging the marker.
    Silent,
    /// Log an error and exit 1.
    Crash,
}

/// A directory holding the two fake programs.
#[derive(Debug)]
pub struct FakeMysql {
    dir: TempDir,
}

const INIT_NAME: &str = "mysql_install_db";
const SERVER_NAME: &str = "mysqld";
const INIT_LOG: &str = "init.log";
const SERVER_LOG: &str = "server.log";
const HELP_LOG: &str = "help.log";

impl FakeMysql {
    /// Writes fake programs with the given behaviours.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory or scripts cannot be created.
    pub fn new(init: &InitBehaviour, server: &ServerBehaviour) -> Result<Self, AnyError> {
        let dir = tempfile::Builder::new().prefix("fake-mysql-").tempdir()?;
        let fake = Self { dir };
        fake.write_script(INIT_NAME, &fake.init_script(init))?;
        fake.write_script(SERVER_NAME, &fake.server_script(server))?;
        Ok(fake)
    }

    /// Fakes that initialize and start successfully.
    ///
    /// # Errors
    ///
    /// Returns an error if the scripts cannot be written.
    pub fn healthy() -> Result<Self, AnyError> {
        Self::new(&InitBehaviour::Succeed, &ServerBehaviour::Ready)
    }

    /// Configuration pointing at the fakes, with basedir discovery off and
    /// a generous startup bound so a broken test fails instead of hanging.
    #[must_use]
    pub fn config(&self) -> HarnessConfig {
        HarnessConfig {
            init_binary: self.init_binary(),
            server_binary: self.server_binary(),
            basedir: None,
            discover_basedir: false,
            startup_timeout_ms: Some(30_000),
            ..HarnessConfig::default()
        }
    }

    /// Path of the fake initialization program.
    #[must_use]
    pub fn init_binary(&self) -> PathBuf { self.dir.path().join(INIT_NAME) }

    /// Path of the fake server program.
    #[must_use]
    pub fn server_binary(&self) -> PathBuf { self.dir.path().join(SERVER_NAME) }

    /// The basedir the fake server reports.
    #[must_use]
    pub fn basedir(&self) -> &Path { self.dir.path() }

    /// Argument lines the initialization program was invoked with.
    #[must_use]
    pub fn init_invocations(&self) -> Vec<String> { self.read_log(INIT_LOG) }

    /// Argument lines the server program was started with (help queries
    /// excluded).
    #[must_use]
    pub fn server_invocations(&self) -> Vec<String> { self.read_log(SERVER_LOG) }

    /// Argument lines of `--verbose --help` queries made to the server.
    #[must_use]
    pub fn help_invocations(&self) -> Vec<String> { self.read_log(HELP_LOG) }

    fn read_log(&self, name: &str) -> Vec<String> {
        fs::read_to_string(self.dir.path().join(name))
            .map(|text| text.lines().map(ToOwned::to_owned).collect())
            .unwrap_or_default()
    }

    fn init_script(&self, behaviour: &InitBehaviour) -> String {
        let mut script = self.preamble(INIT_LOG);
        match behaviour {
            InitBehaviour::Succeed => script.push_str("echo \"fake install: done\"\nexit 0\n"),
            InitBehaviour::Fail { code, message } => {
                script.push_str(&format!("echo '{message}' >&2\nexit {code}\n"));
            }
        }
        script
    }

    fn server_script(&self, behaviour: &ServerBehaviour) -> String {
        let mut script = String::from("#!/bin/sh\n");
        script.push_str(&format!(
            "case \"$1\" in --verbose|--help)\n  echo \"$@\" >> '{}'\n  echo 'basedir                           {}'\n  exit 0;;\nesac\n",
            self.dir.path().join(HELP_LOG).display(),
            self.dir.path().display()
        ));
        script.push_str(&self.preamble(SERVER_LOG).replacen("#!/bin/sh\n", "", 1));
        script.push_str("echo '[Note] fake mysqld: starting' >&2\n");
        match behaviour {
            ServerBehaviour::Ready => script.push_str(READY),
            ServerBehaviour::ReadyAfterNoise { lines } => {
                script.push_str(&format!(
                    "i=0\nwhile [ $i -lt {lines} ]; do\n  echo \"[Note] filler line $i of startup chatter\" >&2\n  i=$((i+1))\ndone\n"
                ));
                script.push_str(READY);
            }
            ServerBehaviour::Silent => script.push_str("exec sleep 600\n"),
            ServerBehaviour::Crash => {
                script.push_str("echo '[ERROR] fake mysqld: Aborting' >&2\nexit 1\n");
            }
        }
        script
    }

    fn preamble(&self, log: &str) -> String {
        format!(
            "#!/bin/sh\necho \"$@\" >> '{}'\n",
            self.dir.path().join(log).display()
        )
    }

    fn write_script(&self, name: &str, body: &str) -> Result<(), AnyError> {
        let path = self.dir.path().join(name);
        fs::write(&path, body)?;
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;
        Ok(())
    }
}

const READY: &str = "echo '[Note] fake mysqld: ready for connections.' >&2\nexec sleep 600\n";

/// Returns `true` while a process with `pid` exists.
#[must_use]
pub fn process_alive(pid: u32) -> bool {
    i32::try_from(pid).is_ok_and(|raw| kill(Pid::from_raw(raw), None).is_ok())
}
