//! The disposable server handle.
//!
//! [`MySqlServer`] owns everything one instance needs: a leased loopback
//! port, a private data directory holding `my.cnf` and the socket, the
//! server process, and the thread draining its output. Teardown kills the
//! process and deletes the directory; it runs from [`MySqlServer::stop`] or,
//! failing that, on drop.

use std::{
    fs,
    io,
    path::{Path, PathBuf},
    process::Child,
    thread,
    time::Instant,
};

use mysql::Conn;
use tracing::{debug, info, warn};
use wait_timeout::ChildExt;

use crate::{
    basedir,
    config::{HarnessConfig, Readiness},
    connection,
    error::{HarnessError, ReadinessError, Result},
    mycnf::{self, ConfigValues},
    ports::{self, PortLease},
    readiness::OutputWatcher,
    supervisor::{self, Invocation},
};

/// Name of the socket file inside the data directory.
pub const SOCKET_NAME: &str = "socket";

/// Lifecycle of a [`MySqlServer`]. States are only ever entered in
/// declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum State {
    /// Port, directory, and defaults file exist; nothing has run yet.
    Unstarted,
    /// The initialization program is running.
    Initializing,
    /// The server process is running but not yet accepting connections.
    Starting,
    /// The server accepts connections.
    Ready,
    /// The process is gone and the directory deleted.
    Stopped,
}

/// A private `mysqld` instance.
#[derive(Debug)]
pub struct MySqlServer {
    config: HarnessConfig,
    port: u16,
    lease: Option<PortLease>,
    data_dir: PathBuf,
    socket: PathBuf,
    defaults_file: PathBuf,
    child: Option<Child>,
    output: Option<OutputWatcher>,
    state: State,
}

impl MySqlServer {
    /// Provisions an instance without starting anything: leases a port,
    /// creates the data directory, and writes `my.cnf` into it.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::InvalidConfig`], [`HarnessError::PortAllocation`],
    /// [`HarnessError::DataDir`], or [`HarnessError::ConfigRender`]. Nothing is
    /// left behind on failure.
    pub fn new(config: HarnessConfig) -> Result<Self> {
        config.validate()?;
        let lease = ports::allocate().map_err(HarnessError::PortAllocation)?;
        let data_dir = tempfile::Builder::new()
            .prefix(&config.data_dir_prefix)
            .tempdir()
            .map_err(HarnessError::DataDir)?
            .keep();
        let socket = data_dir.join(SOCKET_NAME);
        let server = Self {
            config,
            port: lease.port(),
            lease: Some(lease),
            defaults_file: data_dir.join(mycnf::FILE_NAME),
            data_dir,
            socket,
            child: None,
            output: None,
            state: State::Unstarted,
        };
        mycnf::render(&server.defaults_file, &ConfigValues {
            data_dir: &server.data_dir,
            port: server.port,
            socket: &server.socket,
        })?;
        debug!(port = server.port, data_dir = %server.data_dir.display(), "provisioned instance");
        Ok(server)
    }

    /// Provisions and starts an instance, returning once it accepts
    /// connections.
    ///
    /// # Errors
    ///
    /// Any error from [`MySqlServer::new`] or [`MySqlServer::start`].
    pub fn launch(config: HarnessConfig) -> Result<Self> {
        let mut server = Self::new(config)?;
        server.start()?;
        Ok(server)
    }

    /// [`MySqlServer::launch`] with configuration from
    /// [`HarnessConfig::load`].
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::Config`] or any launch error.
    pub fn launch_default() -> Result<Self> { Self::launch(HarnessConfig::load()?) }

    /// Launches an instance, creates database `name`, and returns a
    /// connection to it.
    ///
    /// # Errors
    ///
    /// Any launch error, or [`HarnessError::Connection`] when the database
    /// cannot be created or connected to.
    pub fn launch_with_database(config: HarnessConfig, name: &str) -> Result<(Self, Conn)> {
        let server = Self::launch(config)?;
        server.create_database(name)?;
        let conn = server.connect(name)?;
        Ok((server, conn))
    }

    /// Runs the initialization program, spawns the server, and waits until
    /// it is ready. On failure the instance is torn down before the error
    /// is returned.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::InvalidState`] unless the instance is
    /// [`State::Unstarted`]; otherwise any environment, initialization,
    /// start, readiness, or (with [`Readiness::Connect`]) connection error.
    pub fn start(&mut self) -> Result<()> {
        if self.state != State::Unstarted {
            return Err(self.invalid("start"));
        }
        let result = self.boot();
        if let Err(e) = &result {
            warn!(port = self.port, error = %e, "server failed to start");
            self.stop();
        }
        result
    }

    fn boot(&mut self) -> Result<()> {
        let basedir = self.resolve_basedir()?;
        let defaults_file = self.defaults_file.clone();
        let invocation = Invocation {
            defaults_file: &defaults_file,
            basedir: basedir.as_deref(),
            echo: self.config.echo_output,
        };

        self.state = State::Initializing;
        supervisor::initialize(&self.config.init_binary, &invocation)?;

        info!(port = self.port, data_dir = %self.data_dir.display(), "launching server");
        let mut child = supervisor::start(&self.config.server_binary, &invocation)?;
        let stderr = child.stderr.take();
        self.child = Some(child);
        self.state = State::Starting;

        let marker = match self.config.readiness {
            Readiness::Marker => Some(self.config.ready_marker.clone().into_bytes()),
            Readiness::Connect => None,
        };
        if let Some(stream) = stderr {
            let watcher = OutputWatcher::spawn(stream, marker, self.config.echo_output)
                .map_err(|source| HarnessError::Start {
                    program: self.config.server_binary.clone(),
                    source,
                })?;
            self.output = Some(watcher);
        }

        match self.config.readiness {
            Readiness::Marker => {
                let timeout = self.config.startup_timeout();
                self.output
                    .as_mut()
                    .ok_or_else(|| ReadinessError::StreamClosed { tail: Vec::new() })?
                    .wait(timeout)?;
            }
            Readiness::Connect => self.await_connections()?,
        }

        self.state = State::Ready;
        info!(port = self.port, "server ready");
        Ok(())
    }

    fn resolve_basedir(&self) -> Result<Option<PathBuf>> {
        if let Some(dir) = &self.config.basedir {
            return Ok(Some(dir.clone()));
        }
        if !self.config.discover_basedir {
            return Ok(None);
        }
        Ok(Some(basedir::cached(&self.config.server_binary)?))
    }

    /// Retries connecting until the server stops refusing, watching for the
    /// process dying and for the startup bound in between attempts.
    fn await_connections(&mut self) -> Result<()> {
        let url = self.url("");
        let interval = self.config.retry_interval();
        let timeout = self.config.startup_timeout();
        let deadline = timeout.map(|after| (after, Instant::now() + after));
        let program = self.config.server_binary.clone();
        let tail = || self.output.as_ref().map(OutputWatcher::tail).unwrap_or_default();
        let Some(child) = self.child.as_mut() else {
            return Err(ReadinessError::StreamClosed { tail: tail() }.into());
        };
        let conn = connection::connect_with_retry(&url, || {
            if let Some((after, at)) = deadline {
                if Instant::now() >= at {
                    return Err(ReadinessError::TimedOut { after, tail: tail() }.into());
                }
            }
            match child.wait_timeout(interval) {
                Ok(None) => Ok(()),
                Ok(Some(status)) => Err(ReadinessError::Exited { status }.into()),
                Err(source) => Err(HarnessError::Start {
                    program: program.clone(),
                    source,
                }),
            }
        })?;
        drop(conn);
        Ok(())
    }

    /// Kills the server and deletes the data directory. Safe to call at
    /// any point, including after a failed start and more than once.
    pub fn stop(&mut self) {
        if self.state == State::Stopped {
            return;
        }
        if let Some(mut child) = self.child.take() {
            supervisor::terminate(&mut child);
        }
        self.output = None;
        self.remove_data_dir();
        self.lease = None;
        self.state = State::Stopped;
        debug!(port = self.port, "server stopped");
    }

    fn remove_data_dir(&self) {
        if self.config.keep_data_dir {
            info!(data_dir = %self.data_dir.display(), "keeping data directory");
            return;
        }
        match fs::remove_dir_all(&self.data_dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(data_dir = %self.data_dir.display(), error = %e, "could not remove data directory"),
        }
    }

    /// Port the server listens on.
    #[must_use]
    pub const fn port(&self) -> u16 { self.port }

    /// Private data directory.
    #[must_use]
    pub fn data_dir(&self) -> &Path { &self.data_dir }

    /// Local socket path.
    #[must_use]
    pub fn socket(&self) -> &Path { &self.socket }

    /// Rendered `my.cnf`.
    #[must_use]
    pub fn defaults_file(&self) -> &Path { &self.defaults_file }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> State { self.state }

    /// Process id while the server process is running.
    #[must_use]
    pub fn pid(&self) -> Option<u32> { self.child.as_ref().map(Child::id) }

    /// Lines most recently written by the server to stderr.
    #[must_use]
    pub fn recent_output(&self) -> Vec<String> {
        self.output
            .as_ref()
            .map(OutputWatcher::tail)
            .unwrap_or_default()
    }

    /// `user@tcp(127.0.0.1:port)/suffix`, where the suffix has the form
    /// `dbname?param=value`.
    #[must_use]
    pub fn dsn(&self, suffix: &str) -> String {
        connection::dsn(&self.config.user, self.port, suffix)
    }

    /// `mysql://user@127.0.0.1:port/suffix` for the `mysql` crate.
    #[must_use]
    pub fn url(&self, suffix: &str) -> String {
        connection::url(&self.config.user, self.port, suffix)
    }

    /// Opens a connection with a single attempt.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::InvalidState`] unless the server is
    /// [`State::Ready`], or [`HarnessError::Connection`].
    pub fn connect(&self, suffix: &str) -> Result<Conn> {
        self.ensure_ready("connect to")?;
        connection::connect(&self.url(suffix))
    }

    /// Opens a connection, retrying for as long as it is refused.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::InvalidState`] once the server is stopped or
    /// before it was started, or the first non-transient connection error.
    pub fn connect_with_retry(&self, suffix: &str) -> Result<Conn> {
        if !matches!(self.state, State::Starting | State::Ready) {
            return Err(self.invalid("connect to"));
        }
        let interval = self.config.retry_interval();
        connection::connect_with_retry(&self.url(suffix), || {
            thread::sleep(interval);
            Ok(())
        })
    }

    /// Creates database `name`.
    ///
    /// # Errors
    ///
    /// Returns [`HarnessError::InvalidState`] unless the server is
    /// [`State::Ready`], or [`HarnessError::Connection`].
    pub fn create_database(&self, name: &str) -> Result<()> {
        let mut conn = self.connect("")?;
        connection::create_database(&mut conn, name)
    }

    fn ensure_ready(&self, operation: &'static str) -> Result<()> {
        if self.state == State::Ready {
            Ok(())
        } else {
            Err(self.invalid(operation))
        }
    }

    const fn invalid(&self, operation: &'static str) -> HarnessError {
        HarnessError::InvalidState {
            operation,
            state: self.state,
        }
    }
}

impl Drop for MySqlServer {
    fn drop(&mut self) { self.stop(); }
}
