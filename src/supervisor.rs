//! Launching and stopping the external programs.
//!
//! Startup has two phases: the initialization program runs to completion
//! with its output captured, then the server is spawned with stderr piped so
//! the readiness watcher can drain it.

use std::{
    ffi::OsString,
    io::{self, Write},
    path::Path,
    process::{Child, Command, Stdio},
};

use tracing::{debug, info, warn};

use crate::error::{HarnessError, Result};

/// Arguments shared by the initialization and server programs.
#[derive(Debug, Clone, Copy)]
pub struct Invocation<'a> {
    /// Rendered defaults file.
    pub defaults_file: &'a Path,
    /// Installation root, when one is passed.
    pub basedir: Option<&'a Path>,
    /// Copy program output to this process's stdout and stderr.
    pub echo: bool,
}

impl Invocation<'_> {
    fn args(&self) -> Vec<OsString> {
        let mut defaults = OsString::from("--defaults-file=");
        defaults.push(self.defaults_file);
        let mut args = vec![defaults];
        if let Some(dir) = self.basedir {
            args.push(OsString::from("--basedir"));
            args.push(dir.as_os_str().to_owned());
        }
        args
    }

    fn command(&self, program: &Path) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(self.args()).stdin(Stdio::null());
        cmd
    }
}

/// Runs the initialization program and waits for it to exit.
///
/// # Errors
///
/// Returns [`HarnessError::Spawn`] when the program cannot be started and
/// [`HarnessError::Initialization`], carrying stdout followed by stderr, when
/// it exits unsuccessfully.
pub fn initialize(program: &Path, invocation: &Invocation<'_>) -> Result<()> {
    debug!(program = %program.display(), "running initialization program");
    let output = invocation
        .command(program)
        .output()
        .map_err(|source| HarnessError::Spawn {
            program: program.to_path_buf(),
            source,
        })?;
    if invocation.echo {
        echo(&output.stdout, &output.stderr);
    }
    if output.status.success() {
        return Ok(());
    }
    let mut combined = output.stdout;
    combined.extend_from_slice(&output.stderr);
    warn!(program = %program.display(), status = %output.status, "initialization failed");
    Err(HarnessError::Initialization {
        program: program.to_path_buf(),
        status: output.status,
        output: String::from_utf8_lossy(&combined).into_owned(),
    })
}

fn echo(stdout: &[u8], stderr: &[u8]) {
    if io::stdout().write_all(stdout).is_err() || io::stderr().write_all(stderr).is_err() {
        debug!("could not echo initialization output");
    }
}

/// Spawns the server program with stderr piped and returns immediately.
///
/// # Errors
///
/// Returns [`HarnessError::Start`] when the program cannot be spawned.
pub fn start(program: &Path, invocation: &Invocation<'_>) -> Result<Child> {
    let stdout = if invocation.echo {
        Stdio::inherit()
    } else {
        Stdio::null()
    };
    let child = invocation
        .command(program)
        .stdout(stdout)
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|source| HarnessError::Start {
            program: program.to_path_buf(),
            source,
        })?;
    info!(program = %program.display(), pid = child.id(), "server process spawned");
    Ok(child)
}

/// Kills the server without a graceful shutdown and reaps it. Failures are
/// logged and ignored.
pub fn terminate(child: &mut Child) {
    let pid = child.id();
    match kill_unless_exited(child) {
        Ok(true) => debug!(pid, "sent SIGKILL to server process"),
        Ok(false) => debug!(pid, "server process had already exited"),
        Err(e) => debug!(pid, error = %e, "kill failed"),
    }
    match child.wait() {
        Ok(status) => debug!(pid, %status, "server process reaped"),
        Err(e) => debug!(pid, error = %e, "could not reap server process"),
    }
}

/// Sends SIGKILL unless the child has already been reaped, in which case its
/// pid may belong to another process by now. Returns whether a signal was
/// sent.
fn kill_unless_exited(child: &mut Child) -> io::Result<bool> {
    if child.try_wait()?.is_some() {
        return Ok(false);
    }
    child.kill()?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::{ffi::OsString, path::Path};

    use rstest::rstest;

    use super::Invocation;
    #[cfg(unix)]
    use super::{kill_unless_exited, terminate};

    #[rstest]
    fn defaults_file_comes_first() {
        let inv = Invocation {
            defaults_file: Path::new("/tmp/d/my.cnf"),
            basedir: Some(Path::new("/usr")),
            echo: false,
        };
        assert_eq!(
            inv.args(),
            vec![
                OsString::from("--defaults-file=/tmp/d/my.cnf"),
                OsString::from("--basedir"),
                OsString::from("/usr"),
            ]
        );
    }

    #[rstest]
    fn basedir_is_optional() {
        let inv = Invocation {
            defaults_file: Path::new("my.cnf"),
            basedir: None,
            echo: false,
        };
        assert_eq!(inv.args(), vec![OsString::from("--defaults-file=my.cnf")]);
    }

    #[cfg(unix)]
    #[rstest]
    fn reaped_child_is_not_signalled() {
        let mut child = std::process::Command::new("true")
            .spawn()
            .expect("true should spawn");
        child.wait().expect("true should exit");
        assert!(!kill_unless_exited(&mut child).expect("reaped child is not an error"));
        terminate(&mut child);
    }

    #[cfg(unix)]
    #[rstest]
    fn running_child_is_killed_and_reaped() {
        use std::os::unix::process::ExitStatusExt;

        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("sleep should spawn");
        terminate(&mut child);
        let status = child
            .try_wait()
            .expect("status should be readable")
            .expect("child should have been reaped");
        assert_eq!(status.signal(), Some(9));
    }
}
