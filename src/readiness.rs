//! Readiness detection from the server's diagnostic stream.
//!
//! A background thread owns the stream for the lifetime of the process and
//! keeps draining it, so the server can never stall on a full pipe. The
//! first line containing the marker fires a one-shot signal; EOF before that
//! closes the channel, which [`OutputWatcher::wait`] reports as a startup
//! failure together with the last lines the server printed.

use std::{
    collections::VecDeque,
    io::{self, BufRead, BufReader, Read, Write},
    sync::{
        Arc,
        Mutex,
        PoisonError,
        mpsc::{self, Receiver, RecvTimeoutError, Sender},
    },
    thread,
    time::Duration,
};

use tracing::{debug, trace};

use crate::error::ReadinessError;

/// Number of trailing lines kept for diagnostics.
const TAIL_LINES: usize = 50;

type Tail = Arc<Mutex<VecDeque<String>>>;

/// Drains a child's output stream on a dedicated thread and watches it for
/// a marker.
#[derive(Debug)]
pub struct OutputWatcher {
    ready: Receiver<()>,
    seen: bool,
    tail: Tail,
}

impl OutputWatcher {
    /// Starts draining `stream`. With `marker` set, [`wait`](Self::wait)
    /// returns once a line containing it has been read; without a marker the
    /// stream is only drained. `echo` copies every line to this process's
    /// stderr.
    ///
    /// # Errors
    ///
    /// Returns an error when the drain thread cannot be spawned.
    pub fn spawn<R>(stream: R, marker: Option<Vec<u8>>, echo: bool) -> io::Result<Self>
    where
        R: Read + Send + 'static,
    {
        let (tx, ready) = mpsc::channel();
        let tail = Tail::default();
        let pump = Pump {
            marker,
            echo,
            ready: Some(tx),
            tail: Arc::clone(&tail),
        };
        thread::Builder::new()
            .name("mysqld-output".to_owned())
            .spawn(move || pump.run(stream))?;
        Ok(Self {
            ready,
            seen: false,
            tail,
        })
    }

    /// Blocks until the marker is seen, the stream closes, or `timeout`
    /// elapses. Returns immediately once the marker has been seen.
    ///
    /// # Errors
    ///
    /// Returns [`ReadinessError::StreamClosed`] when the stream ends first and
    /// [`ReadinessError::TimedOut`] when the bound elapses first.
    pub fn wait(&mut self, timeout: Option<Duration>) -> Result<(), ReadinessError> {
        if self.seen {
            return Ok(());
        }
        let outcome = match timeout {
            Some(after) => self.ready.recv_timeout(after),
            None => self.ready.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };
        match outcome {
            Ok(()) => {
                self.seen = true;
                Ok(())
            }
            Err(RecvTimeoutError::Timeout) => Err(ReadinessError::TimedOut {
                after: timeout.unwrap_or_default(),
                tail: self.tail(),
            }),
            Err(RecvTimeoutError::Disconnected) => {
                Err(ReadinessError::StreamClosed { tail: self.tail() })
            }
        }
    }

    /// Snapshot of the most recent lines, oldest first.
    #[must_use]
    pub fn tail(&self) -> Vec<String> {
        self.tail
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }
}

struct Pump {
    marker: Option<Vec<u8>>,
    echo: bool,
    ready: Option<Sender<()>>,
    tail: Tail,
}

impl Pump {
    fn run(mut self, stream: impl Read) {
        let mut reader = BufReader::new(stream);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => break,
                Ok(_) => self.observe(&line),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    debug!(error = %e, "server output stream failed");
                    break;
                }
            }
        }
        trace!("server output stream closed");
    }

    fn observe(&mut self, line: &[u8]) {
        if self.echo && io::stderr().write_all(line).is_err() {
            self.echo = false;
        }
        let text = String::from_utf8_lossy(line);
        record_diagnostic_line(&self.tail, text.trim_end());
        if self.ready.is_some() && self.matches(line) {
            debug!("server reported ready");
            if let Some(tx) = self.ready.take() {
                if tx.send(()).is_err() {
                    trace!("readiness waiter already gone");
                }
            }
        }
    }

    fn matches(&self, line: &[u8]) -> bool {
        self.marker
            .as_deref()
            .is_some_and(|marker| contains(line, marker))
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    needle.is_empty() || haystack.windows(needle.len()).any(|w| w == needle)
}

fn record_diagnostic_line(tail: &Mutex<VecDeque<String>>, line: &str) {
    let mut lines = tail.lock().unwrap_or_else(PoisonError::into_inner);
    if lines.len() == TAIL_LINES {
        lines.pop_front();
    }
    lines.push_back(line.to_owned());
}
