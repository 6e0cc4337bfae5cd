//! Loopback port allocation.
//!
//! The OS picks a free port when binding to port zero. The listener is
//! dropped immediately so `mysqld` can bind the port itself, which leaves a
//! window in which another caller may be handed the same number. Live leases
//! are therefore recorded in a process-wide registry and a port already
//! leased is never handed out twice.

use std::{
    collections::BTreeSet,
    io,
    net::{Ipv4Addr, TcpListener},
    sync::{Mutex, PoisonError},
};

use tracing::debug;

static LEASED: Mutex<BTreeSet<u16>> = Mutex::new(BTreeSet::new());

const MAX_ATTEMPTS: usize = 64;

/// Exclusive claim on a loopback port. Dropping the lease releases it.
#[derive(Debug)]
pub struct PortLease {
    port: u16,
}

impl PortLease {
    /// The leased port number.
    #[must_use]
    pub const fn port(&self) -> u16 { self.port }
}

impl Drop for PortLease {
    fn drop(&mut self) {
        LEASED
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.port);
    }
}

/// Reserves a port that is currently unused on `127.0.0.1` and not leased
/// by any other live [`PortLease`] in this process.
///
/// # Errors
///
/// Returns the bind error when the OS cannot provide an ephemeral port, or
/// [`io::ErrorKind::AddrInUse`] when every probe returned a leased port.
pub fn allocate() -> io::Result<PortLease> {
    for _ in 0..MAX_ATTEMPTS {
        let port = probe()?;
        if LEASED
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(port)
        {
            return Ok(PortLease { port });
        }
        debug!(port, "ephemeral port already leased, probing again");
    }
    Err(io::Error::new(
        io::ErrorKind::AddrInUse,
        "no unleased ephemeral port available",
    ))
}

fn probe() -> io::Result<u16> {
    let socket = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))?;
    let port = socket.local_addr()?.port();
    drop(socket);
    Ok(port)
}

/// Returns `true` while `port` is held by a live lease.
#[must_use]
pub fn is_leased(port: u16) -> bool {
    LEASED
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .contains(&port)
}
