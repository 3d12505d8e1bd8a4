//! Client connections and the combined readiness wait.
//!
//! Clients are identified by their accept sequence number rather than by a
//! reference or index, so the multiplexer can snapshot the ready set and
//! remove clients while working through it.

use std::io;
use std::net::SocketAddr;
use std::task::{Context, Poll};

use tokio::net::{TcpListener, TcpStream};

/// Accept sequence number; higher means accepted later.
pub type ClientId = u64;

/// One accepted peer.
#[derive(Debug)]
pub struct Client {
    /// Accept sequence number
    pub id: ClientId,

    /// Remote address
    pub peer: SocketAddr,

    /// The connection; dropping it closes the socket
    stream: TcpStream,
}

/// Result of one non-blocking read.
#[derive(Debug)]
pub(crate) enum ReadOutcome {
    /// `n` bytes were read into the buffer
    Data(usize),

    /// The peer closed the connection
    Closed,

    /// Readiness was spurious; nothing to read yet
    Pending,

    /// The stream failed (reset, timeout, ...)
    Failed(io::Error),
}

impl Client {
    pub(crate) fn new(id: ClientId, peer: SocketAddr, stream: TcpStream) -> Self {
        Self { id, peer, stream }
    }

    /// Reads at most `buf.len()` bytes without blocking.
    pub(crate) fn read_chunk(&self, buf: &mut [u8]) -> ReadOutcome {
        match self.stream.try_read(buf) {
            Ok(0) => ReadOutcome::Closed,
            Ok(n) => ReadOutcome::Data(n),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted) => {
                ReadOutcome::Pending
            }
            Err(e) => ReadOutcome::Failed(e),
        }
    }
}

/// Everything that became ready during one wait.
#[derive(Debug, Default)]
pub(crate) struct Readiness {
    /// Outcome of accepting on the listening socket, if it was ready
    pub incoming: Option<io::Result<(TcpStream, SocketAddr)>>,

    /// Clients with pending data or a pending close/error
    pub readable: Vec<ClientId>,
}

impl Readiness {
    fn is_empty(&self) -> bool {
        self.incoming.is_none() && self.readable.is_empty()
    }
}

/// Polls the listener and every client once, registering the task's waker on
/// all of them.
///
/// Resolves as soon as at least one endpoint is ready. An accept is performed
/// when the listener is ready, so a `Readiness` carries at most one new
/// connection.
pub(crate) fn poll_readiness(
    listener: &TcpListener,
    clients: &[Client],
    cx: &mut Context<'_>,
) -> Poll<Readiness> {
    let mut readiness = Readiness::default();

    if let Poll::Ready(result) = listener.poll_accept(cx) {
        readiness.incoming = Some(result);
    }

    for client in clients {
        // An error here surfaces again from the read itself.
        if client.stream.poll_read_ready(cx).is_ready() {
            readiness.readable.push(client.id);
        }
    }

    if readiness.is_empty() {
        Poll::Pending
    } else {
        Poll::Ready(readiness)
    }
}
