//! TCP connection multiplexer for the linelog daemon.
//!
//! One task owns the listening socket and every client connection, and
//! drives them from a single readiness wait per iteration:
//!
//! ```text
//!               ┌──────────────────────────────────────────┐
//!               │                Multiplexer               │
//!               │                                          │
//!   connect ──▶ │  TcpListener ──accept──▶ Vec<Client>     │
//!               │       │                      │           │
//!               │       └──── poll_readiness ──┘           │
//!               │            (timeout: 1s)                 │
//!               │                  │                       │
//!               │                  ▼                       │
//!               │      frame ──▶ Reporter / ShutdownFlag   │
//!               └──────────────────────────────────────────┘
//! ```
//!
//! Lifecycle: `Initializing → Listening → (Accepting | Servicing)* →
//! Draining → Stopped`. Draining closes every client and the listener and
//! releases the singleton lock; it runs exactly once however the loop ends.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Per-connection failures are logged and never leave the iteration

mod client;

pub use client::{Client, ClientId};

use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpListener as StdTcpListener};
use std::os::unix::io::{AsRawFd, FromRawFd, IntoRawFd};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use linelog_core::{Level, Reporter};
use linelog_protocol::{frame, ClientInput};

use crate::config::{
    DaemonConfig, DEFAULT_MAX_CLIENTS, DEFAULT_POLL_INTERVAL_MS, DEFAULT_PORT, DEFAULT_READ_BUFFER,
};
use crate::lock::LockFile;
use crate::shutdown::ShutdownFlag;
use client::{poll_readiness, ReadOutcome, Readiness};

/// Smallest listen backlog requested from the kernel.
const MIN_BACKLOG: u32 = 16;

/// Pause after a failed accept; the listener stays readable on EMFILE.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Settings the multiplexer needs from the daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Port bound on 0.0.0.0 (0 = ephemeral)
    pub port: u16,

    /// Maximum number of concurrently serviced clients
    pub max_clients: usize,

    /// Upper bound on one readiness wait
    pub poll_interval: Duration,

    /// Bytes read per readiness event
    pub read_buffer: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            max_clients: DEFAULT_MAX_CLIENTS,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            read_buffer: DEFAULT_READ_BUFFER,
        }
    }
}

impl From<&DaemonConfig> for ServerConfig {
    fn from(config: &DaemonConfig) -> Self {
        Self {
            port: config.port,
            max_clients: config.max_clients,
            poll_interval: config.poll_interval(),
            read_buffer: config.read_buffer,
        }
    }
}

/// Where the multiplexer is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// Created, socket not bound yet
    Initializing,
    /// Waiting for readiness
    Listening,
    /// Handling a new connection
    Accepting,
    /// Reading from ready clients
    Servicing,
    /// Closing everything
    Draining,
    /// Terminal
    Stopped,
}

/// Single-task TCP multiplexer.
///
/// Exclusively owns the listener, the client collection and (optionally)
/// the singleton lock, which it releases while draining.
#[derive(Debug)]
pub struct Multiplexer {
    config: ServerConfig,
    reporter: Arc<Reporter>,
    shutdown: ShutdownFlag,

    /// Socket created before the runtime existed, adopted by `bind`
    prebound: Option<StdTcpListener>,

    /// Listening socket, present between bind and drain
    listener: Option<TcpListener>,

    /// Open clients in accept order
    clients: Vec<Client>,

    /// Sequence number handed to the next accepted client
    next_client_id: ClientId,

    /// Reused read buffer
    buffer: Vec<u8>,

    /// Singleton lock released when draining
    lock: Option<LockFile>,

    state: ServerState,
}

impl Multiplexer {
    /// Creates a multiplexer in the `Initializing` state.
    pub fn new(config: ServerConfig, reporter: Arc<Reporter>, shutdown: ShutdownFlag) -> Self {
        let buffer = vec![0; config.read_buffer.max(1)];
        Self {
            config,
            reporter,
            shutdown,
            prebound: None,
            listener: None,
            clients: Vec::new(),
            next_client_id: 0,
            buffer,
            lock: None,
            state: ServerState::Initializing,
        }
    }

    /// Hands over the singleton lock so it is released when draining.
    pub fn with_lock(mut self, lock: LockFile) -> Self {
        self.lock = Some(lock);
        self
    }

    /// Hands over a listening socket made by [`create_listener`], so `bind`
    /// adopts it instead of creating one.
    pub fn with_listener(mut self, listener: StdTcpListener) -> Self {
        self.prebound = Some(listener);
        self
    }

    /// Returns the current lifecycle state.
    pub fn state(&self) -> ServerState {
        self.state
    }

    /// Returns the number of open client connections.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Returns the bound address, once listening.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// Registers the listening socket with the runtime, creating it first
    /// unless one was handed over with [`Multiplexer::with_listener`].
    ///
    /// A failure is fatal: it is logged, the multiplexer drains (releasing
    /// the lock) and the error is returned. Must be called from within a
    /// Tokio runtime.
    pub fn bind(&mut self) -> Result<SocketAddr, ServerError> {
        if let Some(addr) = self.local_addr() {
            return Ok(addr);
        }
        if self.state != ServerState::Initializing {
            return Err(ServerError::Stopped);
        }

        let bound = match self.prebound.take() {
            Some(listener) => Ok(listener),
            None => create_listener(&self.config, &self.reporter),
        }
        .and_then(|listener| TcpListener::from_std(listener).map_err(ServerError::Socket))
        .and_then(|listener| {
            let addr = listener.local_addr().map_err(ServerError::Socket)?;
            Ok((listener, addr))
        });

        match bound {
            Ok((listener, addr)) => {
                self.listener = Some(listener);
                self.state = ServerState::Listening;
                info!(%addr, max_clients = self.config.max_clients, "Multiplexer listening");
                Ok(addr)
            }
            Err(e) => {
                self.reporter.log(Level::Error, format!("linelogd: {e}"));
                self.drain();
                Err(e)
            }
        }
    }

    /// Runs until shutdown is requested, then drains.
    ///
    /// Binds first if [`Multiplexer::bind`] has not been called.
    pub async fn run(mut self) -> Result<(), ServerError> {
        if self.listener.is_none() {
            self.bind()?;
        }

        while self.poll_once().await {}

        self.drain();
        Ok(())
    }

    /// Runs one loop iteration: wait, accept, service.
    ///
    /// Returns false once the loop should stop.
    pub async fn poll_once(&mut self) -> bool {
        if self.shutdown.is_requested() || self.listener.is_none() {
            return false;
        }

        self.state = ServerState::Listening;
        let readiness = tokio::select! {
            _ = self.shutdown.requested() => return false,
            waited = timeout(self.config.poll_interval, self.wait_ready()) => match waited {
                Ok(readiness) => readiness,
                // Periodic wake to re-check the flag.
                Err(_) => return true,
            },
        };

        let Readiness { incoming, mut readable } = readiness;

        if let Some(incoming) = incoming {
            self.state = ServerState::Accepting;
            if !self.admit(incoming) && !self.back_off().await {
                return false;
            }
        }

        self.state = ServerState::Servicing;
        readable.sort_unstable_by(|a, b| b.cmp(a));
        for id in readable {
            if self.shutdown.is_requested() {
                break;
            }
            self.service(id);
        }

        self.state = ServerState::Listening;
        !self.shutdown.is_requested()
    }

    /// Waits until the listener or any client is ready.
    async fn wait_ready(&self) -> Readiness {
        match &self.listener {
            Some(listener) => {
                std::future::poll_fn(|cx| poll_readiness(listener, &self.clients, cx)).await
            }
            None => std::future::pending().await,
        }
    }

    /// Waits out [`ACCEPT_ERROR_BACKOFF`]. Returns false if shutdown was
    /// requested meanwhile.
    async fn back_off(&self) -> bool {
        tokio::select! {
            _ = self.shutdown.requested() => false,
            _ = sleep(ACCEPT_ERROR_BACKOFF) => true,
        }
    }

    /// Adds a freshly accepted connection, or closes it when full.
    ///
    /// Returns false when the accept itself failed.
    fn admit(&mut self, incoming: io::Result<(TcpStream, SocketAddr)>) -> bool {
        match incoming {
            Ok((stream, peer)) => {
                if self.clients.len() >= self.config.max_clients {
                    drop(stream);
                    self.reporter.error(format!(
                        "linelogd: Connection from {peer} refused, client limit ({}) reached.",
                        self.config.max_clients
                    ));
                    return true;
                }

                let id = self.next_client_id;
                self.next_client_id += 1;
                self.clients.push(Client::new(id, peer, stream));
                debug!(client = id, %peer, open = self.clients.len(), "Client accepted");
                self.reporter
                    .info(format!("linelogd: New client connected from {peer}."));
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to accept connection");
                self.reporter.error(format!("linelogd: Accept failed: {e}"));
                false
            }
        }
    }

    /// Reads one chunk from a ready client and acts on it.
    fn service(&mut self, id: ClientId) {
        let Some(index) = self.clients.iter().position(|c| c.id == id) else {
            return;
        };
        let Some(client) = self.clients.get(index) else {
            return;
        };
        let peer = client.peer;

        match client.read_chunk(&mut self.buffer) {
            ReadOutcome::Pending => {}
            ReadOutcome::Closed => {
                drop(self.clients.remove(index));
                debug!(client = id, %peer, "Client closed connection");
                self.reporter
                    .info(format!("linelogd: Client {peer} disconnected."));
            }
            ReadOutcome::Failed(e) => {
                drop(self.clients.remove(index));
                debug!(client = id, %peer, error = %e, "Client read failed");
                self.reporter
                    .error(format!("linelogd: Read from {peer} failed: {e}"));
            }
            ReadOutcome::Data(n) => {
                let inputs = frame(self.buffer.get(..n).unwrap_or_default());
                self.dispatch(inputs);
            }
        }
    }

    /// Logs client lines and reacts to the shutdown keyword.
    fn dispatch(&self, inputs: Vec<ClientInput>) {
        for input in inputs {
            if input.is_shutdown() {
                self.reporter.info("linelogd: Request quit.");
                self.shutdown.request();
                break;
            }
            if let ClientInput::Message(text) = input {
                self.reporter.log(Level::Log, text);
            }
        }
    }

    /// Closes every client and the listener, then releases the lock.
    ///
    /// Runs once; later calls do nothing. Safe before `bind`.
    pub fn drain(&mut self) {
        if matches!(self.state, ServerState::Draining | ServerState::Stopped) {
            return;
        }
        self.state = ServerState::Draining;

        self.reporter.info("linelogd: Quitting.");

        let closed = self.clients.len();
        self.clients.clear();
        self.listener = None;
        self.prebound = None;

        if let Some(mut lock) = self.lock.take() {
            lock.release();
        }

        self.state = ServerState::Stopped;
        info!(closed_clients = closed, "Multiplexer stopped");
    }
}

impl Drop for Multiplexer {
    fn drop(&mut self) {
        self.drain();
    }
}

/// Listen backlog: never below `max_clients + 1`.
fn backlog(max_clients: usize) -> u32 {
    u32::try_from(max_clients.saturating_add(1))
        .unwrap_or(u32::MAX)
        .max(MIN_BACKLOG)
}

/// Creates the listening socket (reuse-address on, IPv4 any-address),
/// recording the attempt.
///
/// Needs no runtime; the daemon calls it before detaching. Errors are left
/// for the caller to record.
pub fn create_listener(
    config: &ServerConfig,
    reporter: &Reporter,
) -> Result<StdTcpListener, ServerError> {
    reporter.info("linelogd: Creating server.");
    let listener = open_listener(config.port, backlog(config.max_clients))?;
    reporter.info("linelogd: Server created.");
    Ok(listener)
}

fn open_listener(port: u16, backlog: u32) -> Result<StdTcpListener, ServerError> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));

    let socket = TcpSocket::new_v4().map_err(ServerError::Socket)?;
    socket.set_reuseaddr(true).map_err(ServerError::Socket)?;
    socket
        .bind(addr)
        .map_err(|source| ServerError::Bind { addr, source })?;

    // SAFETY: `into_raw_fd` hands over sole ownership of a valid socket.
    let listener = unsafe { StdTcpListener::from_raw_fd(socket.into_raw_fd()) };
    let backlog = libc::c_int::try_from(backlog).unwrap_or(libc::c_int::MAX);
    // SAFETY: the descriptor is a bound socket owned by `listener`.
    if unsafe { libc::listen(listener.as_raw_fd(), backlog) } != 0 {
        return Err(ServerError::Listen {
            addr,
            source: io::Error::last_os_error(),
        });
    }
    listener
        .set_nonblocking(true)
        .map_err(ServerError::Socket)?;
    Ok(listener)
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Socket creation failed: {0}")]
    Socket(#[source] io::Error),

    #[error("Bind failed on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Listen failed on {addr}: {source}")]
    Listen {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("Server already stopped")]
    Stopped,
}
