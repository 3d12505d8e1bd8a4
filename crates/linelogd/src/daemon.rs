//! Startup orchestration.
//!
//! Order matters:
//! 1. privilege check (nothing touched yet)
//! 2. reporter opened, "Started." recorded
//! 3. singleton lock taken, before any socket exists
//! 4. listening socket bound, still attached: a bind failure exits non-zero
//! 5. detach (fork) - before the runtime, which cannot survive a fork
//! 6. current-thread runtime: adopt the socket, install signal handlers, serve
//!
//! Every fatal step releases what earlier steps acquired: the lock is
//! released by the multiplexer's drain or, before the multiplexer owns it,
//! by `LockFile`'s drop.

use std::io;
use std::net::TcpListener as StdTcpListener;
use std::process;
use std::sync::Arc;

use tracing::info;

use linelog_core::{ReportError, Reporter};

use crate::config::DaemonConfig;
use crate::detach::{self, DetachError};
use crate::lock::{LockError, LockFile};
use crate::privilege::{self, PrivilegeError};
use crate::server::{self, Multiplexer, ServerConfig, ServerError};
use crate::shutdown::{spawn_signal_listener, ShutdownFlag};

/// Runs the daemon to completion with the given configuration.
///
/// Returns `Ok(())` after a clean shutdown.
pub fn start(config: &DaemonConfig) -> Result<(), DaemonError> {
    if config.require_root {
        privilege::ensure_root()?;
    }

    let reporter = Reporter::install(&config.log_path)?;
    reporter.info("linelogd: Started.");

    let lock = if config.lock {
        match LockFile::acquire(&config.lock_path) {
            Ok(lock) => Some(lock),
            Err(e) => {
                match &e {
                    LockError::AlreadyRunning { .. } => {
                        reporter.error("linelogd: Error file locked.");
                    }
                    LockError::Io { .. } => reporter.error(format!("linelogd: {e}")),
                }
                reporter.info("linelogd: Quitting.");
                return Err(e.into());
            }
        }
    } else {
        None
    };

    let listener = match server::create_listener(&ServerConfig::from(config), &reporter) {
        Ok(listener) => listener,
        Err(e) => {
            reporter.error(format!("linelogd: {e}"));
            reporter.info("linelogd: Quitting.");
            return Err(e.into());
        }
    };

    if config.detach {
        reporter.info("linelogd: Entering Daemon mode.");
        if let Err(e) = detach::detach() {
            reporter.error(format!("linelogd: {e}"));
            reporter.info("linelogd: Quitting.");
            return Err(e.into());
        }
        if let Some(lock) = &lock {
            lock.record_pid();
        }
        reporter.info(format!("linelogd: started. PID: {}.", process::id()));
    }

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            reporter.error(format!("linelogd: Failed to start runtime: {e}"));
            reporter.info("linelogd: Quitting.");
            return Err(DaemonError::Runtime(e));
        }
    };

    runtime.block_on(serve(
        config,
        reporter,
        lock,
        Some(listener),
        ShutdownFlag::global(),
    ))
}

/// Binds (or adopts `listener`), installs signal handlers and runs the
/// multiplexer until shutdown.
///
/// Must be called from within a Tokio runtime.
pub async fn serve(
    config: &DaemonConfig,
    reporter: Arc<Reporter>,
    lock: Option<LockFile>,
    listener: Option<StdTcpListener>,
    shutdown: ShutdownFlag,
) -> Result<(), DaemonError> {
    let mut server = Multiplexer::new(
        ServerConfig::from(config),
        Arc::clone(&reporter),
        shutdown.clone(),
    );
    if let Some(lock) = lock {
        server = server.with_lock(lock);
    }
    if let Some(listener) = listener {
        server = server.with_listener(listener);
    }

    let addr = server.bind()?;

    // Dropping `server` on failure drains it and releases the lock.
    let _signals = spawn_signal_listener(shutdown, Arc::clone(&reporter))
        .map_err(DaemonError::Signals)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        %addr,
        log_file = %reporter.path().display(),
        "linelogd running"
    );

    server.run().await?;

    info!("linelogd stopped");
    Ok(())
}

/// Fatal startup and runtime errors.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error(transparent)]
    Privilege(#[from] PrivilegeError),

    #[error(transparent)]
    Report(#[from] ReportError),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error(transparent)]
    Detach(#[from] DetachError),

    #[error("Failed to build async runtime: {0}")]
    Runtime(#[source] io::Error),

    #[error("Failed to install signal handlers: {0}")]
    Signals(#[source] io::Error),

    #[error(transparent)]
    Server(#[from] ServerError),
}

impl DaemonError {
    /// Returns the holder's PID when another instance is already running.
    pub fn already_running(&self) -> Option<Option<u32>> {
        match self {
            DaemonError::Lock(LockError::AlreadyRunning { pid, .. }) => Some(*pid),
            _ => None,
        }
    }
}
