//! Shutdown coordination.
//!
//! A single set-once flag is shared by everything that may stop the daemon:
//! the signal listener task and the multiplexer's handling of the shutdown
//! keyword. Nobody cancels the event loop directly; the loop checks the flag
//! at the top of every iteration and its readiness wait also wakes when the
//! flag is set.
//!
//! ```text
//!  SIGINT/SIGTERM/SIGQUIT/SIGHUP          "quit" line
//!              │                              │
//!              ▼                              ▼
//!   ┌────────────────────┐          ┌──────────────────┐
//!   │  signal listener   │          │   Multiplexer    │
//!   │      (task)        │          │  (dispatch)      │
//!   └─────────┬──────────┘          └────────┬─────────┘
//!             │ request()                    │ request()
//!             └──────────────┬───────────────┘
//!                            ▼
//!                   ┌─────────────────┐
//!                   │  ShutdownFlag   │──▶ observed by the loop
//!                   └─────────────────┘
//! ```

use std::io;
use std::sync::{Arc, OnceLock};

use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use linelog_core::Reporter;

static GLOBAL: OnceLock<ShutdownFlag> = OnceLock::new();

/// Set-once, never-reset request to stop the daemon.
///
/// Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    token: CancellationToken,
}

impl ShutdownFlag {
    /// Creates an independent flag in the running state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the process-wide flag.
    pub fn global() -> ShutdownFlag {
        GLOBAL.get_or_init(ShutdownFlag::new).clone()
    }

    /// Requests shutdown. Idempotent.
    pub fn request(&self) {
        self.token.cancel();
    }

    /// Returns true once shutdown has been requested.
    pub fn is_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Completes when shutdown has been requested.
    pub async fn requested(&self) {
        self.token.cancelled().await;
    }
}

/// Installs handlers for the termination signals and spawns the task that
/// turns each delivery into a shutdown request.
///
/// Handlers are registered before this returns, so a signal raised right
/// after the call is not lost. Later signals are tolerated; the flag is
/// already set and draining proceeds regardless.
///
/// Must be called from within a Tokio runtime.
pub fn spawn_signal_listener(
    flag: ShutdownFlag,
    reporter: Arc<Reporter>,
) -> io::Result<JoinHandle<()>> {
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;
    let mut sighup = signal(SignalKind::hangup())?;

    Ok(tokio::spawn(async move {
        loop {
            let name = tokio::select! {
                Some(()) = sigint.recv() => "SIGINT",
                Some(()) = sigterm.recv() => "SIGTERM",
                Some(()) = sigquit.recv() => "SIGQUIT",
                Some(()) = sighup.recv() => "SIGHUP",
                else => break,
            };

            let repeated = flag.is_requested();
            flag.request();
            info!(signal = name, repeated, "Shutdown signal received");
            reporter.info(format!("linelogd: Signal handler ({name})."));
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_flag_is_set_once() {
        let flag = ShutdownFlag::new();
        assert!(!flag.is_requested());

        flag.request();
        assert!(flag.is_requested());

        flag.request();
        assert!(flag.is_requested());
    }

    #[test]
    fn test_clones_share_state() {
        let flag = ShutdownFlag::new();
        let other = flag.clone();
        other.request();
        assert!(flag.is_requested());

        // Independent flags do not.
        assert!(!ShutdownFlag::new().is_requested());
    }

    #[test]
    fn test_global_is_shared() {
        let a = ShutdownFlag::global();
        let b = ShutdownFlag::global();
        assert_eq!(a.is_requested(), b.is_requested());
    }

    #[tokio::test]
    async fn test_requested_wakes_waiter() {
        let flag = ShutdownFlag::new();
        let waiter = flag.clone();
        let handle = tokio::spawn(async move { waiter.requested().await });

        flag.request();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("waiter woke")
            .expect("task completed");
    }
}
