//! Process detachment.
//!
//! Wraps the `daemonize` crate: fork, become session leader, change to `/`,
//! clear the umask and point stdin/stdout/stderr at `/dev/null`. The parent
//! exits inside `start()`, so everything after [`detach`] runs in the
//! background process with a new PID.
//!
//! Must be called before any Tokio runtime exists; a forked child does not
//! inherit runtime threads.

use daemonize::Daemonize;
use tracing::debug;

/// Working directory of the detached process.
pub const WORKING_DIRECTORY: &str = "/";

/// Detaches the current process from its terminal.
pub fn detach() -> Result<(), DetachError> {
    debug!("Detaching from controlling terminal");

    Daemonize::new()
        .working_directory(WORKING_DIRECTORY)
        .umask(0)
        .start()
        .map_err(|e| DetachError::Daemonize(e.to_string()))
}

/// Errors raised while detaching.
#[derive(Debug, thiserror::Error)]
pub enum DetachError {
    #[error("Failed to detach: {0}")]
    Daemonize(String),
}
