//! Daemon configuration.
//!
//! Values are layered, lowest precedence first:
//! 1. built-in defaults (`DaemonConfig::default()`)
//! 2. a TOML file: `--config`, else `$LINELOGD_CONFIG`, else
//!    `<config dir>/linelogd/config.toml` when it exists
//! 3. command-line flags (applied by `cli`)
//!
//! ```toml
//! port = 4242
//! max_clients = 3
//! poll_interval_ms = 1000
//! lock_path = "/var/lock/linelogd.lock"
//! log_path = "/var/log/linelogd/linelogd.log"
//! detach = true
//! require_root = true
//! ```

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

/// Default TCP port
pub const DEFAULT_PORT: u16 = 4242;

/// Default maximum number of concurrent clients
pub const DEFAULT_MAX_CLIENTS: usize = 3;

/// Default readiness-wait timeout in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 1000;

/// Default size of a single client read
pub const DEFAULT_READ_BUFFER: usize = 1024;

/// Default lock file path
pub const DEFAULT_LOCK_PATH: &str = "/var/lock/linelogd.lock";

/// Default log file path
pub const DEFAULT_LOG_PATH: &str = "/var/log/linelogd/linelogd.log";

/// Environment variable naming a configuration file
pub const CONFIG_ENV: &str = "LINELOGD_CONFIG";

/// Full daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DaemonConfig {
    /// TCP port bound on 0.0.0.0 (0 picks an ephemeral port)
    pub port: u16,

    /// Maximum number of concurrently serviced clients
    pub max_clients: usize,

    /// Upper bound on one readiness wait, in milliseconds
    pub poll_interval_ms: u64,

    /// Bytes read from a client per readiness event
    pub read_buffer: usize,

    /// Singleton lock file
    pub lock_path: PathBuf,

    /// Durable log file
    pub log_path: PathBuf,

    /// Fork into the background after taking the lock
    pub detach: bool,

    /// Refuse to start unless running as root
    pub require_root: bool,

    /// Take the singleton lock at all
    pub lock: bool,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            max_clients: DEFAULT_MAX_CLIENTS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            read_buffer: DEFAULT_READ_BUFFER,
            lock_path: PathBuf::from(DEFAULT_LOCK_PATH),
            log_path: PathBuf::from(DEFAULT_LOG_PATH),
            detach: true,
            require_root: true,
            lock: true,
        }
    }
}

impl DaemonConfig {
    /// Parses a configuration from TOML text. Missing keys keep defaults.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|e| ConfigError::Parse {
            origin: "<inline>".to_string(),
            error: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and parses a configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        let config: Self = toml::from_str(&text).map_err(|e| ConfigError::Parse {
            origin: path.display().to_string(),
            error: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the configuration from the first available source.
    ///
    /// An explicit path (or `$LINELOGD_CONFIG`) must exist; the per-user
    /// default location is only used when present.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }

        if let Ok(path) = env::var(CONFIG_ENV) {
            return Self::from_file(Path::new(&path));
        }

        if let Some(path) = default_config_path().filter(|p| p.exists()) {
            debug!(path = %path.display(), "Using default configuration file");
            return Self::from_file(&path);
        }

        Ok(Self::default())
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_clients == 0 {
            return Err(ConfigError::Invalid {
                field: "max_clients",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.read_buffer == 0 {
            return Err(ConfigError::Invalid {
                field: "read_buffer",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "poll_interval_ms",
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Returns the readiness-wait timeout.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Returns `<config dir>/linelogd/config.toml`, if a config dir is known.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("linelogd").join("config.toml"))
}

/// Errors that can occur while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {error}", .path.display())]
    Read { path: PathBuf, error: String },

    #[error("Failed to parse config {origin}: {error}")]
    Parse { origin: String, error: String },

    #[error("Invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
