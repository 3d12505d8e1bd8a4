//! Command-line interface.
//!
//! ```bash
//! # Start the daemon (detached, as root)
//! linelogd start
//!
//! # Start in the foreground on another port, without the root check
//! linelogd start -f --port 5000 --no-root-check
//!
//! # Stop the daemon / check status
//! linelogd stop
//! linelogd status
//!
//! # Enable debug diagnostics on stderr (foreground only)
//! RUST_LOG=linelogd=debug linelogd start -f
//! ```

use std::path::PathBuf;
use std::process;
use std::thread;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::config::DaemonConfig;
use crate::daemon;
use crate::lock::{self, LockStatus};

/// How long `stop` waits for the daemon to release its lock.
const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between lock probes while stopping.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// linelogd - single-instance TCP line logging daemon
#[derive(Parser, Debug)]
#[command(name = "linelogd", version, about)]
pub struct Args {
    /// Configuration file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the daemon
    Start(StartArgs),
    /// Stop the running daemon
    Stop,
    /// Show daemon status
    Status,
}

/// Overrides for `start`; unset flags keep the configured values.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct StartArgs {
    /// Stay attached to the terminal instead of detaching
    #[arg(short = 'f', long)]
    pub foreground: bool,

    /// TCP port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Maximum number of concurrent clients
    #[arg(long)]
    pub max_clients: Option<usize>,

    /// Singleton lock file
    #[arg(long)]
    pub lock_file: Option<PathBuf>,

    /// Log file
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Do not require root privileges
    #[arg(long)]
    pub no_root_check: bool,

    /// Do not take the singleton lock
    #[arg(long)]
    pub no_lock: bool,
}

impl StartArgs {
    /// Applies the flags on top of `config`.
    pub fn apply(&self, config: &mut DaemonConfig) {
        if self.foreground {
            config.detach = false;
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(max_clients) = self.max_clients {
            config.max_clients = max_clients;
        }
        if let Some(path) = &self.lock_file {
            config.lock_path = path.clone();
        }
        if let Some(path) = &self.log_file {
            config.log_path = path.clone();
        }
        if self.no_root_check {
            config.require_root = false;
        }
        if self.no_lock {
            config.lock = false;
        }
    }
}

/// Parses arguments and runs the selected command.
pub fn run() -> Result<()> {
    let args = Args::parse();
    let mut config =
        DaemonConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Default to 'start' if no subcommand given
    let command = args
        .command
        .unwrap_or_else(|| Command::Start(StartArgs::default()));

    match command {
        Command::Start(start) => {
            start.apply(&mut config);
            config.validate().context("Invalid configuration")?;
            init_tracing()?;

            match daemon::start(&config) {
                Ok(()) => Ok(()),
                Err(e) => {
                    if let Some(pid) = e.already_running() {
                        match pid {
                            Some(pid) => eprintln!("linelogd is already running (PID {pid})"),
                            None => eprintln!("linelogd is already running"),
                        }
                        eprintln!("Use 'linelogd stop' to stop it first.");
                        process::exit(1);
                    }
                    Err(e.into())
                }
            }
        }
        Command::Stop => stop(&config),
        Command::Status => {
            match lock::probe(&config.lock_path)? {
                LockStatus::Held { pid: Some(pid) } => println!("linelogd is running (PID {pid})"),
                LockStatus::Held { pid: None } => println!("linelogd is running"),
                LockStatus::Free => {
                    println!("linelogd is not running.");
                    process::exit(1);
                }
            }
            println!("Lock file: {}", config.lock_path.display());
            println!("Log file: {}", config.log_path.display());
            Ok(())
        }
    }
}

fn stop(config: &DaemonConfig) -> Result<()> {
    let pid = match lock::probe(&config.lock_path)? {
        LockStatus::Free => {
            println!("linelogd is not running.");
            return Ok(());
        }
        LockStatus::Held { pid: None } => {
            bail!(
                "linelogd holds {} but no PID is recorded",
                config.lock_path.display()
            );
        }
        LockStatus::Held { pid: Some(pid) } => pid,
    };

    println!("Stopping linelogd (PID {pid})...");
    send_sigterm(pid)?;

    let attempts = STOP_TIMEOUT.as_millis() / STOP_POLL_INTERVAL.as_millis();
    for _ in 0..attempts {
        if lock::probe(&config.lock_path)? == LockStatus::Free {
            println!("linelogd stopped.");
            return Ok(());
        }
        thread::sleep(STOP_POLL_INTERVAL);
    }

    eprintln!("linelogd did not stop within {} seconds.", STOP_TIMEOUT.as_secs());
    process::exit(1);
}

fn send_sigterm(pid: u32) -> Result<()> {
    let pid = libc::pid_t::try_from(pid).context("PID out of range")?;
    // SAFETY: kill has no memory-safety preconditions.
    let result = unsafe { libc::kill(pid, libc::SIGTERM) };
    if result != 0 {
        bail!(
            "Failed to send SIGTERM to process {pid}: {}",
            std::io::Error::last_os_error()
        );
    }
    Ok(())
}

fn init_tracing() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("linelogd=info".parse()?)
                .add_directive("linelog_core=info".parse()?)
                .add_directive("linelog::record=info".parse()?),
        )
        .try_init()
        .map_err(|e| anyhow!("Failed to initialize tracing: {e}"))
}
