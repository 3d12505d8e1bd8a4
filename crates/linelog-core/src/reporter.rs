//! Durable, append-only log sink.
//!
//! The `Reporter` owns the log file behind a mutex. Each call to
//! [`Reporter::log`] renders one [`LogRecord`], writes it with a single
//! `write_all`, then flushes and syncs the file before returning, so a crash
//! right after a call never loses that record.
//!
//! Exactly one process-wide reporter exists once [`Reporter::install`] has
//! been called; tests open private instances with [`Reporter::open`].
//!
//! # Panic-Free Guarantees
//!
//! - A poisoned mutex is recovered, not propagated as a panic
//! - Write failures are reported through `tracing` and never abort the caller

use std::fs::{DirBuilder, File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock};

use tracing::{error, info};

use crate::error::ReportError;
use crate::record::{Level, LogRecord};

/// Permissions for a freshly created log directory.
const LOG_DIR_MODE: u32 = 0o755;

/// Permissions for a freshly created log file.
const LOG_FILE_MODE: u32 = 0o644;

static GLOBAL: OnceLock<Arc<Reporter>> = OnceLock::new();

/// Thread-safe, flush-on-write log file.
#[derive(Debug)]
pub struct Reporter {
    /// Location of the log file
    path: PathBuf,

    /// Append-mode handle; the lock serializes whole records
    file: Mutex<File>,
}

impl Reporter {
    /// Opens (creating if needed) the log file at `path` for appending.
    ///
    /// The parent directory is created when missing.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ReportError> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                DirBuilder::new()
                    .recursive(true)
                    .mode(LOG_DIR_MODE)
                    .create(parent)
                    .map_err(|source| ReportError::CreateDir {
                        path: parent.to_path_buf(),
                        source,
                    })?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .mode(LOG_FILE_MODE)
            .open(&path)
            .map_err(|source| ReportError::Open {
                path: path.clone(),
                source,
            })?;

        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    /// Installs the process-wide reporter, opening `path` on first use.
    ///
    /// Later calls return the already installed instance, whatever path they
    /// pass.
    pub fn install(path: impl Into<PathBuf>) -> Result<Arc<Reporter>, ReportError> {
        if let Some(existing) = GLOBAL.get() {
            return Ok(Arc::clone(existing));
        }
        let reporter = Arc::new(Self::open(path)?);
        Ok(Arc::clone(GLOBAL.get_or_init(|| reporter)))
    }

    /// Returns the log file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one record; failures are reported via `tracing` only.
    pub fn log(&self, level: Level, message: impl AsRef<str>) {
        let message = message.as_ref();
        if let Err(e) = self.try_log(level, message) {
            error!(
                path = %self.path.display(),
                error = %e,
                "Failed to append log record"
            );
        }
    }

    /// Shorthand for `log(Level::Info, ..)`.
    pub fn info(&self, message: impl AsRef<str>) {
        self.log(Level::Info, message);
    }

    /// Shorthand for `log(Level::Error, ..)`.
    pub fn error(&self, message: impl AsRef<str>) {
        self.log(Level::Error, message);
    }

    /// Appends one record and syncs it to disk, returning any I/O failure.
    pub fn try_log(&self, level: Level, message: &str) -> Result<(), ReportError> {
        let record = LogRecord::now(level, message);
        let mut line = record.to_line();
        line.push('\n');

        {
            let mut file = self.file.lock().unwrap_or_else(|p| p.into_inner());
            file.write_all(line.as_bytes())?;
            file.flush()?;
            file.sync_data()?;
        }

        match level {
            Level::Error => error!(target: "linelog::record", level = %level, "{}", message),
            Level::Info | Level::Log => info!(target: "linelog::record", level = %level, "{}", message),
        }

        Ok(())
    }

    /// Reads back every well-formed record currently in the log file.
    ///
    /// Lines that do not parse (e.g. written by another tool) are skipped.
    pub fn records(&self) -> io::Result<Vec<LogRecord>> {
        read_records(&self.path)
    }
}

/// Reads every well-formed record from the log file at `path`.
pub fn read_records(path: &Path) -> io::Result<Vec<LogRecord>> {
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for line in reader.lines() {
        if let Ok(record) = line?.parse::<LogRecord>() {
            records.push(record);
        }
    }
    Ok(records)
}
