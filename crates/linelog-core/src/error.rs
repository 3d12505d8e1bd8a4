//! Error types for the record model and reporter.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while setting up the durable log sink.
#[derive(Error, Debug)]
pub enum ReportError {
    /// The log directory could not be created
    #[error("Failed to create log directory {}: {source}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The log file could not be opened for appending
    #[error("Failed to open log file {}: {source}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A record could not be written or synced
    #[error("Failed to write log record: {0}")]
    Write(#[from] std::io::Error),
}

/// Errors raised when reading a formatted record line back.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordParseError {
    /// The line does not follow `[timestamp] [ LEVEL ] - message`
    #[error("Malformed record line: {line}")]
    Malformed { line: String },

    /// The timestamp section could not be parsed
    #[error("Invalid timestamp {value}: {reason}")]
    Timestamp { value: String, reason: String },

    /// The level tag is not one of INFO, ERROR, LOG
    #[error("Unknown level tag: {tag}")]
    UnknownLevel { tag: String },
}
