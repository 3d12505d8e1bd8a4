//! linelog Core - Log record model and durable reporter
//!
//! This crate provides the types shared by every part of the daemon:
//! - `record` - severity levels and the immutable `LogRecord` line format
//! - `reporter` - the process-wide, flush-on-write log sink
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod record;
pub mod reporter;

// Re-exports for convenience
pub use error::{RecordParseError, ReportError};
pub use record::{Level, LogRecord, TIMESTAMP_FORMAT};
pub use reporter::{read_records, Reporter};
