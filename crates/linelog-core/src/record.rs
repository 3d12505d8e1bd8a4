//! Severity levels and the on-disk record line.
//!
//! Every record is rendered as exactly one line:
//!
//! ```text
//! [16/10/2026-14:03:59] [ INFO ] - linelogd: Started.
//! [16/10/2026-14:04:02] [ LOG ] - hello
//! ```
//!
//! Levels are purely classificatory; nothing filters on them.

use std::fmt;
use std::str::FromStr;

use chrono::{Local, NaiveDateTime};

use crate::error::RecordParseError;

/// `strftime` layout of the bracketed timestamp (local time).
pub const TIMESTAMP_FORMAT: &str = "%d/%m/%Y-%H:%M:%S";

/// Severity of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    /// Lifecycle events (start, connect, disconnect, quit)
    Info,
    /// Failures
    Error,
    /// Content supplied by a client
    Log,
}

impl Level {
    /// Returns the tag written between the level brackets.
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Info => "INFO",
            Level::Error => "ERROR",
            Level::Log => "LOG",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = RecordParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "INFO" => Ok(Level::Info),
            "ERROR" => Ok(Level::Error),
            "LOG" => Ok(Level::Log),
            other => Err(RecordParseError::UnknownLevel {
                tag: other.to_string(),
            }),
        }
    }
}

/// One immutable, timestamped, leveled log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Local wall-clock time, second precision
    pub timestamp: NaiveDateTime,

    /// Severity tag
    pub level: Level,

    /// Free-form message text
    pub message: String,
}

impl LogRecord {
    /// Creates a record stamped with the current local time.
    pub fn now(level: Level, message: impl Into<String>) -> Self {
        Self {
            timestamp: Local::now().naive_local(),
            level,
            message: message.into(),
        }
    }

    /// Renders the record as a single line, without the trailing newline.
    pub fn to_line(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] [ {} ] - {}",
            self.timestamp.format(TIMESTAMP_FORMAT),
            self.level,
            self.message
        )
    }
}

impl FromStr for LogRecord {
    type Err = RecordParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let malformed = || RecordParseError::Malformed {
            line: line.to_string(),
        };

        let rest = line.strip_prefix('[').ok_or_else(malformed)?;
        let (stamp, rest) = rest.split_once("] [ ").ok_or_else(malformed)?;
        let (tag, message) = rest.split_once(" ] - ").ok_or_else(malformed)?;

        let timestamp = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT).map_err(|e| {
            RecordParseError::Timestamp {
                value: stamp.to_string(),
                reason: e.to_string(),
            }
        })?;

        Ok(Self {
            timestamp,
            level: tag.parse()?,
            message: message.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn fixed_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 7)
            .and_then(|d| d.and_hms_opt(9, 5, 1))
            .unwrap()
    }

    #[test]
    fn test_line_format() {
        let record = LogRecord {
            timestamp: fixed_time(),
            level: Level::Info,
            message: "linelogd: Started.".to_string(),
        };
        assert_eq!(
            record.to_line(),
            "[07/03/2026-09:05:01] [ INFO ] - linelogd: Started."
        );
    }

    #[test]
    fn test_level_tags() {
        assert_eq!(Level::Info.as_str(), "INFO");
        assert_eq!(Level::Error.as_str(), "ERROR");
        assert_eq!(Level::Log.as_str(), "LOG");
        assert!("WARN".parse::<Level>().is_err());
    }

    #[test]
    fn test_parse_keeps_message_verbatim() {
        let line = "[31/12/2025-23:59:59] [ LOG ] - a ] - tricky [ message";
        let record: LogRecord = line.parse().unwrap();

        assert_eq!(record.level, Level::Log);
        assert_eq!(record.message, "a ] - tricky [ message");
        assert_eq!(record.to_line(), line);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            "no brackets here".parse::<LogRecord>(),
            Err(RecordParseError::Malformed { .. })
        ));
        assert!(matches!(
            "[99/99/2025-00:00:00] [ INFO ] - x".parse::<LogRecord>(),
            Err(RecordParseError::Timestamp { .. })
        ));
        assert!(matches!(
            "[01/01/2025-00:00:00] [ DEBUG ] - x".parse::<LogRecord>(),
            Err(RecordParseError::UnknownLevel { .. })
        ));
    }

    #[test]
    fn test_now_uses_second_precision_format() {
        let record = LogRecord::now(Level::Error, "boom");
        let parsed: LogRecord = record.to_line().parse().unwrap();

        assert_eq!(parsed.level, Level::Error);
        assert_eq!(parsed.message, "boom");
        assert_eq!(
            parsed.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            record.timestamp.format(TIMESTAMP_FORMAT).to_string()
        );
    }
}
