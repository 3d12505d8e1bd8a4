//! Client input vocabulary.

use crate::parse::trim_line;

/// Literal line that asks the daemon to shut down (case-sensitive).
pub const SHUTDOWN_KEYWORD: &str = "quit";

/// One classified line of client input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientInput {
    /// Nothing left after trimming; silently ignored
    Empty,

    /// The shutdown keyword
    Shutdown,

    /// Any other text, to be logged verbatim
    Message(String),
}

impl ClientInput {
    /// Trims trailing newline, carriage-return and space characters from
    /// `line` and classifies what is left.
    pub fn parse(line: &str) -> Self {
        match trim_line(line) {
            "" => ClientInput::Empty,
            SHUTDOWN_KEYWORD => ClientInput::Shutdown,
            text => ClientInput::Message(text.to_string()),
        }
    }

    /// Returns true for the shutdown keyword.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, ClientInput::Shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_is_exact_and_case_sensitive() {
        assert_eq!(ClientInput::parse("quit"), ClientInput::Shutdown);
        assert_eq!(ClientInput::parse("quit\r\n"), ClientInput::Shutdown);
        assert_eq!(ClientInput::parse("quit   \n"), ClientInput::Shutdown);
        assert_eq!(
            ClientInput::parse("QUIT\n"),
            ClientInput::Message("QUIT".to_string())
        );
        assert_eq!(
            ClientInput::parse("quit now\n"),
            ClientInput::Message("quit now".to_string())
        );
        assert_eq!(
            ClientInput::parse(" quit\n"),
            ClientInput::Message(" quit".to_string())
        );
    }

    #[test]
    fn test_blank_lines_are_empty() {
        assert_eq!(ClientInput::parse(""), ClientInput::Empty);
        assert_eq!(ClientInput::parse("\n"), ClientInput::Empty);
        assert_eq!(ClientInput::parse(" \r\n"), ClientInput::Empty);
    }

    #[test]
    fn test_message_keeps_leading_and_inner_whitespace() {
        assert_eq!(
            ClientInput::parse("  hello   world \r\n"),
            ClientInput::Message("  hello   world".to_string())
        );
    }
}
