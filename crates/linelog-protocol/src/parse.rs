//! Splitting received bytes into lines.
//!
//! A single read is bounded (1 KiB by default), so a chunk usually holds one
//! line. When TCP coalesces writes, every `\n`-terminated line in the chunk is
//! classified on its own; a trailing fragment without a newline counts as a
//! line too. Nothing is buffered across reads.

use crate::message::ClientInput;

/// Characters stripped from the end of every line.
const TRAILING: &[char] = &['\n', '\r', ' '];

/// Strips trailing newline, carriage-return and space characters.
pub fn trim_line(line: &str) -> &str {
    line.trim_end_matches(TRAILING)
}

/// Classifies every line of `chunk`, dropping the empty ones.
///
/// Invalid UTF-8 is replaced rather than rejected so no client input is ever
/// dropped silently.
pub fn frame(chunk: &[u8]) -> Vec<ClientInput> {
    String::from_utf8_lossy(chunk)
        .split('\n')
        .map(ClientInput::parse)
        .filter(|input| *input != ClientInput::Empty)
        .collect()
}
