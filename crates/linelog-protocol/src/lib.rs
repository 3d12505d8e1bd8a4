//! linelog Protocol - Wire framing for client input
//!
//! Clients speak newline-delimited text and never receive a reply. This crate
//! turns a received chunk of bytes into classified inputs:
//! - `message` - the `ClientInput` vocabulary and the shutdown keyword
//! - `parse` - trimming and splitting a chunk into lines

pub mod message;
pub mod parse;

pub use message::{ClientInput, SHUTDOWN_KEYWORD};
pub use parse::{frame, trim_line};
