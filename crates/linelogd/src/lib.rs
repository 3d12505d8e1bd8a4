//! linelog Daemon - singleton TCP line logger
//!
//! This crate provides the daemon's moving parts:
//! - `lock` - singleton guard on an advisory file lock
//! - `server` - single-task TCP multiplexer
//! - `shutdown` - set-once shutdown flag and signal listener
//! - `daemon` - startup orchestration (privilege, lock, detach, serve)
//! - `config` / `cli` - configuration layering and the command line
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       linelogd                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │    LockFile     │     │        Multiplexer          │   │
//! │  │ (flock, PID)    │────▶│ (listener + clients, 1 task)│   │
//! │  └─────────────────┘     └──────┬───────────────┬──────┘   │
//! │                                 │ records       │ observes  │
//! │                                 ▼               ▼           │
//! │                     ┌──────────────────┐ ┌──────────────┐  │
//! │                     │    Reporter      │ │ ShutdownFlag │◀─ signals
//! │                     │ (flush-on-write) │ │  (set once)  │  │
//! │                     └──────────────────┘ └──────────────┘  │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! Production code in this crate avoids `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()` and `todo!()`; fallible operations return
//! `Result` or `Option`.

pub mod cli;
pub mod config;
pub mod daemon;
pub mod detach;
pub mod lock;
pub mod privilege;
pub mod server;
pub mod shutdown;
