//! Accumulator protocol engine.
//!
//! - `protocol`: command/answer grammar
//! - `accumulator`: per-connection running value
//! - `framing`: newline-delimited messages over any async byte stream
//! - `transport`: Unix, TCP and in-memory connection bootstrap
//! - `session`: client and server session handlers
//! - `orchestrator`: server loop, client group, and the race between them
//! - `config`: CLI and TOML configuration

pub mod accumulator;
pub mod config;
pub mod framing;
pub mod orchestrator;
pub mod protocol;
pub mod session;
pub mod transport;
