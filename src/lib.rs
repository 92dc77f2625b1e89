//! CodeChat relay: a small real-time text relay over TCP.
//!
//! Each client holds one long-lived connection and exchanges chat messages
//! and a shared "current file" through the central relay process. Commands
//! arrive as back-to-back JSON objects; every command produces one status
//! response to its sender, and most also fan a message out to every other
//! connected session. Each module focuses on a concrete responsibility:
//!
//! - [`cli`] parses the command-line interface for the relay binary.
//! - [`protocol`] defines the JSON wire shapes plus the streaming frame
//!   reader and writer used on both ends of a connection.
//! - [`command`] validates decoded frames into typed commands and interprets
//!   them into broadcast envelopes.
//! - [`relay`] accepts TCP connections, runs one session task per client,
//!   and serializes all shared state behind a single broadcaster task.
//!
//! Integration tests use this crate directly to exercise the relay over real
//! sockets.

pub mod cli;
pub mod command;
pub mod protocol;
pub mod relay;
