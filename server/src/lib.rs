//! The `mnemosyned` daemon.
//!
//! Wires the workspace crates into a running node: configuration from the
//! environment, `PostgreSQL` storage, cluster membership, the HTTP server and
//! the cleanup sweep. The binary in `main.rs` is a thin wrapper around
//! [`Daemon`].

#![forbid(unsafe_code)]

pub mod config;
pub mod daemon;
pub mod discovery;
pub mod telemetry;

pub use config::{Config, LogFormat};
pub use daemon::{Daemon, DaemonError};
