//! Kytin CLI - operator tooling for the Kytin Sentinel
//!
//! Talks to a running Sentinel over its IPC socket.

pub mod client;
pub mod commands;

pub use client::{ClientError, KytinClient};
pub use commands::*;
