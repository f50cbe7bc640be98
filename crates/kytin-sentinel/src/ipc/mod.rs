//! IPC surface for the CLI and the agent runtime
//!
//! Newline-delimited JSON over a Unix domain socket. The socket is created
//! with mode 0600 so only the owning user can request signatures. Policy
//! attestations are minted only on the optional admin socket.

mod client;
mod connection;
mod server;
mod types;
mod unix;

// Public API
pub use client::IpcClient;
pub use server::{IpcRole, IpcServer};
pub use types::{parse_amount, parse_base64, parse_mode, IpcRequest, IpcResponse};
