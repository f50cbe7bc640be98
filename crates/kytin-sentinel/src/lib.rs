//! Kytin Sentinel - local daemon gating hardware signatures
//!
//! This crate provides:
//! - Daemon configuration (JSON, created with defaults on first start)
//! - Signer backend selection, with a PKCS#11 HSM backend behind `pkcs11`
//! - The daily reset scheduler
//! - IPC server and client over a Unix domain socket

pub mod config;
pub mod error;
pub mod hardware;
pub mod ipc;
pub mod scheduler;

pub use config::{BackendKind, SentinelConfig};
pub use error::{DaemonError, Result};
pub use hardware::{initialize_signer, open_signer, AutoSigner};
pub use ipc::{IpcClient, IpcServer};
