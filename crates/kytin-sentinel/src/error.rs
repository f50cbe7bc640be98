//! Error types for the Kytin Sentinel daemon

use thiserror::Error;

use kytin_core::HardwareError;

/// Result type alias for daemon operations
pub type Result<T> = std::result::Result<T, DaemonError>;

/// Errors that can occur in the daemon
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Core library error
    #[error("Core error: {0}")]
    Core(#[from] kytin_core::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Signer backend error
    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),

    /// No signer backend could be brought up at startup
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// IPC error
    #[error("IPC error: {0}")]
    Ipc(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// A blocking core call panicked or was cancelled
    #[error("Background task failed: {0}")]
    Task(String),

    /// Timeout
    #[error("Operation timed out")]
    Timeout,
}

impl From<serde_json::Error> for DaemonError {
    fn from(e: serde_json::Error) -> Self {
        DaemonError::Serialization(e.to_string())
    }
}

impl From<tokio::task::JoinError> for DaemonError {
    fn from(e: tokio::task::JoinError) -> Self {
        DaemonError::Task(e.to_string())
    }
}
