//! Client for communicating with the Kytin Sentinel

use std::path::PathBuf;

use rust_decimal::Decimal;

use kytin_core::encoding::to_base64;
use kytin_core::{AuditEntry, HeartbeatMode, PolicyUpdate, Signature, StatusSnapshot};
use kytin_sentinel::error::DaemonError;
use kytin_sentinel::ipc::{IpcClient, IpcRequest, IpcResponse};
use kytin_sentinel::SentinelConfig;

/// Client for the Kytin Sentinel
pub struct KytinClient {
    inner: IpcClient,
}

/// Error type for client operations
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Sentinel not running")]
    DaemonNotRunning,

    /// The Sentinel refused the request; `code` is stable across versions
    #[error("Rejected ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("Request failed: {0}")]
    RequestFailed(String),

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Sentinel error: {0}")]
    DaemonError(String),
}

impl ClientError {
    fn from_daemon_error(e: DaemonError) -> Self {
        match &e {
            DaemonError::Ipc(msg) if msg.contains("not running") => ClientError::DaemonNotRunning,
            _ => ClientError::DaemonError(e.to_string()),
        }
    }

    /// Rejection code, when the Sentinel refused the request
    pub fn rejection_code(&self) -> Option<&str> {
        match self {
            ClientError::Rejected { code, .. } => Some(code),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Result of an accepted heartbeat
#[derive(Debug, Clone)]
pub struct HeartbeatResult {
    pub signature: String,
    pub algorithm: String,
    pub timestamp: u64,
    pub hardware_id: String,
    pub mode: HeartbeatMode,
    pub resin_balance: u64,
    pub daily_remaining: u64,
}

/// Result of an accepted transfer
#[derive(Debug, Clone)]
pub struct TransferResult {
    pub signature: String,
    pub algorithm: String,
    pub hardware_id: String,
    pub amount: Decimal,
    pub daily_spent: Decimal,
    pub daily_remaining: Decimal,
}

/// Map anything that is not the expected variant to an error
fn unexpected(response: IpcResponse) -> ClientError {
    match response {
        IpcResponse::Rejected { code, message, .. } => ClientError::Rejected { code, message },
        IpcResponse::Error { message } => ClientError::RequestFailed(message),
        other => ClientError::UnexpectedResponse(format!("{:?}", other)),
    }
}

impl KytinClient {
    /// Client for the default socket path
    pub fn new() -> Self {
        Self::with_socket_path(SentinelConfig::default_ipc_path())
    }

    /// Create a new client with a custom socket path
    pub fn with_socket_path(socket_path: PathBuf) -> Self {
        Self {
            inner: IpcClient::new(socket_path),
        }
    }

    async fn request(&self, request: IpcRequest) -> Result<IpcResponse> {
        self.inner
            .request(&request)
            .await
            .map_err(ClientError::from_daemon_error)
    }

    /// Check if the Sentinel is running
    pub async fn ping(&self) -> Result<String> {
        match self.request(IpcRequest::Ping).await? {
            IpcResponse::Pong { version } => Ok(version),
            other => Err(unexpected(other)),
        }
    }

    pub async fn status(&self) -> Result<StatusSnapshot> {
        match self.request(IpcRequest::Status).await? {
            IpcResponse::Status { status } => Ok(status),
            other => Err(unexpected(other)),
        }
    }

    pub async fn heartbeat(&self, mode: HeartbeatMode, payload: &[u8]) -> Result<HeartbeatResult> {
        let request = IpcRequest::Heartbeat {
            mode: Some(mode.to_string()),
            payload: to_base64(payload),
        };

        match self.request(request).await? {
            IpcResponse::Heartbeat {
                signature,
                algorithm,
                timestamp,
                hardware_id,
                mode,
                resin_balance,
                daily_remaining,
            } => Ok(HeartbeatResult {
                signature,
                algorithm,
                timestamp,
                hardware_id,
                mode,
                resin_balance,
                daily_remaining,
            }),
            other => Err(unexpected(other)),
        }
    }

    pub async fn sign_transfer(
        &self,
        tx: &[u8],
        amount: Decimal,
        program_id: Option<String>,
    ) -> Result<TransferResult> {
        let request = IpcRequest::SignTransfer {
            tx: to_base64(tx),
            amount: amount.to_string(),
            program_id,
        };

        match self.request(request).await? {
            IpcResponse::Transfer {
                signature,
                algorithm,
                hardware_id,
                amount,
                daily_spent,
                daily_remaining,
                ..
            } => Ok(TransferResult {
                signature,
                algorithm,
                hardware_id,
                amount,
                daily_spent,
                daily_remaining,
            }),
            other => Err(unexpected(other)),
        }
    }

    pub async fn reset_daily(&self) -> Result<()> {
        match self.request(IpcRequest::ResetDaily).await? {
            IpcResponse::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Public key (hex) and its fingerprint
    pub async fn public_key(&self) -> Result<(String, String)> {
        match self.request(IpcRequest::PublicKey).await? {
            IpcResponse::PublicKey {
                public_key,
                fingerprint,
            } => Ok((public_key, fingerprint)),
            other => Err(unexpected(other)),
        }
    }

    pub async fn audit(&self, last: Option<usize>) -> Result<Vec<AuditEntry>> {
        match self.request(IpcRequest::Audit { last }).await? {
            IpcResponse::Audit { entries } => Ok(entries),
            other => Err(unexpected(other)),
        }
    }

    pub async fn attest_policy(&self, update: &PolicyUpdate) -> Result<Signature> {
        let request = IpcRequest::AttestPolicy {
            update: update.clone(),
        };
        match self.request(request).await? {
            IpcResponse::Attestation { attestation } => Ok(attestation),
            other => Err(unexpected(other)),
        }
    }

    pub async fn update_policy(&self, update: PolicyUpdate, attestation: Signature) -> Result<()> {
        let request = IpcRequest::UpdatePolicy {
            update,
            attestation,
        };
        match self.request(request).await? {
            IpcResponse::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

impl Default for KytinClient {
    fn default() -> Self {
        Self::new()
    }
}
