//! IPC server implementation

use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, error, info, warn};

use kytin_core::crypto::key_fingerprint;
use kytin_core::encoding::to_hex;
use kytin_core::{Rejection, SentinelCore, TransferRequest};

use crate::error::Result;

use super::connection::{IpcTransport, PlatformTransport};
use super::types::{parse_amount, parse_base64, parse_mode, IpcRequest, IpcResponse};

/// Which request set a socket serves
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IpcRole {
    /// Agent-facing socket; cannot mint policy attestations
    Agent,
    /// Operator socket; serves every request
    Admin,
}

/// IPC server
pub struct IpcServer {
    /// Socket path
    socket_path: PathBuf,

    /// Shared signing core
    core: Arc<SentinelCore>,

    role: IpcRole,
}

impl IpcServer {
    /// Agent-facing IPC server
    pub fn new(socket_path: PathBuf, core: Arc<SentinelCore>) -> Self {
        Self {
            socket_path,
            core,
            role: IpcRole::Agent,
        }
    }

    /// Operator IPC server, the only one that answers `AttestPolicy`
    pub fn admin(socket_path: PathBuf, core: Arc<SentinelCore>) -> Self {
        Self {
            socket_path,
            core,
            role: IpcRole::Admin,
        }
    }

    /// Serve until the process ends
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serve until `shutdown` resolves, then remove the socket
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let transport = PlatformTransport::bind(&self.socket_path).await?;
        info!(role = ?self.role, "IPC server listening on {:?}", self.socket_path);

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = transport.accept() => match accepted {
                    Ok(stream) => {
                        let core = Arc::clone(&self.core);
                        let role = self.role;
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, core, role).await {
                                error!("Connection error: {}", e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Accept error: {}", e);
                    }
                },
            }
        }

        transport.cleanup().await?;
        info!("IPC server stopped");
        Ok(())
    }
}

/// Handle a single IPC connection
async fn handle_connection<S>(stream: S, core: Arc<SentinelCore>, role: IpcRole) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (reader, mut writer) = tokio::io::split(stream);
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    while reader.read_line(&mut line).await? > 0 {
        if line.trim().is_empty() {
            line.clear();
            continue;
        }

        let response = match serde_json::from_str::<IpcRequest>(&line) {
            Ok(request) => {
                debug!("Received IPC request: {:?}", request);
                handle_request(request, Arc::clone(&core), role).await
            }
            Err(e) => Rejection::MalformedInput(format!("Invalid request: {}", e)).into(),
        };

        send_response(&mut writer, &response).await?;
        line.clear();
    }

    Ok(())
}

/// Run a core operation off the async runtime
async fn with_core<T, F>(core: Arc<SentinelCore>, op: F) -> Result<T>
where
    F: FnOnce(&SentinelCore) -> T + Send + 'static,
    T: Send + 'static,
{
    Ok(tokio::task::spawn_blocking(move || op(&core)).await?)
}

/// Handle a single request
pub(crate) async fn handle_request(
    request: IpcRequest,
    core: Arc<SentinelCore>,
    role: IpcRole,
) -> IpcResponse {
    let outcome = match request {
        IpcRequest::Ping => {
            return IpcResponse::Pong {
                version: env!("CARGO_PKG_VERSION").to_string(),
            }
        }

        IpcRequest::Status => with_core(core, |core| IpcResponse::Status {
            status: core.status(),
        })
        .await,

        IpcRequest::Heartbeat { mode, payload } => {
            let decoded = parse_mode(mode.as_deref()).and_then(|mode| {
                parse_base64("payload", &payload).map(|payload| (mode, payload))
            });
            let (mode, payload) = match decoded {
                Ok(decoded) => decoded,
                Err(rejection) => return rejection.into(),
            };

            with_core(core, move |core| match core.heartbeat(mode, &payload) {
                Ok(receipt) => IpcResponse::Heartbeat {
                    signature: receipt.signature.to_base64(),
                    algorithm: receipt.signature.algorithm.to_string(),
                    timestamp: receipt.signature.timestamp,
                    hardware_id: receipt.hardware_id,
                    mode: receipt.mode,
                    resin_balance: receipt.resin.balance,
                    daily_remaining: receipt.resin.daily_remaining,
                },
                Err(rejection) => rejection.into(),
            })
            .await
        }

        IpcRequest::SignTransfer {
            tx,
            amount,
            program_id,
        } => {
            let decoded = parse_base64("tx", &tx).and_then(|tx| {
                parse_amount(&amount).map(|amount| TransferRequest::new(tx, amount))
            });
            let mut request = match decoded {
                Ok(request) => request,
                Err(rejection) => return rejection.into(),
            };
            request.program_id = program_id;

            with_core(core, move |core| match core.sign_transfer(request) {
                Ok(receipt) => IpcResponse::Transfer {
                    signature: receipt.signature.to_base64(),
                    algorithm: receipt.signature.algorithm.to_string(),
                    timestamp: receipt.signature.timestamp,
                    hardware_id: receipt.hardware_id,
                    amount: receipt.amount,
                    daily_spent: receipt.daily_spent,
                    daily_remaining: receipt.daily_remaining,
                },
                Err(rejection) => rejection.into(),
            })
            .await
        }

        IpcRequest::ResetDaily => with_core(core, |core| {
            core.reset_daily();
            IpcResponse::Ok
        })
        .await,

        IpcRequest::PublicKey => with_core(core, |core| {
            let public_key = core.public_key();
            if public_key.is_empty() {
                return IpcResponse::from(Rejection::HardwareUnavailable(
                    "signer is not initialized".to_string(),
                ));
            }
            IpcResponse::PublicKey {
                fingerprint: key_fingerprint(&public_key),
                public_key: to_hex(&public_key),
            }
        })
        .await,

        IpcRequest::Audit { last } => with_core(core, move |core| IpcResponse::Audit {
            entries: core.audit(last),
        })
        .await,

        IpcRequest::AttestPolicy { .. } if role == IpcRole::Agent => {
            warn!("Policy attestation requested on the agent socket");
            return Rejection::AttestationRejected(
                "policy attestation is only served on the admin socket".to_string(),
            )
            .into();
        }

        IpcRequest::AttestPolicy { update } => {
            with_core(core, move |core| match core.attest_policy(&update) {
                Ok(attestation) => IpcResponse::Attestation { attestation },
                Err(rejection) => rejection.into(),
            })
            .await
        }

        IpcRequest::UpdatePolicy {
            update,
            attestation,
        } => with_core(core, move |core| match core.update_policy(update, &attestation) {
            Ok(()) => IpcResponse::Ok,
            Err(rejection) => rejection.into(),
        })
        .await,
    };

    outcome.unwrap_or_else(|e| IpcResponse::Error {
        message: e.to_string(),
    })
}

/// Send a response
async fn send_response<W>(writer: &mut W, response: &IpcResponse) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let json = serde_json::to_string(response)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use kytin_core::{HardwareSigner, PolicyEngine, PolicyLimits, ResinTank, SimulatedSigner};
    use std::time::Duration;

    fn core() -> Arc<SentinelCore> {
        let mut signer = SimulatedSigner::with_seed(5);
        signer.initialize().unwrap();
        Arc::new(SentinelCore::new(
            ResinTank::new(10, 10),
            PolicyEngine::new(PolicyLimits::default(), Duration::from_secs(300)),
            Box::new(signer),
            32,
        ))
    }

    fn rejected_code(response: IpcResponse) -> String {
        match response {
            IpcResponse::Rejected { code, .. } => code,
            other => panic!("expected rejection, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_undecodable_fields_are_malformed() {
        let core = core();

        let bad_payload = IpcRequest::Heartbeat {
            mode: None,
            payload: "not base64!".to_string(),
        };
        assert_eq!(
            rejected_code(handle_request(bad_payload, core.clone(), IpcRole::Agent).await),
            "MALFORMED_INPUT"
        );

        let bad_mode = IpcRequest::Heartbeat {
            mode: Some("HYPER".to_string()),
            payload: String::new(),
        };
        assert_eq!(
            rejected_code(handle_request(bad_mode, core.clone(), IpcRole::Agent).await),
            "MALFORMED_INPUT"
        );

        let bad_amount = IpcRequest::SignTransfer {
            tx: "AA==".to_string(),
            amount: "1,5".to_string(),
            program_id: None,
        };
        assert_eq!(
            rejected_code(handle_request(bad_amount, core.clone(), IpcRole::Agent).await),
            "MALFORMED_INPUT"
        );

        assert_eq!(core.status().resin.balance, 10);
    }

    #[tokio::test]
    async fn test_heartbeat_defaults_to_eco() {
        let core = core();
        let response = handle_request(
            IpcRequest::Heartbeat {
                mode: None,
                payload: "aGVsbG8=".to_string(),
            },
            core.clone(),
            IpcRole::Agent,
        )
        .await;

        match response {
            IpcResponse::Heartbeat {
                mode,
                resin_balance,
                algorithm,
                ..
            } => {
                assert_eq!(mode, kytin_core::HeartbeatMode::Eco);
                assert_eq!(resin_balance, 9);
                assert_eq!(algorithm, "SIM-ECDSA-secp256k1");
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_public_key_is_hex() {
        match handle_request(IpcRequest::PublicKey, core(), IpcRole::Agent).await {
            IpcResponse::PublicKey {
                public_key,
                fingerprint,
            } => {
                assert_eq!(public_key.len(), 130);
                assert!(public_key.starts_with("04"));
                assert_eq!(fingerprint.len(), 16);
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    fn limit_raise() -> kytin_core::PolicyUpdate {
        kytin_core::PolicyUpdate::new(
            PolicyLimits {
                daily_spend_limit: rust_decimal::Decimal::from(1_000_000),
                ..PolicyLimits::default()
            },
            kytin_core::types::unix_timestamp(),
        )
    }

    #[tokio::test]
    async fn test_agent_socket_cannot_attest_policy() {
        let core = core();
        let response = handle_request(
            IpcRequest::AttestPolicy {
                update: limit_raise(),
            },
            core.clone(),
            IpcRole::Agent,
        )
        .await;

        assert_eq!(rejected_code(response), "ATTESTATION_REJECTED");
        assert_eq!(core.status().policy.daily_limit, rust_decimal::Decimal::TEN);
        assert!(core.audit(None).is_empty());
    }

    #[tokio::test]
    async fn test_admin_socket_attests_policy() {
        let core = core();
        let update = limit_raise();

        let attestation = match handle_request(
            IpcRequest::AttestPolicy {
                update: update.clone(),
            },
            core.clone(),
            IpcRole::Admin,
        )
        .await
        {
            IpcResponse::Attestation { attestation } => attestation,
            other => panic!("unexpected response {:?}", other),
        };

        // Verification alone stays available to the agent
        let applied = handle_request(
            IpcRequest::UpdatePolicy {
                update,
                attestation,
            },
            core.clone(),
            IpcRole::Agent,
        )
        .await;
        assert!(matches!(applied, IpcResponse::Ok));
        assert_eq!(
            core.status().policy.daily_limit,
            rust_decimal::Decimal::from(1_000_000)
        );
    }
}
