//! SentinelCore: the gate in front of the hardware signer
//!
//! Owns the Resin tank, the policy engine, the signer and the audit log
//! behind one mutex. Each operation runs entirely inside that critical
//! section: validate, check quota or policy, sign, and only then commit.
//! A rejection or a failed signature leaves every counter untouched.

use std::sync::{Mutex, MutexGuard, PoisonError};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::audit::{AuditEntry, AuditLog, AuditOperation, AuditOutcome};
use crate::hardware::{HardwareError, HardwareSigner};
use crate::policy::{PolicyEngine, PolicyUpdate, PolicyViolation, POLICY_DOMAIN};
use crate::resin::{ResinSnapshot, ResinTank};
use crate::types::{unix_timestamp, HardwareInfo, HeartbeatMode, Signature};

/// Why a request was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Request could not be decoded; no state touched
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// Lifetime balance or daily window cannot cover the cost
    #[error("Resin depleted (balance {balance}, daily remaining {daily_remaining})")]
    ResinDepleted { balance: u64, daily_remaining: u64 },

    /// Transfer rejected by the spend policy
    #[error("Policy violation: {0}")]
    PolicyViolation(PolicyViolation),

    /// Signer not initialized, shut down or unreachable
    #[error("Hardware unavailable: {0}")]
    HardwareUnavailable(String),

    /// Signer was reachable but failed or timed out
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    /// Policy update carried a missing, invalid, stale or replayed attestation
    #[error("Attestation rejected: {0}")]
    AttestationRejected(String),
}

impl Rejection {
    /// Stable machine-readable code, distinct per reason
    pub fn code(&self) -> &'static str {
        match self {
            Rejection::MalformedInput(_) => "MALFORMED_INPUT",
            Rejection::ResinDepleted { .. } => "RESIN_DEPLETED",
            Rejection::PolicyViolation(_) => "POLICY_VIOLATION",
            Rejection::HardwareUnavailable(_) => "HARDWARE_UNAVAILABLE",
            Rejection::SigningFailed(_) => "SIGNING_FAILED",
            Rejection::AttestationRejected(_) => "ATTESTATION_REJECTED",
        }
    }

    /// Structured diagnostics for callers, where the reason carries any
    pub fn detail(&self) -> Option<serde_json::Value> {
        match self {
            Rejection::ResinDepleted {
                balance,
                daily_remaining,
            } => Some(serde_json::json!({
                "balance": balance,
                "daily_remaining": daily_remaining,
            })),
            Rejection::PolicyViolation(violation) => serde_json::to_value(violation).ok(),
            _ => None,
        }
    }
}

impl From<HardwareError> for Rejection {
    fn from(err: HardwareError) -> Self {
        match err {
            HardwareError::NotInitialized
            | HardwareError::ShutDown
            | HardwareError::Unavailable(_)
            | HardwareError::InitializationFailed(_) => {
                Rejection::HardwareUnavailable(err.to_string())
            }
            HardwareError::SigningFailed(_) | HardwareError::Timeout(_) => {
                Rejection::SigningFailed(err.to_string())
            }
        }
    }
}

/// A transfer submitted for signing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// Serialized transaction bytes to sign
    pub tx: Vec<u8>,
    /// Value the transfer moves, counted against the spend policy
    pub amount: Decimal,
    /// Target program, checked against the allow-list when present
    pub program_id: Option<String>,
}

impl TransferRequest {
    pub fn new(tx: impl Into<Vec<u8>>, amount: Decimal) -> Self {
        Self {
            tx: tx.into(),
            amount,
            program_id: None,
        }
    }

    pub fn with_program(mut self, program_id: impl Into<String>) -> Self {
        self.program_id = Some(program_id.into());
        self
    }
}

/// Result of an accepted heartbeat
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatReceipt {
    pub signature: Signature,
    pub hardware_id: String,
    pub mode: HeartbeatMode,
    /// Tank state after the burn
    pub resin: ResinSnapshot,
}

/// Result of an accepted transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub signature: Signature,
    pub hardware_id: String,
    pub amount: Decimal,
    pub daily_spent: Decimal,
    pub daily_remaining: Decimal,
}

/// Hardware section of [`StatusSnapshot`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareStatus {
    pub available: bool,
    pub device_type: String,
    pub info: HardwareInfo,
}

/// Policy section of [`StatusSnapshot`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyStatus {
    pub daily_limit: Decimal,
    pub daily_spent: Decimal,
    pub daily_remaining: Decimal,
    pub max_transaction_amount: Option<Decimal>,
}

/// Consistent view of all counters, taken under one lock
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub hardware: HardwareStatus,
    pub resin: ResinSnapshot,
    pub policy: PolicyStatus,
}

struct CoreState {
    tank: ResinTank,
    policy: PolicyEngine,
    signer: Box<dyn HardwareSigner>,
    audit: AuditLog,
}

impl CoreState {
    fn record(&mut self, operation: AuditOperation, outcome: AuditOutcome) {
        let balance = self.tank.balance();
        let spent = self.policy.daily_spent();
        self.audit
            .record(unix_timestamp(), operation, outcome, balance, spent);
    }

    /// Audit and log a rejection, handing it back for return
    fn reject(&mut self, operation: AuditOperation, rejection: Rejection) -> Rejection {
        warn!(code = rejection.code(), "Request rejected: {}", rejection);
        self.record(
            operation,
            AuditOutcome::Rejected {
                code: rejection.code().to_string(),
            },
        );
        rejection
    }

    fn ensure_available(&self) -> Result<(), Rejection> {
        if self.signer.is_available() {
            Ok(())
        } else {
            Err(Rejection::HardwareUnavailable(format!(
                "{} signer is not initialized",
                self.signer.device_type()
            )))
        }
    }
}

type Clock = Box<dyn Fn() -> u64 + Send + Sync>;

/// Explicitly constructed context shared by every caller
pub struct SentinelCore {
    state: Mutex<CoreState>,
    clock: Clock,
}

impl SentinelCore {
    /// Takes ownership of all state. The signer is expected to be initialized
    /// already; if it is not, signing requests fail as hardware-unavailable.
    pub fn new(
        tank: ResinTank,
        policy: PolicyEngine,
        signer: Box<dyn HardwareSigner>,
        audit_capacity: usize,
    ) -> Self {
        Self {
            state: Mutex::new(CoreState {
                tank,
                policy,
                signer,
                audit: AuditLog::new(audit_capacity),
            }),
            clock: Box::new(unix_timestamp),
        }
    }

    /// Replace the clock used for attestation freshness
    pub fn with_clock(mut self, clock: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    fn lock(&self) -> MutexGuard<'_, CoreState> {
        // A panic inside a critical section happens before any commit, so
        // the counters behind a poisoned lock are still consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Quota-gated signature over `payload`
    pub fn heartbeat(
        &self,
        mode: HeartbeatMode,
        payload: &[u8],
    ) -> Result<HeartbeatReceipt, Rejection> {
        let mut state = self.lock();
        let operation = AuditOperation::Heartbeat { mode };

        if payload.starts_with(POLICY_DOMAIN) {
            return Err(state.reject(
                operation,
                Rejection::MalformedInput("payload uses a reserved prefix".to_string()),
            ));
        }

        if let Err(rejection) = state.ensure_available() {
            return Err(state.reject(operation, rejection));
        }

        let cost = mode.resin_cost();
        if !state.tank.can_consume(cost) {
            let rejection = Rejection::ResinDepleted {
                balance: state.tank.balance(),
                daily_remaining: state.tank.daily_remaining(),
            };
            return Err(state.reject(operation, rejection));
        }

        let signature = match state.signer.sign(payload) {
            Ok(signature) => signature,
            Err(e) => return Err(state.reject(operation, e.into())),
        };

        // Cannot fail: can_consume held and the lock was never released
        state.tank.consume(cost);

        let hardware_id = state.signer.hardware_info().hardware_id;
        state.record(
            operation,
            AuditOutcome::Signed {
                signature: signature.to_base64(),
            },
        );

        debug!(
            mode = %mode,
            balance = state.tank.balance(),
            daily_remaining = state.tank.daily_remaining(),
            "Heartbeat signed"
        );

        Ok(HeartbeatReceipt {
            signature,
            hardware_id,
            mode,
            resin: state.tank.snapshot(),
        })
    }

    /// Policy-gated signature over a transaction
    pub fn sign_transfer(&self, request: TransferRequest) -> Result<TransferReceipt, Rejection> {
        let mut state = self.lock();
        let TransferRequest {
            tx,
            amount,
            program_id,
        } = request;
        let operation = AuditOperation::SignTransfer {
            amount,
            program_id: program_id.clone(),
        };

        if amount < Decimal::ZERO {
            return Err(state.reject(
                operation,
                Rejection::MalformedInput(format!("negative amount {}", amount)),
            ));
        }
        if tx.starts_with(POLICY_DOMAIN) {
            return Err(state.reject(
                operation,
                Rejection::MalformedInput("transaction uses a reserved prefix".to_string()),
            ));
        }

        let checked = state
            .policy
            .check_program(program_id.as_deref(), amount)
            .and_then(|()| state.policy.check_limits(amount));
        if let Err(violation) = checked {
            return Err(state.reject(operation, Rejection::PolicyViolation(violation)));
        }

        if let Err(rejection) = state.ensure_available() {
            return Err(state.reject(operation, rejection));
        }

        let signature = match state.signer.sign(&tx) {
            Ok(signature) => signature,
            Err(e) => return Err(state.reject(operation, e.into())),
        };

        state.policy.commit(amount);

        let hardware_id = state.signer.hardware_info().hardware_id;
        state.record(
            operation,
            AuditOutcome::Signed {
                signature: signature.to_base64(),
            },
        );

        info!(
            amount = %amount,
            daily_spent = %state.policy.daily_spent(),
            "Transfer signed"
        );

        Ok(TransferReceipt {
            signature,
            hardware_id,
            amount,
            daily_spent: state.policy.daily_spent(),
            daily_remaining: state.policy.daily_remaining(),
        })
    }

    /// Snapshot of hardware, Resin and policy state
    pub fn status(&self) -> StatusSnapshot {
        let state = self.lock();
        let limits = state.policy.limits();

        StatusSnapshot {
            hardware: HardwareStatus {
                available: state.signer.is_available(),
                device_type: state.signer.device_type().to_string(),
                info: state.signer.hardware_info(),
            },
            resin: state.tank.snapshot(),
            policy: PolicyStatus {
                daily_limit: limits.daily_spend_limit,
                daily_spent: state.policy.daily_spent(),
                daily_remaining: state.policy.daily_remaining(),
                max_transaction_amount: limits.max_transaction_amount,
            },
        }
    }

    /// Open a new day window for both the tank and the policy
    pub fn reset_daily(&self) {
        let mut state = self.lock();
        state.tank.reset_daily();
        state.policy.reset_daily();
        state.record(AuditOperation::DailyReset, AuditOutcome::Applied);
        info!("Daily counters reset");
    }

    /// Sign a policy update with the Sentinel's own key
    pub fn attest_policy(&self, update: &PolicyUpdate) -> Result<Signature, Rejection> {
        let mut state = self.lock();
        let operation = AuditOperation::PolicyAttestation {
            issued_at: update.issued_at,
        };

        let payload = match update.limits.validate().and_then(|()| update.canonical_bytes()) {
            Ok(payload) => payload,
            Err(e) => {
                return Err(state.reject(operation, Rejection::MalformedInput(e.to_string())))
            }
        };

        if let Err(rejection) = state.ensure_available() {
            return Err(state.reject(operation, rejection));
        }
        let signature = match state.signer.sign(&payload) {
            Ok(signature) => signature,
            Err(e) => return Err(state.reject(operation, e.into())),
        };

        state.record(
            operation,
            AuditOutcome::Signed {
                signature: signature.to_base64(),
            },
        );
        info!(issued_at = update.issued_at, "Policy update attested");
        Ok(signature)
    }

    /// Replace the policy limits if `attestation` is valid and fresh
    pub fn update_policy(
        &self,
        update: PolicyUpdate,
        attestation: &Signature,
    ) -> Result<(), Rejection> {
        let now = (self.clock)();
        let mut state = self.lock();
        let public_key = state.signer.get_public_key();

        match state.policy.update_policy(update, attestation, &public_key, now) {
            Ok(()) => {
                state.record(AuditOperation::PolicyUpdate, AuditOutcome::Applied);
                Ok(())
            }
            Err(e) => Err(state.reject(
                AuditOperation::PolicyUpdate,
                Rejection::AttestationRejected(e.to_string()),
            )),
        }
    }

    /// Signer public key; empty when the signer is not initialized
    pub fn public_key(&self) -> Vec<u8> {
        self.lock().signer.get_public_key()
    }

    pub fn hardware_info(&self) -> HardwareInfo {
        self.lock().signer.hardware_info()
    }

    /// Most recent audit entries, oldest first
    pub fn audit(&self, last: Option<usize>) -> Vec<AuditEntry> {
        self.lock().audit.recent(last)
    }

    /// Release the signer. Idempotent; later signing requests are rejected.
    pub fn shutdown(&self) {
        let mut state = self.lock();
        state.signer.shutdown();
        info!("Sentinel core shut down");
    }
}
