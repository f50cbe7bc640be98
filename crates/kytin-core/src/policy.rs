//! Spend policy engine
//!
//! Tracks cumulative spend against a daily ceiling and validates each request
//! against the per-transaction cap and the program allow-list. Checking and
//! committing are separate steps: the core checks, signs, and only then
//! commits, so a failed signature never counts against the budget.
//!
//! Limits can only be replaced by an update that carries a fresh signature
//! from the Sentinel's own signer over [`PolicyUpdate::canonical_bytes`].

use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::crypto;
use crate::error::{Error as CoreError, Result};
use crate::types::Signature;

/// Domain prefix of every policy-update attestation payload
pub const POLICY_DOMAIN: &[u8] = b"KYTIN-POLICY-UPDATE-V1\n";

/// Tolerated clock skew for attestations issued "in the future", in seconds
const CLOCK_SKEW_SECS: u64 = 30;

/// Spend limits enforced on every transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyLimits {
    /// Per-transaction cap; `None` disables it
    #[serde(default)]
    pub max_transaction_amount: Option<Decimal>,

    /// Ceiling on the sum of accepted transfers per day
    pub daily_spend_limit: Decimal,

    /// Program identifiers a transfer may target; empty allows any
    #[serde(default)]
    pub allowed_programs: BTreeSet<String>,

    /// Reject over-cap transfers as needing user approval instead of as a
    /// hard cap violation
    #[serde(default)]
    pub require_user_approval_above: bool,
}

impl Default for PolicyLimits {
    fn default() -> Self {
        Self {
            max_transaction_amount: None,
            daily_spend_limit: Decimal::TEN,
            allowed_programs: BTreeSet::new(),
            require_user_approval_above: false,
        }
    }
}

impl PolicyLimits {
    /// Reject nonsensical limits
    pub fn validate(&self) -> Result<()> {
        if self.daily_spend_limit < Decimal::ZERO {
            return Err(CoreError::InvalidPolicy(
                "daily_spend_limit must not be negative".to_string(),
            ));
        }
        if let Some(max) = self.max_transaction_amount {
            if max < Decimal::ZERO {
                return Err(CoreError::InvalidPolicy(
                    "max_transaction_amount must not be negative".to_string(),
                ));
            }
        }
        if self.allowed_programs.iter().any(|p| p.trim().is_empty()) {
            return Err(CoreError::InvalidPolicy(
                "allowed_programs must not contain empty identifiers".to_string(),
            ));
        }
        Ok(())
    }
}

/// Which rule a transfer broke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    DailyLimit,
    TransactionCap,
    ApprovalRequired,
    ProgramNotAllowed,
}

impl fmt::Display for ViolationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ViolationKind::DailyLimit => "transaction would exceed daily spending limit",
            ViolationKind::TransactionCap => "amount exceeds per-transaction cap",
            ViolationKind::ApprovalRequired => "amount requires user approval",
            ViolationKind::ProgramNotAllowed => "program is not on the allow-list",
        };
        f.write_str(s)
    }
}

/// Diagnostics for a rejected transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{kind} (limit {limit}, spent {spent}, requested {requested})")]
pub struct PolicyViolation {
    pub kind: ViolationKind,
    /// The limit that was hit
    pub limit: Decimal,
    /// Spend committed so far today
    pub spent: Decimal,
    /// Amount of the rejected request
    pub requested: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub program_id: Option<String>,
}

/// A proposed replacement of the policy limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyUpdate {
    pub limits: PolicyLimits,
    /// Unix timestamp (seconds) at which the update was issued
    pub issued_at: u64,
}

impl PolicyUpdate {
    pub fn new(limits: PolicyLimits, issued_at: u64) -> Self {
        Self { limits, issued_at }
    }

    /// Bytes an attestation must sign: domain prefix plus compact JSON.
    /// Field order is fixed by the struct and programs are kept sorted.
    pub fn canonical_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = POLICY_DOMAIN.to_vec();
        bytes.extend_from_slice(&serde_json::to_vec(self)?);
        Ok(bytes)
    }
}

/// Why a policy update was refused
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttestationError {
    #[error("attestation signature invalid: {0}")]
    InvalidSignature(String),

    #[error("attestation is stale (issued at {issued_at}, now {now})")]
    Stale { issued_at: u64, now: u64 },

    #[error("attestation issued in the future (issued at {issued_at}, now {now})")]
    FromFuture { issued_at: u64, now: u64 },

    #[error("attestation replayed (issued at {issued_at}, last accepted {last_accepted})")]
    Replayed { issued_at: u64, last_accepted: u64 },

    #[error("invalid policy: {0}")]
    InvalidPolicy(String),
}

/// Policy state owned by the core
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    limits: PolicyLimits,
    daily_spent: Decimal,
    attestation_max_age: Duration,
    last_update_issued_at: Option<u64>,
}

impl PolicyEngine {
    pub fn new(limits: PolicyLimits, attestation_max_age: Duration) -> Self {
        Self {
            limits,
            daily_spent: Decimal::ZERO,
            attestation_max_age,
            last_update_issued_at: None,
        }
    }

    pub fn limits(&self) -> &PolicyLimits {
        &self.limits
    }

    pub fn daily_spent(&self) -> Decimal {
        self.daily_spent
    }

    pub fn daily_remaining(&self) -> Decimal {
        (self.limits.daily_spend_limit - self.daily_spent).max(Decimal::ZERO)
    }

    /// Read-only check of `amount` against the per-transaction cap and the
    /// remaining daily budget. Spending exactly the remaining budget is allowed.
    pub fn check_limits(&self, amount: Decimal) -> std::result::Result<(), PolicyViolation> {
        if let Some(max) = self.limits.max_transaction_amount {
            if amount > max {
                let kind = if self.limits.require_user_approval_above {
                    ViolationKind::ApprovalRequired
                } else {
                    ViolationKind::TransactionCap
                };
                return Err(self.violation(kind, max, amount, None));
            }
        }

        let within_daily = self
            .daily_spent
            .checked_add(amount)
            .map(|total| total <= self.limits.daily_spend_limit)
            .unwrap_or(false);

        if !within_daily {
            return Err(self.violation(
                ViolationKind::DailyLimit,
                self.limits.daily_spend_limit,
                amount,
                None,
            ));
        }

        Ok(())
    }

    /// Convenience form of [`Self::check_limits`]
    pub fn passes(&self, amount: Decimal) -> bool {
        self.check_limits(amount).is_ok()
    }

    /// Check a target program against the allow-list. Transfers that name no
    /// program, and engines with an empty list, always pass.
    pub fn check_program(
        &self,
        program_id: Option<&str>,
        amount: Decimal,
    ) -> std::result::Result<(), PolicyViolation> {
        match program_id {
            Some(program)
                if !self.limits.allowed_programs.is_empty()
                    && !self.limits.allowed_programs.contains(program) =>
            {
                Err(self.violation(
                    ViolationKind::ProgramNotAllowed,
                    self.limits.daily_spend_limit,
                    amount,
                    Some(program.to_string()),
                ))
            }
            _ => Ok(()),
        }
    }

    /// Record an accepted transfer. Only called after a successful sign.
    pub fn commit(&mut self, amount: Decimal) {
        self.daily_spent += amount;
    }

    /// Zero the daily spend counter
    pub fn reset_daily(&mut self) {
        self.daily_spent = Decimal::ZERO;
    }

    /// Replace the limits if `attestation` is a fresh signature over the
    /// update's canonical bytes from `public_key`.
    pub fn update_policy(
        &mut self,
        update: PolicyUpdate,
        attestation: &Signature,
        public_key: &[u8],
        now: u64,
    ) -> std::result::Result<(), AttestationError> {
        update
            .limits
            .validate()
            .map_err(|e| AttestationError::InvalidPolicy(e.to_string()))?;

        let payload = update
            .canonical_bytes()
            .map_err(|e| AttestationError::InvalidPolicy(e.to_string()))?;

        crypto::verify_signature(public_key, &payload, attestation)
            .map_err(|e| AttestationError::InvalidSignature(e.to_string()))?;

        if update.issued_at > now.saturating_add(CLOCK_SKEW_SECS) {
            return Err(AttestationError::FromFuture {
                issued_at: update.issued_at,
                now,
            });
        }
        if now.saturating_sub(update.issued_at) > self.attestation_max_age.as_secs() {
            return Err(AttestationError::Stale {
                issued_at: update.issued_at,
                now,
            });
        }
        if let Some(last_accepted) = self.last_update_issued_at {
            if update.issued_at <= last_accepted {
                return Err(AttestationError::Replayed {
                    issued_at: update.issued_at,
                    last_accepted,
                });
            }
        }

        info!(
            daily_spend_limit = %update.limits.daily_spend_limit,
            programs = update.limits.allowed_programs.len(),
            "Policy limits replaced"
        );

        self.limits = update.limits;
        self.last_update_issued_at = Some(update.issued_at);
        Ok(())
    }

    fn violation(
        &self,
        kind: ViolationKind,
        limit: Decimal,
        requested: Decimal,
        program_id: Option<String>,
    ) -> PolicyViolation {
        PolicyViolation {
            kind,
            limit,
            spent: self.daily_spent,
            requested,
            program_id,
        }
    }
}
