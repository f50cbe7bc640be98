//! In-memory audit trail of signing decisions
//!
//! Every heartbeat, transfer, policy update and daily reset handled by the
//! core leaves one entry. The log is a bounded ring: once `capacity` entries
//! are held, the oldest is dropped. Sequence numbers keep increasing across
//! evictions so gaps are visible to readers.

use std::collections::VecDeque;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::types::HeartbeatMode;

/// What was requested
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditOperation {
    Heartbeat { mode: HeartbeatMode },
    SignTransfer {
        amount: Decimal,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        program_id: Option<String>,
    },
    /// Signer asked to attest a policy update
    PolicyAttestation { issued_at: u64 },
    PolicyUpdate,
    DailyReset,
}

/// How the request ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum AuditOutcome {
    /// Signature produced (base64)
    Signed { signature: String },
    /// Refused with a stable rejection code
    Rejected { code: String },
    /// State change applied without a signature
    Applied,
}

/// One audit record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Monotonic per-process sequence number, starting at 1
    pub sequence: u64,

    /// Unix timestamp of the decision
    pub timestamp: u64,

    pub operation: AuditOperation,

    pub outcome: AuditOutcome,

    /// Resin balance after the decision
    pub resin_balance: u64,

    /// Policy spend after the decision
    pub daily_spent: Decimal,
}

/// Bounded ring of [`AuditEntry`]
#[derive(Debug, Clone)]
pub struct AuditLog {
    entries: VecDeque<AuditEntry>,
    capacity: usize,
    next_sequence: u64,
}

impl AuditLog {
    /// A capacity of zero disables retention but still advances sequences
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity.min(crate::DEFAULT_AUDIT_CAPACITY)),
            capacity,
            next_sequence: 1,
        }
    }

    /// Append an entry, evicting the oldest when full. Returns its sequence.
    pub fn record(
        &mut self,
        timestamp: u64,
        operation: AuditOperation,
        outcome: AuditOutcome,
        resin_balance: u64,
        daily_spent: Decimal,
    ) -> u64 {
        let sequence = self.next_sequence;
        self.next_sequence += 1;

        if self.capacity == 0 {
            return sequence;
        }
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }

        self.entries.push_back(AuditEntry {
            sequence,
            timestamp,
            operation,
            outcome,
            resin_balance,
            daily_spent,
        });
        sequence
    }

    /// Up to `last` most recent entries, oldest first. `None` returns all.
    pub fn recent(&self, last: Option<usize>) -> Vec<AuditEntry> {
        let take = last.unwrap_or(self.entries.len()).min(self.entries.len());
        self.entries
            .iter()
            .skip(self.entries.len() - take)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(crate::DEFAULT_AUDIT_CAPACITY)
    }
}
