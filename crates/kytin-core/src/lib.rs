//! Kytin Core - Resin metering, spend policy and the hardware-signer contract
//!
//! This crate holds the trust boundary of the Kytin Sentinel. Every signing
//! request passes through [`SentinelCore`], which checks the Resin quota or the
//! spend policy, invokes the [`HardwareSigner`], and commits state only after
//! the signature has been produced.
//!
//! Everything here is synchronous; the daemon decides how to schedule it.

pub mod audit;
pub mod crypto;
pub mod encoding;
pub mod error;
pub mod hardware;
pub mod policy;
pub mod resin;
pub mod sentinel;
pub mod types;

pub use audit::{AuditEntry, AuditLog, AuditOperation, AuditOutcome};
pub use error::{Error, Result};
pub use hardware::{HardwareError, HardwareSigner, SimulatedSigner};
pub use policy::{PolicyEngine, PolicyLimits, PolicyUpdate, PolicyViolation, ViolationKind};
pub use resin::{ResinSnapshot, ResinTank};
pub use sentinel::{
    HeartbeatReceipt, Rejection, SentinelCore, StatusSnapshot, TransferReceipt, TransferRequest,
};
pub use types::{HardwareInfo, HeartbeatMode, Signature, SignatureAlgorithm};

/// Resin endowment of a freshly provisioned agent (ten years of ECO heartbeats)
pub const INITIAL_RESIN_BALANCE: u64 = 22_000;

/// Default number of Resin units that may be burned per day
pub const DEFAULT_RESIN_DAILY_LIMIT: u64 = 1_000;

/// Default capacity of the in-memory audit ring
pub const DEFAULT_AUDIT_CAPACITY: usize = 1_024;

/// Default maximum age of a policy-update attestation, in seconds
pub const DEFAULT_ATTESTATION_MAX_AGE_SECS: u64 = 300;
