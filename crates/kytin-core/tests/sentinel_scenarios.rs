//! End-to-end scenarios for SentinelCore
//!
//! Drives the core through the simulated signer and a scripted failing
//! signer, checking what is committed and what is left untouched.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use kytin_core::{
    crypto::verify_signature, AuditOperation, AuditOutcome, HardwareError, HardwareInfo,
    HardwareSigner, HeartbeatMode, PolicyEngine, PolicyLimits, PolicyUpdate, Rejection,
    ResinTank, SentinelCore, Signature, SimulatedSigner, TransferRequest, ViolationKind,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

const NOW: u64 = 1_750_000_000;

fn ready_signer() -> SimulatedSigner {
    let mut signer = SimulatedSigner::with_seed(0x5EED).with_clock(|| NOW);
    signer.initialize().unwrap();
    signer
}

fn policy(limit: Decimal) -> PolicyEngine {
    PolicyEngine::new(
        PolicyLimits {
            daily_spend_limit: limit,
            ..PolicyLimits::default()
        },
        Duration::from_secs(300),
    )
}

fn core_with(signer: Box<dyn HardwareSigner>) -> SentinelCore {
    SentinelCore::new(ResinTank::default(), policy(dec!(10.0)), signer, 2048).with_clock(|| NOW)
}

fn default_core() -> SentinelCore {
    core_with(Box::new(ready_signer()))
}

/// Signer whose next `sign` calls fail, for atomicity checks
struct FailingSigner {
    inner: SimulatedSigner,
    failures_left: Arc<AtomicUsize>,
    error: HardwareError,
}

impl FailingSigner {
    fn new(failures: usize, error: HardwareError) -> (Self, Arc<AtomicUsize>) {
        let counter = Arc::new(AtomicUsize::new(failures));
        (
            Self {
                inner: ready_signer(),
                failures_left: counter.clone(),
                error,
            },
            counter,
        )
    }
}

impl HardwareSigner for FailingSigner {
    fn initialize(&mut self) -> Result<HardwareInfo, HardwareError> {
        self.inner.initialize()
    }

    fn sign(&mut self, payload: &[u8]) -> Result<Signature, HardwareError> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err(self.error.clone());
        }
        self.inner.sign(payload)
    }

    fn get_public_key(&self) -> Vec<u8> {
        self.inner.get_public_key()
    }

    fn shutdown(&mut self) {
        self.inner.shutdown()
    }

    fn is_available(&self) -> bool {
        self.inner.is_available()
    }

    fn hardware_info(&self) -> HardwareInfo {
        self.inner.hardware_info()
    }

    fn device_type(&self) -> &'static str {
        "failing"
    }
}

// ============================================
// Resin Scenarios
// ============================================

#[test]
fn test_daily_limit_stops_heartbeat_1001() {
    let core = default_core();

    for i in 0..1000 {
        let receipt = core
            .heartbeat(HeartbeatMode::Eco, format!("beat-{}", i).as_bytes())
            .unwrap();
        assert_eq!(receipt.resin.balance, 22_000 - (i + 1));
    }

    let err = core.heartbeat(HeartbeatMode::Eco, b"beat-1000").unwrap_err();
    assert_eq!(
        err,
        Rejection::ResinDepleted {
            balance: 21_000,
            daily_remaining: 0,
        }
    );

    let status = core.status();
    assert_eq!(status.resin.balance, 21_000);
    assert_eq!(status.resin.lifetime_burned, 1_000);
    assert_eq!(status.resin.daily_remaining, 0);
}

#[test]
fn test_reset_reopens_the_window() {
    let core = default_core();
    for _ in 0..1000 {
        core.heartbeat(HeartbeatMode::Turbo, b"beat").unwrap();
    }
    assert!(core.heartbeat(HeartbeatMode::Turbo, b"beat").is_err());

    core.reset_daily();

    let receipt = core.heartbeat(HeartbeatMode::Turbo, b"beat").unwrap();
    assert_eq!(receipt.resin.balance, 20_999);
    assert_eq!(receipt.resin.daily_consumed, 1);
}

#[test]
fn test_exhausted_balance_beats_daily_window() {
    let mut signer = SimulatedSigner::with_seed(1);
    signer.initialize().unwrap();
    let core = SentinelCore::new(ResinTank::new(2, 1_000), policy(dec!(10)), Box::new(signer), 8);

    core.heartbeat(HeartbeatMode::Eco, b"a").unwrap();
    core.heartbeat(HeartbeatMode::Eco, b"b").unwrap();
    core.reset_daily();

    let err = core.heartbeat(HeartbeatMode::Eco, b"c").unwrap_err();
    assert_eq!(
        err,
        Rejection::ResinDepleted {
            balance: 0,
            daily_remaining: 1_000,
        }
    );
}

// ============================================
// Policy Scenarios
// ============================================

#[test]
fn test_transfers_fill_budget_exactly() {
    let core = default_core();

    let first = core
        .sign_transfer(TransferRequest::new(b"tx-1".to_vec(), dec!(7.0)))
        .unwrap();
    assert_eq!(first.daily_spent, dec!(7.0));

    let second = core
        .sign_transfer(TransferRequest::new(b"tx-2".to_vec(), dec!(3.0)))
        .unwrap();
    assert_eq!(second.daily_spent, dec!(10.0));
    assert_eq!(second.daily_remaining, Decimal::ZERO);

    match core.sign_transfer(TransferRequest::new(b"tx-3".to_vec(), dec!(0.01))) {
        Err(Rejection::PolicyViolation(v)) => {
            assert_eq!(v.kind, ViolationKind::DailyLimit);
            assert_eq!(v.limit, dec!(10.0));
            assert_eq!(v.spent, dec!(10.0));
            assert_eq!(v.requested, dec!(0.01));
        }
        other => panic!("expected policy violation, got {:?}", other),
    }
    assert_eq!(core.status().policy.daily_spent, dec!(10.0));
}

#[test]
fn test_zero_amount_still_signs() {
    let core = default_core();
    let receipt = core
        .sign_transfer(TransferRequest::new(b"noop".to_vec(), Decimal::ZERO))
        .unwrap();

    assert_eq!(receipt.signature.bytes.len(), 64);
    verify_signature(&core.public_key(), b"noop", &receipt.signature).unwrap();
    assert_eq!(receipt.daily_spent, Decimal::ZERO);
}

#[test]
fn test_program_allow_list_enforced() {
    let mut limits = PolicyLimits::default();
    limits.allowed_programs.insert("TokenProgram".to_string());
    let core = SentinelCore::new(
        ResinTank::default(),
        PolicyEngine::new(limits, Duration::from_secs(300)),
        Box::new(ready_signer()),
        8,
    );

    core.sign_transfer(TransferRequest::new(b"tx".to_vec(), dec!(1)).with_program("TokenProgram"))
        .unwrap();

    let err = core
        .sign_transfer(TransferRequest::new(b"tx".to_vec(), dec!(1)).with_program("Drainer"))
        .unwrap_err();
    match err {
        Rejection::PolicyViolation(v) => assert_eq!(v.kind, ViolationKind::ProgramNotAllowed),
        other => panic!("expected policy violation, got {:?}", other),
    }
    assert_eq!(core.status().policy.daily_spent, dec!(1));
}

#[test]
fn test_concurrent_transfers_cannot_both_fit() {
    let core = Arc::new(default_core());
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (0..2)
        .map(|i| {
            let core = core.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                core.sign_transfer(TransferRequest::new(format!("tx-{}", i), dec!(6.0)))
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let accepted = results.iter().filter(|r| r.is_ok()).count();
    let rejected: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();

    assert_eq!(accepted, 1);
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].code(), "POLICY_VIOLATION");
    assert_eq!(core.status().policy.daily_spent, dec!(6.0));
}

#[test]
fn test_concurrent_heartbeats_cannot_share_last_unit() {
    let core = Arc::new(
        SentinelCore::new(
            ResinTank::new(1, 1_000),
            policy(dec!(10.0)),
            Box::new(ready_signer()),
            16,
        )
        .with_clock(|| NOW),
    );
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (0..2)
        .map(|i| {
            let core = core.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                core.heartbeat(HeartbeatMode::Turbo, format!("beat-{}", i).as_bytes())
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let accepted = results.iter().filter(|r| r.is_ok()).count();
    let rejected: Vec<_> = results.iter().filter_map(|r| r.as_ref().err()).collect();

    assert_eq!(accepted, 1);
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].code(), "RESIN_DEPLETED");

    let resin = core.status().resin;
    assert_eq!(resin.balance, 0);
    assert_eq!(resin.lifetime_burned, 1);
}

// ============================================
// Hardware Scenarios
// ============================================

#[test]
fn test_uninitialized_signer_consumes_nothing() {
    let core = core_with(Box::new(SimulatedSigner::with_seed(9)));

    let err = core.heartbeat(HeartbeatMode::Eco, b"beat").unwrap_err();
    assert_eq!(err.code(), "HARDWARE_UNAVAILABLE");

    let err = core
        .sign_transfer(TransferRequest::new(b"tx".to_vec(), dec!(1)))
        .unwrap_err();
    assert_eq!(err.code(), "HARDWARE_UNAVAILABLE");

    let status = core.status();
    assert!(!status.hardware.available);
    assert_eq!(status.resin.balance, 22_000);
    assert_eq!(status.resin.lifetime_burned, 0);
    assert_eq!(status.policy.daily_spent, Decimal::ZERO);
    assert!(core.public_key().is_empty());
}

#[test]
fn test_failed_sign_commits_nothing() {
    let (signer, _) = FailingSigner::new(2, HardwareError::SigningFailed("bus error".into()));
    let core = core_with(Box::new(signer));

    let err = core.heartbeat(HeartbeatMode::Eco, b"beat").unwrap_err();
    assert_eq!(err.code(), "SIGNING_FAILED");

    let err = core
        .sign_transfer(TransferRequest::new(b"tx".to_vec(), dec!(5)))
        .unwrap_err();
    assert_eq!(err.code(), "SIGNING_FAILED");

    let status = core.status();
    assert_eq!(status.resin.balance, 22_000);
    assert_eq!(status.resin.daily_remaining, 1_000);
    assert_eq!(status.policy.daily_spent, Decimal::ZERO);

    // Next attempts go through
    core.heartbeat(HeartbeatMode::Eco, b"beat").unwrap();
    core.sign_transfer(TransferRequest::new(b"tx".to_vec(), dec!(5)))
        .unwrap();
    assert_eq!(core.status().resin.balance, 21_999);
}

#[test]
fn test_sign_timeout_is_signing_failure() {
    let (signer, _) = FailingSigner::new(1, HardwareError::Timeout(Duration::from_secs(5)));
    let core = core_with(Box::new(signer));

    let err = core.heartbeat(HeartbeatMode::Turbo, b"beat").unwrap_err();
    assert!(matches!(err, Rejection::SigningFailed(_)));
    assert_eq!(core.status().resin.lifetime_burned, 0);
}

#[test]
fn test_shutdown_is_idempotent() {
    let core = default_core();
    core.heartbeat(HeartbeatMode::Eco, b"beat").unwrap();

    core.shutdown();
    let after_first = core.status();
    core.shutdown();

    assert_eq!(core.status(), after_first);
    assert!(!after_first.hardware.available);

    let err = core.heartbeat(HeartbeatMode::Eco, b"beat").unwrap_err();
    assert_eq!(err.code(), "HARDWARE_UNAVAILABLE");
    assert_eq!(core.status().resin.balance, 21_999);
}

// ============================================
// Policy Attestation
// ============================================

#[test]
fn test_attested_update_replaces_limits() {
    let core = default_core();
    core.sign_transfer(TransferRequest::new(b"tx".to_vec(), dec!(8)))
        .unwrap();

    let update = PolicyUpdate::new(
        PolicyLimits {
            daily_spend_limit: dec!(25),
            max_transaction_amount: Some(dec!(20)),
            ..PolicyLimits::default()
        },
        NOW,
    );
    let attestation = core.attest_policy(&update).unwrap();
    core.update_policy(update, &attestation).unwrap();

    let status = core.status();
    assert_eq!(status.policy.daily_limit, dec!(25));
    assert_eq!(status.policy.daily_spent, dec!(8));
    assert_eq!(status.policy.max_transaction_amount, Some(dec!(20)));

    core.sign_transfer(TransferRequest::new(b"tx".to_vec(), dec!(17)))
        .unwrap();
}

#[test]
fn test_update_without_valid_attestation_is_rejected() {
    let core = default_core();
    let update = PolicyUpdate::new(
        PolicyLimits {
            daily_spend_limit: dec!(1000),
            ..PolicyLimits::default()
        },
        NOW,
    );

    // A signature over something else does not transfer
    let receipt = core.heartbeat(HeartbeatMode::Eco, b"innocent").unwrap();
    let err = core.update_policy(update.clone(), &receipt.signature).unwrap_err();
    assert_eq!(err.code(), "ATTESTATION_REJECTED");

    let stale = PolicyUpdate::new(update.limits.clone(), NOW - 301);
    let attestation = core.attest_policy(&stale).unwrap();
    let err = core.update_policy(stale, &attestation).unwrap_err();
    assert_eq!(err.code(), "ATTESTATION_REJECTED");

    assert_eq!(core.status().policy.daily_limit, dec!(10.0));
}

#[test]
fn test_replayed_update_is_rejected() {
    let core = default_core();
    let update = PolicyUpdate::new(PolicyLimits::default(), NOW);
    let attestation = core.attest_policy(&update).unwrap();

    core.update_policy(update.clone(), &attestation).unwrap();
    let err = core.update_policy(update, &attestation).unwrap_err();
    assert!(matches!(err, Rejection::AttestationRejected(_)));
}

#[test]
fn test_attestation_needs_hardware() {
    let core = core_with(Box::new(SimulatedSigner::new()));
    let update = PolicyUpdate::new(PolicyLimits::default(), NOW);
    let err = core.attest_policy(&update).unwrap_err();
    assert_eq!(err.code(), "HARDWARE_UNAVAILABLE");
}

// ============================================
// Audit Trail
// ============================================

#[test]
fn test_audit_trail_records_every_decision() {
    let core = default_core();
    core.heartbeat(HeartbeatMode::Eco, b"beat").unwrap();
    let _ = core.sign_transfer(TransferRequest::new(b"tx".to_vec(), dec!(50)));
    core.reset_daily();

    let entries = core.audit(None);
    assert_eq!(entries.len(), 3);
    assert_eq!(
        entries.iter().map(|e| e.sequence).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );

    assert!(matches!(
        entries[0].operation,
        AuditOperation::Heartbeat {
            mode: HeartbeatMode::Eco
        }
    ));
    assert_eq!(entries[0].resin_balance, 21_999);
    assert_eq!(
        entries[1].outcome,
        AuditOutcome::Rejected {
            code: "POLICY_VIOLATION".to_string()
        }
    );
    assert_eq!(entries[2].operation, AuditOperation::DailyReset);
    assert_eq!(core.audit(Some(1))[0].sequence, 3);
}

#[test]
fn test_policy_attestation_is_audited() {
    let core = default_core();
    let update = PolicyUpdate::new(PolicyLimits::default(), NOW);
    core.attest_policy(&update).unwrap();

    let invalid = PolicyUpdate::new(
        PolicyLimits {
            daily_spend_limit: dec!(-1),
            ..PolicyLimits::default()
        },
        NOW,
    );
    let err = core.attest_policy(&invalid).unwrap_err();
    assert_eq!(err.code(), "MALFORMED_INPUT");

    let entries = core.audit(None);
    assert_eq!(entries.len(), 2);
    assert_eq!(
        entries[0].operation,
        AuditOperation::PolicyAttestation { issued_at: NOW }
    );
    assert!(matches!(entries[0].outcome, AuditOutcome::Signed { .. }));
    assert_eq!(
        entries[1].outcome,
        AuditOutcome::Rejected {
            code: "MALFORMED_INPUT".to_string()
        }
    );

    // Attesting burns neither Resin nor budget
    assert_eq!(entries[1].resin_balance, 22_000);
    assert_eq!(entries[1].daily_spent, Decimal::ZERO);
}

#[test]
fn test_attestation_without_hardware_is_audited() {
    let core = core_with(Box::new(SimulatedSigner::new()));
    let update = PolicyUpdate::new(PolicyLimits::default(), NOW);
    core.attest_policy(&update).unwrap_err();

    let entries = core.audit(None);
    assert_eq!(entries.len(), 1);
    assert_eq!(
        entries[0].outcome,
        AuditOutcome::Rejected {
            code: "HARDWARE_UNAVAILABLE".to_string()
        }
    );
}
