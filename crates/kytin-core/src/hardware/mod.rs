//! Hardware signer abstraction
//!
//! The Sentinel signs through a [`HardwareSigner`]. Two interchangeable
//! implementations satisfy the same contract:
//! - a hardware-bound backend (PKCS#11 HSM, provided by the daemon crate)
//! - [`SimulatedSigner`], a deterministic software stand-in
//!
//! The core never branches on which backend is active; `is_mock` is reported
//! for observability only.
//!
//! # Lifecycle
//!
//! `initialize` must succeed before any `sign`. Calling it again while the
//! signer is live returns the existing [`HardwareInfo`]. After `shutdown` the
//! signer is finished: `sign` fails with [`HardwareError::NotInitialized`] and
//! `initialize` fails with [`HardwareError::ShutDown`].

mod simulated;

pub use simulated::SimulatedSigner;

use std::time::Duration;

use thiserror::Error;

use crate::types::{HardwareInfo, Signature};

/// Errors raised by signer backends
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HardwareError {
    /// `sign` called before `initialize` or after `shutdown`
    #[error("Signer not initialized")]
    NotInitialized,

    /// `initialize` called after `shutdown`
    #[error("Signer has been shut down")]
    ShutDown,

    /// Backend could not be reached
    #[error("Hardware unavailable: {0}")]
    Unavailable(String),

    /// Backend reported a signing failure
    #[error("Signing failed: {0}")]
    SigningFailed(String),

    /// Backend did not answer within its bound
    #[error("Signing timed out after {0:?}")]
    Timeout(Duration),

    /// Startup could not reach any backend
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),
}

/// Capability set of a hardware-bound (or simulated) signing device
pub trait HardwareSigner: Send {
    /// Bind to the device. Idempotent while live; fails after `shutdown`.
    fn initialize(&mut self) -> Result<HardwareInfo, HardwareError>;

    /// Sign arbitrary payload bytes
    fn sign(&mut self, payload: &[u8]) -> Result<Signature, HardwareError>;

    /// Sign a transaction hash and return the signature as base64
    fn sign_transaction(&mut self, hash: &[u8]) -> Result<String, HardwareError> {
        Ok(self.sign(hash)?.to_base64())
    }

    /// 65-byte uncompressed SEC1 public key, or empty when not initialized
    fn get_public_key(&self) -> Vec<u8>;

    /// Release the device. Idempotent.
    fn shutdown(&mut self);

    /// Whether `sign` can currently succeed
    fn is_available(&self) -> bool;

    /// Identity of the bound device (default values before `initialize`)
    fn hardware_info(&self) -> HardwareInfo;

    /// Short backend name for logs
    fn device_type(&self) -> &'static str;
}

impl<T: HardwareSigner + ?Sized> HardwareSigner for Box<T> {
    fn initialize(&mut self) -> Result<HardwareInfo, HardwareError> {
        (**self).initialize()
    }

    fn sign(&mut self, payload: &[u8]) -> Result<Signature, HardwareError> {
        (**self).sign(payload)
    }

    fn sign_transaction(&mut self, hash: &[u8]) -> Result<String, HardwareError> {
        (**self).sign_transaction(hash)
    }

    fn get_public_key(&self) -> Vec<u8> {
        (**self).get_public_key()
    }

    fn shutdown(&mut self) {
        (**self).shutdown()
    }

    fn is_available(&self) -> bool {
        (**self).is_available()
    }

    fn hardware_info(&self) -> HardwareInfo {
        (**self).hardware_info()
    }

    fn device_type(&self) -> &'static str {
        (**self).device_type()
    }
}

/// Lifecycle shared by backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Uninitialized,
    Ready,
    ShutDown,
}
