//! Software-simulated signer
//!
//! Stands in for real hardware when none is present. Signatures are genuine
//! ECDSA over secp256k1, but the key is derived from the public hardware id,
//! so they are reproducible and prove nothing. `is_mock` is always true.

use k256::ecdsa::SigningKey;
use tracing::{info, warn};

use super::{HardwareError, HardwareSigner, Lifecycle};
use crate::crypto;
use crate::types::{unix_timestamp, HardwareInfo, Signature, SignatureAlgorithm};

const MANUFACTURER: &str = "Kytin Mock TPM";
const FIRMWARE_VERSION: &str = "1.0.0-mock";

type Clock = Box<dyn Fn() -> u64 + Send>;

/// Deterministic software signer
pub struct SimulatedSigner {
    seed: Option<u64>,
    lifecycle: Lifecycle,
    info: HardwareInfo,
    key: Option<SigningKey>,
    clock: Clock,
}

impl SimulatedSigner {
    /// Simulator with a random per-process hardware id
    pub fn new() -> Self {
        Self {
            seed: None,
            lifecycle: Lifecycle::Uninitialized,
            info: HardwareInfo::default(),
            key: None,
            clock: Box::new(unix_timestamp),
        }
    }

    /// Simulator whose hardware id (and therefore key) is fixed by `seed`
    pub fn with_seed(seed: u64) -> Self {
        Self {
            seed: Some(seed),
            ..Self::new()
        }
    }

    /// Replace the timestamp source
    pub fn with_clock(mut self, clock: impl Fn() -> u64 + Send + 'static) -> Self {
        self.clock = Box::new(clock);
        self
    }

    /// Hardware id for a given seed
    pub fn hardware_id_for(seed: u64) -> String {
        format!("KYTIN-MOCK-{:016X}", seed)
    }
}

impl Default for SimulatedSigner {
    fn default() -> Self {
        Self::new()
    }
}

impl HardwareSigner for SimulatedSigner {
    fn initialize(&mut self) -> Result<HardwareInfo, HardwareError> {
        match self.lifecycle {
            Lifecycle::Ready => return Ok(self.info.clone()),
            Lifecycle::ShutDown => return Err(HardwareError::ShutDown),
            Lifecycle::Uninitialized => {}
        }

        warn!("*** MOCK SIGNER ACTIVE *** signatures are not hardware-bound");

        let seed = self.seed.unwrap_or_else(rand::random::<u64>);
        let hardware_id = Self::hardware_id_for(seed);

        let key = crypto::simulated_signing_key(&hardware_id)
            .map_err(|e| HardwareError::InitializationFailed(e.to_string()))?;

        self.info = HardwareInfo {
            hardware_id,
            manufacturer: MANUFACTURER.to_string(),
            firmware_version: FIRMWARE_VERSION.to_string(),
            is_mock: true,
        };
        self.key = Some(key);
        self.lifecycle = Lifecycle::Ready;

        info!(hardware_id = %self.info.hardware_id, "Mock signer initialized");
        Ok(self.info.clone())
    }

    fn sign(&mut self, payload: &[u8]) -> Result<Signature, HardwareError> {
        let key = match (&self.lifecycle, &self.key) {
            (Lifecycle::Ready, Some(key)) => key,
            _ => return Err(HardwareError::NotInitialized),
        };

        let timestamp = (self.clock)();
        crypto::sign_payload(key, SignatureAlgorithm::SimulatedSecp256k1, payload, timestamp)
            .map_err(|e| HardwareError::SigningFailed(e.to_string()))
    }

    fn get_public_key(&self) -> Vec<u8> {
        match (&self.lifecycle, &self.key) {
            (Lifecycle::Ready, Some(key)) => crypto::encode_public_key(key.verifying_key()),
            _ => Vec::new(),
        }
    }

    fn shutdown(&mut self) {
        if self.lifecycle == Lifecycle::Ready {
            info!(hardware_id = %self.info.hardware_id, "Mock signer shut down");
        }
        self.key = None;
        self.lifecycle = Lifecycle::ShutDown;
    }

    fn is_available(&self) -> bool {
        self.lifecycle == Lifecycle::Ready
    }

    fn hardware_info(&self) -> HardwareInfo {
        self.info.clone()
    }

    fn device_type(&self) -> &'static str {
        "simulated"
    }
}
