//! Core value types shared by the signer, the core and the IPC surface

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::encoding;

/// Current Unix time in whole seconds
pub fn unix_timestamp() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// Signature scheme tag carried by every [`Signature`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SignatureAlgorithm {
    /// Hardware-bound ECDSA over SHA-256(payload)
    #[serde(rename = "ECDSA-secp256k1")]
    EcdsaSecp256k1,

    /// Software simulation: ECDSA over SHA-256(payload || timestamp_be).
    /// The key derives from a public identifier, so these prove nothing.
    #[serde(rename = "SIM-ECDSA-secp256k1")]
    SimulatedSecp256k1,
}

impl SignatureAlgorithm {
    /// The 32-byte digest this scheme signs for `payload`
    pub fn digest(&self, payload: &[u8], timestamp: u64) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(payload);
        if let SignatureAlgorithm::SimulatedSecp256k1 = self {
            hasher.update(timestamp.to_be_bytes());
        }
        hasher.finalize().into()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureAlgorithm::EcdsaSecp256k1 => "ECDSA-secp256k1",
            SignatureAlgorithm::SimulatedSecp256k1 => "SIM-ECDSA-secp256k1",
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A signature produced by a [`crate::HardwareSigner`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature {
    /// Raw signature bytes (`r || s` for the ECDSA schemes)
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,

    /// Scheme that produced `bytes`
    pub algorithm: SignatureAlgorithm,

    /// Unix timestamp (seconds) at signing time
    pub timestamp: u64,
}

impl Signature {
    pub fn new(bytes: Vec<u8>, algorithm: SignatureAlgorithm, timestamp: u64) -> Self {
        Self {
            bytes,
            algorithm,
            timestamp,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_base64(&self) -> String {
        encoding::to_base64(&self.bytes)
    }
}

/// Identity of the active signing backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HardwareInfo {
    /// Stable device identifier, derived at initialization
    pub hardware_id: String,
    pub manufacturer: String,
    pub firmware_version: String,
    /// True when the software simulation is active. Observability only.
    pub is_mock: bool,
}

/// Heartbeat cadence requested by the agent
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HeartbeatMode {
    #[default]
    #[serde(rename = "ECO")]
    Eco,
    #[serde(rename = "TURBO")]
    Turbo,
}

impl HeartbeatMode {
    /// Resin burned per heartbeat.
    ///
    /// Both modes cost one unit per call; TURBO is simply called far more
    /// often. Do not scale the per-call cost by mode.
    pub fn resin_cost(&self) -> u64 {
        match self {
            HeartbeatMode::Eco => 1,
            HeartbeatMode::Turbo => 1,
        }
    }

    /// Interval at which an agent in this mode is expected to beat
    pub fn expected_interval(&self) -> Duration {
        match self {
            HeartbeatMode::Eco => Duration::from_secs(4 * 60 * 60),
            HeartbeatMode::Turbo => Duration::from_secs(60),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HeartbeatMode::Eco => "ECO",
            HeartbeatMode::Turbo => "TURBO",
        }
    }
}

impl fmt::Display for HeartbeatMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HeartbeatMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ECO" => Ok(HeartbeatMode::Eco),
            "TURBO" => Ok(HeartbeatMode::Turbo),
            other => Err(format!("unknown heartbeat mode '{}'", other)),
        }
    }
}

/// Serde helper for byte vectors carried as base64 strings
pub(crate) mod base64_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&crate::encoding::to_base64(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        crate::encoding::from_base64(&s).map_err(serde::de::Error::custom)
    }
}
