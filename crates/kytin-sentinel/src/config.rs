//! Daemon configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use kytin_core::{
    HardwareSigner, PolicyEngine, PolicyLimits, ResinTank, SentinelCore,
    DEFAULT_ATTESTATION_MAX_AGE_SECS, DEFAULT_AUDIT_CAPACITY, DEFAULT_RESIN_DAILY_LIMIT,
    INITIAL_RESIN_BALANCE,
};

use crate::error::{DaemonError, Result};

/// Which signer backend to bring up
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Try the HSM, fall back to simulation
    #[default]
    Auto,
    /// HSM only; startup fails without it
    Pkcs11,
    /// Software simulation only
    Simulated,
}

/// PKCS#11 module settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pkcs11Settings {
    /// Path to the PKCS#11 library (.so or .dylib)
    pub library_path: PathBuf,

    /// Index into the slots that hold a token
    #[serde(default)]
    pub slot: u64,

    /// User PIN
    pub pin: String,

    /// Label of the secp256k1 private key
    pub key_label: String,
}

/// Signer backend section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    pub backend: BackendKind,

    /// Fixes the simulated hardware id across restarts
    pub simulation_seed: Option<u64>,

    pub pkcs11: Option<Pkcs11Settings>,
}

/// Resin tank section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResinConfig {
    pub initial_balance: u64,
    pub daily_limit: u64,
}

impl Default for ResinConfig {
    fn default() -> Self {
        Self {
            initial_balance: INITIAL_RESIN_BALANCE,
            daily_limit: DEFAULT_RESIN_DAILY_LIMIT,
        }
    }
}

/// Daily reset scheduler section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DailyResetConfig {
    /// Reset both daily windows at every UTC midnight
    pub enabled: bool,
}

impl Default for DailyResetConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// Daemon configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    /// Unix socket path for IPC
    pub ipc_socket_path: PathBuf,

    /// Operator socket that also mints policy-update attestations; disabled
    /// when absent. Place it where the agent cannot connect.
    pub admin_socket_path: Option<PathBuf>,

    /// Upper bound on a single hardware sign call (seconds)
    pub signing_timeout_secs: u64,

    pub hardware: HardwareConfig,

    pub resin: ResinConfig,

    pub policy: PolicyLimits,

    /// Maximum age of a policy-update attestation (seconds)
    pub attestation_max_age_secs: u64,

    /// Number of audit entries kept in memory
    pub audit_capacity: usize,

    pub daily_reset: DailyResetConfig,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            ipc_socket_path: Self::default_ipc_path(),
            admin_socket_path: None,
            signing_timeout_secs: 30,
            hardware: HardwareConfig::default(),
            resin: ResinConfig::default(),
            policy: PolicyLimits::default(),
            attestation_max_age_secs: DEFAULT_ATTESTATION_MAX_AGE_SECS,
            audit_capacity: DEFAULT_AUDIT_CAPACITY,
            daily_reset: DailyResetConfig::default(),
        }
    }
}

impl SentinelConfig {
    /// Default socket location: `$XDG_RUNTIME_DIR/kytin.sock`, else `/tmp`
    pub fn default_ipc_path() -> PathBuf {
        dirs::runtime_dir()
            .map(|dir| dir.join("kytin.sock"))
            .unwrap_or_else(|| PathBuf::from("/tmp/kytin.sock"))
    }

    /// Suggested operator socket location: `$XDG_RUNTIME_DIR/kytin-admin.sock`
    pub fn default_admin_ipc_path() -> PathBuf {
        dirs::runtime_dir()
            .map(|dir| dir.join("kytin-admin.sock"))
            .unwrap_or_else(|| PathBuf::from("/tmp/kytin-admin.sock"))
    }

    /// Config file location: `KYTIN_CONFIG`, else `$XDG_CONFIG_HOME/kytin/sentinel.json`
    pub fn default_config_path() -> PathBuf {
        std::env::var("KYTIN_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                dirs::config_dir()
                    .unwrap_or_else(|| PathBuf::from("/etc"))
                    .join("kytin")
                    .join("sentinel.json")
            })
    }

    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, or write the defaults there and return them
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path);
        }

        let config = Self::default();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        config.save(path)?;
        tracing::info!("Created default config at {:?}", path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Create directories if they don't exist
    pub fn ensure_directories(&self) -> Result<()> {
        let sockets = std::iter::once(&self.ipc_socket_path).chain(&self.admin_socket_path);
        for socket in sockets {
            if let Some(parent) = socket.parent() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    /// Reject settings the daemon cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.signing_timeout_secs == 0 {
            return Err(DaemonError::Config(
                "signing_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.hardware.backend == BackendKind::Pkcs11 && self.hardware.pkcs11.is_none() {
            return Err(DaemonError::Config(
                "backend \"pkcs11\" requires a hardware.pkcs11 section".to_string(),
            ));
        }
        if self.admin_socket_path.as_ref() == Some(&self.ipc_socket_path) {
            return Err(DaemonError::Config(
                "admin_socket_path must differ from ipc_socket_path".to_string(),
            ));
        }
        self.policy
            .validate()
            .map_err(|e| DaemonError::Config(e.to_string()))?;
        Ok(())
    }

    pub fn signing_timeout(&self) -> Duration {
        Duration::from_secs(self.signing_timeout_secs)
    }

    pub fn attestation_max_age(&self) -> Duration {
        Duration::from_secs(self.attestation_max_age_secs)
    }

    /// Assemble the core around an already-opened signer
    pub fn build_core(&self, signer: Box<dyn HardwareSigner>) -> SentinelCore {
        SentinelCore::new(
            ResinTank::new(self.resin.initial_balance, self.resin.daily_limit),
            PolicyEngine::new(self.policy.clone(), self.attestation_max_age()),
            signer,
            self.audit_capacity,
        )
    }
}
