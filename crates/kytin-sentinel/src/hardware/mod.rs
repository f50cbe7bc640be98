//! Signer backend selection
//!
//! Turns the `hardware` config section into a boxed [`HardwareSigner`]:
//! - `simulated`: the core's [`SimulatedSigner`]
//! - `pkcs11`: the HSM backend, strict (startup fails without it)
//! - `auto`: an [`AutoSigner`] that tries the HSM and falls back to simulation
//!
//! The HSM backend is only compiled with the `pkcs11` feature.

#[cfg(feature = "pkcs11")]
pub mod pkcs11;

use tracing::{info, warn};

use kytin_core::{HardwareError, HardwareInfo, HardwareSigner, Signature, SimulatedSigner};

use crate::config::{BackendKind, SentinelConfig};
use crate::error::{DaemonError, Result};

/// Build the signer described by `config`. The returned signer is not yet
/// initialized.
pub fn open_signer(config: &SentinelConfig) -> Result<Box<dyn HardwareSigner>> {
    match config.hardware.backend {
        BackendKind::Simulated => Ok(Box::new(simulated_signer(config))),
        BackendKind::Pkcs11 => hardware_signer(config)?.ok_or_else(|| {
            DaemonError::Config("backend \"pkcs11\" requires a hardware.pkcs11 section".to_string())
        }),
        BackendKind::Auto => {
            let hardware = match hardware_signer(config) {
                Ok(hardware) => hardware,
                Err(e) => {
                    warn!("Hardware backend unusable: {}", e);
                    None
                }
            };
            Ok(Box::new(AutoSigner::new(hardware, simulated_signer(config))))
        }
    }
}

/// Initialize `signer`, mapping failure to the fatal startup error
pub fn initialize_signer(signer: &mut dyn HardwareSigner) -> Result<HardwareInfo> {
    let info = signer
        .initialize()
        .map_err(|e| DaemonError::InitializationFailed(e.to_string()))?;

    info!(
        device = signer.device_type(),
        hardware_id = %info.hardware_id,
        manufacturer = %info.manufacturer,
        is_mock = info.is_mock,
        "Signer ready"
    );
    Ok(info)
}

fn simulated_signer(config: &SentinelConfig) -> SimulatedSigner {
    match config.hardware.simulation_seed {
        Some(seed) => SimulatedSigner::with_seed(seed),
        None => SimulatedSigner::new(),
    }
}

#[cfg(feature = "pkcs11")]
fn hardware_signer(config: &SentinelConfig) -> Result<Option<Box<dyn HardwareSigner>>> {
    Ok(config.hardware.pkcs11.clone().map(|settings| {
        Box::new(pkcs11::Pkcs11Signer::new(settings, config.signing_timeout()))
            as Box<dyn HardwareSigner>
    }))
}

#[cfg(not(feature = "pkcs11"))]
fn hardware_signer(config: &SentinelConfig) -> Result<Option<Box<dyn HardwareSigner>>> {
    if config.hardware.backend == BackendKind::Pkcs11 {
        return Err(DaemonError::InitializationFailed(
            "built without the pkcs11 feature".to_string(),
        ));
    }
    Ok(None)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Active {
    Hardware,
    Simulated,
}

/// Prefers the hardware backend, falling back to simulation when the HSM
/// cannot be initialized. The choice is made once, at first `initialize`.
pub struct AutoSigner {
    hardware: Option<Box<dyn HardwareSigner>>,
    fallback: SimulatedSigner,
    active: Option<Active>,
    shut_down: bool,
}

impl AutoSigner {
    pub fn new(hardware: Option<Box<dyn HardwareSigner>>, fallback: SimulatedSigner) -> Self {
        Self {
            hardware,
            fallback,
            active: None,
            shut_down: false,
        }
    }

    fn current(&self) -> Option<&dyn HardwareSigner> {
        match (self.active, &self.hardware) {
            (Some(Active::Hardware), Some(hardware)) => Some(hardware.as_ref()),
            (Some(Active::Simulated), _) => Some(&self.fallback),
            _ => None,
        }
    }

    fn current_mut(&mut self) -> Option<&mut dyn HardwareSigner> {
        match (self.active, &mut self.hardware) {
            (Some(Active::Hardware), Some(hardware)) => Some(hardware.as_mut()),
            (Some(Active::Simulated), _) => Some(&mut self.fallback),
            _ => None,
        }
    }
}

impl HardwareSigner for AutoSigner {
    fn initialize(&mut self) -> std::result::Result<HardwareInfo, HardwareError> {
        if self.shut_down {
            return Err(HardwareError::ShutDown);
        }
        if let Some(signer) = self.current_mut() {
            return signer.initialize();
        }

        if let Some(hardware) = self.hardware.as_mut() {
            match hardware.initialize() {
                Ok(info) => {
                    self.active = Some(Active::Hardware);
                    return Ok(info);
                }
                Err(e) => {
                    warn!("Hardware signer unavailable ({}), falling back to simulation", e);
                }
            }
        } else {
            info!("No hardware backend configured, using simulation");
        }

        let info = self.fallback.initialize()?;
        self.active = Some(Active::Simulated);
        Ok(info)
    }

    fn sign(&mut self, payload: &[u8]) -> std::result::Result<Signature, HardwareError> {
        match self.current_mut() {
            Some(signer) => signer.sign(payload),
            None => Err(HardwareError::NotInitialized),
        }
    }

    fn get_public_key(&self) -> Vec<u8> {
        self.current()
            .map(|signer| signer.get_public_key())
            .unwrap_or_default()
    }

    fn shutdown(&mut self) {
        if let Some(signer) = self.current_mut() {
            signer.shutdown();
        }
        self.shut_down = true;
    }

    fn is_available(&self) -> bool {
        self.current().map(|s| s.is_available()).unwrap_or(false)
    }

    fn hardware_info(&self) -> HardwareInfo {
        self.current()
            .map(|signer| signer.hardware_info())
            .unwrap_or_default()
    }

    fn device_type(&self) -> &'static str {
        self.current().map(|s| s.device_type()).unwrap_or("auto")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Stand-in for an HSM that is not plugged in
    struct AbsentHsm;

    impl HardwareSigner for AbsentHsm {
        fn initialize(&mut self) -> std::result::Result<HardwareInfo, HardwareError> {
            Err(HardwareError::Unavailable("no token in slot 0".to_string()))
        }

        fn sign(&mut self, _payload: &[u8]) -> std::result::Result<Signature, HardwareError> {
            Err(HardwareError::NotInitialized)
        }

        fn get_public_key(&self) -> Vec<u8> {
            Vec::new()
        }

        fn shutdown(&mut self) {}

        fn is_available(&self) -> bool {
            false
        }

        fn hardware_info(&self) -> HardwareInfo {
            HardwareInfo::default()
        }

        fn device_type(&self) -> &'static str {
            "absent"
        }
    }

    #[test]
    fn test_auto_falls_back_to_simulation() {
        let mut signer = AutoSigner::new(Some(Box::new(AbsentHsm)), SimulatedSigner::with_seed(1));
        assert_eq!(signer.device_type(), "auto");
        assert!(!signer.is_available());

        let info = signer.initialize().unwrap();
        assert!(info.is_mock);
        assert_eq!(signer.device_type(), "simulated");
        assert_eq!(signer.get_public_key().len(), 65);
        signer.sign(b"payload").unwrap();

        // Second initialize keeps the same backend
        assert_eq!(signer.initialize().unwrap(), info);
    }

    #[test]
    fn test_auto_without_hardware() {
        let mut signer = AutoSigner::new(None, SimulatedSigner::with_seed(2));
        assert_eq!(signer.sign(b"x"), Err(HardwareError::NotInitialized));
        assert!(signer.initialize().unwrap().is_mock);
    }

    #[test]
    fn test_auto_shutdown_is_final() {
        let mut signer = AutoSigner::new(None, SimulatedSigner::with_seed(3));
        signer.initialize().unwrap();
        signer.shutdown();
        signer.shutdown();

        assert!(!signer.is_available());
        assert_eq!(signer.sign(b"x"), Err(HardwareError::NotInitialized));
        assert_eq!(signer.initialize(), Err(HardwareError::ShutDown));
    }

    #[test]
    fn test_open_simulated_from_config() {
        let mut config = SentinelConfig::default();
        config.hardware.backend = BackendKind::Simulated;
        config.hardware.simulation_seed = Some(0xAB);

        let mut signer = open_signer(&config).unwrap();
        let info = initialize_signer(signer.as_mut()).unwrap();
        assert_eq!(info.hardware_id, "KYTIN-MOCK-00000000000000AB");
    }

    #[cfg(not(feature = "pkcs11"))]
    #[test]
    fn test_strict_pkcs11_unavailable_without_feature() {
        let mut config = SentinelConfig::default();
        config.hardware.backend = BackendKind::Pkcs11;
        assert!(matches!(
            open_signer(&config),
            Err(DaemonError::InitializationFailed(_))
        ));
    }
}
