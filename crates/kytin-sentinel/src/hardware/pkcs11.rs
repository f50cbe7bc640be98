//! PKCS#11 HSM backend
//!
//! Works with any PKCS#11 module that holds a secp256k1 ECDSA private key
//! (YubiHSM 2, SoftHSM 2, Nitrokey NetHSM, CloudHSM, ...).
//!
//! # Key Requirements
//!
//! - private key object with `CKA_LABEL` equal to the configured `key_label`
//! - `CKA_SIGN = true`, `CKA_EXTRACTABLE = false`
//! - `CKA_EC_POINT` readable, so the public key can be exported
//!
//! Each sign runs on a worker thread and is abandoned after the configured
//! timeout. The session mutex serialises the worker with any later call.

use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use cryptoki::context::{CInitializeArgs, Pkcs11};
use cryptoki::mechanism::Mechanism;
use cryptoki::object::{Attribute, AttributeType, ObjectClass, ObjectHandle};
use cryptoki::session::{Session, UserType};
use cryptoki::types::AuthPin;
use tracing::{debug, info, warn};

use kytin_core::crypto::{key_fingerprint, normalize_signature};
use kytin_core::hardware::Lifecycle;
use kytin_core::types::unix_timestamp;
use kytin_core::{HardwareError, HardwareInfo, HardwareSigner, Signature, SignatureAlgorithm};

use crate::config::Pkcs11Settings;

/// Open session on a token, bound to one key
struct Pkcs11Device {
    _ctx: Pkcs11,
    session: Mutex<Session>,
    key_handle: ObjectHandle,
    public_key: Vec<u8>,
}

impl Pkcs11Device {
    fn connect(settings: &Pkcs11Settings) -> Result<(Self, HardwareInfo), HardwareError> {
        info!("Connecting to PKCS#11 module {:?}", settings.library_path);

        let ctx = Pkcs11::new(Path::new(&settings.library_path)).map_err(|e| {
            HardwareError::Unavailable(format!("Failed to load PKCS#11 library: {}", e))
        })?;
        ctx.initialize(CInitializeArgs::OsThreads).map_err(|e| {
            HardwareError::Unavailable(format!("Failed to initialize PKCS#11: {}", e))
        })?;

        let slots = ctx
            .get_slots_with_token()
            .map_err(|e| HardwareError::Unavailable(format!("Failed to get slots: {}", e)))?;
        let slot = *slots.get(settings.slot as usize).ok_or_else(|| {
            HardwareError::Unavailable(format!(
                "Slot {} not found ({} tokens present)",
                settings.slot,
                slots.len()
            ))
        })?;

        let (manufacturer, firmware_version) = match ctx.get_token_info(slot) {
            Ok(token) => (
                token.manufacturer_id().trim().to_string(),
                format!(
                    "{}.{}",
                    token.firmware_version().major(),
                    token.firmware_version().minor()
                ),
            ),
            Err(e) => {
                warn!("Token info unavailable: {}", e);
                ("Unknown".to_string(), "unknown".to_string())
            }
        };

        let session = ctx
            .open_rw_session(slot)
            .map_err(|e| HardwareError::Unavailable(format!("Failed to open session: {}", e)))?;
        let pin = AuthPin::new(settings.pin.clone());
        session
            .login(UserType::User, Some(&pin))
            .map_err(|e| HardwareError::Unavailable(format!("Failed to login: {}", e)))?;

        let key_handle = find_key(&session, &settings.key_label)?;
        let public_key = read_public_key(&session, key_handle)?;

        let info = HardwareInfo {
            hardware_id: format!("KYTIN-{}", key_fingerprint(&public_key)),
            manufacturer,
            firmware_version,
            is_mock: false,
        };

        Ok((
            Self {
                _ctx: ctx,
                session: Mutex::new(session),
                key_handle,
                public_key,
            },
            info,
        ))
    }

    /// Raw `r || s` over a 32-byte digest
    fn sign_digest(&self, digest: &[u8; 32]) -> Result<Vec<u8>, HardwareError> {
        let session = self
            .session
            .lock()
            .map_err(|e| HardwareError::SigningFailed(format!("Session lock poisoned: {}", e)))?;

        let raw = session
            .sign(&Mechanism::Ecdsa, self.key_handle, digest)
            .map_err(|e| HardwareError::SigningFailed(format!("HSM signing failed: {}", e)))?;

        if raw.len() != 64 {
            return Err(HardwareError::SigningFailed(format!(
                "Unexpected signature length: {}",
                raw.len()
            )));
        }
        normalize_signature(&raw).map_err(|e| HardwareError::SigningFailed(e.to_string()))
    }
}

impl Drop for Pkcs11Device {
    fn drop(&mut self) {
        if let Ok(session) = self.session.lock() {
            let _ = session.logout();
        }
        debug!("PKCS#11 session closed");
    }
}

fn find_key(session: &Session, label: &str) -> Result<ObjectHandle, HardwareError> {
    let template = vec![
        Attribute::Class(ObjectClass::PRIVATE_KEY),
        Attribute::Label(label.as_bytes().to_vec()),
    ];

    session
        .find_objects(&template)
        .map_err(|e| HardwareError::Unavailable(format!("Failed to find key: {}", e)))?
        .into_iter()
        .next()
        .ok_or_else(|| HardwareError::Unavailable(format!("Key '{}' not found in HSM", label)))
}

fn read_public_key(session: &Session, key: ObjectHandle) -> Result<Vec<u8>, HardwareError> {
    let attrs = session
        .get_attributes(key, &[AttributeType::EcPoint])
        .map_err(|e| HardwareError::Unavailable(format!("Failed to get public key: {}", e)))?;

    for attr in attrs {
        if let Attribute::EcPoint(point) = attr {
            return parse_ec_point(&point).map(<[u8]>::to_vec);
        }
    }

    Err(HardwareError::Unavailable(
        "Could not retrieve public key from HSM".to_string(),
    ))
}

/// Extract the 65-byte uncompressed point from a raw or DER OCTET STRING
/// wrapped `CKA_EC_POINT`
fn parse_ec_point(data: &[u8]) -> Result<&[u8], HardwareError> {
    let is_point = |p: &[u8]| p.len() == 65 && p[0] == 0x04;

    if is_point(data) {
        return Ok(data);
    }
    // 04 <len> <point>
    if data.len() == 67 && data[0] == 0x04 && data[1] == 65 && is_point(&data[2..]) {
        return Ok(&data[2..]);
    }
    // 04 81 <len> <point>
    if data.len() == 68 && data[0] == 0x04 && data[1] == 0x81 && is_point(&data[3..]) {
        return Ok(&data[3..]);
    }

    Err(HardwareError::Unavailable(format!(
        "Unsupported EC point encoding: {} bytes, first byte 0x{:02x}",
        data.len(),
        data.first().copied().unwrap_or(0)
    )))
}

/// [`HardwareSigner`] over a PKCS#11 token
pub struct Pkcs11Signer {
    settings: Pkcs11Settings,
    timeout: Duration,
    device: Option<Arc<Pkcs11Device>>,
    info: HardwareInfo,
    lifecycle: Lifecycle,
}

impl Pkcs11Signer {
    /// Nothing is loaded until `initialize`
    pub fn new(settings: Pkcs11Settings, timeout: Duration) -> Self {
        Self {
            settings,
            timeout,
            device: None,
            info: HardwareInfo::default(),
            lifecycle: Lifecycle::Uninitialized,
        }
    }
}

impl HardwareSigner for Pkcs11Signer {
    fn initialize(&mut self) -> Result<HardwareInfo, HardwareError> {
        match self.lifecycle {
            Lifecycle::Ready => return Ok(self.info.clone()),
            Lifecycle::ShutDown => return Err(HardwareError::ShutDown),
            Lifecycle::Uninitialized => {}
        }

        let (device, info) = Pkcs11Device::connect(&self.settings)?;
        info!(hardware_id = %info.hardware_id, "PKCS#11 session established");

        self.device = Some(Arc::new(device));
        self.info = info;
        self.lifecycle = Lifecycle::Ready;
        Ok(self.info.clone())
    }

    fn sign(&mut self, payload: &[u8]) -> Result<Signature, HardwareError> {
        let device = match (&self.lifecycle, &self.device) {
            (Lifecycle::Ready, Some(device)) => Arc::clone(device),
            _ => return Err(HardwareError::NotInitialized),
        };

        let algorithm = SignatureAlgorithm::EcdsaSecp256k1;
        let timestamp = unix_timestamp();
        let digest = algorithm.digest(payload, timestamp);

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let _ = tx.send(device.sign_digest(&digest));
        });

        match rx.recv_timeout(self.timeout) {
            Ok(result) => Ok(Signature::new(result?, algorithm, timestamp)),
            Err(RecvTimeoutError::Timeout) => {
                warn!(timeout = ?self.timeout, "HSM did not answer in time");
                Err(HardwareError::Timeout(self.timeout))
            }
            Err(RecvTimeoutError::Disconnected) => Err(HardwareError::SigningFailed(
                "HSM worker exited without a result".to_string(),
            )),
        }
    }

    fn get_public_key(&self) -> Vec<u8> {
        match (&self.lifecycle, &self.device) {
            (Lifecycle::Ready, Some(device)) => device.public_key.clone(),
            _ => Vec::new(),
        }
    }

    fn shutdown(&mut self) {
        // Dropping the last Arc logs out; an abandoned worker may hold another
        self.device = None;
        if self.lifecycle == Lifecycle::Ready {
            info!(hardware_id = %self.info.hardware_id, "PKCS#11 signer shut down");
        }
        self.lifecycle = Lifecycle::ShutDown;
    }

    fn is_available(&self) -> bool {
        self.lifecycle == Lifecycle::Ready
    }

    fn hardware_info(&self) -> HardwareInfo {
        self.info.clone()
    }

    fn device_type(&self) -> &'static str {
        "pkcs11"
    }
}
