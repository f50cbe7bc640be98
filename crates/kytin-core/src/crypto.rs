//! Cryptographic primitives for the Sentinel

use k256::ecdsa::{
    signature::hazmat::{PrehashSigner, PrehashVerifier},
    Signature as EcdsaSignature, SigningKey, VerifyingKey,
};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::error::{Error, Result};
use crate::types::{Signature, SignatureAlgorithm};

/// Length of an uncompressed SEC1 secp256k1 point
pub const UNCOMPRESSED_PUBKEY_LEN: usize = 65;

/// Domain tag for simulated key derivation
const SIMULATED_KEY_DOMAIN: &[u8] = b"kytin/simulated-signer/v1";

/// Compute SHA-256 hash
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Compute SHA-256 over several chunks
pub fn sha256_multi(chunks: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for chunk in chunks {
        hasher.update(chunk);
    }
    hasher.finalize().into()
}

/// Derive the simulated backend's signing key from its hardware id.
///
/// Anyone who knows the id can recompute the key.
pub fn simulated_signing_key(hardware_id: &str) -> Result<SigningKey> {
    let mut seed = sha256_multi(&[SIMULATED_KEY_DOMAIN, hardware_id.as_bytes()]);
    let key = SigningKey::from_bytes(&k256::FieldBytes::from(seed))
        .map_err(|e| Error::Crypto(format!("Invalid simulated key: {}", e)));
    seed.zeroize();
    key
}

/// 65-byte uncompressed encoding of a verifying key
pub fn encode_public_key(key: &VerifyingKey) -> Vec<u8> {
    key.to_encoded_point(false).as_bytes().to_vec()
}

/// Produce a low-S `r || s` signature over a 32-byte digest
pub fn sign_digest(key: &SigningKey, digest: &[u8; 32]) -> Result<Vec<u8>> {
    let signature: EcdsaSignature = key
        .sign_prehash(digest)
        .map_err(|e| Error::Crypto(format!("Signing failed: {}", e)))?;
    let signature = signature.normalize_s().unwrap_or(signature);
    Ok(signature.to_bytes().to_vec())
}

/// Normalise a raw `r || s` signature to low-S form
pub fn normalize_signature(raw: &[u8]) -> Result<Vec<u8>> {
    let signature = EcdsaSignature::from_slice(raw)
        .map_err(|e| Error::Crypto(format!("Invalid signature format: {}", e)))?;
    let signature = signature.normalize_s().unwrap_or(signature);
    Ok(signature.to_bytes().to_vec())
}

/// Verify `signature` over `payload` against a SEC1-encoded public key.
///
/// The digest is chosen by the signature's algorithm tag, so this accepts
/// both hardware and simulated signatures.
pub fn verify_signature(public_key: &[u8], payload: &[u8], signature: &Signature) -> Result<()> {
    if public_key.is_empty() {
        return Err(Error::InvalidPublicKey("empty public key".to_string()));
    }

    let verifying_key = VerifyingKey::from_sec1_bytes(public_key)
        .map_err(|e| Error::InvalidPublicKey(e.to_string()))?;

    let ecdsa_sig = EcdsaSignature::from_slice(signature.as_bytes())
        .map_err(|e| Error::Crypto(format!("Invalid signature format: {}", e)))?;

    let digest = signature.algorithm.digest(payload, signature.timestamp);

    verifying_key
        .verify_prehash(&digest, &ecdsa_sig)
        .map_err(|_| Error::SignatureVerificationFailed)
}

/// Short, stable identifier for a public key (first 8 bytes of its hash)
pub fn key_fingerprint(public_key: &[u8]) -> String {
    hex::encode_upper(&sha256(public_key)[..8])
}

/// Sign `payload` with a software key under the given scheme
pub fn sign_payload(
    key: &SigningKey,
    algorithm: SignatureAlgorithm,
    payload: &[u8],
    timestamp: u64,
) -> Result<Signature> {
    let digest = algorithm.digest(payload, timestamp);
    let bytes = sign_digest(key, &digest)?;
    Ok(Signature::new(bytes, algorithm, timestamp))
}
