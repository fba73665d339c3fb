//! Key material handles and key derivation.
//!
//! Handles returned by a vault are opaque: not `Clone`, zeroised on drop,
//! and their raw bytes are `pub(crate)` at most. A [`PublicKey`] is the
//! only handle whose encoding may leave the crate.
//!
//! ## Derivation structure
//!
//! ECIES wrapping keys are derived as:
//!
//! ```text
//! HKDF-SHA256(
//!     ikm  = ECDH shared secret,
//!     salt = ephemeral public point (SEC1, uncompressed),
//!     info = kdf label
//! )
//! ```

use p256::elliptic_curve::sec1::ToEncodedPoint;
use ring::hkdf;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::crypto::{self, KEY_LEN};
use crate::error::GateError;

/// Kind of material stored under an alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyKind {
    /// A single AES-256 secret key.
    Symmetric,
    /// A P-256 key pair.
    Asymmetric,
}

/// A symmetric secret key.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretKey {
    bytes: [u8; KEY_LEN],
}

impl SecretKey {
    pub(crate) fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    pub(crate) fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }
}

impl std::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey(..)")
    }
}

/// The private half of a P-256 key pair. Never leaves the crate in raw form.
pub struct PrivateKey(p256::SecretKey);

impl PrivateKey {
    pub(crate) fn from_scalar_bytes(bytes: &[u8]) -> Result<Self, GateError> {
        p256::SecretKey::from_slice(bytes)
            .map(Self)
            .map_err(|_| GateError::Crypto("invalid private key".to_string()))
    }

    /// Scalar bytes, for vault persistence only.
    pub(crate) fn to_scalar_bytes(&self) -> zeroize::Zeroizing<Vec<u8>> {
        zeroize::Zeroizing::new(self.0.to_bytes().to_vec())
    }

    pub(crate) fn inner(&self) -> &p256::SecretKey {
        &self.0
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.public_key())
    }
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateKey(..)")
    }
}

/// The public half of a P-256 key pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey(p256::PublicKey);

impl PublicKey {
    /// Uncompressed SEC1 encoding.
    pub fn to_sec1_bytes(&self) -> Vec<u8> {
        self.0.to_encoded_point(false).as_bytes().to_vec()
    }

    pub fn from_sec1_bytes(bytes: &[u8]) -> Result<Self, GateError> {
        p256::PublicKey::from_sec1_bytes(bytes)
            .map(Self)
            .map_err(|_| GateError::Crypto("invalid public key encoding".to_string()))
    }

    /// A fresh copy re-derived from the encoded form. The copy carries no
    /// usage restrictions of the handle it came from; it is still the same
    /// public key.
    pub(crate) fn unrestricted(&self) -> Result<Self, GateError> {
        Self::from_sec1_bytes(&self.to_sec1_bytes())
    }

    pub(crate) fn inner(&self) -> &p256::PublicKey {
        &self.0
    }
}

/// Generate a P-256 private key from the system random source.
///
/// A random 32-byte string is a valid scalar unless it is zero or not below
/// the group order; both are astronomically unlikely, so a few retries
/// suffice.
pub(crate) fn generate_private_key() -> Result<PrivateKey, GateError> {
    for _ in 0..8 {
        let mut bytes = zeroize::Zeroizing::new([0u8; KEY_LEN]);
        crypto::fill_random(&mut bytes[..])?;
        if let Ok(key) = PrivateKey::from_scalar_bytes(&bytes[..]) {
            return Ok(key);
        }
    }
    Err(GateError::Crypto("can't generate a valid private key".to_string()))
}

/// Derive a 256-bit key with HKDF-SHA256.
pub(crate) fn derive_key(ikm: &[u8], salt: &[u8], info: &str) -> Result<SecretKey, GateError> {
    let prk = hkdf::Salt::new(hkdf::HKDF_SHA256, salt).extract(ikm);

    let info_slices = [info.as_bytes()];
    let okm = prk
        .expand(&info_slices, hkdf::HKDF_SHA256)
        .map_err(|_| GateError::Crypto("key derivation failed".to_string()))?;

    let mut derived = [0u8; KEY_LEN];
    okm.fill(&mut derived)
        .map_err(|_| GateError::Crypto("key derivation failed".to_string()))?;

    Ok(SecretKey { bytes: derived })
}
