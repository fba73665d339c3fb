//! Low-level cryptographic operations.
//!
//! This module and `keys` are the only places that touch `ring` and `p256`
//! directly. Everything above works through [`AeadCipher`] and the ECIES
//! helpers exposed here.
//!
//! Primitive choices:
//! - **Symmetric cipher**: AES-256-GCM. The 96-bit nonce is the IV that
//!   travels in the envelope.
//! - **Asymmetric cipher**: ECIES over P-256. Ephemeral-static ECDH,
//!   HKDF-SHA256 keyed by the shared secret and salted with the ephemeral
//!   point, then AES-256-GCM.
//! - **Randomness**: `ring::rand::SystemRandom`, nothing else.

use p256::elliptic_curve::sec1::ToEncodedPoint;
use ring::aead::{self, Aad, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};

use crate::error::GateError;
use crate::keys::{self, PrivateKey, PublicKey};

/// The AEAD algorithm used for every transform.
const ALGORITHM: &aead::Algorithm = &AES_256_GCM;

/// Size of the nonce / IV in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// Size of a symmetric key in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Size of an uncompressed SEC1 P-256 point.
pub const POINT_LEN: usize = 65;

/// Fill `buf` from the system random source.
pub(crate) fn fill_random(buf: &mut [u8]) -> Result<(), GateError> {
    SystemRandom::new()
        .fill(buf)
        .map_err(|_| GateError::Crypto("randomness source failed".to_string()))
}

/// Generate a fresh symmetric key.
pub(crate) fn generate_random_key() -> Result<[u8; KEY_LEN], GateError> {
    let mut key = [0u8; KEY_LEN];
    fill_random(&mut key)?;
    Ok(key)
}

/// An AES-256-GCM cipher initialised for one transform.
///
/// Built in encrypt mode (the nonce is generated here) or decrypt mode (the
/// nonce comes from the envelope). The transform methods consume the
/// cipher, so a nonce is never used twice.
pub(crate) struct AeadCipher {
    key: LessSafeKey,
    nonce: [u8; NONCE_LEN],
}

impl AeadCipher {
    pub(crate) fn init_encrypt(key_bytes: &[u8; KEY_LEN]) -> Result<Self, GateError> {
        let mut nonce = [0u8; NONCE_LEN];
        fill_random(&mut nonce)?;
        Self::with_nonce(key_bytes, nonce)
    }

    pub(crate) fn init_decrypt(
        key_bytes: &[u8; KEY_LEN],
        iv: [u8; NONCE_LEN],
    ) -> Result<Self, GateError> {
        Self::with_nonce(key_bytes, iv)
    }

    fn with_nonce(key_bytes: &[u8; KEY_LEN], nonce: [u8; NONCE_LEN]) -> Result<Self, GateError> {
        let unbound = UnboundKey::new(ALGORITHM, key_bytes)
            .map_err(|_| GateError::Crypto("invalid key".to_string()))?;
        Ok(Self {
            key: LessSafeKey::new(unbound),
            nonce,
        })
    }

    /// The IV this cipher was initialised with.
    pub(crate) fn iv(&self) -> [u8; NONCE_LEN] {
        self.nonce
    }

    /// Encrypt `plaintext`. Returns ciphertext with the GCM tag appended.
    pub(crate) fn encrypt(self, plaintext: &[u8]) -> Result<Vec<u8>, GateError> {
        let mut output = Vec::with_capacity(plaintext.len() + ALGORITHM.tag_len());
        output.extend_from_slice(plaintext);
        self.key
            .seal_in_place_append_tag(
                Nonce::assume_unique_for_key(self.nonce),
                Aad::empty(),
                &mut output,
            )
            .map_err(|_| GateError::Crypto("exception while encoding with cipher".to_string()))?;
        Ok(output)
    }

    /// Decrypt `ciphertext` (tag appended). Wrong key, wrong IV or tampered
    /// input all fail the tag check; no partial plaintext is returned.
    pub(crate) fn decrypt(self, ciphertext: &[u8]) -> Result<Vec<u8>, GateError> {
        let mut payload = ciphertext.to_vec();
        let plaintext = self
            .key
            .open_in_place(
                Nonce::assume_unique_for_key(self.nonce),
                Aad::empty(),
                &mut payload,
            )
            .map_err(|_| GateError::Crypto("exception while decoding with cipher".to_string()))?;
        Ok(plaintext.to_vec())
    }
}

/// Explicit parameters bound to a public key for ECIES.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EciesParams {
    /// HKDF info label; both sides must agree on it.
    pub kdf_info: &'static str,
}

impl EciesParams {
    pub(crate) const P256_HKDF_SHA256_AES256GCM: Self = Self {
        kdf_info: "biogate:ecies:p256:hkdf-sha256:aes-256-gcm",
    };
}

/// Encrypt `plaintext` to `recipient`.
///
/// # Layout of returned bytes
/// ```text
/// [ ephemeral point (65 bytes) ][ nonce (12 bytes) ][ ciphertext + GCM tag ]
/// ```
pub(crate) fn ecies_encrypt(
    recipient: &PublicKey,
    params: &EciesParams,
    plaintext: &[u8],
) -> Result<Vec<u8>, GateError> {
    let ephemeral = keys::generate_private_key()?;
    let ephemeral_point = ephemeral.public_key().to_sec1_bytes();

    let shared = p256::ecdh::diffie_hellman(
        ephemeral.inner().to_nonzero_scalar(),
        recipient.inner().as_affine(),
    );
    let wrapping = keys::derive_key(
        shared.raw_secret_bytes().as_slice(),
        &ephemeral_point,
        params.kdf_info,
    )?;

    let cipher = AeadCipher::init_encrypt(wrapping.as_bytes())?;
    let iv = cipher.iv();
    let sealed = cipher.encrypt(plaintext)?;

    let mut output = Vec::with_capacity(POINT_LEN + NONCE_LEN + sealed.len());
    output.extend_from_slice(&ephemeral_point);
    output.extend_from_slice(&iv);
    output.extend_from_slice(&sealed);
    Ok(output)
}

/// Decrypt a blob produced by [`ecies_encrypt`] with the recipient's
/// private key.
pub(crate) fn ecies_decrypt(
    private: &PrivateKey,
    params: &EciesParams,
    blob: &[u8],
) -> Result<Vec<u8>, GateError> {
    if blob.len() < POINT_LEN + NONCE_LEN + ALGORITHM.tag_len() {
        return Err(GateError::Crypto("ciphertext too short".to_string()));
    }
    let (point, rest) = blob.split_at(POINT_LEN);
    let (iv, sealed) = rest.split_at(NONCE_LEN);

    let ephemeral = p256::PublicKey::from_sec1_bytes(point)
        .map_err(|_| GateError::Crypto("invalid ephemeral point".to_string()))?;
    let shared = p256::ecdh::diffie_hellman(
        private.inner().to_nonzero_scalar(),
        ephemeral.as_affine(),
    );
    let wrapping = keys::derive_key(
        shared.raw_secret_bytes().as_slice(),
        ephemeral.to_encoded_point(false).as_bytes(),
        params.kdf_info,
    )?;

    let iv: [u8; NONCE_LEN] = iv
        .try_into()
        .map_err(|_| GateError::Crypto("invalid nonce".to_string()))?;
    AeadCipher::init_decrypt(wrapping.as_bytes(), iv)?.decrypt(sealed)
}
