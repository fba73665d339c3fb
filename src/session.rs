//! Cipher sessions.
//!
//! A session builds a cipher for exactly one (purpose, algorithm) pair and
//! keeps the minimal state needed to finish the transform after
//! authentication. That state is the [`CryptoToken`]: it is handed to the
//! authenticator, comes back on success, and is consumed by
//! [`CryptoToken::finish`]. Tokens are not `Clone` and can't be reused.
//!
//! | algorithm | purpose | key            | authentication |
//! |-----------|---------|----------------|----------------|
//! | Aes       | encode  | secret, lazily created | required |
//! | Aes       | decode  | secret         | required       |
//! | Ecies     | encode  | public, lazily created pair | none, transformed immediately |
//! | Ecies     | decode  | private        | required       |

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::crypto::{self, AeadCipher, EciesParams};
use crate::envelope::{self, Envelope};
use crate::error::{GateError, VaultError};
use crate::keys::PrivateKey;
use crate::vault::{KeyPolicy, KeyVault};

/// Algorithm family of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CryptoAlgorithm {
    /// AES-256-GCM with a vault-held secret key.
    Aes,
    /// ECIES over P-256 with a vault-held key pair.
    Ecies,
}

impl CryptoAlgorithm {
    pub fn is_symmetric(self) -> bool {
        matches!(self, Self::Aes)
    }
}

/// Direction of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Purpose {
    Encode,
    Decode,
}

/// Whether an operation has to pass through the authenticator.
///
/// Public-key encryption never touches protected key material, so it is the
/// only combination that runs without authentication.
pub fn requires_authentication(algorithm: CryptoAlgorithm, purpose: Purpose) -> bool {
    !(algorithm == CryptoAlgorithm::Ecies && purpose == Purpose::Encode)
}

enum PendingOp {
    AesEncode {
        cipher: AeadCipher,
        plaintext: Zeroizing<Vec<u8>>,
    },
    AesDecode {
        cipher: AeadCipher,
        ciphertext: Vec<u8>,
    },
    EciesDecode {
        private: PrivateKey,
        ciphertext: Vec<u8>,
    },
}

/// An initialised cipher bound to one pending operation.
///
/// Opaque to authenticators: they may only hold it and hand it back.
pub struct CryptoToken {
    op: PendingOp,
}

impl CryptoToken {
    pub fn algorithm(&self) -> CryptoAlgorithm {
        match self.op {
            PendingOp::AesEncode { .. } | PendingOp::AesDecode { .. } => CryptoAlgorithm::Aes,
            PendingOp::EciesDecode { .. } => CryptoAlgorithm::Ecies,
        }
    }

    pub fn purpose(&self) -> Purpose {
        match self.op {
            PendingOp::AesEncode { .. } => Purpose::Encode,
            PendingOp::AesDecode { .. } | PendingOp::EciesDecode { .. } => Purpose::Decode,
        }
    }

    /// Run the pending transform. Returns the envelope for an encode and the
    /// plaintext for a decode.
    pub fn finish(self) -> Result<String, GateError> {
        match self.op {
            PendingOp::AesEncode { cipher, plaintext } => {
                let iv = cipher.iv();
                let ciphertext = cipher.encrypt(&plaintext)?;
                Ok(Envelope::new(ciphertext, iv).to_string())
            }
            PendingOp::AesDecode { cipher, ciphertext } => into_text(cipher.decrypt(&ciphertext)?),
            PendingOp::EciesDecode {
                private,
                ciphertext,
            } => into_text(crypto::ecies_decrypt(
                &private,
                &EciesParams::P256_HKDF_SHA256_AES256GCM,
                &ciphertext,
            )?),
        }
    }
}

impl fmt::Debug for CryptoToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CryptoToken")
            .field("algorithm", &self.algorithm())
            .field("purpose", &self.purpose())
            .finish_non_exhaustive()
    }
}

fn into_text(bytes: Vec<u8>) -> Result<String, GateError> {
    String::from_utf8(bytes).map_err(|_| GateError::Crypto("decoded bytes are not UTF-8".to_string()))
}

/// Result of preparing a session.
#[derive(Debug)]
pub enum Prepared {
    /// The transform waits for authentication.
    Deferred(CryptoToken),
    /// The transform already ran; no authentication was needed.
    Immediate(String),
}

/// Builds ciphers against one vault with one creation policy.
pub struct CipherSession<'a> {
    vault: &'a dyn KeyVault,
    policy: KeyPolicy,
}

impl<'a> CipherSession<'a> {
    pub fn new(vault: &'a dyn KeyVault, policy: KeyPolicy) -> Self {
        Self { vault, policy }
    }

    /// Build the cipher for `(algorithm, purpose)` over `text`.
    ///
    /// Every failure here happens before any authentication is attempted.
    /// If the vault reports the key as invalidated, the alias is deleted and
    /// [`GateError::KeyInvalidated`] is returned.
    pub fn prepare(
        &self,
        algorithm: CryptoAlgorithm,
        purpose: Purpose,
        alias: &str,
        text: &str,
    ) -> Result<Prepared, GateError> {
        debug!(alias, ?algorithm, ?purpose, "preparing cipher");
        match (algorithm, purpose) {
            (CryptoAlgorithm::Aes, Purpose::Encode) => {
                self.ensure_key(alias, algorithm)?;
                let key = self.recover(alias, self.vault.fetch_secret(alias))?;
                let cipher = AeadCipher::init_encrypt(key.as_bytes())?;
                Ok(Prepared::Deferred(CryptoToken {
                    op: PendingOp::AesEncode {
                        cipher,
                        plaintext: Zeroizing::new(text.as_bytes().to_vec()),
                    },
                }))
            }
            (CryptoAlgorithm::Aes, Purpose::Decode) => {
                let envelope = Envelope::parse(text)?;
                let key = self.recover(alias, self.vault.fetch_secret(alias))?;
                let cipher = AeadCipher::init_decrypt(key.as_bytes(), envelope.iv)?;
                Ok(Prepared::Deferred(CryptoToken {
                    op: PendingOp::AesDecode {
                        cipher,
                        ciphertext: envelope.ciphertext,
                    },
                }))
            }
            (CryptoAlgorithm::Ecies, Purpose::Encode) => {
                self.ensure_key(alias, algorithm)?;
                let public = self.vault.fetch_public(alias)?;
                let unrestricted = public.unrestricted()?;
                let ciphertext = crypto::ecies_encrypt(
                    &unrestricted,
                    &EciesParams::P256_HKDF_SHA256_AES256GCM,
                    text.as_bytes(),
                )?;
                Ok(Prepared::Immediate(envelope::encode_asymmetric(&ciphertext)))
            }
            (CryptoAlgorithm::Ecies, Purpose::Decode) => {
                let ciphertext = envelope::parse_asymmetric(text)?;
                let private = self.recover(alias, self.vault.fetch_private(alias))?;
                Ok(Prepared::Deferred(CryptoToken {
                    op: PendingOp::EciesDecode {
                        private,
                        ciphertext,
                    },
                }))
            }
        }
    }

    fn ensure_key(&self, alias: &str, algorithm: CryptoAlgorithm) -> Result<(), GateError> {
        if self.vault.exists(alias)? {
            return Ok(());
        }
        match algorithm {
            CryptoAlgorithm::Aes => self.vault.create_symmetric(alias, self.policy)?,
            CryptoAlgorithm::Ecies => self.vault.create_asymmetric(alias, self.policy)?,
        }
        Ok(())
    }

    /// Delete the alias when its key has been invalidated.
    fn recover<K>(&self, alias: &str, fetched: Result<K, VaultError>) -> Result<K, GateError> {
        match fetched {
            Err(VaultError::KeyInvalidated(_)) => {
                warn!(alias, "key invalidated by enrollment change, deleting");
                if let Err(e) = self.vault.delete(alias) {
                    warn!(alias, error = %e, "failed to delete invalidated key");
                }
                Err(GateError::KeyInvalidated(alias.to_string()))
            }
            other => other.map_err(GateError::from),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vault::{MemoryVault, UnavailableVault};

    fn deferred(prepared: Prepared) -> CryptoToken {
        match prepared {
            Prepared::Deferred(token) => token,
            Prepared::Immediate(_) => panic!("expected a deferred token"),
        }
    }

    #[test]
    fn aes_encode_creates_key_lazily_and_roundtrips() {
        let vault = MemoryVault::new();
        let session = CipherSession::new(&vault, KeyPolicy::default());

        let token = deferred(
            session
                .prepare(CryptoAlgorithm::Aes, Purpose::Encode, "pin", "1234")
                .unwrap(),
        );
        assert!(vault.exists("pin").unwrap());
        assert_eq!(token.purpose(), Purpose::Encode);

        let envelope = token.finish().unwrap();
        assert!(envelope.contains(crate::envelope::SEPARATOR));

        let token = deferred(
            session
                .prepare(CryptoAlgorithm::Aes, Purpose::Decode, "pin", &envelope)
                .unwrap(),
        );
        assert_eq!(token.finish().unwrap(), "1234");
    }

    #[test]
    fn ecies_encode_is_immediate() {
        let vault = MemoryVault::new();
        let session = CipherSession::new(&vault, KeyPolicy::default());

        let encoded = match session
            .prepare(CryptoAlgorithm::Ecies, Purpose::Encode, "rsa-ish", "hello")
            .unwrap()
        {
            Prepared::Immediate(encoded) => encoded,
            Prepared::Deferred(_) => panic!("public-key encode must not wait"),
        };
        assert!(!encoded.contains(crate::envelope::SEPARATOR));

        let token = deferred(
            session
                .prepare(CryptoAlgorithm::Ecies, Purpose::Decode, "rsa-ish", &encoded)
                .unwrap(),
        );
        assert_eq!(token.finish().unwrap(), "hello");
    }

    #[test]
    fn invalidated_key_is_deleted() {
        let vault = MemoryVault::new();
        let session = CipherSession::new(&vault, KeyPolicy::default());
        let envelope = deferred(
            session
                .prepare(CryptoAlgorithm::Aes, Purpose::Encode, "pin", "1234")
                .unwrap(),
        )
        .finish()
        .unwrap();

        vault.invalidate_enrolled_keys();
        let err = session
            .prepare(CryptoAlgorithm::Aes, Purpose::Decode, "pin", &envelope)
            .unwrap_err();
        assert_eq!(err, GateError::KeyInvalidated("pin".into()));
        assert!(!vault.exists("pin").unwrap());
    }

    #[test]
    fn malformed_input_fails_before_the_vault() {
        let vault = UnavailableVault;
        let session = CipherSession::new(&vault, KeyPolicy::default());
        let err = session
            .prepare(CryptoAlgorithm::Aes, Purpose::Decode, "pin", "not-a-valid-envelope")
            .unwrap_err();
        assert!(matches!(err, GateError::MalformedEnvelope(_)));
    }

    #[test]
    fn unavailable_vault_surfaces_as_vault_error() {
        let vault = UnavailableVault;
        let session = CipherSession::new(&vault, KeyPolicy::default());
        let err = session
            .prepare(CryptoAlgorithm::Aes, Purpose::Encode, "pin", "1234")
            .unwrap_err();
        assert_eq!(err, GateError::Vault(VaultError::Unavailable));
    }

    #[test]
    fn only_public_key_encode_skips_authentication() {
        assert!(!requires_authentication(CryptoAlgorithm::Ecies, Purpose::Encode));
        assert!(requires_authentication(CryptoAlgorithm::Ecies, Purpose::Decode));
        assert!(requires_authentication(CryptoAlgorithm::Aes, Purpose::Encode));
        assert!(requires_authentication(CryptoAlgorithm::Aes, Purpose::Decode));
    }
}
