//! Error types for biogate.
//!
//! Two layers of errors exist. [`VaultError`] is the contract of the key
//! vault backends. [`GateError`] is what callers of the gate see; it wraps
//! vault failures and adds the outcomes of cipher sessions and of the
//! authentication flow. Messages name *what* failed and never include key
//! material or payload bytes.

use thiserror::Error;

use crate::outcome::Readiness;

/// Result type alias for gate operations.
pub type Result<T> = std::result::Result<T, GateError>;

/// Errors reported by a [`KeyVault`](crate::vault::KeyVault) backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VaultError {
    /// The backing store could not be opened. The vault is running in its
    /// non-functional mode and every operation fails fast.
    #[error("key vault is unavailable")]
    Unavailable,

    /// No key is stored under the alias.
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// The key exists but was invalidated by a change of enrolled
    /// credentials since it was created.
    #[error("key permanently invalidated: {0}")]
    KeyInvalidated(String),

    /// The key under the alias has the wrong kind for the request
    /// (e.g. a secret key was asked for a key pair alias).
    #[error("key {0} has the wrong kind for this operation")]
    WrongKeyKind(String),

    /// Generating new key material failed.
    #[error("can't generate key {alias}: {reason}")]
    KeyGeneration { alias: String, reason: String },

    /// Reading or writing the backing store failed.
    #[error("vault i/o error: {0}")]
    Io(String),
}

impl From<std::io::Error> for VaultError {
    fn from(err: std::io::Error) -> Self {
        VaultError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        VaultError::Io(err.to_string())
    }
}

/// The single error type surfaced by the gate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GateError {
    /// Hardware, lock screen or enrollment preconditions are not met.
    /// Recoverable only by user action outside this crate.
    #[error("authenticator is not ready: {reason}")]
    NotReady { reason: Readiness },

    /// The input to a decode was not a valid envelope.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// The key was invalidated by a credential enrollment change. The alias
    /// has been deleted; encoding again creates a fresh key.
    #[error("key {0} was invalidated and has been deleted")]
    KeyInvalidated(String),

    /// The key vault failed.
    #[error(transparent)]
    Vault(VaultError),

    /// The cipher transform failed. Not retryable for the same input.
    #[error("crypto failure: {0}")]
    Crypto(String),

    /// The authenticator reported help, a failed match or an error.
    #[error("authentication {code}: {message}")]
    Authentication {
        code: i32,
        message: String,
        retryable: bool,
    },

    /// The pending authentication was canceled.
    #[error("authentication canceled")]
    Canceled { by_user: bool },

    /// The configuration could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),
}

impl From<VaultError> for GateError {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::KeyInvalidated(alias) => GateError::KeyInvalidated(alias),
            other => GateError::Vault(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalidated_vault_error_maps_to_dedicated_variant() {
        let err: GateError = VaultError::KeyInvalidated("pin".into()).into();
        assert_eq!(err, GateError::KeyInvalidated("pin".into()));

        let err: GateError = VaultError::Unavailable.into();
        assert_eq!(err, GateError::Vault(VaultError::Unavailable));
    }

    #[test]
    fn messages_do_not_leak_more_than_the_alias() {
        let err = GateError::from(VaultError::KeyNotFound("card".into()));
        assert_eq!(err.to_string(), "key not found: card");
    }
}
