//! # biogate
//!
//! Authentication-gated encryption.
//!
//! Keys live in a [`KeyVault`]. Each encode or decode builds a cipher for
//! one (purpose, algorithm) pair, hands it to an [`Authenticator`] as an
//! opaque [`CryptoToken`], and finishes the transform only after the
//! authenticator reports success. Keys invalidated by a credential
//! enrollment change are deleted and reported as
//! [`GateError::KeyInvalidated`].
//!
//! ## Public API
//!
//! [`BioGate`] is the entry point. Vault and authenticator backends are
//! chosen at construction time, which lets the whole flow run against
//! [`MemoryVault`] and [`SimulatedAuthenticator`] without secure hardware.
//!
//! ```no_run
//! use std::sync::Arc;
//! use biogate::{AuthOutcome, BioGate, CryptoAlgorithm, MemoryVault, SimulatedAuthenticator};
//!
//! let gate = BioGate::new(
//!     Arc::new(MemoryVault::new()),
//!     Arc::new(SimulatedAuthenticator::approving()),
//! );
//! gate.encode("4111 1111 1111 1111", "card", CryptoAlgorithm::Aes, |outcome: AuthOutcome| {
//!     if let AuthOutcome::Success { data: Some(envelope) } = outcome {
//!         println!("stored {envelope}");
//!     }
//! });
//! ```

pub mod audit;
pub mod authenticator;
pub mod bridge;
pub mod config;
pub(crate) mod crypto;
pub mod envelope;
pub mod error;
pub mod gate;
pub mod keys;
pub mod outcome;
pub mod session;
pub mod vault;

pub use authenticator::{Authenticator, SimulatedAuthenticator, Step, UnsupportedAuthenticator};
pub use bridge::{AuthListener, AuthRequest, CancelSignal};
pub use config::GateConfig;
pub use envelope::{Envelope, SEPARATOR};
pub use error::{GateError, Result, VaultError};
pub use gate::BioGate;
pub use outcome::{AuthOutcome, CompleteCallback, Readiness, State, ERROR_CANCELED};
pub use session::{CryptoAlgorithm, CryptoToken, Purpose};
pub use vault::{FileVault, KeyPolicy, KeyVault, MemoryVault, UnavailableVault};
