//! The gate: orchestrates readiness, key vault, cipher sessions and the
//! authenticator into one operation per call.
//!
//! ```text
//! Idle -> CheckingReadiness -> NotSupported | Unsecured | NoEnrolledCredential   (terminal)
//!                           -> Ready -> cipher construction -> Exception           (terminal)
//!                                    -> AwaitingAuthentication
//!                                         -> Help | Failed                          (repeatable)
//!                                         -> Success | Error | Exception            (terminal)
//! ```
//!
//! Public-key encode skips readiness and authentication entirely and
//! completes synchronously.

use std::sync::mpsc;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::audit::{AuditLog, AuditRecord, AuditSink, FileAuditSink};
use crate::authenticator::Authenticator;
use crate::bridge::AuthBridge;
use crate::config::GateConfig;
use crate::error::GateError;
use crate::outcome::{AuthOutcome, CompleteCallback, Readiness};
use crate::session::{self, CipherSession, CryptoAlgorithm, Prepared, Purpose};
use crate::vault::{self, KeyPolicy, KeyVault};

/// Authentication-gated encode/decode.
///
/// One operation in flight per gate is the supported usage; starting a new
/// one while authentication is pending supersedes the old attempt.
pub struct BioGate {
    vault: Arc<dyn KeyVault>,
    authenticator: Arc<dyn Authenticator>,
    bridge: AuthBridge,
    policy: KeyPolicy,
    audit: Arc<AuditLog>,
}

impl BioGate {
    pub fn new(vault: Arc<dyn KeyVault>, authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            vault,
            bridge: AuthBridge::new(Arc::clone(&authenticator)),
            authenticator,
            policy: KeyPolicy::default(),
            audit: Arc::new(AuditLog::new()),
        }
    }

    /// Build a gate from configuration. A vault that can't be opened
    /// degrades to the non-functional vault; an audit file that can't be
    /// opened is an error.
    pub fn from_config(
        config: &GateConfig,
        authenticator: Arc<dyn Authenticator>,
    ) -> Result<Self, GateError> {
        let gate = Self::new(vault::open_vault(config.vault_path.as_deref()), authenticator)
            .with_policy(config.key_policy);
        if let Some(path) = &config.audit_log_path {
            let sink = FileAuditSink::new(path)
                .map_err(|e| GateError::Config(format!("{}: {e}", path.display())))?;
            gate.add_audit_sink(Box::new(sink));
        }
        Ok(gate)
    }

    /// Policy for keys created from now on.
    pub fn with_policy(mut self, policy: KeyPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn vault(&self) -> &Arc<dyn KeyVault> {
        &self.vault
    }

    /// Whether authentication hardware is present.
    pub fn is_supported(&self) -> bool {
        self.authenticator.is_hardware_present()
    }

    pub fn is_ready(&self) -> bool {
        self.authenticator.readiness() == Readiness::Ready
    }

    /// Readiness as an outcome. Evaluated fresh on every call.
    pub fn current_readiness(&self) -> AuthOutcome {
        self.authenticator.readiness().into()
    }

    /// Whether an authentication is pending.
    pub fn is_awaiting_authentication(&self) -> bool {
        self.bridge.is_pending()
    }

    /// Run one authentication attempt without any crypto operation.
    pub fn authenticate(&self, callback: impl CompleteCallback) {
        let mut callback: Box<dyn CompleteCallback> = Box::new(callback);
        let readiness = self.authenticator.readiness();
        if readiness != Readiness::Ready {
            callback.on_completed(readiness.into());
            return;
        }
        self.bridge.submit(None, callback);
    }

    /// Encrypt `text` under `alias`, creating the key on first use.
    ///
    /// On success the callback receives the envelope in
    /// `AuthOutcome::Success { data }`.
    pub fn encode(
        &self,
        text: &str,
        alias: &str,
        algorithm: CryptoAlgorithm,
        callback: impl CompleteCallback,
    ) {
        self.perform(Purpose::Encode, text, alias, algorithm, Box::new(callback));
    }

    /// Decrypt an envelope produced by [`encode`](Self::encode) with the
    /// same alias and algorithm.
    pub fn decode(
        &self,
        text: &str,
        alias: &str,
        algorithm: CryptoAlgorithm,
        callback: impl CompleteCallback,
    ) {
        self.perform(Purpose::Decode, text, alias, algorithm, Box::new(callback));
    }

    /// [`encode`](Self::encode), waiting for the terminal outcome.
    ///
    /// Blocks until the authenticator reports; cancel from another thread to
    /// unblock.
    pub fn encode_blocking(&self, text: &str, alias: &str, algorithm: CryptoAlgorithm) -> AuthOutcome {
        self.blocking(Purpose::Encode, text, alias, algorithm)
    }

    /// [`decode`](Self::decode), waiting for the terminal outcome.
    pub fn decode_blocking(&self, text: &str, alias: &str, algorithm: CryptoAlgorithm) -> AuthOutcome {
        self.blocking(Purpose::Decode, text, alias, algorithm)
    }

    /// Cancel the pending authentication. A no-op when nothing is pending.
    pub fn cancel(&self) -> bool {
        self.bridge.cancel(None)
    }

    /// Cancel the pending authentication and run `on_confirmed` once the
    /// authenticator has been told to stop. Not run when nothing was
    /// pending.
    pub fn cancel_with(&self, on_confirmed: impl FnOnce() + Send + 'static) -> bool {
        self.bridge.cancel(Some(Box::new(on_confirmed)))
    }

    pub fn add_audit_sink(&self, sink: Box<dyn AuditSink>) {
        self.audit.add_forward_sink(sink);
    }

    /// Snapshot of the audit trail.
    pub fn audit_records(&self) -> Vec<AuditRecord> {
        self.audit.records()
    }

    fn blocking(
        &self,
        purpose: Purpose,
        text: &str,
        alias: &str,
        algorithm: CryptoAlgorithm,
    ) -> AuthOutcome {
        let (tx, rx) = mpsc::channel();
        let callback = move |outcome: AuthOutcome| {
            if outcome.is_terminal() {
                let _ = tx.send(outcome);
            }
        };
        self.perform(purpose, text, alias, algorithm, Box::new(callback));
        rx.recv().unwrap_or_else(|_| {
            AuthOutcome::Exception(GateError::Authentication {
                code: -1,
                message: "operation dropped without an outcome".to_string(),
                retryable: false,
            })
        })
    }

    fn perform(
        &self,
        purpose: Purpose,
        text: &str,
        alias: &str,
        algorithm: CryptoAlgorithm,
        callback: Box<dyn CompleteCallback>,
    ) {
        let mut callback = self.audited(alias, algorithm, purpose, callback);

        if session::requires_authentication(algorithm, purpose) {
            let readiness = self.authenticator.readiness();
            if readiness != Readiness::Ready {
                info!(alias, ?readiness, "authenticator not ready");
                callback.on_completed(readiness.into());
                return;
            }
        }

        let cipher_session = CipherSession::new(self.vault.as_ref(), self.policy);
        match cipher_session.prepare(algorithm, purpose, alias, text) {
            Ok(Prepared::Immediate(data)) => {
                debug!(alias, ?algorithm, "completed without authentication");
                callback.on_completed(AuthOutcome::Success { data: Some(data) });
            }
            Ok(Prepared::Deferred(token)) => self.bridge.submit(Some(token), callback),
            Err(e) => {
                warn!(alias, ?algorithm, ?purpose, error = %e, "cipher construction failed");
                callback.on_completed(AuthOutcome::Exception(e));
            }
        }
    }

    fn audited(
        &self,
        alias: &str,
        algorithm: CryptoAlgorithm,
        purpose: Purpose,
        mut callback: Box<dyn CompleteCallback>,
    ) -> Box<dyn CompleteCallback> {
        let audit = Arc::clone(&self.audit);
        let alias = alias.to_string();
        Box::new(move |outcome: AuthOutcome| {
            if outcome.is_terminal() {
                audit.append(AuditRecord {
                    alias: alias.clone(),
                    algorithm,
                    purpose,
                    state: outcome.state(),
                    timestamp: Utc::now(),
                });
            }
            callback.on_completed(outcome);
        })
    }
}
