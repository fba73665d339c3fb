//! Outcomes of readiness checks, authentication attempts and gated
//! crypto operations.
//!
//! Every operation on the gate reports through [`AuthOutcome`]. Exactly one
//! variant is active per outcome. `Help` and `Failed` are progress events
//! that may repeat while the sensor keeps listening; every other variant is
//! terminal and is delivered at most once per operation.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::GateError;

/// Error code used when a pending authentication is canceled.
pub const ERROR_CANCELED: i32 = 5;

/// Readiness of the authenticator, evaluated fresh on every call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Readiness {
    /// No authentication hardware is present.
    NotSupported,
    /// The device has no secure lock screen.
    Unsecured,
    /// Hardware is present but no credential is enrolled.
    NoEnrolledCredential,
    /// Authentication can start.
    Ready,
}

impl fmt::Display for Readiness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NotSupported => "device does not support authentication",
            Self::Unsecured => "device is not secured",
            Self::NoEnrolledCredential => "no credential is enrolled on this device",
            Self::Ready => "ready",
        };
        f.write_str(text)
    }
}

/// Coarse state of an outcome, used for matching and for audit records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    NotSupported,
    Unsecured,
    NoEnrolledCredential,
    Ready,
    Success,
    Help,
    Failed,
    Error,
    Exception,
}

/// Tagged result of a readiness check, an authentication attempt, or a
/// gated crypto operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    NotSupported,
    Unsecured,
    NoEnrolledCredential,
    Ready,
    /// Authentication succeeded. `data` holds the envelope or plaintext for
    /// crypto operations and is `None` for plain authentication.
    Success { data: Option<String> },
    /// Recoverable sensor guidance (e.g. "finger moved too fast").
    Help { code: i32, message: String },
    /// A credential was presented but not recognized. The sensor keeps
    /// listening.
    Failed,
    /// The authentication session ended.
    Error {
        code: i32,
        message: String,
        canceled_by_user: bool,
    },
    /// The operation failed before or after authentication.
    Exception(GateError),
}

impl AuthOutcome {
    pub fn state(&self) -> State {
        match self {
            Self::NotSupported => State::NotSupported,
            Self::Unsecured => State::Unsecured,
            Self::NoEnrolledCredential => State::NoEnrolledCredential,
            Self::Ready => State::Ready,
            Self::Success { .. } => State::Success,
            Self::Help { .. } => State::Help,
            Self::Failed => State::Failed,
            Self::Error { .. } => State::Error,
            Self::Exception(_) => State::Exception,
        }
    }

    /// `Help` and `Failed` are the only non-terminal outcomes.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Help { .. } | Self::Failed)
    }

    /// True when the operation failed because its key was invalidated.
    pub fn is_key_invalidated(&self) -> bool {
        matches!(self, Self::Exception(GateError::KeyInvalidated(_)))
    }

    /// The payload of a successful crypto operation.
    pub fn data(&self) -> Option<&str> {
        match self {
            Self::Success { data } => data.as_deref(),
            _ => None,
        }
    }

    /// Convert the outcome into a `Result`, so terminal outcomes compose
    /// with `?`.
    pub fn into_result(self) -> Result<Option<String>, GateError> {
        match self {
            Self::Success { data } => Ok(data),
            Self::Ready => Ok(None),
            Self::NotSupported => Err(GateError::NotReady {
                reason: Readiness::NotSupported,
            }),
            Self::Unsecured => Err(GateError::NotReady {
                reason: Readiness::Unsecured,
            }),
            Self::NoEnrolledCredential => Err(GateError::NotReady {
                reason: Readiness::NoEnrolledCredential,
            }),
            Self::Help { code, message } => Err(GateError::Authentication {
                code,
                message,
                retryable: true,
            }),
            Self::Failed => Err(GateError::Authentication {
                code: -1,
                message: "credential not recognized".to_string(),
                retryable: true,
            }),
            Self::Error {
                canceled_by_user: true,
                ..
            } => Err(GateError::Canceled { by_user: true }),
            Self::Error {
                code: ERROR_CANCELED,
                ..
            } => Err(GateError::Canceled { by_user: false }),
            Self::Error { code, message, .. } => Err(GateError::Authentication {
                code,
                message,
                retryable: false,
            }),
            Self::Exception(err) => Err(err),
        }
    }
}

impl From<Readiness> for AuthOutcome {
    fn from(readiness: Readiness) -> Self {
        match readiness {
            Readiness::NotSupported => Self::NotSupported,
            Readiness::Unsecured => Self::Unsecured,
            Readiness::NoEnrolledCredential => Self::NoEnrolledCredential,
            Readiness::Ready => Self::Ready,
        }
    }
}

/// Receives the outcomes of one gate operation.
///
/// Zero or more `Help`/`Failed` outcomes may arrive, followed by exactly
/// one terminal outcome. Delivery can happen on any thread.
pub trait CompleteCallback: Send + 'static {
    fn on_completed(&mut self, outcome: AuthOutcome);
}

impl<F> CompleteCallback for F
where
    F: FnMut(AuthOutcome) + Send + 'static,
{
    fn on_completed(&mut self, outcome: AuthOutcome) {
        self(outcome)
    }
}
