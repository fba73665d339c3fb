//! The authenticator: the local-presence check the gate waits on.
//!
//! Platform sensor bindings implement [`Authenticator`]. Two backends ship
//! with the crate:
//!
//! - [`UnsupportedAuthenticator`] reports no hardware and ignores requests.
//! - [`SimulatedAuthenticator`] is a software stand-in with configurable
//!   readiness and scripted attempts, used for tests and demos.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;

use tracing::debug;

use crate::bridge::AuthRequest;
use crate::outcome::{Readiness, ERROR_CANCELED};

/// A local-presence authenticator (fingerprint sensor, face unlock, ...).
///
/// `authenticate` must not block. Results are reported through the
/// request's listener, from any thread, at any later time: zero or more
/// `help`/`failed` reports followed by exactly one `succeeded` or `error`.
pub trait Authenticator: Send + Sync {
    fn is_hardware_present(&self) -> bool;

    fn has_enrolled_credential(&self) -> bool;

    fn is_device_secured(&self) -> bool;

    /// Start one authentication attempt.
    fn authenticate(&self, request: AuthRequest);

    /// Stop listening for the pending attempt. The request's signal has
    /// already been tripped when this is called.
    fn cancel(&self);

    /// Combined readiness, checked in order: hardware, lock screen,
    /// enrollment.
    fn readiness(&self) -> Readiness {
        if !self.is_hardware_present() {
            Readiness::NotSupported
        } else if !self.is_device_secured() {
            Readiness::Unsecured
        } else if !self.has_enrolled_credential() {
            Readiness::NoEnrolledCredential
        } else {
            Readiness::Ready
        }
    }
}

/// Authenticator for platforms without authentication hardware.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedAuthenticator;

impl Authenticator for UnsupportedAuthenticator {
    fn is_hardware_present(&self) -> bool {
        false
    }

    fn has_enrolled_credential(&self) -> bool {
        false
    }

    fn is_device_secured(&self) -> bool {
        false
    }

    fn authenticate(&self, _request: AuthRequest) {
        debug!("no authentication hardware, nothing to do");
    }

    fn cancel(&self) {}
}

/// One simulated sensor event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Help { code: i32, message: String },
    Fail,
    Succeed,
    Error { code: i32, message: String },
}

impl Step {
    fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeed | Self::Error { .. })
    }
}

struct SimState {
    hardware: bool,
    secured: bool,
    enrolled: bool,
    approve_by_default: bool,
    background: bool,
    script: VecDeque<Step>,
    pending: Option<AuthRequest>,
    attempts: usize,
    cancels: usize,
}

/// A software authenticator.
///
/// Each attempt plays the queued script until a terminal step. When the
/// script runs dry the attempt either succeeds (`approving`) or stays
/// pending until [`respond`](Self::respond) or a cancel.
#[derive(Clone)]
pub struct SimulatedAuthenticator {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimulatedAuthenticator {
    fn default() -> Self {
        Self::ready()
    }
}

impl SimulatedAuthenticator {
    /// Hardware present, device secured, one credential enrolled.
    pub fn ready() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                hardware: true,
                secured: true,
                enrolled: true,
                approve_by_default: false,
                background: false,
                script: VecDeque::new(),
                pending: None,
                attempts: 0,
                cancels: 0,
            })),
        }
    }

    /// A ready authenticator that recognizes the user on every attempt.
    pub fn approving() -> Self {
        Self::ready().approve_by_default(true)
    }

    pub fn with_hardware(self, present: bool) -> Self {
        self.lock().hardware = present;
        self
    }

    pub fn with_secured(self, secured: bool) -> Self {
        self.lock().secured = secured;
        self
    }

    pub fn with_enrolled(self, enrolled: bool) -> Self {
        self.lock().enrolled = enrolled;
        self
    }

    pub fn approve_by_default(self, approve: bool) -> Self {
        self.lock().approve_by_default = approve;
        self
    }

    /// Report from a spawned thread instead of the caller's.
    pub fn on_background_thread(self) -> Self {
        self.lock().background = true;
        self
    }

    /// Queue steps for upcoming attempts.
    pub fn with_script(self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.lock().script.extend(steps);
        self
    }

    /// Change enrollment between calls.
    pub fn set_enrolled(&self, enrolled: bool) {
        self.lock().enrolled = enrolled;
    }

    /// Number of attempts started so far.
    pub fn attempts(&self) -> usize {
        self.lock().attempts
    }

    /// Number of `cancel` calls received.
    pub fn cancels(&self) -> usize {
        self.lock().cancels
    }

    pub fn has_pending(&self) -> bool {
        self.lock().pending.is_some()
    }

    /// Play `step` against the pending attempt. Returns false when nothing
    /// is pending.
    pub fn respond(&self, step: Step) -> bool {
        let (request, background) = {
            let mut state = self.lock();
            match state.pending.take() {
                Some(request) => (request, state.background),
                None => return false,
            }
        };
        self.dispatch(request, vec![step], background);
        true
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn dispatch(&self, request: AuthRequest, steps: Vec<Step>, background: bool) {
        let this = self.clone();
        if background {
            thread::spawn(move || this.play(request, steps));
        } else {
            this.play(request, steps);
        }
    }

    fn play(&self, mut request: AuthRequest, steps: Vec<Step>) {
        for step in steps {
            if request.signal.is_canceled() {
                deliver_canceled(request);
                return;
            }
            let terminal = step.is_terminal();
            match step {
                Step::Help { code, message } => request.listener.help(code, message),
                Step::Fail => request.listener.failed(),
                Step::Succeed => request.listener.succeeded(request.token.take()),
                Step::Error { code, message } => request.listener.error(code, message),
            }
            if terminal {
                return;
            }
        }

        let mut state = self.lock();
        if request.signal.is_canceled() {
            drop(state);
            deliver_canceled(request);
            return;
        }
        state.pending = Some(request);
    }
}

fn deliver_canceled(request: AuthRequest) {
    request
        .listener
        .error(ERROR_CANCELED, "Authentication canceled.");
}

impl Authenticator for SimulatedAuthenticator {
    fn is_hardware_present(&self) -> bool {
        self.lock().hardware
    }

    fn has_enrolled_credential(&self) -> bool {
        self.lock().enrolled
    }

    fn is_device_secured(&self) -> bool {
        self.lock().secured
    }

    fn authenticate(&self, request: AuthRequest) {
        let (steps, background) = {
            let mut state = self.lock();
            state.attempts += 1;
            let mut steps = Vec::new();
            while let Some(step) = state.script.pop_front() {
                let terminal = step.is_terminal();
                steps.push(step);
                if terminal {
                    break;
                }
            }
            if !steps.last().is_some_and(Step::is_terminal) && state.approve_by_default {
                steps.push(Step::Succeed);
            }
            (steps, state.background)
        };
        self.dispatch(request, steps, background);
    }

    fn cancel(&self) {
        let pending = {
            let mut state = self.lock();
            state.cancels += 1;
            state.pending.take()
        };
        if let Some(request) = pending {
            deliver_canceled(request);
        }
    }
}
