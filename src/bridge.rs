//! Authenticator bridge.
//!
//! Submits a [`CryptoToken`] (or nothing, for plain authentication) to the
//! authenticator exactly once and routes everything the authenticator
//! reports into the operation's callback.
//!
//! Ordering rules:
//! 1. The attempt is registered as pending *before* the authenticator is
//!    called.
//! 2. The first terminal report clears the pending registration and fills
//!    the attempt's [`CompletionSlot`]. Later reports are dropped.
//! 3. `cancel` flags the attempt as user-canceled and trips its signal under
//!    the same lock that guards registration, so a report racing with a
//!    cancel is either delivered before it or flagged as canceled after it.
//!    A success that loses the race is delivered as a canceled error.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tracing::{debug, info, warn};

use crate::authenticator::Authenticator;
use crate::error::GateError;
use crate::outcome::{AuthOutcome, CompleteCallback, Readiness, ERROR_CANCELED};
use crate::session::CryptoToken;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Completion slot
// ---------------------------------------------------------------------------

struct SlotInner {
    callback: Option<Box<dyn CompleteCallback>>,
    queue: VecDeque<AuthOutcome>,
    draining: bool,
    terminal_seen: bool,
}

/// Single-assignment delivery point for one operation.
///
/// Progress outcomes pass through until the first terminal outcome is
/// accepted; after that every write is a no-op. Deliveries are serialised:
/// a thread that finds another delivery in progress only enqueues, and the
/// callback runs without any lock held so it may call back into the gate.
pub(crate) struct CompletionSlot {
    inner: Mutex<SlotInner>,
}

impl CompletionSlot {
    pub(crate) fn new(callback: Box<dyn CompleteCallback>) -> Self {
        Self {
            inner: Mutex::new(SlotInner {
                callback: Some(callback),
                queue: VecDeque::new(),
                draining: false,
                terminal_seen: false,
            }),
        }
    }

    /// Deliver a non-terminal outcome. Returns false once the slot is done.
    pub(crate) fn progress(&self, outcome: AuthOutcome) -> bool {
        self.push(outcome, false)
    }

    /// Deliver the terminal outcome. Returns false if one was already
    /// accepted.
    pub(crate) fn complete(&self, outcome: AuthOutcome) -> bool {
        self.push(outcome, true)
    }

    pub(crate) fn is_completed(&self) -> bool {
        lock(&self.inner).terminal_seen
    }

    fn push(&self, outcome: AuthOutcome, terminal: bool) -> bool {
        let mut inner = lock(&self.inner);
        if inner.terminal_seen {
            return false;
        }
        inner.terminal_seen = terminal;
        inner.queue.push_back(outcome);
        if inner.draining {
            return true;
        }

        inner.draining = true;
        loop {
            let Some(next) = inner.queue.pop_front() else {
                inner.draining = false;
                if inner.terminal_seen {
                    inner.callback = None;
                }
                return true;
            };
            let mut callback = inner.callback.take();
            drop(inner);
            if let Some(callback) = callback.as_mut() {
                callback.on_completed(next);
            }
            inner = lock(&self.inner);
            inner.callback = callback;
        }
    }
}

// ---------------------------------------------------------------------------
// Cancel signal
// ---------------------------------------------------------------------------

/// Cooperative cancellation flag shared with the authenticator.
///
/// Authenticators should check it before reporting and stop listening once
/// it is tripped.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal(Arc<AtomicBool>);

impl CancelSignal {
    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Trip the signal. Returns true only for the call that tripped it.
    pub(crate) fn cancel(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }
}

// ---------------------------------------------------------------------------
// Attempt and listener
// ---------------------------------------------------------------------------

type PendingSlot = Mutex<Option<Arc<Attempt>>>;

struct Attempt {
    id: u64,
    signal: CancelSignal,
    canceled_by_user: AtomicBool,
    expects_token: bool,
    slot: CompletionSlot,
    pending: Weak<PendingSlot>,
}

impl Attempt {
    fn clear_pending(&self) {
        if let Some(pending) = self.pending.upgrade() {
            let mut pending = lock(&pending);
            if pending.as_ref().is_some_and(|current| current.id == self.id) {
                *pending = None;
            }
        }
    }

    /// Atomically with respect to `cancel`: unregister the attempt unless
    /// its signal has been tripped. Returns false when it was canceled.
    fn claim_success(&self) -> bool {
        let Some(pending) = self.pending.upgrade() else {
            return !self.signal.is_canceled();
        };
        let mut pending = lock(&pending);
        if self.signal.is_canceled() {
            return false;
        }
        if pending.as_ref().is_some_and(|current| current.id == self.id) {
            *pending = None;
        }
        true
    }

    fn terminate(&self, outcome: AuthOutcome) {
        self.clear_pending();
        if self.slot.complete(outcome) {
            debug!(attempt = self.id, "authentication attempt finished");
        }
    }

    fn canceled_outcome(&self) -> AuthOutcome {
        AuthOutcome::Error {
            code: ERROR_CANCELED,
            message: "authentication canceled".to_string(),
            canceled_by_user: self.canceled_by_user.load(Ordering::SeqCst),
        }
    }
}

/// Channel through which an authenticator reports one attempt.
///
/// Cheap to clone. Reports after the terminal one are ignored.
#[derive(Clone)]
pub struct AuthListener {
    attempt: Arc<Attempt>,
}

impl AuthListener {
    /// Recoverable guidance; the sensor keeps listening.
    pub fn help(&self, code: i32, message: impl Into<String>) {
        if self.attempt.signal.is_canceled() {
            return;
        }
        self.attempt.slot.progress(AuthOutcome::Help {
            code,
            message: message.into(),
        });
    }

    /// A credential was presented but not recognized.
    pub fn failed(&self) {
        if self.attempt.signal.is_canceled() {
            return;
        }
        self.attempt.slot.progress(AuthOutcome::Failed);
    }

    /// Authentication succeeded. The token submitted with the request must
    /// be handed back; it is unlocked and the pending transform runs here,
    /// on the calling thread.
    pub fn succeeded(&self, token: Option<CryptoToken>) {
        let attempt = &self.attempt;
        if attempt.slot.is_completed() {
            return;
        }
        if !attempt.claim_success() {
            warn!(attempt = attempt.id, "success reported after cancellation");
            attempt.terminate(attempt.canceled_outcome());
            return;
        }

        let outcome = match token {
            Some(token) => match token.finish() {
                Ok(data) => AuthOutcome::Success { data: Some(data) },
                Err(e) => AuthOutcome::Exception(e),
            },
            None if attempt.expects_token => AuthOutcome::Exception(GateError::Crypto(
                "authenticator did not return the crypto token".to_string(),
            )),
            None => AuthOutcome::Success { data: None },
        };
        attempt.terminate(outcome);
    }

    /// The authentication session ended with an error (including
    /// cancellation and timeouts).
    pub fn error(&self, code: i32, message: impl Into<String>) {
        let attempt = &self.attempt;
        attempt.terminate(AuthOutcome::Error {
            code,
            message: message.into(),
            canceled_by_user: attempt.canceled_by_user.load(Ordering::SeqCst),
        });
    }

    /// Whether the attempt has already produced its terminal outcome.
    pub fn is_finished(&self) -> bool {
        self.attempt.slot.is_completed()
    }
}

impl std::fmt::Debug for AuthListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthListener")
            .field("attempt", &self.attempt.id)
            .finish()
    }
}

/// One request handed to [`Authenticator::authenticate`].
#[derive(Debug)]
pub struct AuthRequest {
    /// The token to unlock, `None` for plain authentication.
    pub token: Option<CryptoToken>,
    pub signal: CancelSignal,
    pub listener: AuthListener,
}

// ---------------------------------------------------------------------------
// Bridge
// ---------------------------------------------------------------------------

pub(crate) struct AuthBridge {
    authenticator: Arc<dyn Authenticator>,
    pending: Arc<PendingSlot>,
    next_id: AtomicU64,
}

impl AuthBridge {
    pub(crate) fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self {
            authenticator,
            pending: Arc::new(Mutex::new(None)),
            next_id: AtomicU64::new(1),
        }
    }

    pub(crate) fn is_pending(&self) -> bool {
        lock(&self.pending).is_some()
    }

    /// Submit one authentication attempt.
    pub(crate) fn submit(&self, token: Option<CryptoToken>, mut callback: Box<dyn CompleteCallback>) {
        let readiness = self.authenticator.readiness();
        if readiness != Readiness::Ready {
            warn!(?readiness, "authenticator stopped being ready before submit");
            callback.on_completed(AuthOutcome::Exception(GateError::NotReady { reason: readiness }));
            return;
        }

        let attempt = Arc::new(Attempt {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            signal: CancelSignal::default(),
            canceled_by_user: AtomicBool::new(false),
            expects_token: token.is_some(),
            slot: CompletionSlot::new(callback),
            pending: Arc::downgrade(&self.pending),
        });

        let previous = lock(&self.pending).replace(Arc::clone(&attempt));
        if let Some(previous) = previous {
            warn!(
                previous = previous.id,
                "new authentication replaces a pending one"
            );
            previous.signal.cancel();
            previous.slot.complete(previous.canceled_outcome());
        }

        info!(attempt = attempt.id, "submitting to authenticator");
        self.authenticator.authenticate(AuthRequest {
            token,
            signal: attempt.signal.clone(),
            listener: AuthListener { attempt },
        });
    }

    /// Cancel the pending attempt, if any. Returns whether anything was
    /// canceled; canceling with nothing pending is a no-op.
    pub(crate) fn cancel(&self, on_confirmed: Option<Box<dyn FnOnce() + Send>>) -> bool {
        let attempt = {
            let pending = lock(&self.pending);
            match pending.as_ref() {
                Some(attempt) if !attempt.signal.is_canceled() => {
                    attempt.canceled_by_user.store(true, Ordering::SeqCst);
                    attempt.signal.cancel();
                    Some(Arc::clone(attempt))
                }
                _ => None,
            }
        };
        let Some(attempt) = attempt else {
            debug!("cancel requested with no pending authentication");
            return false;
        };

        info!(attempt = attempt.id, "authentication canceled by user");
        self.authenticator.cancel();
        if let Some(on_confirmed) = on_confirmed {
            on_confirmed();
        }
        // Guarantees a terminal outcome even if the authenticator never
        // reports the cancellation.
        attempt.terminate(attempt.canceled_outcome());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn recording() -> (Arc<Mutex<Vec<AuthOutcome>>>, Box<dyn CompleteCallback>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let callback: Box<dyn CompleteCallback> =
            Box::new(move |outcome: AuthOutcome| sink.lock().unwrap().push(outcome));
        (seen, callback)
    }

    #[test]
    fn slot_accepts_progress_then_one_terminal() {
        let (seen, callback) = recording();
        let slot = CompletionSlot::new(callback);

        assert!(slot.progress(AuthOutcome::Failed));
        assert!(slot.complete(AuthOutcome::Success { data: None }));
        assert!(!slot.complete(AuthOutcome::Failed));
        assert!(!slot.progress(AuthOutcome::Failed));
        assert!(slot.is_completed());

        let seen = seen.lock().unwrap();
        assert_eq!(
            *seen,
            vec![AuthOutcome::Failed, AuthOutcome::Success { data: None }]
        );
    }

    #[test]
    fn slot_allows_reentrant_delivery() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let slot = Arc::new(Mutex::new(None::<Arc<CompletionSlot>>));

        let sink = Arc::clone(&seen);
        let handle = Arc::clone(&slot);
        let callback = move |outcome: AuthOutcome| {
            let first = matches!(outcome, AuthOutcome::Failed);
            sink.lock().unwrap().push(outcome);
            if first {
                // Re-enter from inside the callback.
                let slot = handle.lock().unwrap().clone().unwrap();
                slot.complete(AuthOutcome::Success { data: None });
            }
        };
        let completion = Arc::new(CompletionSlot::new(Box::new(callback)));
        *slot.lock().unwrap() = Some(Arc::clone(&completion));

        completion.progress(AuthOutcome::Failed);
        assert_eq!(seen.lock().unwrap().len(), 2);
        assert!(completion.is_completed());
    }

    #[test]
    fn signal_trips_once() {
        let signal = CancelSignal::default();
        assert!(!signal.is_canceled());
        assert!(signal.cancel());
        assert!(!signal.cancel());
        assert!(signal.clone().is_canceled());
    }
}
