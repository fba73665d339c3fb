use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use biogate::{
    AuthOutcome, AuthRequest, Authenticator, BioGate, CryptoAlgorithm, GateError, MemoryVault,
    SimulatedAuthenticator, Step, ERROR_CANCELED,
};

/// Holds on to every request and ignores cancellation, like a sensor
/// driver that reports late.
#[derive(Default, Clone)]
struct StubbornAuthenticator {
    requests: Arc<Mutex<Vec<AuthRequest>>>,
}

impl StubbornAuthenticator {
    fn take(&self) -> AuthRequest {
        self.requests.lock().unwrap().pop().unwrap()
    }
}

impl Authenticator for StubbornAuthenticator {
    fn is_hardware_present(&self) -> bool {
        true
    }

    fn has_enrolled_credential(&self) -> bool {
        true
    }

    fn is_device_secured(&self) -> bool {
        true
    }

    fn authenticate(&self, request: AuthRequest) {
        self.requests.lock().unwrap().push(request);
    }

    fn cancel(&self) {}
}

fn collect() -> (Arc<Mutex<Vec<AuthOutcome>>>, impl FnMut(AuthOutcome) + Send + 'static) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    (seen, move |outcome: AuthOutcome| sink.lock().unwrap().push(outcome))
}

fn waiting_gate() -> (BioGate, SimulatedAuthenticator) {
    let sim = SimulatedAuthenticator::ready();
    let gate = BioGate::new(Arc::new(MemoryVault::new()), Arc::new(sim.clone()));
    (gate, sim)
}

#[test]
fn test_cancel_without_pending_is_noop() {
    let (gate, sim) = waiting_gate();
    let confirmed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&confirmed);

    assert!(!gate.cancel_with(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));
    assert_eq!(confirmed.load(Ordering::SeqCst), 0);
    assert_eq!(sim.cancels(), 0);
}

#[test]
fn test_cancel_pending_delivers_one_user_canceled_error() {
    let (gate, sim) = waiting_gate();
    let (seen, callback) = collect();
    gate.encode("secret", "alias", CryptoAlgorithm::Aes, callback);
    assert!(gate.is_awaiting_authentication());
    assert!(seen.lock().unwrap().is_empty());

    let confirmed = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&confirmed);
    assert!(gate.cancel_with(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    }));

    {
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        match &seen[0] {
            AuthOutcome::Error {
                code,
                canceled_by_user,
                ..
            } => {
                assert_eq!(*code, ERROR_CANCELED);
                assert!(*canceled_by_user);
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(
            seen[0].clone().into_result().unwrap_err(),
            GateError::Canceled { by_user: true }
        );
    }
    assert_eq!(confirmed.load(Ordering::SeqCst), 1);
    assert_eq!(sim.cancels(), 1);
    assert!(!gate.is_awaiting_authentication());

    // Nothing left to cancel.
    assert!(!gate.cancel());
    assert_eq!(sim.cancels(), 1);
    assert_eq!(seen.lock().unwrap().len(), 1);
}

#[test]
fn test_cancel_after_completion_is_noop() {
    let gate = BioGate::new(
        Arc::new(MemoryVault::new()),
        Arc::new(SimulatedAuthenticator::approving()),
    );
    let (seen, callback) = collect();
    gate.encode("done", "alias", CryptoAlgorithm::Aes, callback);

    assert!(!gate.cancel());
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(seen[0].data().is_some());
}

#[test]
fn test_late_reports_after_cancel_are_dropped() {
    let stubborn = StubbornAuthenticator::default();
    let gate = BioGate::new(Arc::new(MemoryVault::new()), Arc::new(stubborn.clone()));
    let (seen, callback) = collect();
    gate.encode("secret", "alias", CryptoAlgorithm::Aes, callback);

    assert!(gate.cancel());
    let mut request = stubborn.take();
    assert!(request.signal.is_canceled());
    assert!(request.listener.is_finished());

    // The driver ignores the cancel and keeps reporting.
    request.listener.help(1, "still listening");
    request.listener.failed();
    request.listener.succeeded(request.token.take());
    request.listener.error(7, "late error");

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert!(matches!(
        seen[0],
        AuthOutcome::Error {
            canceled_by_user: true,
            ..
        }
    ));
}

#[test]
fn test_reports_after_success_are_dropped() {
    let stubborn = StubbornAuthenticator::default();
    let gate = BioGate::new(Arc::new(MemoryVault::new()), Arc::new(stubborn.clone()));
    let (seen, callback) = collect();
    gate.authenticate(callback);

    let request = stubborn.take();
    assert!(request.token.is_none());
    request.listener.succeeded(None);
    request.listener.error(ERROR_CANCELED, "too late");
    request.listener.failed();

    assert!(!gate.cancel());
    assert_eq!(
        *seen.lock().unwrap(),
        vec![AuthOutcome::Success { data: None }]
    );
}

#[test]
fn test_new_operation_supersedes_pending_one() {
    let (gate, sim) = waiting_gate();
    let (first, callback) = collect();
    gate.encode("one", "alias", CryptoAlgorithm::Aes, callback);
    let (second, callback) = collect();
    gate.encode("two", "alias", CryptoAlgorithm::Aes, callback);

    {
        let first = first.lock().unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(
            first[0].clone().into_result().unwrap_err(),
            GateError::Canceled { by_user: false }
        );
    }
    assert!(second.lock().unwrap().is_empty());

    assert!(sim.respond(Step::Succeed));
    assert_eq!(first.lock().unwrap().len(), 1);
    let second = second.lock().unwrap();
    assert_eq!(second.len(), 1);
    assert!(second[0].data().is_some());
}

#[test]
fn test_cancel_unblocks_blocking_call() {
    let (gate, _sim) = waiting_gate();

    let outcome = std::thread::scope(|scope| {
        let waiter = scope.spawn(|| gate.encode_blocking("secret", "alias", CryptoAlgorithm::Aes));
        while !gate.is_awaiting_authentication() {
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(gate.cancel());
        waiter.join().unwrap()
    });

    assert_eq!(
        outcome.into_result().unwrap_err(),
        GateError::Canceled { by_user: true }
    );
}
