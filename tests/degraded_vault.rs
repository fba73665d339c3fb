// Without a functional vault the gate keeps answering: every operation that
// needs a key fails with a vault error and nothing reaches the
// authenticator.

use std::sync::Arc;

use biogate::{
    AuthOutcome, BioGate, CryptoAlgorithm, GateConfig, GateError, KeyVault, SimulatedAuthenticator,
    UnavailableVault, VaultError,
};

#[test]
fn test_unavailable_vault_reports_exception() {
    let sim = SimulatedAuthenticator::approving();
    let gate = BioGate::new(Arc::new(UnavailableVault), Arc::new(sim.clone()));
    assert!(!gate.vault().is_functional());

    for algorithm in [CryptoAlgorithm::Aes, CryptoAlgorithm::Ecies] {
        let outcome = gate.encode_blocking("secret", "alias", algorithm);
        assert_eq!(
            outcome,
            AuthOutcome::Exception(GateError::Vault(VaultError::Unavailable))
        );
    }
    assert_eq!(sim.attempts(), 0);

    // Readiness does not depend on the vault.
    assert_eq!(gate.current_readiness(), AuthOutcome::Ready);
}

#[test]
fn test_unopenable_vault_path_degrades() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"file").unwrap();

    let config = GateConfig {
        vault_path: Some(blocker.join("keys.json")),
        ..GateConfig::default()
    };
    let gate = BioGate::from_config(&config, Arc::new(SimulatedAuthenticator::approving())).unwrap();
    assert!(!gate.vault().is_functional());

    let outcome = gate.encode_blocking("secret", "alias", CryptoAlgorithm::Aes);
    assert!(matches!(
        outcome,
        AuthOutcome::Exception(GateError::Vault(VaultError::Unavailable))
    ));
}

#[test]
fn test_unwritable_audit_path_is_a_config_error() {
    let dir = tempfile::tempdir().unwrap();
    let config = GateConfig {
        audit_log_path: Some(dir.path().join("missing").join("audit.jsonl")),
        ..GateConfig::default()
    };
    let result = BioGate::from_config(&config, Arc::new(SimulatedAuthenticator::approving()));
    assert!(matches!(result, Err(GateError::Config(_))));
}
