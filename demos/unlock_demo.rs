//! Minimal example: storing a card number behind a presence check.
//!
//! Run with: `RUST_LOG=biogate=debug cargo run --example unlock_demo`
//!
//! Walks through the flow an app goes through:
//! - check readiness before offering the feature
//! - encrypt under an alias (the user touches the sensor once)
//! - decrypt later, with one unrecognized attempt before success
//! - recover after the user enrolls a new credential

use std::sync::Arc;

use biogate::audit::FileAuditSink;
use biogate::{
    AuthOutcome, BioGate, CryptoAlgorithm, GateError, MemoryVault, SimulatedAuthenticator, Step,
};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // 1. Setup
    let vault = Arc::new(MemoryVault::new());
    let sensor = SimulatedAuthenticator::approving();
    let gate = BioGate::new(vault.clone(), Arc::new(sensor.clone()));

    let audit_path = std::env::temp_dir().join("biogate_audit.jsonl");
    gate.add_audit_sink(Box::new(FileAuditSink::new(&audit_path)?));

    // 2. Only offer the feature when the device can do it
    if !gate.is_ready() {
        println!("Authentication unavailable: {:?}", gate.current_readiness());
        return Ok(());
    }

    // 3. Encrypt
    let envelope = gate
        .encode_blocking("4111 1111 1111 1111", "card", CryptoAlgorithm::Aes)
        .into_result()?
        .unwrap_or_default();
    println!("Stored envelope: {envelope}");

    // 4. Decrypt, showing progress as it arrives
    let sensor = sensor.with_script([Step::Fail, Step::Succeed]);
    gate.decode(&envelope, "card", CryptoAlgorithm::Aes, |outcome: AuthOutcome| match outcome {
        AuthOutcome::Failed => println!("Not recognized, try again"),
        AuthOutcome::Success { data } => println!("Unlocked: {}", data.unwrap_or_default()),
        other => println!("Finished with {other:?}"),
    });

    // 5. The user enrolls a new fingerprint; bound keys are gone
    vault.invalidate_enrolled_keys();
    match gate
        .decode_blocking(&envelope, "card", CryptoAlgorithm::Aes)
        .into_result()
    {
        Err(GateError::KeyInvalidated(alias)) => {
            println!("Key '{alias}' was invalidated, asking the user to re-enter the card")
        }
        other => println!("Unexpected: {other:?}"),
    }
    println!("Sensor attempts: {}", sensor.attempts());

    // 6. Audit log
    println!("Audit log: {} record(s)", gate.audit_records().len());
    for record in gate.audit_records() {
        println!(
            "  {} {:?}/{:?} -> {:?} @ {}",
            record.alias, record.algorithm, record.purpose, record.state, record.timestamp
        );
    }
    println!("Full audit also written to: {}", audit_path.display());

    Ok(())
}
