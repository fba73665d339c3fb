//! Append-only audit trail of gated operations.
//!
//! Every encode and decode appends one record when it reaches its terminal
//! outcome. Records carry the alias and the outcome state, never payloads.
//! Pluggable sinks receive a copy of each record.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::outcome::State;
use crate::session::{CryptoAlgorithm, Purpose};

/// A sink that receives audit records. Implement this to forward records
/// to a file, a database, or a log shipper.
pub trait AuditSink: Send {
    /// Append a record. Called once per finished operation.
    fn append(&mut self, record: AuditRecord);
}

/// A permanent record of one gated operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub alias: String,
    pub algorithm: CryptoAlgorithm,
    pub purpose: Purpose,
    /// State of the terminal outcome.
    pub state: State,
    pub timestamp: DateTime<Utc>,
}

/// An append-only log of finished operations.
///
/// Records and sinks sit behind separate locks. A record is stored before
/// it is forwarded, and no lock on the records is held while sinks run, so
/// a sink may read the log. Sinks must not add sinks from `append`.
#[derive(Default)]
pub struct AuditLog {
    records: Mutex<Vec<AuditRecord>>,
    forward_sinks: Mutex<Vec<Box<dyn AuditSink>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("records", &lock(&self.records).len())
            .field("forward_sinks", &lock(&self.forward_sinks).len())
            .finish()
    }
}

impl AuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a sink to receive a copy of every later record.
    pub fn add_forward_sink(&self, sink: Box<dyn AuditSink>) {
        lock(&self.forward_sinks).push(sink);
    }

    /// Append a new record and forward it to attached sinks.
    pub fn append(&self, record: AuditRecord) {
        lock(&self.records).push(record.clone());
        for sink in lock(&self.forward_sinks).iter_mut() {
            sink.append(record.clone());
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.records).is_empty()
    }

    /// Snapshot of the records so far, oldest first.
    pub fn records(&self) -> Vec<AuditRecord> {
        lock(&self.records).clone()
    }
}

/// Writes audit records as JSON lines to a file. Creates the file if it
/// doesn't exist; appends if it does.
pub struct FileAuditSink {
    file: std::fs::File,
}

impl FileAuditSink {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, std::io::Error> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self { file })
    }
}

impl AuditSink for FileAuditSink {
    fn append(&mut self, record: AuditRecord) {
        match serde_json::to_string(&record) {
            Ok(line) => {
                if let Err(e) = writeln!(self.file, "{line}").and_then(|()| self.file.flush()) {
                    tracing::warn!(error = %e, "failed to write audit record");
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize audit record"),
        }
    }
}
