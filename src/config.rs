//! Gate configuration.
//!
//! Loaded from JSON. Every field is optional:
//!
//! ```json
//! {
//!   "vault_path": "/var/lib/app/keys.json",
//!   "audit_log_path": "/var/log/app/gate-audit.jsonl",
//!   "key_policy": { "invalidated_by_enrollment": true }
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::GateError;
use crate::vault::KeyPolicy;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// File-backed vault location. In-memory vault when unset.
    pub vault_path: Option<PathBuf>,
    /// JSON-lines audit file. No file sink when unset.
    pub audit_log_path: Option<PathBuf>,
    /// Policy applied to keys the gate creates.
    pub key_policy: KeyPolicy,
}

impl GateConfig {
    pub fn from_json(json: &str) -> Result<Self, GateError> {
        serde_json::from_str(json).map_err(|e| GateError::Config(e.to_string()))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, GateError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .map_err(|e| GateError::Config(format!("{}: {e}", path.display())))?;
        Self::from_json(&raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = GateConfig::from_json("{}").unwrap();
        assert_eq!(config, GateConfig::default());
        assert!(config.key_policy.invalidated_by_enrollment);
    }

    #[test]
    fn partial_policy_keeps_other_defaults() {
        let config = GateConfig::from_json(
            r#"{ "vault_path": "/tmp/k.json", "key_policy": { "invalidated_by_enrollment": false } }"#,
        )
        .unwrap();
        assert_eq!(config.vault_path, Some(PathBuf::from("/tmp/k.json")));
        assert!(config.audit_log_path.is_none());
        assert!(!config.key_policy.invalidated_by_enrollment);
    }

    #[test]
    fn invalid_json_is_a_config_error() {
        assert!(matches!(
            GateConfig::from_json("{ nope"),
            Err(GateError::Config(_))
        ));
        assert!(matches!(
            GateConfig::load("/definitely/not/here.json"),
            Err(GateError::Config(_))
        ));
    }
}
