//! Key vault: a durable mapping from alias to key material.
//!
//! The gate consumes vaults through the [`KeyVault`] trait. Three backends
//! ship with the crate:
//!
//! - [`MemoryVault`]: functional, process-lifetime storage.
//! - [`FileVault`]: functional, persisted to a JSON file.
//! - [`UnavailableVault`]: the non-functional mode used when the backing
//!   store can't be opened. Every operation fails fast with
//!   [`VaultError::Unavailable`].
//!
//! Functional vaults model credential enrollment changes through
//! `invalidate_enrolled_keys`: keys created under a policy with
//! `invalidated_by_enrollment` become unusable and every protected fetch
//! reports [`VaultError::KeyInvalidated`] until the alias is deleted.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::crypto::{self, KEY_LEN};
use crate::error::VaultError;
use crate::keys::{self, KeyKind, PrivateKey, PublicKey, SecretKey};

/// Creation-time policy attached to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyPolicy {
    /// Invalidate the key when the set of enrolled credentials changes.
    pub invalidated_by_enrollment: bool,
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self {
            invalidated_by_enrollment: true,
        }
    }
}

/// Contract of a key store.
///
/// Secret and private key handles are only handed out for keys that are
/// still valid. Public keys stay readable after invalidation because they
/// never unlock anything.
pub trait KeyVault: Send + Sync {
    /// False for the non-functional backend.
    fn is_functional(&self) -> bool {
        true
    }

    fn exists(&self, alias: &str) -> Result<bool, VaultError>;

    /// Generate and store a new AES-256 key, replacing any existing entry.
    fn create_symmetric(&self, alias: &str, policy: KeyPolicy) -> Result<(), VaultError>;

    /// Generate and store a new P-256 key pair, replacing any existing entry.
    fn create_asymmetric(&self, alias: &str, policy: KeyPolicy) -> Result<(), VaultError>;

    fn fetch_secret(&self, alias: &str) -> Result<SecretKey, VaultError>;

    fn fetch_public(&self, alias: &str) -> Result<PublicKey, VaultError>;

    fn fetch_private(&self, alias: &str) -> Result<PrivateKey, VaultError>;

    /// Remove the alias. Deleting an absent alias is not an error.
    fn delete(&self, alias: &str) -> Result<(), VaultError>;
}

/// Open the vault described by `path`.
///
/// `None` selects an in-memory vault. A path selects a [`FileVault`]; if it
/// can't be opened the vault degrades to [`UnavailableVault`] instead of
/// failing the caller.
pub fn open_vault(path: Option<&Path>) -> Arc<dyn KeyVault> {
    match path {
        None => Arc::new(MemoryVault::new()),
        Some(path) => match FileVault::open(path) {
            Ok(vault) => Arc::new(vault),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "key vault unavailable, running without keys");
                Arc::new(UnavailableVault)
            }
        },
    }
}

// ---------------------------------------------------------------------------
// Shared key table
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct Entry {
    kind: KeyKind,
    material: Zeroizing<[u8; KEY_LEN]>,
    invalidated_by_enrollment: bool,
    invalidated: bool,
}

/// Storage logic shared by the functional backends.
#[derive(Clone, Default)]
struct KeyTable {
    entries: BTreeMap<String, Entry>,
}

impl KeyTable {
    fn create(&mut self, alias: &str, kind: KeyKind, policy: KeyPolicy) -> Result<(), VaultError> {
        let generation_error = |e: crate::error::GateError| VaultError::KeyGeneration {
            alias: alias.to_string(),
            reason: e.to_string(),
        };
        let material = match kind {
            KeyKind::Symmetric => Zeroizing::new(crypto::generate_random_key().map_err(generation_error)?),
            KeyKind::Asymmetric => {
                let private = keys::generate_private_key().map_err(generation_error)?;
                let scalar = private.to_scalar_bytes();
                let mut bytes = Zeroizing::new([0u8; KEY_LEN]);
                bytes.copy_from_slice(&scalar);
                bytes
            }
        };
        self.entries.insert(
            alias.to_string(),
            Entry {
                kind,
                material,
                invalidated_by_enrollment: policy.invalidated_by_enrollment,
                invalidated: false,
            },
        );
        info!(alias, ?kind, "generated key");
        Ok(())
    }

    fn protected(&self, alias: &str, kind: KeyKind) -> Result<&Entry, VaultError> {
        let entry = self.entry(alias, kind)?;
        if entry.invalidated {
            return Err(VaultError::KeyInvalidated(alias.to_string()));
        }
        Ok(entry)
    }

    fn entry(&self, alias: &str, kind: KeyKind) -> Result<&Entry, VaultError> {
        let entry = self
            .entries
            .get(alias)
            .ok_or_else(|| VaultError::KeyNotFound(alias.to_string()))?;
        if entry.kind != kind {
            return Err(VaultError::WrongKeyKind(alias.to_string()));
        }
        Ok(entry)
    }

    fn secret(&self, alias: &str) -> Result<SecretKey, VaultError> {
        let entry = self.protected(alias, KeyKind::Symmetric)?;
        Ok(SecretKey::from_bytes(*entry.material))
    }

    fn private(&self, alias: &str) -> Result<PrivateKey, VaultError> {
        let entry = self.protected(alias, KeyKind::Asymmetric)?;
        PrivateKey::from_scalar_bytes(&entry.material[..])
            .map_err(|e| VaultError::Io(e.to_string()))
    }

    fn public(&self, alias: &str) -> Result<PublicKey, VaultError> {
        let entry = self.entry(alias, KeyKind::Asymmetric)?;
        PrivateKey::from_scalar_bytes(&entry.material[..])
            .map(|private| private.public_key())
            .map_err(|e| VaultError::Io(e.to_string()))
    }

    fn invalidate_enrolled(&mut self) -> usize {
        let mut count = 0;
        for entry in self.entries.values_mut() {
            if entry.invalidated_by_enrollment && !entry.invalidated {
                entry.invalidated = true;
                count += 1;
            }
        }
        count
    }
}

fn lock(table: &Mutex<KeyTable>) -> MutexGuard<'_, KeyTable> {
    table.lock().unwrap_or_else(PoisonError::into_inner)
}

// ---------------------------------------------------------------------------
// Memory vault
// ---------------------------------------------------------------------------

/// A functional vault that lives for the lifetime of the process.
#[derive(Default)]
pub struct MemoryVault {
    table: Mutex<KeyTable>,
}

impl MemoryVault {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate a change of enrolled credentials. Returns how many keys
    /// were invalidated.
    pub fn invalidate_enrolled_keys(&self) -> usize {
        let count = lock(&self.table).invalidate_enrolled();
        debug!(count, "invalidated keys after enrollment change");
        count
    }
}

impl KeyVault for MemoryVault {
    fn exists(&self, alias: &str) -> Result<bool, VaultError> {
        Ok(lock(&self.table).entries.contains_key(alias))
    }

    fn create_symmetric(&self, alias: &str, policy: KeyPolicy) -> Result<(), VaultError> {
        lock(&self.table).create(alias, KeyKind::Symmetric, policy)
    }

    fn create_asymmetric(&self, alias: &str, policy: KeyPolicy) -> Result<(), VaultError> {
        lock(&self.table).create(alias, KeyKind::Asymmetric, policy)
    }

    fn fetch_secret(&self, alias: &str) -> Result<SecretKey, VaultError> {
        lock(&self.table).secret(alias)
    }

    fn fetch_public(&self, alias: &str) -> Result<PublicKey, VaultError> {
        lock(&self.table).public(alias)
    }

    fn fetch_private(&self, alias: &str) -> Result<PrivateKey, VaultError> {
        lock(&self.table).private(alias)
    }

    fn delete(&self, alias: &str) -> Result<(), VaultError> {
        lock(&self.table).entries.remove(alias);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// File vault
// ---------------------------------------------------------------------------

const FILE_FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct PersistedVault {
    version: u32,
    keys: BTreeMap<String, PersistedEntry>,
}

#[derive(Serialize, Deserialize)]
struct PersistedEntry {
    kind: KeyKind,
    material: String,
    invalidated_by_enrollment: bool,
    invalidated: bool,
}

/// A functional vault persisted as a JSON file.
///
/// Every mutation rewrites the file through a temporary sibling and an
/// atomic rename. Key material is stored base64-encoded, so the file must be
/// protected by the filesystem.
pub struct FileVault {
    path: PathBuf,
    table: Mutex<KeyTable>,
}

impl FileVault {
    /// Open the vault at `path`, creating an empty one if the file does not
    /// exist yet.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, VaultError> {
        let path = path.as_ref().to_path_buf();
        let table = if path.exists() {
            load_table(&path)?
        } else {
            KeyTable::default()
        };
        let vault = Self {
            path,
            table: Mutex::new(table),
        };
        if !vault.path.exists() {
            vault.persist(&lock(&vault.table))?;
        }
        Ok(vault)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Simulate a change of enrolled credentials. Returns how many keys
    /// were invalidated.
    pub fn invalidate_enrolled_keys(&self) -> Result<usize, VaultError> {
        self.mutate(|table| Ok(table.invalidate_enrolled()))
    }

    /// Apply `f` to a copy of the table and keep the copy only once it is
    /// on disk.
    fn mutate<T>(&self, f: impl FnOnce(&mut KeyTable) -> Result<T, VaultError>) -> Result<T, VaultError> {
        let mut table = lock(&self.table);
        let mut staged = table.clone();
        let value = f(&mut staged)?;
        self.persist(&staged)?;
        *table = staged;
        Ok(value)
    }

    fn persist(&self, table: &KeyTable) -> Result<(), VaultError> {
        let keys = table
            .entries
            .iter()
            .map(|(alias, entry)| {
                (
                    alias.clone(),
                    PersistedEntry {
                        kind: entry.kind,
                        material: STANDARD.encode(&*entry.material),
                        invalidated_by_enrollment: entry.invalidated_by_enrollment,
                        invalidated: entry.invalidated,
                    },
                )
            })
            .collect();
        let document = Zeroizing::new(serde_json::to_vec_pretty(&PersistedVault {
            version: FILE_FORMAT_VERSION,
            keys,
        })?);

        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, document.as_slice())?;

        // Key material: owner-only
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
        }

        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn load_table(path: &Path) -> Result<KeyTable, VaultError> {
    let raw = Zeroizing::new(fs::read(path)?);
    let persisted: PersistedVault = serde_json::from_slice(&raw)?;
    if persisted.version != FILE_FORMAT_VERSION {
        return Err(VaultError::Io(format!(
            "unsupported vault format version {}",
            persisted.version
        )));
    }

    let mut table = KeyTable::default();
    for (alias, entry) in persisted.keys {
        let decoded = Zeroizing::new(
            STANDARD
                .decode(&entry.material)
                .map_err(|e| VaultError::Io(format!("key {alias}: {e}")))?,
        );
        if decoded.len() != KEY_LEN {
            return Err(VaultError::Io(format!("key {alias}: bad material length")));
        }
        let mut material = Zeroizing::new([0u8; KEY_LEN]);
        material.copy_from_slice(&decoded);
        table.entries.insert(
            alias,
            Entry {
                kind: entry.kind,
                material,
                invalidated_by_enrollment: entry.invalidated_by_enrollment,
                invalidated: entry.invalidated,
            },
        );
    }
    Ok(table)
}

impl KeyVault for FileVault {
    fn exists(&self, alias: &str) -> Result<bool, VaultError> {
        Ok(lock(&self.table).entries.contains_key(alias))
    }

    fn create_symmetric(&self, alias: &str, policy: KeyPolicy) -> Result<(), VaultError> {
        self.mutate(|table| table.create(alias, KeyKind::Symmetric, policy))
    }

    fn create_asymmetric(&self, alias: &str, policy: KeyPolicy) -> Result<(), VaultError> {
        self.mutate(|table| table.create(alias, KeyKind::Asymmetric, policy))
    }

    fn fetch_secret(&self, alias: &str) -> Result<SecretKey, VaultError> {
        lock(&self.table).secret(alias)
    }

    fn fetch_public(&self, alias: &str) -> Result<PublicKey, VaultError> {
        lock(&self.table).public(alias)
    }

    fn fetch_private(&self, alias: &str) -> Result<PrivateKey, VaultError> {
        lock(&self.table).private(alias)
    }

    fn delete(&self, alias: &str) -> Result<(), VaultError> {
        self.mutate(|table| {
            table.entries.remove(alias);
            Ok(())
        })
    }
}

// ---------------------------------------------------------------------------
// Unavailable vault
// ---------------------------------------------------------------------------

/// The non-functional vault. Every operation fails with
/// [`VaultError::Unavailable`].
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableVault;

impl KeyVault for UnavailableVault {
    fn is_functional(&self) -> bool {
        false
    }

    fn exists(&self, _alias: &str) -> Result<bool, VaultError> {
        Err(VaultError::Unavailable)
    }

    fn create_symmetric(&self, _alias: &str, _policy: KeyPolicy) -> Result<(), VaultError> {
        Err(VaultError::Unavailable)
    }

    fn create_asymmetric(&self, _alias: &str, _policy: KeyPolicy) -> Result<(), VaultError> {
        Err(VaultError::Unavailable)
    }

    fn fetch_secret(&self, _alias: &str) -> Result<SecretKey, VaultError> {
        Err(VaultError::Unavailable)
    }

    fn fetch_public(&self, _alias: &str) -> Result<PublicKey, VaultError> {
        Err(VaultError::Unavailable)
    }

    fn fetch_private(&self, _alias: &str) -> Result<PrivateKey, VaultError> {
        Err(VaultError::Unavailable)
    }

    fn delete(&self, _alias: &str) -> Result<(), VaultError> {
        Err(VaultError::Unavailable)
    }
}
