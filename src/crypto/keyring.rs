//! Signing keys by DID
//!
//! Stored as a JSON object of `{ "did": "<hex secret>" }`, written with
//! owner-only permissions on Unix.

use super::{SigningKey, VerifyingKey};
use crate::{Error, Result};
use parking_lot::RwLock;
use rand::rngs::OsRng;
use std::collections::{BTreeMap, HashMap};
use std::io::Write;
use std::path::{Path, PathBuf};

/// DID → signing key registry
#[derive(Default)]
pub struct Keyring {
    path: Option<PathBuf>,
    keys: RwLock<HashMap<String, SigningKey>>,
}

impl Keyring {
    /// An in-memory keyring
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a keyring file; a missing file is an empty keyring
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut keys = HashMap::new();

        if path.exists() {
            let content = std::fs::read_to_string(&path)
                .map_err(|e| Error::Config(format!("Failed to read keyring: {}", e)))?;
            let stored: BTreeMap<String, String> = serde_json::from_str(&content)
                .map_err(|e| Error::Config(format!("Failed to parse keyring: {}", e)))?;

            for (did, secret) in stored {
                keys.insert(did, parse_secret(&secret)?);
            }
        }

        tracing::debug!(path = %path.display(), keys = keys.len(), "loaded keyring");
        Ok(Keyring {
            path: Some(path),
            keys: RwLock::new(keys),
        })
    }

    /// Write the keyring back to its file, if it has one
    pub fn save(&self) -> Result<()> {
        let path = match &self.path {
            Some(path) => path,
            None => return Ok(()),
        };

        let stored: BTreeMap<String, String> = self
            .keys
            .read()
            .iter()
            .map(|(did, key)| (did.clone(), hex::encode(key.to_bytes())))
            .collect();
        let content = serde_json::to_string_pretty(&stored)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create keyring dir: {}", e)))?;
        }
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        // Secrets never exist on disk with wider permissions
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut file = options
            .open(path)
            .map_err(|e| Error::Config(format!("Failed to write keyring: {}", e)))?;

        // `mode` only applies to new files; tighten one that already existed
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.set_permissions(std::fs::Permissions::from_mode(0o600))
                .map_err(|e| Error::Config(format!("Failed to set permissions: {}", e)))?;
        }

        file.write_all(content.as_bytes())
            .and_then(|_| file.sync_all())
            .map_err(|e| Error::Config(format!("Failed to write keyring: {}", e)))?;

        Ok(())
    }

    /// Register a key for a DID, replacing any previous one
    pub fn insert(&self, did: impl Into<String>, key: SigningKey) {
        self.keys.write().insert(did.into(), key);
    }

    /// Generate a fresh key for a DID
    ///
    /// Fails with `Conflict` if the DID already has a key.
    pub fn generate(&self, did: &str) -> Result<VerifyingKey> {
        let mut keys = self.keys.write();
        if keys.contains_key(did) {
            return Err(Error::Conflict(format!("{} already has a signing key", did)));
        }
        let key = SigningKey::generate(&mut OsRng);
        let public = key.verifying_key();
        keys.insert(did.to_string(), key);
        tracing::info!(did, "generated signing key");
        Ok(public)
    }

    pub fn signing_key(&self, did: &str) -> Option<SigningKey> {
        self.keys.read().get(did).cloned()
    }

    pub fn verifying_key(&self, did: &str) -> Option<VerifyingKey> {
        self.keys.read().get(did).map(SigningKey::verifying_key)
    }

    pub fn dids(&self) -> Vec<String> {
        let mut dids: Vec<_> = self.keys.read().keys().cloned().collect();
        dids.sort();
        dids
    }
}

fn parse_secret(s: &str) -> Result<SigningKey> {
    let bytes = hex::decode(s).map_err(|e| Error::InvalidKey(e.to_string()))?;
    let arr: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| Error::InvalidKey(format!("expected 32 bytes, got {}", bytes.len())))?;
    Ok(SigningKey::from_bytes(&arr))
}
