//! Commit signing and verification
//!
//! Commits are signed with Ed25519 over their unsigned canonical bytes.
//! Verification never errors: anything short of a valid signature from the
//! given key is simply `false`.

mod keyring;

pub use ed25519_dalek::{SigningKey, VerifyingKey};
pub use keyring::Keyring;

use crate::model::Commit;
use crate::{Error, Result};
use bytes::Bytes;
use ed25519_dalek::{Signature, Signer};

/// Sign a commit's unsigned bytes
pub fn sign(commit: &Commit, key: &SigningKey) -> Bytes {
    let sig = key.sign(&commit.unsigned_bytes());
    Bytes::copy_from_slice(&sig.to_bytes())
}

/// Check a commit's signature against a public key
pub fn verify(commit: &Commit, key: &VerifyingKey) -> bool {
    let sig = match Signature::from_slice(&commit.sig) {
        Ok(sig) => sig,
        Err(_) => return false,
    };
    key.verify_strict(&commit.unsigned_bytes(), &sig).is_ok()
}

/// Like [`verify`], but as a typed error for callers that propagate
pub fn ensure_valid(commit: &Commit, key: &VerifyingKey) -> Result<()> {
    if verify(commit, key) {
        Ok(())
    } else {
        tracing::warn!(did = %commit.did, rev = commit.rev, "commit signature rejected");
        Err(Error::InvalidSignature(format!(
            "commit rev {} of {}",
            commit.rev, commit.did
        )))
    }
}

impl Commit {
    /// Sign this commit with a key
    pub fn sign(mut self, key: &SigningKey) -> Self {
        self.sig = sign(&self, key);
        self
    }
}

/// Hex form of a public key
pub fn public_key_hex(key: &VerifyingKey) -> String {
    hex::encode(key.to_bytes())
}

/// Parse a hex public key
pub fn parse_public_key(s: &str) -> Result<VerifyingKey> {
    let bytes = hex::decode(s).map_err(|e| Error::InvalidKey(e.to_string()))?;
    let arr: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| Error::InvalidKey(format!("expected 32 bytes, got {}", bytes.len())))?;
    VerifyingKey::from_bytes(&arr).map_err(|e| Error::InvalidKey(e.to_string()))
}
