//! Commit type - a signed snapshot of a repository

use super::{BlockTag, Cid, Value};
use crate::codec;
use crate::error::{CodecError, CodecErrorKind};
use crate::Result;
use bytes::Bytes;
use std::collections::BTreeMap;

/// Commit format version
pub const COMMIT_VERSION: i64 = 3;

/// A commit binds a tree root to its owner's DID and a revision
///
/// Commits chain through `prev` so the history of a repository can be
/// walked back to its first commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Commit {
    /// Repository owner
    pub did: String,

    /// Commit format version
    pub version: i64,

    /// Root of the record tree
    pub data: Cid,

    /// Revision, strictly increasing per DID
    pub rev: u64,

    /// The commit this one supersedes (None for the first commit)
    pub prev: Option<Cid>,

    /// Signature over the unsigned encoding
    pub sig: Bytes,
}

impl Commit {
    /// Create an unsigned commit
    pub fn new_unsigned(did: impl Into<String>, data: Cid, rev: u64, prev: Option<Cid>) -> Self {
        Commit {
            did: did.into(),
            version: COMMIT_VERSION,
            data,
            rev,
            prev,
            sig: Bytes::new(),
        }
    }

    /// Check if this is the first commit of a repository
    pub fn is_initial(&self) -> bool {
        self.prev.is_none()
    }

    fn fields(&self) -> BTreeMap<String, Value> {
        let mut map = BTreeMap::new();
        map.insert("did".to_string(), Value::String(self.did.clone()));
        map.insert("version".to_string(), Value::Int(self.version));
        map.insert("data".to_string(), Value::Link(self.data));
        map.insert("rev".to_string(), Value::Int(self.rev as i64));
        map.insert(
            "prev".to_string(),
            self.prev.map(Value::Link).unwrap_or(Value::Null),
        );
        map
    }

    /// Canonical bytes of every field except the signature
    pub fn unsigned_bytes(&self) -> Vec<u8> {
        codec::encode(&Value::Map(self.fields()))
    }

    /// Canonical bytes of the full commit
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut map = self.fields();
        map.insert("sig".to_string(), Value::Bytes(self.sig.clone()));
        codec::encode(&Value::Map(map))
    }

    /// Decode a commit from its canonical bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let value = codec::decode(bytes)?;
        let map = value.as_map().ok_or_else(|| shape("commit is not a map"))?;

        let field = |name: &str| map.get(name).ok_or_else(|| shape(&format!("missing {}", name)));

        let rev = field("rev")?
            .as_int()
            .filter(|r| *r >= 0)
            .ok_or_else(|| shape("rev must be a non-negative integer"))?;
        let prev = match field("prev")? {
            Value::Null => None,
            Value::Link(cid) => Some(*cid),
            _ => return Err(shape("prev must be a link or null").into()),
        };

        Ok(Commit {
            did: field("did")?
                .as_str()
                .ok_or_else(|| shape("did must be a string"))?
                .to_string(),
            version: field("version")?
                .as_int()
                .ok_or_else(|| shape("version must be an integer"))?,
            data: field("data")?
                .as_link()
                .ok_or_else(|| shape("data must be a link"))?,
            rev: rev as u64,
            prev,
            sig: field("sig")?
                .as_bytes()
                .cloned()
                .ok_or_else(|| shape("sig must be bytes"))?,
        })
    }

    /// Compute the commit CID
    pub fn cid(&self) -> Cid {
        codec::cid_of(&self.to_bytes(), BlockTag::Commit)
    }
}

fn shape(msg: &str) -> CodecError {
    CodecError::new(0, CodecErrorKind::Shape(msg.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root() -> Cid {
        Cid::digest(BlockTag::Node, b"tree")
    }

    #[test]
    fn test_initial_commit() {
        let commit = Commit::new_unsigned("did:example:1", root(), 1, None);
        assert!(commit.is_initial());
        assert_eq!(commit.version, COMMIT_VERSION);
        assert!(commit.sig.is_empty());
    }

    #[test]
    fn test_bytes_roundtrip_with_prev() {
        let parent = Cid::digest(BlockTag::Commit, b"parent");
        let mut commit = Commit::new_unsigned("did:example:1", root(), 7, Some(parent));
        commit.sig = Bytes::from_static(b"signature");

        let restored = Commit::from_bytes(&commit.to_bytes()).unwrap();
        assert_eq!(restored, commit);
        assert_eq!(restored.cid(), commit.cid());
    }

    #[test]
    fn test_unsigned_bytes_ignore_signature() {
        let mut commit = Commit::new_unsigned("did:example:1", root(), 1, None);
        let before = commit.unsigned_bytes();
        commit.sig = Bytes::from_static(b"sig");
        assert_eq!(commit.unsigned_bytes(), before);
        assert_ne!(commit.to_bytes(), before);
    }

    #[test]
    fn test_rejects_wrong_shape() {
        let bytes = codec::encode(&Value::map([("did", Value::from("did:example:1"))]));
        assert!(Commit::from_bytes(&bytes).is_err());
    }
}
