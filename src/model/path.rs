//! Record paths: DID, collection and record key

use crate::{Error, Result};
use std::fmt;

/// Location of a record: `at://did/collection/rkey`
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RecordPath {
    pub did: String,
    pub collection: String,
    pub rkey: String,
}

impl RecordPath {
    /// Build a validated path
    pub fn new(
        did: impl Into<String>,
        collection: impl Into<String>,
        rkey: impl Into<String>,
    ) -> Result<Self> {
        let path = RecordPath {
            did: did.into(),
            collection: collection.into(),
            rkey: rkey.into(),
        };
        validate_did(&path.did)?;
        validate_collection(&path.collection)?;
        validate_rkey(&path.rkey)?;
        Ok(path)
    }

    /// Key of this record inside the repository's tree
    pub fn mst_key(&self) -> String {
        format!("{}/{}", self.collection, self.rkey)
    }

    /// The `at://` URI of this record
    pub fn uri(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for RecordPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "at://{}/{}/{}", self.did, self.collection, self.rkey)
    }
}

/// `did:<method>:<identifier>`
pub fn validate_did(did: &str) -> Result<()> {
    let mut parts = did.splitn(3, ':');
    let scheme = parts.next();
    let method = parts.next().unwrap_or("");
    let ident = parts.next().unwrap_or("");

    let ok = scheme == Some("did")
        && !method.is_empty()
        && method.chars().all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        && !ident.is_empty()
        && !ident.ends_with(':')
        && ident
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '%' | '-'))
        && did.len() <= 2048;

    if ok {
        Ok(())
    } else {
        Err(Error::InvalidPath(format!("invalid DID: {}", did)))
    }
}

/// Reverse-domain NSID with at least three segments
pub fn validate_collection(collection: &str) -> Result<()> {
    let segments: Vec<&str> = collection.split('.').collect();
    let ok = collection.len() <= 317
        && segments.len() >= 3
        && segments.iter().all(|s| {
            !s.is_empty()
                && s.len() <= 63
                && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
                && !s.starts_with('-')
                && !s.ends_with('-')
        });

    if ok {
        Ok(())
    } else {
        Err(Error::InvalidPath(format!("invalid collection: {}", collection)))
    }
}

pub fn validate_rkey(rkey: &str) -> Result<()> {
    let ok = !rkey.is_empty()
        && rkey.len() <= 512
        && rkey != "."
        && rkey != ".."
        && rkey
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '~' | '-'));

    if ok {
        Ok(())
    } else {
        Err(Error::InvalidPath(format!("invalid record key: {}", rkey)))
    }
}
