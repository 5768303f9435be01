//! Content identifiers using BLAKE3

use crate::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// CID format version written as the first binary byte
pub const CID_VERSION: u8 = 0x01;

/// Length of the binary form: version + tag + digest
pub const CID_LEN: usize = 34;

/// Content-type tag for blocks
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlockTag {
    /// A record value
    Record,
    /// A merkle search tree node
    Node,
    /// A signed commit
    Commit,
}

impl BlockTag {
    pub fn as_byte(&self) -> u8 {
        match self {
            BlockTag::Record => 0x71,
            BlockTag::Node => 0x72,
            BlockTag::Commit => 0x73,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x71 => Some(BlockTag::Record),
            0x72 => Some(BlockTag::Node),
            0x73 => Some(BlockTag::Commit),
            _ => None,
        }
    }
}

/// A content identifier: a block tag plus the BLAKE3 digest of `tag || bytes`
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cid {
    tag: BlockTag,
    digest: [u8; 32],
}

impl Cid {
    /// Hash tagged block bytes
    pub fn digest(tag: BlockTag, data: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&[tag.as_byte()]);
        hasher.update(data);
        Cid {
            tag,
            digest: *hasher.finalize().as_bytes(),
        }
    }

    pub fn tag(&self) -> BlockTag {
        self.tag
    }

    pub fn digest_bytes(&self) -> &[u8; 32] {
        &self.digest
    }

    /// Binary form: version byte, tag byte, digest
    pub fn to_bytes(&self) -> [u8; CID_LEN] {
        let mut out = [0u8; CID_LEN];
        out[0] = CID_VERSION;
        out[1] = self.tag.as_byte();
        out[2..].copy_from_slice(&self.digest);
        out
    }

    /// Parse the binary form
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != CID_LEN {
            return Err(Error::InvalidCid(format!(
                "expected {} bytes, got {}",
                CID_LEN,
                bytes.len()
            )));
        }
        if bytes[0] != CID_VERSION {
            return Err(Error::InvalidCid(format!("unknown version {}", bytes[0])));
        }
        let tag = BlockTag::from_byte(bytes[1])
            .ok_or_else(|| Error::InvalidCid(format!("unknown tag 0x{:02x}", bytes[1])))?;
        let mut digest = [0u8; 32];
        digest.copy_from_slice(&bytes[2..]);
        Ok(Cid { tag, digest })
    }

    /// Short prefix of the digest for display
    pub fn short(&self) -> String {
        hex::encode(&self.digest[..4])
    }
}

/// Textual form is multibase hex: `f` followed by the hex of the binary form
impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "f{}", hex::encode(self.to_bytes()))
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({:?}:{})", self.tag, self.short())
    }
}

impl FromStr for Cid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let body = s
            .strip_prefix('f')
            .ok_or_else(|| Error::InvalidCid(format!("missing multibase prefix: {}", s)))?;
        let bytes = hex::decode(body).map_err(|e| Error::InvalidCid(e.to_string()))?;
        Cid::from_bytes(&bytes)
    }
}

impl Serialize for Cid {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Cid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
