//! Content-addressed block storage
//!
//! Blocks are stored by their CID and never overwritten. Alongside the
//! blocks every store keeps one current-commit pointer per DID, which only
//! moves through [`HeadStore::swap_head`].

mod block;
mod file_store;
mod memory;

pub use block::Block;
pub use file_store::FileStore;
pub use memory::MemoryStore;

use crate::codec;
use crate::model::{BlockTag, Cid, Commit, Value};
use crate::{Error, Result};

/// Content-addressed block storage
///
/// Implementations must tolerate concurrent readers and writers.
pub trait BlockStore: Send + Sync {
    /// Store a block, returns its CID. Storing identical bytes again is a no-op.
    fn put(&self, block: &Block) -> Result<Cid>;

    /// Retrieve a block by CID
    fn get(&self, cid: &Cid) -> Result<Block>;

    /// Check if a CID is present
    fn has(&self, cid: &Cid) -> bool;

    /// Number of stored blocks
    fn block_count(&self) -> usize;

    /// Persist buffered state, if any
    fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Store a record value and return its CID
    ///
    /// Values the decoder would refuse to read back are rejected up front.
    fn put_record(&self, value: &Value) -> Result<Cid> {
        value.validate()?;
        self.put(&Block::new(BlockTag::Record, codec::encode(value)))
    }

    /// Retrieve a record value by CID
    fn get_record(&self, cid: &Cid) -> Result<Value> {
        let block = self.get_tagged(cid, BlockTag::Record)?;
        Ok(codec::decode(&block.data)?)
    }

    /// Store a commit and return its CID
    fn put_commit(&self, commit: &Commit) -> Result<Cid> {
        self.put(&Block::new(BlockTag::Commit, commit.to_bytes()))
    }

    /// Retrieve a commit by CID
    fn get_commit(&self, cid: &Cid) -> Result<Commit> {
        let block = self.get_tagged(cid, BlockTag::Commit)?;
        Commit::from_bytes(&block.data)
    }

    /// Retrieve a block, checking it holds the expected kind of content
    fn get_tagged(&self, cid: &Cid, tag: BlockTag) -> Result<Block> {
        let block = self.get(cid)?;
        if block.tag != tag {
            return Err(Error::Integrity(format!(
                "expected {:?} at {}, got {:?}",
                tag, cid, block.tag
            )));
        }
        Ok(block)
    }
}

/// Current-commit pointers, one per DID
pub trait HeadStore: Send + Sync {
    /// Current commit CID for a DID
    fn head(&self, did: &str) -> Option<Cid>;

    /// All DIDs with a current commit
    fn list_heads(&self) -> Vec<(String, Cid)>;

    /// Move the pointer for `did` from `expected` to `new`
    ///
    /// Fails with [`Error::Conflict`] if the pointer is not `expected`.
    fn swap_head(&self, did: &str, expected: Option<Cid>, new: Cid) -> Result<()>;
}

/// Reject a put whose bytes differ from what is already stored at the CID
pub(crate) fn ensure_same(cid: &Cid, existing: &Block, incoming: &Block) -> Result<()> {
    if existing.tag != incoming.tag || existing.data != incoming.data {
        tracing::warn!(%cid, "conflicting bytes for stored CID");
        return Err(Error::Integrity(format!(
            "different bytes already stored at {}",
            cid
        )));
    }
    Ok(())
}

/// Check that bytes read back still hash to the CID they were stored under
pub(crate) fn verify_block(cid: &Cid, block: &Block) -> Result<()> {
    if block.cid() != *cid {
        tracing::warn!(%cid, "stored block does not match its CID");
        return Err(Error::Integrity(format!(
            "block stored at {} hashes to {}",
            cid,
            block.cid()
        )));
    }
    Ok(())
}

pub(crate) fn check_expected(did: &str, current: Option<Cid>, expected: Option<Cid>) -> Result<()> {
    if current != expected {
        return Err(Error::Conflict(format!(
            "head of {} moved: expected {:?}, found {:?}",
            did, expected, current
        )));
    }
    Ok(())
}
