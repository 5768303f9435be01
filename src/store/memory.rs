//! In-memory block store

use super::{check_expected, ensure_same, verify_block, Block, BlockStore, HeadStore};
use crate::model::Cid;
use crate::{Error, Result};
use parking_lot::RwLock;
use std::collections::HashMap;

/// A block store held entirely in memory
#[derive(Default)]
pub struct MemoryStore {
    blocks: RwLock<HashMap<Cid, Block>>,
    heads: RwLock<HashMap<String, Cid>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store bytes under an arbitrary CID, bypassing hashing
    #[cfg(test)]
    pub(crate) fn insert_raw(&self, cid: Cid, block: Block) {
        self.blocks.write().insert(cid, block);
    }
}

impl BlockStore for MemoryStore {
    fn put(&self, block: &Block) -> Result<Cid> {
        let cid = block.cid();

        if let Some(existing) = self.blocks.read().get(&cid) {
            ensure_same(&cid, existing, block)?;
            return Ok(cid);
        }

        let mut blocks = self.blocks.write();
        // Another writer may have stored it between the two locks
        if let Some(existing) = blocks.get(&cid) {
            ensure_same(&cid, existing, block)?;
        } else {
            blocks.insert(cid, block.clone());
            tracing::trace!(%cid, size = block.size(), "stored block");
        }
        Ok(cid)
    }

    fn get(&self, cid: &Cid) -> Result<Block> {
        let block = self
            .blocks
            .read()
            .get(cid)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("block {}", cid)))?;
        verify_block(cid, &block)?;
        Ok(block)
    }

    fn has(&self, cid: &Cid) -> bool {
        self.blocks.read().contains_key(cid)
    }

    fn block_count(&self) -> usize {
        self.blocks.read().len()
    }
}

impl HeadStore for MemoryStore {
    fn head(&self, did: &str) -> Option<Cid> {
        self.heads.read().get(did).copied()
    }

    fn list_heads(&self) -> Vec<(String, Cid)> {
        let mut heads: Vec<_> = self
            .heads
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        heads.sort();
        heads
    }

    fn swap_head(&self, did: &str, expected: Option<Cid>, new: Cid) -> Result<()> {
        let mut heads = self.heads.write();
        check_expected(did, heads.get(did).copied(), expected)?;
        heads.insert(did.to_string(), new);
        Ok(())
    }
}
