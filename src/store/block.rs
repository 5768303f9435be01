//! Block type - the unit of content-addressed storage

use crate::codec;
use crate::model::{BlockTag, Cid};
use bytes::Bytes;

/// A block is tagged, immutable canonical bytes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Block {
    /// Type of content
    pub tag: BlockTag,
    /// Canonical bytes
    pub data: Bytes,
}

impl Block {
    /// Create a new block
    pub fn new(tag: BlockTag, data: impl Into<Bytes>) -> Self {
        Block {
            tag,
            data: data.into(),
        }
    }

    /// Compute the content identifier
    pub fn cid(&self) -> Cid {
        codec::cid_of(&self.data, self.tag)
    }

    /// Compress the block for storage
    pub fn compress(&self) -> crate::Result<Vec<u8>> {
        let mut output = Vec::new();
        output.push(self.tag.as_byte());
        let compressed = zstd::encode_all(self.data.as_ref(), 3)?;
        output.extend(compressed);
        Ok(output)
    }

    /// Decompress a block from storage
    pub fn decompress(data: &[u8]) -> crate::Result<Self> {
        if data.is_empty() {
            return Err(crate::Error::Integrity("Empty block data".into()));
        }

        let tag = BlockTag::from_byte(data[0])
            .ok_or_else(|| crate::Error::Integrity(format!("Invalid block tag: {}", data[0])))?;

        let decompressed = zstd::decode_all(&data[1..])
            .map_err(|e| crate::Error::Integrity(format!("Corrupt block data: {}", e)))?;

        Ok(Block {
            tag,
            data: Bytes::from(decompressed),
        })
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_compress_roundtrip() {
        let original = Block::new(BlockTag::Record, b"hello world".to_vec());
        let compressed = original.compress().unwrap();
        let restored = Block::decompress(&compressed).unwrap();

        assert_eq!(original, restored);
        assert_eq!(original.cid(), restored.cid());
    }

    #[test]
    fn test_block_cid_includes_tag() {
        let record = Block::new(BlockTag::Record, b"data".to_vec());
        let node = Block::new(BlockTag::Node, b"data".to_vec());
        assert_ne!(record.cid(), node.cid());
    }

    #[test]
    fn test_decompress_rejects_unknown_tag() {
        assert!(Block::decompress(&[0x00, 1, 2, 3]).is_err());
        assert!(Block::decompress(&[]).is_err());
    }
}
