//! MST node types

use super::util::common_prefix_len;
use crate::codec;
use crate::error::{CodecError, CodecErrorKind};
use crate::model::{BlockTag, Cid, Value};
use crate::store::Block;
use crate::Result;
use bytes::Bytes;
use std::collections::BTreeMap;

/// A key/value entry held directly in a node
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Leaf {
    pub key: String,
    pub value: Cid,
}

/// A node of the merkle search tree
///
/// Leaves are strictly increasing by key and all sit on the node's layer.
/// `subtrees[i]` holds the keys between `leaves[i - 1]` and `leaves[i]`,
/// one layer down, so there is always one more subtree slot than leaves.
///
/// On the wire the first slot becomes `l` and every other slot becomes the
/// `t` of the leaf before it; keys are prefix-compressed against the
/// previous key in the node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Node {
    pub leaves: Vec<Leaf>,
    pub subtrees: Vec<Option<Cid>>,
}

impl Node {
    /// A node with no leaves and no children
    pub fn empty() -> Self {
        Node {
            leaves: Vec::new(),
            subtrees: vec![None],
        }
    }

    /// A node with no leaves over a single child
    pub fn wrap(child: Option<Cid>) -> Self {
        Node {
            leaves: Vec::new(),
            subtrees: vec![child],
        }
    }

    /// Check if this node holds nothing at all
    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty() && self.subtrees.iter().all(Option::is_none)
    }

    /// Binary search for a key: `Ok(leaf index)` or `Err(subtree slot)`
    pub fn find(&self, key: &str) -> std::result::Result<usize, usize> {
        self.leaves
            .binary_search_by(|leaf| leaf.key.as_bytes().cmp(key.as_bytes()))
    }

    /// Wire form as a codec value
    pub fn to_value(&self) -> Value {
        let mut entries = Vec::with_capacity(self.leaves.len());
        let mut last_key: &[u8] = &[];

        for (i, leaf) in self.leaves.iter().enumerate() {
            let key = leaf.key.as_bytes();
            let prefix_len = common_prefix_len(last_key, key);

            let mut entry = BTreeMap::new();
            entry.insert(
                "k".to_string(),
                Value::Bytes(Bytes::copy_from_slice(&key[prefix_len..])),
            );
            entry.insert("p".to_string(), Value::Int(prefix_len as i64));
            entry.insert("t".to_string(), link_or_null(self.subtrees[i + 1]));
            entry.insert("v".to_string(), Value::Link(leaf.value));
            entries.push(Value::Map(entry));

            last_key = key;
        }

        Value::map([
            ("e", Value::Array(entries)),
            ("l", link_or_null(self.subtrees[0])),
        ])
    }

    /// Parse the wire form, expanding compressed keys
    pub fn from_value(value: &Value) -> std::result::Result<Self, CodecError> {
        let map = value.as_map().ok_or_else(|| shape("node is not a map"))?;
        if map.len() != 2 {
            return Err(shape("node must have exactly e and l"));
        }

        let left = optional_link(map.get("l").ok_or_else(|| shape("missing l"))?)?;
        let entries = match map.get("e") {
            Some(Value::Array(entries)) => entries,
            _ => return Err(shape("e must be an array")),
        };

        let mut node = Node {
            leaves: Vec::with_capacity(entries.len()),
            subtrees: Vec::with_capacity(entries.len() + 1),
        };
        node.subtrees.push(left);

        let mut last_key: Vec<u8> = Vec::new();
        for entry in entries {
            let entry = entry.as_map().ok_or_else(|| shape("entry is not a map"))?;
            if entry.len() != 4 {
                return Err(shape("entry must have exactly k, p, t and v"));
            }
            let suffix = entry
                .get("k")
                .and_then(Value::as_bytes)
                .ok_or_else(|| shape("k must be bytes"))?;
            let prefix_len = entry
                .get("p")
                .and_then(Value::as_int)
                .filter(|p| *p >= 0 && (*p as usize) <= last_key.len())
                .ok_or_else(|| shape("p out of range"))? as usize;
            let tree = optional_link(entry.get("t").ok_or_else(|| shape("missing t"))?)?;
            let value = entry
                .get("v")
                .and_then(Value::as_link)
                .ok_or_else(|| shape("v must be a link"))?;

            let mut key_bytes = last_key[..prefix_len].to_vec();
            key_bytes.extend_from_slice(suffix);
            if key_bytes.is_empty() || (key_bytes <= last_key && !node.leaves.is_empty()) {
                return Err(shape("keys not strictly increasing"));
            }
            // Compression must be maximal or the bytes are not canonical
            if common_prefix_len(&last_key, &key_bytes) != prefix_len {
                return Err(shape("non-canonical key compression"));
            }
            let key = String::from_utf8(key_bytes.clone()).map_err(|_| shape("key is not UTF-8"))?;

            node.leaves.push(Leaf { key, value });
            node.subtrees.push(tree);
            last_key = key_bytes;
        }

        Ok(node)
    }

    /// Encode into a block
    pub fn to_block(&self) -> Block {
        Block::new(BlockTag::Node, codec::encode(&self.to_value()))
    }

    /// Decode from a block
    pub fn from_block(block: &Block) -> Result<Self> {
        if block.tag != BlockTag::Node {
            return Err(crate::Error::Integrity(format!(
                "expected tree node, got {:?}",
                block.tag
            )));
        }
        let value = codec::decode(&block.data)?;
        Ok(Node::from_value(&value)?)
    }

    pub fn cid(&self) -> Cid {
        self.to_block().cid()
    }
}

fn link_or_null(cid: Option<Cid>) -> Value {
    cid.map(Value::Link).unwrap_or(Value::Null)
}

fn optional_link(value: &Value) -> std::result::Result<Option<Cid>, CodecError> {
    match value {
        Value::Null => Ok(None),
        Value::Link(cid) => Ok(Some(*cid)),
        _ => Err(shape("expected link or null")),
    }
}

fn shape(msg: &str) -> CodecError {
    CodecError::new(0, CodecErrorKind::Shape(msg.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cid(data: &[u8]) -> Cid {
        Cid::digest(BlockTag::Record, data)
    }

    fn sample() -> Node {
        Node {
            leaves: vec![
                Leaf {
                    key: "app.test.post/aaa".into(),
                    value: cid(b"1"),
                },
                Leaf {
                    key: "app.test.post/aab".into(),
                    value: cid(b"2"),
                },
            ],
            subtrees: vec![Some(Cid::digest(BlockTag::Node, b"left")), None, None],
        }
    }

    #[test]
    fn test_wire_roundtrip() {
        let node = sample();
        let block = node.to_block();
        assert_eq!(Node::from_block(&block).unwrap(), node);
    }

    #[test]
    fn test_prefix_compression() {
        let value = sample().to_value();
        let entries = match &value.as_map().unwrap()["e"] {
            Value::Array(e) => e.clone(),
            _ => unreachable!(),
        };
        let second = entries[1].as_map().unwrap();
        assert_eq!(second["p"], Value::Int(16));
        assert_eq!(second["k"], Value::Bytes(Bytes::from_static(b"b")));
    }

    #[test]
    fn test_empty_node() {
        let node = Node::empty();
        assert!(node.is_empty());
        assert!(!Node::wrap(Some(cid(b"x"))).is_empty());
        assert_eq!(Node::from_block(&node.to_block()).unwrap(), node);
    }

    #[test]
    fn test_find() {
        let node = sample();
        assert_eq!(node.find("app.test.post/aab"), Ok(1));
        assert_eq!(node.find("app.test.post/a"), Err(0));
        assert_eq!(node.find("app.test.post/zzz"), Err(2));
    }

    #[test]
    fn test_rejects_unordered_keys() {
        let mut node = sample();
        node.leaves.swap(0, 1);
        assert!(Node::from_block(&node.to_block()).is_err());
    }

    #[test]
    fn test_rejects_wrong_tag() {
        let block = Block::new(BlockTag::Record, sample().to_block().data);
        assert!(Node::from_block(&block).is_err());
    }
}
