//! Merkle search tree operations

use super::node::{Leaf, Node};
use super::util::{layer_for_key, validate_key};
use crate::model::Cid;
use crate::store::BlockStore;
use crate::{Error, Result};

/// Persistent merkle search tree over a block store
///
/// The tree holds no state of its own: every operation takes a root CID and
/// returns a new one. Nodes are immutable, so a mutation writes fresh nodes
/// along one root-to-leaf path and shares everything else with the old
/// version.
pub struct Mst<'a, S: BlockStore + ?Sized> {
    store: &'a S,
}

impl<'a, S: BlockStore + ?Sized> Mst<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Mst { store }
    }

    /// Persist the empty tree and return its root
    pub fn empty(&self) -> Result<Cid> {
        self.persist(&Node::empty())
    }

    /// Look up the value stored at a key
    pub fn get(&self, root: Cid, key: &str) -> Result<Cid> {
        let mut node = self.load(&root)?;
        loop {
            match node.find(key) {
                Ok(i) => return Ok(node.leaves[i].value),
                Err(i) => match node.subtrees[i] {
                    Some(child) => node = self.load(&child)?,
                    None => return Err(Error::NotFound(format!("key {}", key))),
                },
            }
        }
    }

    /// Insert a key, or replace its value if present
    pub fn insert(&self, root: Cid, key: &str, value: Cid) -> Result<Cid> {
        validate_key(key)?;
        let key_layer = layer_for_key(key);

        let root_node = self.load(&root)?;
        let (mut node, mut layer) = match self.node_layer(&root_node)? {
            Some(layer) => (root_node, layer),
            None => (Node::empty(), key_layer),
        };

        // Grow the tree upwards until the key's layer exists
        if layer < key_layer {
            let mut child = root;
            for _ in layer + 1..key_layer {
                child = self.persist(&Node::wrap(Some(child)))?;
            }
            node = Node::wrap(Some(child));
            layer = key_layer;
        }

        let node = self.insert_into(node, layer, key, key_layer, value)?;
        let new_root = self.persist(&node)?;
        tracing::debug!(key, layer = key_layer, root = %new_root, "inserted tree key");
        Ok(new_root)
    }

    /// Remove a key. Fails with `NotFound` if it is absent.
    pub fn delete(&self, root: Cid, key: &str) -> Result<Cid> {
        let root_node = self.load(&root)?;
        let layer = self
            .node_layer(&root_node)?
            .ok_or_else(|| Error::NotFound(format!("key {}", key)))?;
        let key_layer = layer_for_key(key);
        if key_layer > layer {
            return Err(Error::NotFound(format!("key {}", key)));
        }

        let mut node = self.delete_from(root_node, layer, key, key_layer)?;

        // A root with no leaves of its own is replaced by its only child
        while node.leaves.is_empty() {
            match node.subtrees[0] {
                Some(child) => node = self.load(&child)?,
                None => break,
            }
        }

        let new_root = self.persist(&node)?;
        tracing::debug!(key, root = %new_root, "deleted tree key");
        Ok(new_root)
    }

    /// All entries whose key starts with `prefix`, in key order
    pub fn list(&self, root: Cid, prefix: &str) -> Result<Vec<(String, Cid)>> {
        let mut out = Vec::new();
        let node = self.load(&root)?;
        self.collect(&node, prefix, &mut out)?;
        Ok(out)
    }

    /// Number of entries in the tree
    pub fn len(&self, root: Cid) -> Result<usize> {
        Ok(self.list(root, "")?.len())
    }

    /// Check whether the tree has no entries
    pub fn is_empty(&self, root: Cid) -> Result<bool> {
        Ok(self.load(&root)?.is_empty())
    }

    pub(crate) fn load(&self, cid: &Cid) -> Result<Node> {
        let block = self.store.get(cid)?;
        Node::from_block(&block)
    }

    fn persist(&self, node: &Node) -> Result<Cid> {
        self.store.put(&node.to_block())
    }

    /// Persist a subtree, or drop it entirely if it holds nothing
    fn persist_subtree(&self, node: &Node) -> Result<Option<Cid>> {
        if node.is_empty() {
            Ok(None)
        } else {
            self.persist(node).map(Some)
        }
    }

    /// Layer of a node, or None for the empty tree
    fn node_layer(&self, node: &Node) -> Result<Option<usize>> {
        if let Some(first) = node.leaves.first() {
            return Ok(Some(layer_for_key(&first.key)));
        }
        match node.subtrees[0] {
            Some(child) => {
                let child = self.load(&child)?;
                Ok(self.node_layer(&child)?.map(|l| l + 1))
            }
            None => Ok(None),
        }
    }

    fn insert_into(
        &self,
        mut node: Node,
        layer: usize,
        key: &str,
        key_layer: usize,
        value: Cid,
    ) -> Result<Node> {
        match node.find(key) {
            Ok(i) => {
                node.leaves[i].value = value;
            }
            Err(i) if key_layer == layer => {
                let (lo, hi) = self.split(node.subtrees[i], key)?;
                node.leaves.insert(
                    i,
                    Leaf {
                        key: key.to_string(),
                        value,
                    },
                );
                node.subtrees[i] = lo;
                node.subtrees.insert(i + 1, hi);
            }
            Err(i) if key_layer < layer => {
                let child = match node.subtrees[i] {
                    Some(cid) => self.load(&cid)?,
                    None => Node::empty(),
                };
                let child = self.insert_into(child, layer - 1, key, key_layer, value)?;
                node.subtrees[i] = Some(self.persist(&child)?);
            }
            Err(_) => {
                return Err(Error::Integrity(format!(
                    "key {} belongs above layer {}",
                    key, layer
                )));
            }
        }
        Ok(node)
    }

    /// Split a subtree into the parts below and above `key`
    fn split(&self, subtree: Option<Cid>, key: &str) -> Result<(Option<Cid>, Option<Cid>)> {
        let cid = match subtree {
            Some(cid) => cid,
            None => return Ok((None, None)),
        };
        let node = self.load(&cid)?;
        let i = match node.find(key) {
            Err(i) => i,
            Ok(_) => {
                return Err(Error::Integrity(format!(
                    "key {} found below its own layer",
                    key
                )))
            }
        };

        let (lo, hi) = self.split(node.subtrees[i], key)?;

        let mut left = Node {
            leaves: node.leaves[..i].to_vec(),
            subtrees: node.subtrees[..=i].to_vec(),
        };
        left.subtrees[i] = lo;

        let mut right = Node {
            leaves: node.leaves[i..].to_vec(),
            subtrees: node.subtrees[i..].to_vec(),
        };
        right.subtrees[0] = hi;

        Ok((self.persist_subtree(&left)?, self.persist_subtree(&right)?))
    }

    fn delete_from(&self, mut node: Node, layer: usize, key: &str, key_layer: usize) -> Result<Node> {
        match node.find(key) {
            Ok(i) => {
                let merged = self.merge(node.subtrees[i], node.subtrees[i + 1])?;
                node.leaves.remove(i);
                node.subtrees.remove(i + 1);
                node.subtrees[i] = merged;
            }
            Err(i) => {
                let child = match node.subtrees[i] {
                    Some(cid) if key_layer < layer => cid,
                    _ => return Err(Error::NotFound(format!("key {}", key))),
                };
                let child = self.load(&child)?;
                let child = self.delete_from(child, layer - 1, key, key_layer)?;
                node.subtrees[i] = self.persist_subtree(&child)?;
            }
        }
        Ok(node)
    }

    /// Join two adjacent sibling subtrees; every key in `a` is below every key in `b`
    fn merge(&self, a: Option<Cid>, b: Option<Cid>) -> Result<Option<Cid>> {
        let (a, b) = match (a, b) {
            (None, other) | (other, None) => return Ok(other),
            (Some(a), Some(b)) => (a, b),
        };

        let mut left = self.load(&a)?;
        let right = self.load(&b)?;

        let left_edge = left.subtrees.pop().flatten();
        let junction = self.merge(left_edge, right.subtrees[0])?;
        left.subtrees.push(junction);
        left.leaves.extend(right.leaves);
        left.subtrees.extend_from_slice(&right.subtrees[1..]);

        self.persist(&left).map(Some)
    }

    fn collect(&self, node: &Node, prefix: &str, out: &mut Vec<(String, Cid)>) -> Result<()> {
        for i in 0..=node.leaves.len() {
            // Subtree i lies entirely below leaves[i]
            let below_prefix = node
                .leaves
                .get(i)
                .is_some_and(|leaf| leaf.key.as_str() < prefix);
            if !below_prefix {
                if let Some(child) = node.subtrees[i] {
                    let child = self.load(&child)?;
                    self.collect(&child, prefix, out)?;
                }
            }

            if let Some(leaf) = node.leaves.get(i) {
                if leaf.key.starts_with(prefix) {
                    out.push((leaf.key.clone(), leaf.value));
                } else if leaf.key.as_str() > prefix {
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}
