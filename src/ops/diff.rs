//! Diff operations between tree states
//!
//! Both trees are walked in key order at once. When the two walks stand on
//! subtrees with the same CID, the subtrees are identical and skipped whole,
//! so the cost follows the size of the change rather than the size of the
//! tree.

use crate::model::Cid;
use crate::mst::{Mst, Node};
use crate::store::BlockStore;
use crate::Result;
use std::collections::BTreeSet;

/// Type of change in a diff
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DiffEntry {
    /// Key was added
    Added { key: String, new_cid: Cid },
    /// Key was removed
    Removed { key: String, old_cid: Cid },
    /// Key was modified
    Modified {
        key: String,
        old_cid: Cid,
        new_cid: Cid,
    },
}

impl DiffEntry {
    pub fn key(&self) -> &str {
        match self {
            DiffEntry::Added { key, .. } => key,
            DiffEntry::Removed { key, .. } => key,
            DiffEntry::Modified { key, .. } => key,
        }
    }

    /// Check if the key belongs to a collection
    pub fn in_collection(&self, collection: &str) -> bool {
        self.key()
            .strip_prefix(collection)
            .is_some_and(|rest| rest.starts_with('/'))
    }
}

/// A diff between two tree states, sorted by key
#[derive(Clone, Debug, Default)]
pub struct Diff {
    pub entries: Vec<DiffEntry>,
}

impl Diff {
    pub fn new(entries: Vec<DiffEntry>) -> Self {
        Diff { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn added_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, DiffEntry::Added { .. }))
            .count()
    }

    pub fn removed_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, DiffEntry::Removed { .. }))
            .count()
    }

    pub fn modified_count(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| matches!(e, DiffEntry::Modified { .. }))
            .count()
    }

    /// The set of keys that differ
    pub fn changed_keys(&self) -> BTreeSet<String> {
        self.entries.iter().map(|e| e.key().to_string()).collect()
    }

    pub fn collection_changes<'a>(
        &'a self,
        collection: &'a str,
    ) -> impl Iterator<Item = &'a DiffEntry> + 'a {
        self.entries.iter().filter(move |e| e.in_collection(collection))
    }
}

/// Compute the diff between two tree roots
pub fn diff_trees<S: BlockStore + ?Sized>(store: &S, old_root: Cid, new_root: Cid) -> Result<Diff> {
    let mst = Mst::new(store);
    let mut old = Walker::new(&mst, old_root);
    let mut new = Walker::new(&mst, new_root);
    let mut entries = Vec::new();

    loop {
        match (old.current(), new.current()) {
            (None, None) => break,
            (Some(Item::Leaf(key, old_cid)), None) => {
                entries.push(DiffEntry::Removed { key, old_cid });
                old.advance();
            }
            (None, Some(Item::Leaf(key, new_cid))) => {
                entries.push(DiffEntry::Added { key, new_cid });
                new.advance();
            }
            (Some(Item::Tree(_)), None) => old.step_into()?,
            (None, Some(Item::Tree(_))) => new.step_into()?,
            (Some(Item::Tree(a)), Some(Item::Tree(b))) => {
                if a == b {
                    old.advance();
                    new.advance();
                } else {
                    old.step_into()?;
                    new.step_into()?;
                }
            }
            (Some(Item::Tree(_)), Some(Item::Leaf(..))) => old.step_into()?,
            (Some(Item::Leaf(..)), Some(Item::Tree(_))) => new.step_into()?,
            (Some(Item::Leaf(old_key, old_cid)), Some(Item::Leaf(new_key, new_cid))) => {
                match old_key.as_bytes().cmp(new_key.as_bytes()) {
                    std::cmp::Ordering::Equal => {
                        if old_cid != new_cid {
                            entries.push(DiffEntry::Modified {
                                key: old_key,
                                old_cid,
                                new_cid,
                            });
                        }
                        old.advance();
                        new.advance();
                    }
                    std::cmp::Ordering::Less => {
                        entries.push(DiffEntry::Removed {
                            key: old_key,
                            old_cid,
                        });
                        old.advance();
                    }
                    std::cmp::Ordering::Greater => {
                        entries.push(DiffEntry::Added {
                            key: new_key,
                            new_cid,
                        });
                        new.advance();
                    }
                }
            }
        }
    }

    tracing::debug!(
        old = %old_root,
        new = %new_root,
        changes = entries.len(),
        "diffed trees"
    );
    Ok(Diff::new(entries))
}

/// One step of an in-order walk: an unexpanded subtree or a leaf
#[derive(Clone, Debug)]
enum Item {
    Tree(Cid),
    Leaf(String, Cid),
}

/// Lazy in-order walk over a tree, expanding subtrees only on request
struct Walker<'m, 'a, S: BlockStore + ?Sized> {
    mst: &'m Mst<'a, S>,
    /// Flattened nodes being walked, with the position in each
    stack: Vec<(Vec<Item>, usize)>,
}

impl<'m, 'a, S: BlockStore + ?Sized> Walker<'m, 'a, S> {
    fn new(mst: &'m Mst<'a, S>, root: Cid) -> Self {
        Walker {
            mst,
            stack: vec![(vec![Item::Tree(root)], 0)],
        }
    }

    fn current(&self) -> Option<Item> {
        self.stack
            .last()
            .and_then(|(items, pos)| items.get(*pos).cloned())
    }

    /// Move past the current item without expanding it
    fn advance(&mut self) {
        if let Some((_, pos)) = self.stack.last_mut() {
            *pos += 1;
        }
        self.settle();
    }

    /// Replace the current subtree with its contents
    fn step_into(&mut self) -> Result<()> {
        let cid = match self.current() {
            Some(Item::Tree(cid)) => cid,
            _ => return Ok(()),
        };
        let node = self.mst.load(&cid)?;
        self.advance();
        self.stack.push((flatten(node), 0));
        self.settle();
        Ok(())
    }

    /// Drop finished frames so `current` is always the next item
    fn settle(&mut self) {
        while let Some((items, pos)) = self.stack.last() {
            if *pos < items.len() {
                break;
            }
            self.stack.pop();
        }
    }
}

fn flatten(node: Node) -> Vec<Item> {
    let mut items = Vec::with_capacity(node.leaves.len() * 2 + 1);
    let mut subtrees = node.subtrees.into_iter();
    if let Some(Some(left)) = subtrees.next() {
        items.push(Item::Tree(left));
    }
    for (leaf, right) in node.leaves.into_iter().zip(subtrees) {
        items.push(Item::Leaf(leaf.key, leaf.value));
        if let Some(right) = right {
            items.push(Item::Tree(right));
        }
    }
    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BlockTag;
    use crate::store::{Block, MemoryStore};
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn value(i: usize) -> Cid {
        Cid::digest(BlockTag::Record, format!("value-{}", i).as_bytes())
    }

    fn key(i: usize) -> String {
        format!("app.test.post/{:05}", i)
    }

    fn build<S: BlockStore>(store: &S, keys: impl IntoIterator<Item = usize>) -> Cid {
        let mst = Mst::new(store);
        let mut root = mst.empty().unwrap();
        for i in keys {
            root = mst.insert(root, &key(i), value(i)).unwrap();
        }
        root
    }

    /// Counts block reads so tests can see how much of a tree was touched
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryStore,
        reads: AtomicUsize,
    }

    impl BlockStore for CountingStore {
        fn put(&self, block: &Block) -> Result<Cid> {
            self.inner.put(block)
        }
        fn get(&self, cid: &Cid) -> Result<Block> {
            self.reads.fetch_add(1, Ordering::Relaxed);
            self.inner.get(cid)
        }
        fn has(&self, cid: &Cid) -> bool {
            self.inner.has(cid)
        }
        fn block_count(&self) -> usize {
            self.inner.block_count()
        }
    }

    #[test]
    fn test_diff_same_tree_is_empty() {
        let store = MemoryStore::new();
        let root = build(&store, 0..100);

        let diff = diff_trees(&store, root, root).unwrap();
        assert!(diff.is_empty());
    }

    #[test]
    fn test_diff_empty_to_non_empty() {
        let store = MemoryStore::new();
        let empty = build(&store, []);
        let root = build(&store, 0..10);

        let diff = diff_trees(&store, empty, root).unwrap();
        assert_eq!(diff.added_count(), 10);
        assert_eq!(diff.removed_count(), 0);

        let reverse = diff_trees(&store, root, empty).unwrap();
        assert_eq!(reverse.removed_count(), 10);
        assert_eq!(reverse.added_count(), 0);
    }

    #[test]
    fn test_diff_single_change() {
        let store = MemoryStore::new();
        let mst = Mst::new(&store);
        let root = build(&store, 0..100);

        let modified = mst.insert(root, &key(42), value(1000)).unwrap();
        let diff = diff_trees(&store, root, modified).unwrap();
        assert_eq!(
            diff.entries,
            vec![DiffEntry::Modified {
                key: key(42),
                old_cid: value(42),
                new_cid: value(1000),
            }]
        );

        let added = mst.insert(root, &key(500), value(500)).unwrap();
        let diff = diff_trees(&store, root, added).unwrap();
        assert_eq!(diff.changed_keys(), BTreeSet::from([key(500)]));
        assert_eq!(diff.added_count(), 1);

        let removed = mst.delete(root, &key(7)).unwrap();
        let diff = diff_trees(&store, root, removed).unwrap();
        assert_eq!(diff.changed_keys(), BTreeSet::from([key(7)]));
        assert_eq!(diff.removed_count(), 1);
    }

    #[test]
    fn test_diff_mixed_changes_sorted() {
        let store = MemoryStore::new();
        let mst = Mst::new(&store);
        let before = build(&store, 0..60);

        let mut after = mst.delete(before, &key(3)).unwrap();
        after = mst.insert(after, &key(30), value(3000)).unwrap();
        after = mst.insert(after, &key(70), value(70)).unwrap();

        let diff = diff_trees(&store, before, after).unwrap();
        let keys: Vec<&str> = diff.entries.iter().map(DiffEntry::key).collect();
        assert_eq!(keys, vec![key(3), key(30), key(70)]);
        assert_eq!(diff.removed_count(), 1);
        assert_eq!(diff.modified_count(), 1);
        assert_eq!(diff.added_count(), 1);
    }

    #[test]
    fn test_diff_skips_shared_subtrees() {
        let store = CountingStore::default();
        let mst = Mst::new(&store);
        let root = build(&store, 0..2000);
        let changed = mst.insert(root, &key(1234), value(0)).unwrap();

        let full_walk = {
            store.reads.store(0, Ordering::Relaxed);
            diff_trees(&store, build(&store, []), root).unwrap();
            store.reads.load(Ordering::Relaxed)
        };

        store.reads.store(0, Ordering::Relaxed);
        let diff = diff_trees(&store, root, changed).unwrap();
        let touched = store.reads.load(Ordering::Relaxed);

        assert_eq!(diff.entries.len(), 1);
        assert!(
            touched * 10 < full_walk,
            "touched {} nodes, full walk reads {}",
            touched,
            full_walk
        );
    }

    #[test]
    fn test_collection_changes() {
        let store = MemoryStore::new();
        let mst = Mst::new(&store);
        let before = build(&store, 0..5);
        let after = mst
            .insert(before, "app.test.like/00001", value(1))
            .unwrap();
        let after = mst.insert(after, &key(9), value(9)).unwrap();

        let diff = diff_trees(&store, before, after).unwrap();
        assert_eq!(diff.collection_changes("app.test.like").count(), 1);
        assert_eq!(diff.collection_changes("app.test.post").count(), 1);
        assert_eq!(diff.collection_changes("app.test").count(), 0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn test_diff_matches_set_difference(
            old in proptest::collection::btree_set(0usize..400, 0..80),
            new in proptest::collection::btree_set(0usize..400, 0..80),
        ) {
            let store = MemoryStore::new();
            let old_root = build(&store, old.iter().copied());
            let new_root = build(&store, new.iter().copied());
            let diff = diff_trees(&store, old_root, new_root).unwrap();

            let added: BTreeSet<_> = new.difference(&old).map(|i| key(*i)).collect();
            let removed: BTreeSet<_> = old.difference(&new).map(|i| key(*i)).collect();
            for entry in &diff.entries {
                match entry {
                    DiffEntry::Added { key, new_cid } => {
                        prop_assert!(added.contains(key));
                        prop_assert_eq!(Some(*new_cid), new_value(key));
                    }
                    DiffEntry::Removed { key, .. } => prop_assert!(removed.contains(key)),
                    DiffEntry::Modified { key, .. } => {
                        prop_assert!(false, "unexpected modification of {}", key)
                    }
                }
            }
            prop_assert_eq!(diff.added_count(), added.len());
            prop_assert_eq!(diff.removed_count(), removed.len());

            let keys: Vec<_> = diff.entries.iter().map(|e| e.key().to_string()).collect();
            prop_assert!(keys.windows(2).all(|w| w[0] < w[1]), "entries out of key order");
        }
    }

    /// The value `build` stores under a key
    fn new_value(key: &str) -> Option<Cid> {
        key.rsplit('/').next()?.parse().ok().map(value)
    }
}
