//! Commit history

use crate::model::{Cid, Commit};
use crate::store::BlockStore;
use crate::Result;

/// Walk `prev` links from `head`, newest first
pub fn log<S: BlockStore + ?Sized>(
    store: &S,
    head: Cid,
    limit: Option<usize>,
) -> Result<Vec<(Cid, Commit)>> {
    let mut history = Vec::new();
    let mut current = Some(head);

    while let Some(cid) = current {
        if limit.is_some_and(|l| history.len() >= l) {
            break;
        }
        let commit = store.get_commit(&cid)?;
        current = commit.prev;
        history.push((cid, commit));
    }

    Ok(history)
}
