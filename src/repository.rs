//! High-level repository API
//!
//! A repository binds each DID's record tree to a chain of signed commits.
//! Every mutation runs under that DID's lock: read the head, rebuild the
//! tree, sign a commit one revision higher, then publish it by moving the
//! head pointer. Reads never take the lock; they resolve against whichever
//! commit was current when they started.

use crate::crypto::{self, Keyring};
use crate::model::path::{validate_collection, validate_did};
use crate::model::{next_tid, Cid, Commit, RecordPath, Value};
use crate::mst::Mst;
use crate::ops::{diff_trees, Diff};
use crate::store::{BlockStore, HeadStore};
use crate::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Outcome of a record write
#[derive(Clone, Debug)]
pub struct WriteResult {
    pub uri: String,
    /// CID of the record value
    pub cid: Cid,
    /// CID of the commit that published the write
    pub commit_cid: Cid,
    pub commit: Commit,
}

/// A record resolved from the current commit
#[derive(Clone, Debug, PartialEq)]
pub struct RecordView {
    pub uri: String,
    pub cid: Cid,
    pub value: Value,
}

/// Signed record repository over a block store
pub struct Repository<S: BlockStore + HeadStore> {
    store: S,
    keyring: Keyring,
    /// Per-DID mutation locks, created on first use
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl<S: BlockStore + HeadStore> Repository<S> {
    pub fn new(store: S, keyring: Keyring) -> Self {
        Repository {
            store,
            keyring,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn keyring(&self) -> &Keyring {
        &self.keyring
    }

    // === Record Operations ===

    /// Create a record; fails with `Conflict` if the path is taken
    ///
    /// Without an rkey a fresh TID is used.
    #[instrument(skip(self, value), err)]
    pub fn create_record(
        &self,
        did: &str,
        collection: &str,
        rkey: Option<&str>,
        value: &Value,
    ) -> Result<WriteResult> {
        let rkey = match rkey {
            Some(rkey) => rkey.to_string(),
            None => next_tid(),
        };
        let path = RecordPath::new(did, collection, rkey)?;
        let cid = self.store.put_record(value)?;
        let key = path.mst_key();

        let (commit_cid, commit) = self.commit(did, |mst, root| {
            match mst.get(root, &key) {
                Ok(_) => Err(Error::Conflict(format!("{} already exists", path))),
                Err(e) if e.is_not_found() => mst.insert(root, &key, cid),
                Err(e) => Err(e),
            }
        })?;

        Ok(WriteResult {
            uri: path.uri(),
            cid,
            commit_cid,
            commit,
        })
    }

    /// Create or replace a record
    #[instrument(skip(self, value), err)]
    pub fn put_record(
        &self,
        did: &str,
        collection: &str,
        rkey: &str,
        value: &Value,
    ) -> Result<WriteResult> {
        let path = RecordPath::new(did, collection, rkey)?;
        let cid = self.store.put_record(value)?;
        let key = path.mst_key();

        let (commit_cid, commit) = self.commit(did, |mst, root| mst.insert(root, &key, cid))?;

        Ok(WriteResult {
            uri: path.uri(),
            cid,
            commit_cid,
            commit,
        })
    }

    /// Delete a record; fails with `NotFound` if it does not exist
    #[instrument(skip(self), err)]
    pub fn delete_record(&self, did: &str, collection: &str, rkey: &str) -> Result<(Cid, Commit)> {
        let path = RecordPath::new(did, collection, rkey)?;
        let key = path.mst_key();

        self.commit(did, |mst, root| {
            mst.delete(root, &key).map_err(|e| match e {
                Error::NotFound(_) => Error::NotFound(path.uri()),
                e => e,
            })
        })
    }

    /// Resolve a record at the current commit
    pub fn get_record(&self, did: &str, collection: &str, rkey: &str) -> Result<RecordView> {
        let path = RecordPath::new(did, collection, rkey)?;
        let not_found = || Error::NotFound(path.uri());

        let (_, head) = self.head(did)?.ok_or_else(not_found)?;
        let cid = Mst::new(&self.store)
            .get(head.data, &path.mst_key())
            .map_err(|e| if e.is_not_found() { not_found() } else { e })?;
        let value = self.store.get_record(&cid)?;

        Ok(RecordView {
            uri: path.uri(),
            cid,
            value,
        })
    }

    /// All records of a collection, in rkey order
    pub fn list_records(&self, did: &str, collection: &str) -> Result<Vec<RecordView>> {
        validate_did(did)?;
        validate_collection(collection)?;

        let head = match self.head(did)? {
            Some((_, head)) => head,
            None => return Ok(Vec::new()),
        };

        let prefix = format!("{}/", collection);
        let entries = Mst::new(&self.store).list(head.data, &prefix)?;

        entries
            .into_iter()
            .map(|(key, cid)| {
                let rkey = &key[prefix.len()..];
                Ok(RecordView {
                    uri: format!("at://{}/{}/{}", did, collection, rkey),
                    cid,
                    value: self.store.get_record(&cid)?,
                })
            })
            .collect()
    }

    // === Commit Operations ===

    /// Current commit of a DID, if it has one
    pub fn head(&self, did: &str) -> Result<Option<(Cid, Commit)>> {
        match self.store.head(did) {
            Some(cid) => Ok(Some((cid, self.store.get_commit(&cid)?))),
            None => Ok(None),
        }
    }

    /// Commit history of a DID, newest first
    pub fn log(&self, did: &str, limit: Option<usize>) -> Result<Vec<(Cid, Commit)>> {
        match self.store.head(did) {
            Some(head) => crate::ops::log(&self.store, head, limit),
            None => Ok(Vec::new()),
        }
    }

    /// Record-level changes between two commits
    pub fn diff_commits(&self, from: &Cid, to: &Cid) -> Result<Diff> {
        let from = self.store.get_commit(from)?;
        let to = self.store.get_commit(to)?;
        diff_trees(&self.store, from.data, to.data)
    }

    /// Check the current commit's signature against the DID's key
    pub fn verify_head(&self, did: &str) -> Result<(Cid, Commit)> {
        let (cid, commit) = self
            .head(did)?
            .ok_or_else(|| Error::NotFound(format!("no commits for {}", did)))?;
        let key = self
            .keyring
            .verifying_key(did)
            .ok_or_else(|| Error::MissingKey(did.to_string()))?;
        crypto::ensure_valid(&commit, &key)?;
        Ok((cid, commit))
    }

    /// Persist buffered store state
    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }

    /// Run one read-modify-write of a DID's tree and publish it as a commit
    ///
    /// `update` gets the current root (the empty tree for a new DID) and
    /// returns the new one. Nothing is published if it fails.
    fn commit<F>(&self, did: &str, update: F) -> Result<(Cid, Commit)>
    where
        F: FnOnce(&Mst<'_, S>, Cid) -> Result<Cid>,
    {
        let key = self
            .keyring
            .signing_key(did)
            .ok_or_else(|| Error::MissingKey(did.to_string()))?;

        let lock = self.lock_for(did);
        let _guard = lock.lock();

        let mst = Mst::new(&self.store);
        let prev = self.store.head(did);
        let (root, rev) = match prev {
            Some(cid) => {
                let head = self.store.get_commit(&cid)?;
                (head.data, head.rev)
            }
            None => (mst.empty()?, 0),
        };

        let new_root = update(&mst, root)?;
        debug!(old_root = %root, new_root = %new_root, "tree updated");

        let commit = Commit::new_unsigned(did, new_root, rev + 1, prev).sign(&key);
        let commit_cid = self.store.put_commit(&commit)?;
        self.store.swap_head(did, prev, commit_cid)?;

        info!(did, rev = commit.rev, commit = %commit_cid, "published commit");
        Ok((commit_cid, commit))
    }

    fn lock_for(&self, did: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        locks.entry(did.to_string()).or_default().clone()
    }
}
