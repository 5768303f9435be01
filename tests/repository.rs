//! Repository scenarios against the on-disk store

use atrepo::codec::{cid_of, encode};
use atrepo::crypto::{self, SigningKey};
use atrepo::{BlockStore, BlockTag, Error, FileStore, HeadStore, Keyring, Repository, Value};
use rand::rngs::OsRng;
use std::sync::Arc;
use std::thread;
use tempfile::tempdir;

const DID: &str = "did:example:1";
const POSTS: &str = "app.test.post";

fn keyring_with(did: &str) -> (Keyring, SigningKey) {
    let key = SigningKey::generate(&mut OsRng);
    let keyring = Keyring::new();
    keyring.insert(did, key.clone());
    (keyring, key)
}

fn record(n: i64) -> Value {
    Value::map([
        ("n", Value::from(n)),
        ("tags", Value::Array(vec!["a".into(), "b".into()])),
        ("blob", Value::from(vec![1u8, 2, 3])),
    ])
}

#[test]
fn test_records_survive_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("repo.atrepo");
    let (keyring, key) = keyring_with(DID);

    let head = {
        let repo = Repository::new(FileStore::create(&path).unwrap(), keyring);
        for (i, rkey) in ["a", "b", "c"].iter().enumerate() {
            repo.create_record(DID, POSTS, Some(*rkey), &record(i as i64))
                .unwrap();
        }
        repo.delete_record(DID, POSTS, "b").unwrap();
        repo.flush().unwrap();
        repo.head(DID).unwrap().unwrap()
    };

    let (keyring, _) = keyring_with("did:example:other");
    keyring.insert(DID, key);
    let repo = Repository::new(FileStore::open(&path).unwrap(), keyring);

    assert_eq!(repo.head(DID).unwrap().unwrap(), head);
    assert_eq!(head.1.rev, 4);
    assert!(repo.get_record(DID, POSTS, "b").unwrap_err().is_not_found());

    let c = repo.get_record(DID, POSTS, "c").unwrap();
    assert_eq!(c.value, record(2));
    assert_eq!(c.cid, cid_of(&encode(&record(2)), BlockTag::Record));

    repo.verify_head(DID).unwrap();

    // Writes continue the chain after reopening
    let written = repo.put_record(DID, POSTS, "d", &record(3)).unwrap();
    assert_eq!(written.commit.rev, 5);
    assert_eq!(written.commit.prev, Some(head.0));
}

#[test]
fn test_every_commit_verifies() {
    let (keyring, key) = keyring_with(DID);
    let repo = Repository::new(atrepo::MemoryStore::new(), keyring);
    for i in 0..10 {
        repo.put_record(DID, POSTS, &format!("k{}", i), &record(i)).unwrap();
    }

    let vk = key.verifying_key();
    let log = repo.log(DID, None).unwrap();
    assert_eq!(log.len(), 10);
    for (cid, commit) in &log {
        assert_eq!(commit.cid(), *cid);
        assert!(crypto::verify(commit, &vk));
    }
}

#[test]
fn test_dids_are_independent() {
    let (keyring, _) = keyring_with(DID);
    keyring.generate("did:example:2").unwrap();
    let repo = Repository::new(atrepo::MemoryStore::new(), keyring);

    repo.put_record(DID, POSTS, "a", &record(1)).unwrap();
    repo.put_record(DID, POSTS, "b", &record(2)).unwrap();
    repo.put_record("did:example:2", POSTS, "a", &record(9)).unwrap();

    assert_eq!(repo.head(DID).unwrap().unwrap().1.rev, 2);
    assert_eq!(repo.head("did:example:2").unwrap().unwrap().1.rev, 1);
    assert_eq!(
        repo.get_record("did:example:2", POSTS, "a").unwrap().value,
        record(9)
    );
    assert!(repo
        .get_record("did:example:2", POSTS, "b")
        .unwrap_err()
        .is_not_found());
}

#[test]
fn test_stale_head_swap_is_rejected() {
    let (keyring, _) = keyring_with(DID);
    let repo = Repository::new(atrepo::MemoryStore::new(), keyring);
    let first = repo.put_record(DID, POSTS, "a", &record(1)).unwrap();
    let second = repo.put_record(DID, POSTS, "b", &record(2)).unwrap();

    // A writer that still believes `first` is current loses
    let err = repo
        .store()
        .swap_head(DID, Some(first.commit_cid), first.commit_cid)
        .unwrap_err();
    assert!(matches!(err, Error::Conflict(_)));
    assert_eq!(repo.store().head(DID), Some(second.commit_cid));
}

#[test]
fn test_concurrent_writers_on_file_store() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("repo.atrepo");
    let (keyring, _) = keyring_with(DID);
    keyring.generate("did:example:2").unwrap();
    let repo = Arc::new(Repository::new(FileStore::create(&path).unwrap(), keyring));

    let handles: Vec<_> = [DID, DID, "did:example:2", "did:example:2"]
        .into_iter()
        .enumerate()
        .map(|(t, did)| {
            let repo = Arc::clone(&repo);
            thread::spawn(move || {
                for i in 0..20 {
                    let rkey = format!("w{}-{:02}", t, i);
                    repo.create_record(did, POSTS, Some(&rkey), &record(i)).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for did in [DID, "did:example:2"] {
        assert_eq!(repo.head(did).unwrap().unwrap().1.rev, 40);
        assert_eq!(repo.list_records(did, POSTS).unwrap().len(), 40);
    }
    assert!(repo.store().block_count() > 80);
}
