//! # atrepo
//!
//! A content-addressed, signed record repository in the ATProto style.
//!
//! Records are canonically encoded and stored as blocks under their CID. Each
//! DID owns a Merkle search tree of its records, and every change to that tree
//! is published as a new commit signed with the DID's key.
//!
//! ## Core Concepts
//!
//! - **Blocks**: Immutable bytes addressed by the hash of their content
//! - **MST**: Ordered `collection/rkey` → record CID index with a
//!   deterministic shape
//! - **Commits**: Signed snapshots of a tree root, chained by `prev`
//! - **Heads**: One current commit per DID, moved by compare-and-swap
//!
//! ## Example
//!
//! ```ignore
//! use atrepo::{Keyring, MemoryStore, Repository, Value};
//!
//! let keyring = Keyring::new();
//! keyring.generate("did:example:alice")?;
//! let repo = Repository::new(MemoryStore::new(), keyring);
//!
//! let value = Value::map([("text", Value::from("hello"))]);
//! let written = repo.create_record("did:example:alice", "app.test.post", None, &value)?;
//! let record = repo.get_record("did:example:alice", "app.test.post", "...")?;
//! ```

pub mod codec;
pub mod config;
pub mod crypto;
pub mod model;
pub mod mst;
pub mod ops;
pub mod store;

mod error;
mod repository;

pub use config::Config;
pub use crypto::Keyring;
pub use error::{CodecError, CodecErrorKind, Error, Result};
pub use model::{BlockTag, Cid, Commit, RecordPath, Value};
pub use mst::Mst;
pub use ops::{Diff, DiffEntry};
pub use repository::{RecordView, Repository, WriteResult};
pub use store::{BlockStore, FileStore, HeadStore, MemoryStore};

/// Store file format version
pub const VERSION: u32 = 1;

/// Magic bytes for file identification
pub const MAGIC: &[u8; 8] = b"ATREPO\0\0";
