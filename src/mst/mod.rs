//! Merkle search tree over a repository's records
//!
//! This implements a content-addressed search tree where:
//! - Each key's layer comes from its hash, so the shape is a pure function
//!   of the key set and equal key sets always give equal root CIDs
//! - Each node's CID covers its children's CIDs
//! - Unchanged subtrees are shared between versions

mod node;
mod tree;
pub mod util;

pub use node::{Leaf, Node};
pub use tree::Mst;
pub use util::{layer_for_key, validate_key};
