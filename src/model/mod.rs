//! Core data model types for atrepo

mod cid;
mod commit;
pub mod path;
mod tid;
mod value;

pub use cid::{BlockTag, Cid, CID_LEN};
pub use commit::{Commit, COMMIT_VERSION};
pub use path::RecordPath;
pub use tid::next_tid;
pub use value::Value;
