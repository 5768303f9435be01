//! Git-like operations over stored trees: diff and history

mod diff;
mod log;

pub use diff::{diff_trees, Diff, DiffEntry};
pub use log::log;
