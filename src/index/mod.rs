//! In-memory index layer: ordered per-type index trees mapping byte-string
//! keys to record locations, and the sorted-set structure that gives zsets
//! their (score, member) ordering and O(log n) ranks.

pub mod skiplist;
pub mod tree;
pub mod zset;

pub use tree::{IndexNode, IndexTree};
pub use zset::SortedSet;
