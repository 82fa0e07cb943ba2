//! CinderDB is an embeddable, single-node, persistent key-value engine
//! offering string, list, hash, set and sorted-set commands over a
//! log-structured store.
//!
//! # Architecture
//!
//! ```text
//!        commands (strs / list / hash / sets / zset)
//!                          │
//!              ┌───────────┴───────────┐
//!              ▼                       ▼
//!     in-memory indexes          append-only log files
//!   (per-type trees, zset      (one active + archived
//!    skip list + dict)          segments per type)
//!              │                       │
//!              └────────┬──────────────┘
//!                       ▼
//!            discard accounting + compactor
//! ```
//!
//! Every write appends a checksummed record to its type's active segment
//! and points the in-memory index at it; overwritten and deleted records
//! feed per-segment dead-byte counters, and a background compactor rewrites
//! the survivors of mostly-dead segments before deleting them. On open, the
//! directory is exclusively locked and all segments are replayed to rebuild
//! the indexes.
//!
//! # Example
//!
//! ```no_run
//! use cinderdb::{Db, Options};
//!
//! #[tokio::main]
//! async fn main() -> cinderdb::Result<()> {
//!     let db = Db::open(Options::new("/tmp/cinderdb"))?;
//!     db.set(b"hello", b"world")?;
//!     assert_eq!(db.get(b"hello")?, b"world");
//!     db.close()?;
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod options;

mod db;
mod discard;
mod flock;
mod gc;
mod hash;
mod index;
mod ioselector;
mod list;
mod scheduler;
mod sets;
mod storage;
mod strs;
mod util;
mod zset;

pub use db::Db;
pub use error::{Error, Result};
pub use options::{IndexMode, IoType, Options};
