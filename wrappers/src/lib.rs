//!
//! `udb` — an embedded, single-process object database layered on an
//! ordered B-tree page store (`udb_core`). Persistent, strongly identified
//! objects with typed attributes, parent/child aggregation chains, FIFO
//! queues, sparse maps, secondary indices, and a write-buffered transaction
//! model with observer notifications.
//!
//! Grounded throughout on `original_source/` (the `rochus-keller/Udb`
//! C++ library this crate's semantics were distilled from) — see
//! `DESIGN.md` at the workspace root for the module-by-module ledger.
//!

pub mod cell;
pub mod database;
pub mod directory;
pub mod error;
pub mod extent;
pub mod index;
pub mod integrity;
pub mod map;
pub mod meta;
pub mod notify;
pub mod object;
pub mod queue;
pub mod refs;
pub mod txn;

pub use cell::Cell;
pub use database::{Database, DatabaseConfig};
pub use directory::Directory;
pub use error::UdbError;
pub use extent::Extent;
pub use index::{Collation, Idx, IndexMeta, Item, Kind as IndexKind};
pub use map::{Mit, Xit};
pub use notify::{Hub, Kind as NotifyKind, Observer, UpdateInfo};
pub use object::Object;
pub use queue::Qit;
pub use txn::Transaction;

pub use udb_core::{Engine, RocksEngine, Store, StoreConfig, TableId};
