//!
//! `udb_core` — the page-level B-tree store underneath the object database.
//!
//! This crate knows nothing about objects, attributes, aggregation or
//! indices. It exposes an ordered byte-keyed multi-map split into named
//! tables, cursors over those tables, and nested write transactions. Every
//! higher-level concept lives in the `udb` crate.
//!

pub mod cursor;
pub mod engine;
pub mod store;

pub use cursor::Cursor;
pub use engine::{Engine, RocksEngine, TableId};
pub use store::{Store, StoreConfig, WriteLock};

/// Parse a big-endian integer out of a byte slice.
#[macro_export]
macro_rules! parse_int {
    ($bytes: expr, $ty: ty) => {{
        let array: [u8; std::mem::size_of::<$ty>()] = $bytes[..].try_into().unwrap();
        <$ty>::from_be_bytes(array)
    }};
}
