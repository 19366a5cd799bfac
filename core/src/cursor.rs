//!
//! Cursor over one table of a `Store`.
//!
//! Per `spec.md §4.6`, value-typed iterators built on top of a cursor
//! re-open an engine cursor on each operation and re-seek to their current
//! key; `Cursor` itself follows the same pattern rather than holding a live
//! engine iterator across calls, so it survives interleaved cursor use on
//! the same table (the underlying store permits this).
//!

use crate::engine::{Engine, RawKey, RawValue, TableId};
use std::borrow::Cow;

/// The result of `Cursor::move_to`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MoveToResult {
    /// `true` if the cursor landed exactly on `key`.
    pub found_equal: bool,
    /// `true` if the cursor is positioned on *some* valid row (possibly
    /// past `key` when no exact match exists).
    pub on_valid_position: bool,
}

/// A cursor into one table. Writing cursors route mutations through the
/// `Store`'s currently open write transaction, if any.
pub struct Cursor<'s, E: Engine> {
    store: &'s crate::store::Store<E>,
    table: TableId,
    writing: bool,
    position: Option<RawKey>,
    valid: bool,
}

impl<'s, E: Engine> Cursor<'s, E> {
    pub(crate) fn new(store: &'s crate::store::Store<E>, table: TableId, writing: bool) -> Self {
        Cursor {
            store,
            table,
            writing,
            position: None,
            valid: false,
        }
    }

    pub fn is_writing(&self) -> bool {
        self.writing
    }

    #[inline]
    fn engine(&self) -> &E {
        self.store.engine()
    }

    pub fn move_first(&mut self) -> bool {
        match self.engine().iter(self.table).next() {
            Some((k, _)) => {
                self.position = Some(k);
                self.valid = true;
            }
            None => {
                self.position = None;
                self.valid = false;
            }
        }
        self.valid
    }

    pub fn move_last(&mut self) -> bool {
        match self.engine().iter(self.table).next_back() {
            Some((k, _)) => {
                self.position = Some(k);
                self.valid = true;
            }
            None => {
                self.position = None;
                self.valid = false;
            }
        }
        self.valid
    }

    pub fn move_next(&mut self) -> bool {
        let Some(cur) = self.position.clone() else {
            return self.move_first();
        };
        let bounds = (
            std::ops::Bound::Excluded(Cow::Owned(cur)),
            std::ops::Bound::Unbounded,
        );
        match self.engine().range(self.table, bounds).next() {
            Some((k, _)) => {
                self.position = Some(k);
                self.valid = true;
            }
            None => {
                self.valid = false;
            }
        }
        self.valid
    }

    pub fn move_prev(&mut self) -> bool {
        let Some(cur) = self.position.clone() else {
            return self.move_last();
        };
        let bounds = (
            std::ops::Bound::Unbounded,
            std::ops::Bound::Excluded(Cow::Owned(cur)),
        );
        match self.engine().range(self.table, bounds).next_back() {
            Some((k, _)) => {
                self.position = Some(k);
                self.valid = true;
            }
            None => {
                self.valid = false;
            }
        }
        self.valid
    }

    /// Position on the smallest stored key >= `key`. When `partial` is
    /// true, `found_equal` only asks whether the positioned key *starts
    /// with* `key` rather than equals it exactly — this is what powers
    /// prefix-restricted iteration (index probes, queue/map scans).
    pub fn move_to(&mut self, key: &[u8], partial: bool) -> MoveToResult {
        let bounds = (
            std::ops::Bound::Included(Cow::Borrowed(key)),
            std::ops::Bound::Unbounded,
        );
        match self.engine().range(self.table, bounds).next() {
            Some((k, _)) => {
                let found_equal = if partial {
                    k.starts_with(key)
                } else {
                    k == key
                };
                self.position = Some(k);
                self.valid = true;
                MoveToResult {
                    found_equal,
                    on_valid_position: true,
                }
            }
            None => {
                self.position = None;
                self.valid = false;
                MoveToResult {
                    found_equal: false,
                    on_valid_position: false,
                }
            }
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn read_key(&self) -> Option<RawKey> {
        if self.valid {
            self.position.clone()
        } else {
            None
        }
    }

    pub fn read_value(&self) -> Option<RawValue> {
        let k = self.position.as_ref()?;
        self.engine().get(self.table, k)
    }

    pub fn insert(&mut self, key: &[u8], value: &[u8]) {
        debug_assert!(self.writing, "insert on a read-only cursor");
        self.store.stage_put(self.table, key, value);
        self.position = Some(key.to_vec());
        self.valid = true;
    }

    pub fn remove_at_cursor(&mut self) {
        debug_assert!(self.writing, "remove on a read-only cursor");
        if let Some(k) = self.position.clone() {
            self.store.stage_delete(self.table, &k);
        }
    }
}
