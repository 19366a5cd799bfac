//!
//! `Store` — the page-level B-tree store contract of `spec.md §4.1`.
//!

use crate::cursor::Cursor;
use crate::engine::{Batch, Engine, RawKey, RocksEngine, TableId};
pub use crate::engine::StoreConfig;
use parking_lot::{ReentrantMutex, ReentrantMutexGuard};
use ruc::*;
use std::cell::RefCell;

// Reserved slots inside table 0, distinct from the allocator ([0]) and
// max-keylen ([0xFF]) keys the `RocksEngine` itself bootstraps.
const META_TABLE_POINTER: [u8; 1] = [2];
const META_WORD_BASE: u8 = 0x10;

struct TxnState<E: Engine> {
    depth: usize,
    batch: Option<E::Batch>,
}

impl<E: Engine> TxnState<E> {
    fn new() -> Self {
        TxnState {
            depth: 0,
            batch: None,
        }
    }
}

/// The ordered, page-level B-tree store: named tables, cursors, nested
/// write transactions, one process-wide recursive mutex.
pub struct Store<E: Engine = RocksEngine> {
    engine: E,
    meta_table: TableId,
    mutex: ReentrantMutex<RefCell<TxnState<E>>>,
}

impl<E: Engine> Store<E> {
    pub fn open(cfg: &StoreConfig) -> Result<Self> {
        let engine = E::open(cfg).c(d!())?;

        let meta_table = match engine.get(TableId(0), &META_TABLE_POINTER) {
            Some(v) => {
                let bytes: [u8; crate::engine::TABLE_ID_SIZE] =
                    v.as_slice().try_into().c(d!())?;
                TableId::from_bytes(bytes)
            }
            None => {
                let t = engine.alloc_table_id().c(d!())?;
                engine
                    .put_now(TableId(0), &META_TABLE_POINTER, &t.to_bytes())
                    .c(d!())?;
                t
            }
        };

        Ok(Store {
            engine,
            meta_table,
            mutex: ReentrantMutex::new(RefCell::new(TxnState::new())),
        })
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn create_table(&self) -> Result<TableId> {
        self.engine.alloc_table_id().c(d!())
    }

    pub fn drop_table(&self, id: TableId) -> Result<()> {
        self.engine.clear_table(id).c(d!())
    }

    pub fn clear_table(&self, id: TableId) -> Result<()> {
        self.engine.clear_table(id).c(d!())
    }

    pub fn cursor(&self, table: TableId, writing: bool) -> Cursor<'_, E> {
        Cursor::new(self, table, writing)
    }

    /// `true` while a write transaction (of any nesting depth) is open on
    /// the calling thread.
    pub fn is_in_write_txn(&self) -> bool {
        let guard = self.mutex.lock();
        let st = guard.borrow();
        st.depth > 0
    }

    /// Open (or re-enter, if already open on this thread) a write
    /// transaction. Only the outermost `WriteLock` to finish touches the
    /// underlying engine.
    pub fn write_lock(&self) -> WriteLock<'_, E> {
        let guard = self.mutex.lock();
        {
            let mut st = guard.borrow_mut();
            st.depth += 1;
            if st.depth == 1 {
                st.batch = Some(self.engine.new_batch());
            }
        }
        WriteLock {
            store: self,
            guard: Some(guard),
            finished: false,
        }
    }

    pub(crate) fn stage_put(&self, table: TableId, key: &[u8], value: &[u8]) {
        let guard = self.mutex.lock();
        let mut st = guard.borrow_mut();
        match st.batch.as_mut() {
            Some(b) => b.put(table, key, value),
            None => {
                let _ = self.engine.put_now(table, key, value);
            }
        }
    }

    pub(crate) fn stage_delete(&self, table: TableId, key: &[u8]) {
        let guard = self.mutex.lock();
        let mut st = guard.borrow_mut();
        match st.batch.as_mut() {
            Some(b) => b.delete(table, key),
            None => {
                let _ = self.engine.delete_now(table, key);
            }
        }
    }

    /// Opaque integer bootstrap slot (format UUID, well-known table ids).
    pub fn get_meta_word(&self, slot: u8) -> Option<u64> {
        let key = [META_WORD_BASE.wrapping_add(slot)];
        self.engine
            .get(self.meta_table, &key)
            .map(|v| crate::parse_int!(v, u64))
    }

    pub fn set_meta_word(&self, slot: u8, value: u64) -> Result<()> {
        let key = [META_WORD_BASE.wrapping_add(slot)];
        self.engine
            .put_now(self.meta_table, &key, &value.to_be_bytes())
            .c(d!())
    }

    pub fn flush(&self) {
        self.engine.flush();
    }

    pub(crate) fn all_keys(&self, table: TableId) -> Vec<RawKey> {
        self.engine.iter(table).map(|(k, _)| k).collect()
    }
}

/// A scoped, possibly-nested write transaction. Dropping it without an
/// explicit `commit()` rolls back, matching `spec.md §5`'s "a Transaction
/// destructor rolls back if still active".
pub struct WriteLock<'s, E: Engine> {
    store: &'s Store<E>,
    guard: Option<ReentrantMutexGuard<'s, RefCell<TxnState<E>>>>,
    finished: bool,
}

impl<'s, E: Engine> WriteLock<'s, E> {
    pub fn commit(mut self) -> Result<()> {
        self.finish(true)
    }

    /// Abandon this write transaction and every transaction it is nested
    /// inside: depth resets to zero and the whole batch is discarded,
    /// unconditionally, regardless of how many `WriteLock`s are still on
    /// the stack above this one.
    pub fn rollback(&mut self) {
        let _ = self.finish(false);
    }

    fn finish(&mut self, commit: bool) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;
        let guard = self.guard.take().expect("WriteLock finished twice");

        let batch_to_apply = {
            let mut st = guard.borrow_mut();
            if !commit {
                st.depth = 0;
                st.batch = None;
                None
            } else if st.depth == 0 {
                // Some nested guard already rolled the whole thing back.
                None
            } else {
                st.depth -= 1;
                if st.depth == 0 {
                    st.batch.take()
                } else {
                    None
                }
            }
        };

        let result = match batch_to_apply {
            Some(batch) => self.store.engine.commit_batch(batch),
            None => Ok(()),
        };
        drop(guard);
        result
    }
}

impl<E: Engine> Drop for WriteLock<'_, E> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.finish(false);
        }
    }
}
