//!
//! `Database` — the top-level handle, `spec.md §4.4`/`§5` +
//! `original_source/Database.h`/`.cpp`.
//!
//! Owns the `Store`, the persisted `Meta` header, the `Directory` atom
//! cache, the database-wide per-OID lock table `Transaction::checkLock`
//! reads and writes, the oid counter, and an atom→index-table cache so
//! `add_to_index`/`remove_from_index` don't scan the IDX table on every
//! field write.
//!

use crate::directory::Directory;
use crate::error::UdbError;
use crate::index::IndexMeta;
use crate::meta::Meta;
use crate::notify::Hub;
use parking_lot::{Mutex, RwLock};
use ruc::*;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use udb_core::{Engine, RocksEngine, Store, StoreConfig, TableId};

/// Slot reserved in `Store`'s meta-word bank (`spec.md §4.1`) for the META
/// table id, the one piece of bootstrap state that has to exist before
/// `Meta::load` can even be called.
const META_WORD_META_TABLE: u8 = 0;
/// Slot holding the next-oid counter.
const META_WORD_OID_COUNTER: u8 = 1;

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub store: StoreConfig,
}

impl DatabaseConfig {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        DatabaseConfig { store: StoreConfig::new(path) }
    }
}

pub struct Database<E: Engine = RocksEngine> {
    store: Store<E>,
    meta: Meta,
    dir: Directory<E>,
    lock_table: Mutex<HashMap<u32, u64>>,
    next_txn_id: AtomicU64,
    oid_lock: Mutex<()>,
    hub: Hub,
    index_cache: RwLock<HashMap<u32, Vec<(TableId, IndexMeta)>>>,
}

impl<E: Engine> Database<E> {
    #[tracing::instrument(skip(cfg), fields(path = %cfg.store.path.display()))]
    pub fn open(cfg: &DatabaseConfig) -> Result<Self> {
        let store = Store::open(&cfg.store).c(d!())?;
        let meta_table = match store.get_meta_word(META_WORD_META_TABLE) {
            Some(v) => TableId(v),
            None => {
                let t = store.create_table().c(d!())?;
                store.set_meta_word(META_WORD_META_TABLE, t.0).c(d!())?;
                t
            }
        };
        let meta = Meta::load(&store, meta_table).c(d!())?;
        let dir_table = meta.dir_table(&store).c(d!())?;
        let dir = Directory::new(dir_table);
        tracing::info!("database opened");
        Ok(Database {
            store,
            meta,
            dir,
            lock_table: Mutex::new(HashMap::new()),
            next_txn_id: AtomicU64::new(1),
            oid_lock: Mutex::new(()),
            hub: Hub::new(),
            index_cache: RwLock::new(HashMap::new()),
        })
    }

    pub fn store(&self) -> &Store<E> {
        &self.store
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn directory(&self) -> &Directory<E> {
        &self.dir
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    pub fn atom(&self, name: &[u8]) -> Result<u32> {
        self.dir.intern(&self.store, name)
    }

    pub fn atom_string(&self, atom: u32) -> Vec<u8> {
        self.dir.lookup_atom_string(&self.store, atom)
    }

    pub fn alloc_txn_id(&self) -> u64 {
        self.next_txn_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn alloc_oid(&self) -> Result<u32> {
        let _guard = self.oid_lock.lock();
        let next = self.store.get_meta_word(META_WORD_OID_COUNTER).unwrap_or(0) + 1;
        if next > u32::MAX as u64 {
            return Err(eg!(UdbError::OidOutOfRange));
        }
        self.store.set_meta_word(META_WORD_OID_COUNTER, next).c(d!())?;
        Ok(next as u32)
    }

    /// Acquire `oid` for `txn_id`, failing if another transaction holds it.
    /// Re-entrant for the same `txn_id` (a transaction relocking its own
    /// object is a no-op), matching `Transaction::checkLock`.
    pub fn check_lock(&self, oid: u32, txn_id: u64) -> Result<()> {
        let mut table = self.lock_table.lock();
        match table.get(&oid) {
            Some(holder) if *holder != txn_id => Err(eg!(UdbError::RecordLocked(oid))),
            _ => {
                table.insert(oid, txn_id);
                Ok(())
            }
        }
    }

    /// Release every oid held by `txn_id`, at commit or rollback.
    pub fn release_locks(&self, txn_id: u64) {
        self.lock_table.lock().retain(|_, holder| *holder != txn_id);
    }

    /// Index tables registered against `atom`, consulting (and filling) the
    /// cache before falling back to `index::find_indices_for_atom`.
    pub fn indices_for_atom(&self, atom: u32) -> Result<Vec<(TableId, IndexMeta)>> {
        if let Some(v) = self.index_cache.read().get(&atom) {
            return Ok(v.clone());
        }
        let idx_table = self.meta.idx_table(&self.store).c(d!())?;
        let tables = crate::index::find_indices_for_atom(&self.store, idx_table, atom);
        let mut out = Vec::with_capacity(tables.len());
        for t in tables {
            let mut cur = self.store.cursor(idx_table, false);
            let key = crate::cell::Cell::Int32(t.0 as i32).encode();
            if cur.move_to(&key, false).found_equal {
                if let Some(bytes) = cur.read_value() {
                    let meta = IndexMeta::decode(&bytes).c(d!())?;
                    out.push((t, meta));
                }
            }
        }
        self.index_cache.write().insert(atom, out.clone());
        Ok(out)
    }

    pub fn invalidate_index_cache(&self) {
        self.index_cache.write().clear();
    }

    /// Declare a new secondary index: allocate its table and write all
    /// three IDX registry rows (`spec.md §3`: name→table, table→schema,
    /// atom→table per declared item). Errors `IndexExists` if `name` is
    /// already registered.
    pub fn create_index(&self, name: &[u8], meta: IndexMeta) -> Result<TableId> {
        let idx_table = self.meta.idx_table(&self.store).c(d!())?;
        let name_key = crate::cell::Cell::Latin1(name.to_vec()).encode();
        let mut cur = self.store.cursor(idx_table, true);
        if cur.move_to(&name_key, false).found_equal {
            return Err(eg!(UdbError::IndexExists));
        }
        drop(cur);

        let table = self.store.create_table().c(d!())?;
        let table_value = crate::cell::Cell::Int32(table.0 as i32).encode();

        let mut cur = self.store.cursor(idx_table, true);
        cur.insert(&name_key, &table_value);
        let schema_key = crate::cell::Cell::Int32(table.0 as i32).encode();
        cur.insert(&schema_key, &meta.encode());
        for item in &meta.items {
            let key = crate::index::atom_registration_key(item.atom, table);
            cur.insert(&key, &table_value);
        }
        drop(cur);

        self.invalidate_index_cache();
        Ok(table)
    }

    /// Look up a registered index's table id by name.
    pub fn find_index_by_name(&self, name: &[u8]) -> Result<Option<TableId>> {
        let idx_table = self.meta.idx_table(&self.store).c(d!())?;
        let name_key = crate::cell::Cell::Latin1(name.to_vec()).encode();
        let mut cur = self.store.cursor(idx_table, false);
        if cur.move_to(&name_key, false).found_equal {
            if let Some(v) = cur.read_value() {
                if let Ok((crate::cell::Cell::Int32(t), _)) = crate::cell::Cell::decode(&v) {
                    return Ok(Some(TableId(t as u32 as u64)));
                }
            }
        }
        Ok(None)
    }

    /// Remove a registered index by name: clear its table and every IDX
    /// registry row naming it (`spec.md §3`'s "removed by name" lifecycle).
    pub fn drop_index(&self, name: &[u8]) -> Result<()> {
        let idx_table = self.meta.idx_table(&self.store).c(d!())?;
        let Some(table) = self.find_index_by_name(name).c(d!())? else {
            return Ok(());
        };
        let schema_key = crate::cell::Cell::Int32(table.0 as i32).encode();
        let mut cur = self.store.cursor(idx_table, false);
        let meta = if cur.move_to(&schema_key, false).found_equal {
            cur.read_value().and_then(|v| IndexMeta::decode(&v).ok())
        } else {
            None
        };
        drop(cur);

        self.store.clear_table(table).c(d!())?;

        let name_key = crate::cell::Cell::Latin1(name.to_vec()).encode();
        let mut cur = self.store.cursor(idx_table, true);
        if cur.move_to(&name_key, false).found_equal {
            cur.remove_at_cursor();
        }
        if cur.move_to(&schema_key, false).found_equal {
            cur.remove_at_cursor();
        }
        if let Some(meta) = meta {
            for item in &meta.items {
                let key = crate::index::atom_registration_key(item.atom, table);
                if cur.move_to(&key, false).found_equal {
                    cur.remove_at_cursor();
                }
            }
        }
        drop(cur);

        self.store.drop_table(table).c(d!())?;
        self.invalidate_index_cache();
        Ok(())
    }

    pub fn flush(&self) {
        self.store.flush();
    }
}
