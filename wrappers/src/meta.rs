//!
//! `Meta` — the persisted database header, `spec.md §6` "Persisted meta
//! record" / `original_source/BtreeMeta.cpp` + `Database::loadMeta`/
//! `saveMeta`.
//!
//! Table ids for OBJ/DIR/IDX/QUE/MAP/OIX are allocated lazily, the first
//! time each is needed, and persisted as a single framed slot stream under
//! key `encode(null)` in the META table so a reopened database recovers
//! them. The `dbFormat` slot pins the on-disk layout version; its absence
//! in a non-empty meta record is fatal.
//!

use crate::cell::{find_slot, parse_entries, Cell, Entry, FrameWriter};
use crate::error::UdbError;
use ruc::*;
use udb_core::{Engine, Store, TableId};
use uuid::Uuid;

/// `{6D20986B-36ED-4571-AD5E-26734CCFB542}`, the on-disk format marker.
pub const DB_FORMAT_UUID: Uuid = Uuid::from_u128(0x6D20986B_36ED_4571_AD5E_26734CCFB542);

#[derive(Clone, Copy, Debug, Default)]
pub struct TableIds {
    pub obj: Option<TableId>,
    pub dir: Option<TableId>,
    pub idx: Option<TableId>,
    pub que: Option<TableId>,
    pub map: Option<TableId>,
    pub oix: Option<TableId>,
}

pub struct Meta {
    table: TableId,
    ids: parking_lot::Mutex<TableIds>,
}

impl Meta {
    /// Load the header, if any, from `table` (already-allocated META
    /// table). A brand new database legitimately has an empty record.
    pub fn load<E: Engine>(store: &Store<E>, table: TableId) -> Result<Self> {
        let mut cur = store.cursor(table, false);
        let key = Cell::Null.encode();
        let ids = if cur.move_to(&key, false).found_equal {
            let bytes = cur.read_value().ok_or_else(|| eg!(UdbError::AccessMeta))?;
            let entries = parse_entries(&bytes).map_err(|_| eg!(UdbError::DatabaseMeta))?;
            decode_ids(&entries)?
        } else {
            TableIds::default()
        };
        Ok(Meta {
            table,
            ids: parking_lot::Mutex::new(ids),
        })
    }

    pub fn table(&self) -> TableId {
        self.table
    }

    pub fn ids(&self) -> TableIds {
        *self.ids.lock()
    }

    pub fn obj_table<E: Engine>(&self, store: &Store<E>) -> Result<TableId> {
        self.get_or_create(store, |ids| &mut ids.obj)
    }
    pub fn dir_table<E: Engine>(&self, store: &Store<E>) -> Result<TableId> {
        self.get_or_create(store, |ids| &mut ids.dir)
    }
    pub fn idx_table<E: Engine>(&self, store: &Store<E>) -> Result<TableId> {
        self.get_or_create(store, |ids| &mut ids.idx)
    }
    pub fn que_table<E: Engine>(&self, store: &Store<E>) -> Result<TableId> {
        self.get_or_create(store, |ids| &mut ids.que)
    }
    pub fn map_table<E: Engine>(&self, store: &Store<E>) -> Result<TableId> {
        self.get_or_create(store, |ids| &mut ids.map)
    }
    pub fn oix_table<E: Engine>(&self, store: &Store<E>) -> Result<TableId> {
        self.get_or_create(store, |ids| &mut ids.oix)
    }

    fn get_or_create<E: Engine>(
        &self,
        store: &Store<E>,
        field: impl Fn(&mut TableIds) -> &mut Option<TableId>,
    ) -> Result<TableId> {
        {
            let mut ids = self.ids.lock();
            if let Some(id) = *field(&mut ids) {
                return Ok(id);
            }
        }
        let id = store.create_table().map_err(|_| eg!(UdbError::CreateTable))?;
        {
            let mut ids = self.ids.lock();
            *field(&mut ids) = Some(id);
        }
        self.save(store).c(d!())?;
        Ok(id)
    }

    fn save<E: Engine>(&self, store: &Store<E>) -> Result<()> {
        let ids = *self.ids.lock();
        let mut w = FrameWriter::new();
        w.slot("objTable", &Cell::Int32(ids.obj.map(|t| t.0 as i32).unwrap_or(0)));
        w.slot("dirTable", &Cell::Int32(ids.dir.map(|t| t.0 as i32).unwrap_or(0)));
        w.slot("idxTable", &Cell::Int32(ids.idx.map(|t| t.0 as i32).unwrap_or(0)));
        w.slot("queTable", &Cell::Int32(ids.que.map(|t| t.0 as i32).unwrap_or(0)));
        w.slot("mapTable", &Cell::Int32(ids.map.map(|t| t.0 as i32).unwrap_or(0)));
        w.slot("oixTable", &Cell::Int32(ids.oix.map(|t| t.0 as i32).unwrap_or(0)));
        w.slot("dbFormat", &Cell::Uuid(DB_FORMAT_UUID));
        let bytes = w.into_bytes();

        let lock = store.write_lock();
        let mut cur = store.cursor(self.table, true);
        cur.insert(&Cell::Null.encode(), &bytes);
        drop(cur);
        lock.commit().map_err(|_| eg!(UdbError::CommitTrans))
    }
}

fn decode_ids(entries: &[Entry]) -> Result<TableIds> {
    match find_slot(entries, "dbFormat") {
        Some(Cell::Uuid(u)) if *u == DB_FORMAT_UUID => {}
        _ => return Err(eg!(UdbError::DatabaseFormat)),
    }
    let as_table = |name: &str| -> Option<TableId> {
        match find_slot(entries, name) {
            Some(Cell::Int32(0)) | None => None,
            Some(Cell::Int32(v)) => Some(TableId(*v as u32 as u64)),
            _ => None,
        }
    };
    Ok(TableIds {
        obj: as_table("objTable"),
        dir: as_table("dirTable"),
        idx: as_table("idxTable"),
        que: as_table("queTable"),
        map: as_table("mapTable"),
        oix: as_table("oixTable"),
    })
}

#[cfg(test)]
mod test {
    use super::*;
    use udb_core::{RocksEngine, StoreConfig};

    fn open_store() -> Store<RocksEngine> {
        let path = format!("/tmp/udb_meta_test_{}", rand::random::<u128>());
        Store::open(&StoreConfig::new(path)).unwrap()
    }

    #[test]
    fn table_ids_are_lazy_and_persist_across_reload() {
        let store = open_store();
        let meta_table = store.create_table().unwrap();
        let meta = Meta::load(&store, meta_table).unwrap();

        let obj = meta.obj_table(&store).unwrap();
        let dir = meta.dir_table(&store).unwrap();
        assert_ne!(obj, dir);
        assert_eq!(meta.obj_table(&store).unwrap(), obj);

        let reloaded = Meta::load(&store, meta_table).unwrap();
        assert_eq!(reloaded.obj_table(&store).unwrap(), obj);
        assert_eq!(reloaded.dir_table(&store).unwrap(), dir);
    }
}
