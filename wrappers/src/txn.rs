//!
//! `Transaction` — buffered field/queue/map writes and the commit
//! protocol, `spec.md §4.4` / `original_source/Transaction.h`/`.cpp`.
//!
//! Every mutation is buffered in memory ((oid,atom)→new value, erase set,
//! queue/map/oix rows, pending notifications) until `commit`. Commit walks
//! `changes` in `(oid, atom)` key order exactly as `Transaction::commit`
//! does — this lets a single pass both finish one object's field writes
//! and notice the next object's delete marker without a second scan.
//!

use crate::cell::Cell;
use crate::database::Database;
use crate::error::UdbError;
use crate::notify::{Kind as NotifyKind, UpdateInfo};
use ruc::*;
use std::collections::{BTreeMap, BTreeSet};
use udb_core::Engine;
use uuid::Uuid;

/// Reserved atom marking an object's identity/UUID field, never a real
/// attribute — `original_source/Transaction.cpp`'s `atom==0` convention.
pub const IDENTITY_ATOM: u32 = 0;

pub struct Transaction<'d, E: Engine> {
    db: &'d Database<E>,
    txn_id: u64,
    changes: BTreeMap<(u32, u32), Cell>,
    erased: BTreeSet<u32>,
    queue: BTreeMap<(u32, u32), Cell>,
    map: BTreeMap<(u32, Vec<u8>), Cell>,
    oix: BTreeMap<(u32, Vec<u8>), Cell>,
    notify: Vec<UpdateInfo>,
    individual_notify: bool,
    finished: bool,
}

impl<'d, E: Engine> Transaction<'d, E> {
    pub fn new(db: &'d Database<E>) -> Self {
        Transaction {
            db,
            txn_id: db.alloc_txn_id(),
            changes: BTreeMap::new(),
            erased: BTreeSet::new(),
            queue: BTreeMap::new(),
            map: BTreeMap::new(),
            oix: BTreeMap::new(),
            notify: Vec::new(),
            individual_notify: false,
            finished: false,
        }
    }

    pub fn db(&self) -> &'d Database<E> {
        self.db
    }

    pub fn is_active(&self) -> bool {
        !self.changes.is_empty() || !self.notify.is_empty()
    }

    pub fn set_individual_notify(&mut self, on: bool) {
        self.individual_notify = on;
    }

    pub fn is_erased(&self, oid: u32) -> bool {
        self.erased.contains(&oid)
    }

    fn check_lock(&self, oid: u32) -> Result<()> {
        self.db.check_lock(oid, self.txn_id).c(d!())
    }

    /// Allocate a fresh oid and lock it for this transaction. No OBJ row is
    /// written until the caller sets at least one field.
    pub fn create(&mut self) -> Result<u32> {
        let oid = self.db.alloc_oid().c(d!())?;
        self.check_lock(oid).c(d!())?;
        Ok(oid)
    }

    pub fn set_field(&mut self, oid: u32, atom: u32, value: Cell) -> Result<()> {
        self.check_lock(oid).c(d!())?;
        if self.erased.contains(&oid) {
            return Err(eg!(UdbError::RecordDeleted(oid)));
        }
        self.changes.insert((oid, atom), value);
        Ok(())
    }

    /// Current value of `(oid, atom)`: the buffered change if any, unless
    /// `force_old` bypasses the buffer to see the last-committed value.
    pub fn get_field(&self, oid: u32, atom: u32, force_old: bool) -> Result<Cell> {
        if !force_old {
            if let Some(c) = self.changes.get(&(oid, atom)) {
                return Ok(c.clone());
            }
        }
        self.read_stored_field(oid, atom)
    }

    fn read_stored_field(&self, oid: u32, atom: u32) -> Result<Cell> {
        let table = self.db.meta().obj_table(self.db.store()).c(d!())?;
        let key = obj_key(oid, atom);
        let mut cur = self.db.store().cursor(table, false);
        if cur.move_to(&key, false).found_equal {
            if let Some(v) = cur.read_value() {
                let (cell, _) = Cell::decode(&v).c(d!())?;
                return Ok(cell);
            }
        }
        Ok(Cell::Null)
    }

    /// Highest queue slot number stored (committed or buffered) for `oid`,
    /// if any — lets `Object::append_slot` pick the next free number.
    pub fn read_stored_last_queue_nr(&self, oid: u32) -> Result<Option<u32>> {
        let mut best = self
            .queue
            .range((oid, 0)..(oid + 1, 0))
            .map(|((_, nr), _)| *nr)
            .max();
        let que_table = self.db.meta().que_table(self.db.store()).c(d!())?;
        let mut cur = self.db.store().cursor(que_table, false);
        let prefix = Cell::Oid(oid).encode();
        if cur.move_to(&prefix, true).found_equal {
            loop {
                let Some(key) = cur.read_key() else { break };
                if !key.starts_with(&prefix) {
                    break;
                }
                if let Ok((Cell::Atom(nr), _)) = Cell::decode(&key[prefix.len()..]) {
                    best = Some(best.map_or(nr, |b| b.max(nr)));
                }
                if !cur.move_next() {
                    break;
                }
            }
        }
        Ok(best)
    }

    /// Every atom with either a buffered or a stored value for `oid`.
    pub fn used_fields(&self, oid: u32) -> Result<Vec<u32>> {
        let mut out = BTreeSet::new();
        let table = self.db.meta().obj_table(self.db.store()).c(d!())?;
        let mut cur = self.db.store().cursor(table, false);
        let prefix = Cell::Oid(oid).encode();
        if cur.move_to(&prefix, true).found_equal {
            loop {
                let Some(key) = cur.read_key() else { break };
                if !key.starts_with(&prefix) {
                    break;
                }
                if let Ok((Cell::Atom(a), _)) = Cell::decode(&key[prefix.len()..]) {
                    if a != IDENTITY_ATOM {
                        out.insert(a);
                    }
                }
                if !cur.move_next() {
                    break;
                }
            }
        }
        for ((o, a), v) in self.changes.range((oid, 0)..(oid + 1, 0)) {
            if *o != oid || *a == IDENTITY_ATOM {
                continue;
            }
            if v.is_null() {
                out.remove(a);
            } else {
                out.insert(*a);
            }
        }
        Ok(out.into_iter().collect())
    }

    /// Locate an object by its bound UUID, checking buffered writes before
    /// falling back to the store's reverse `encode(uuid)→encode(oid)` row —
    /// `original_source/Transaction.cpp::getObject(const QUuid&)`.
    pub fn get_object_by_uuid(&self, uuid: Uuid) -> Result<u32> {
        for (&(oid, atom), cell) in self.changes.iter() {
            if atom == IDENTITY_ATOM {
                if let Cell::Uuid(u) = cell {
                    if *u == uuid {
                        return Ok(oid);
                    }
                }
            }
        }
        let obj_table = self.db.meta().obj_table(self.db.store()).c(d!())?;
        let key = Cell::Uuid(uuid).encode();
        let mut cur = self.db.store().cursor(obj_table, false);
        if cur.move_to(&key, false).found_equal {
            if let Some(v) = cur.read_value() {
                if let Ok((Cell::Oid(oid), _)) = Cell::decode(&v) {
                    return Ok(oid);
                }
            }
        }
        Ok(0)
    }

    /// `original_source/Transaction.cpp::getOrCreateObject`: find the object
    /// bound to `uuid`, or create a fresh one bound to it (and `type_atom`,
    /// if nonzero).
    pub fn get_or_create_object(&mut self, uuid: Uuid, type_atom: u32) -> Result<u32> {
        let existing = self.get_object_by_uuid(uuid).c(d!())?;
        if existing != 0 {
            return Ok(existing);
        }
        let oid = self.create().c(d!())?;
        self.set_field(oid, IDENTITY_ATOM, Cell::Uuid(uuid)).c(d!())?;
        if type_atom != 0 {
            self.set_field(oid, crate::object::FIELD_TYPE, Cell::Atom(type_atom)).c(d!())?;
        }
        self.post(UpdateInfo::object_created(oid, type_atom));
        Ok(oid)
    }

    pub fn erase(&mut self, oid: u32) -> Result<()> {
        self.check_lock(oid).c(d!())?;
        if self.erased.contains(&oid) {
            return Err(eg!(UdbError::RecordDeleted(oid)));
        }
        self.erased.insert(oid);
        self.changes.insert((oid, IDENTITY_ATOM), Cell::Null);
        Ok(())
    }

    pub fn append_queue_slot(&mut self, oid: u32, nr: u32, value: Cell) -> Result<()> {
        self.check_lock(oid).c(d!())?;
        self.queue.insert((oid, nr), value);
        Ok(())
    }

    pub fn set_map_value(&mut self, oid: u32, key: Vec<u8>, value: Cell) -> Result<()> {
        self.check_lock(oid).c(d!())?;
        self.map.insert((oid, key), value);
        Ok(())
    }

    pub fn set_oix_value(&mut self, oid: u32, key: Vec<u8>, value: Cell) -> Result<()> {
        self.check_lock(oid).c(d!())?;
        self.oix.insert((oid, key), value);
        Ok(())
    }

    pub fn post(&mut self, info: UpdateInfo) {
        if self.individual_notify {
            self.db.hub().post(&info);
        }
        self.notify.push(info);
    }

    /// Drain every field/queue/map/oix write into the store, maintain
    /// indices, and release this transaction's locks. Mirrors
    /// `Transaction::commit`'s single ordered pass.
    #[tracing::instrument(skip(self))]
    pub fn commit(mut self) -> Result<()> {
        self.db.hub().post(&UpdateInfo::lifecycle(NotifyKind::PreCommit));

        let lock = self.db.store().write_lock();
        let obj_table = self.db.meta().obj_table(self.db.store()).c(d!())?;

        let changes = std::mem::take(&mut self.changes);

        let mut oids: Vec<u32> = Vec::new();
        for &(oid, _) in changes.keys() {
            if oids.last() != Some(&oid) {
                oids.push(oid);
            }
        }

        for oid in oids {
            if self.erased.contains(&oid) {
                self.commit_erase(oid).c(d!())?;
                continue;
            }

            if let Some(cell) = changes.get(&(oid, IDENTITY_ATOM)) {
                if let Cell::Uuid(_) = cell {
                    let key = obj_key(oid, IDENTITY_ATOM);
                    let mut cur = self.db.store().cursor(obj_table, true);
                    cur.insert(&key, &cell.encode());
                    cur.insert(&cell.encode(), &Cell::Oid(oid).encode());
                }
            }

            let atom_cells: Vec<(u32, &Cell)> = changes
                .range((oid, 0)..(oid + 1, 0))
                .filter(|&(&(_, atom), _)| atom != IDENTITY_ATOM)
                .map(|(&(_, atom), cell)| (atom, cell))
                .collect();
            if atom_cells.is_empty() {
                continue;
            }

            // Every index touching at least one of this oid's changed atoms,
            // deduplicated by table — a multi-atom index gets exactly one
            // remove+add here even when several of its items change in the
            // same commit, instead of one stale pair per atom.
            let mut touched: Vec<(udb_core::TableId, crate::index::IndexMeta)> = Vec::new();
            for &(atom, _) in &atom_cells {
                for (table, meta) in self.db.indices_for_atom(atom).c(d!())? {
                    if !touched.iter().any(|(t, _)| *t == table) {
                        touched.push((table, meta));
                    }
                }
            }

            for (table, meta) in &touched {
                let before_values = read_index_values(self.db, meta, oid, None).c(d!())?;
                crate::index::remove_element(self.db.store(), *table, meta, oid, &before_values).c(d!())?;
            }

            for &(atom, cell) in &atom_cells {
                let key = obj_key(oid, atom);
                let mut cur = self.db.store().cursor(obj_table, true);
                if cell.is_null() {
                    if cur.move_to(&key, false).found_equal {
                        cur.remove_at_cursor();
                    }
                } else {
                    cur.insert(&key, &cell.encode());
                }
                drop(cur);
                self.notify.push(UpdateInfo::value_changed(oid, atom));
            }

            for (table, meta) in &touched {
                let after_values = read_index_values(self.db, meta, oid, Some(&changes)).c(d!())?;
                crate::index::add_element(self.db.store(), *table, meta, oid, &after_values).c(d!())?;
            }
        }

        let que_table = self.db.meta().que_table(self.db.store()).c(d!())?;
        for ((oid, nr), value) in std::mem::take(&mut self.queue) {
            let key = obj_key(oid, nr);
            let mut cur = self.db.store().cursor(que_table, true);
            cur.insert(&key, &value.encode());
            self.notify.push(UpdateInfo::queue_added(nr, oid));
        }

        let map_table = self.db.meta().map_table(self.db.store()).c(d!())?;
        for ((oid, k), value) in std::mem::take(&mut self.map) {
            let mut key = Cell::Oid(oid).encode();
            key.extend(k);
            let mut cur = self.db.store().cursor(map_table, true);
            cur.insert(&key, &value.encode());
            self.notify.push(UpdateInfo::map_changed(oid, Vec::new()));
        }

        let oix_table = self.db.meta().oix_table(self.db.store()).c(d!())?;
        for ((oid, k), value) in std::mem::take(&mut self.oix) {
            let mut key = Cell::Oid(oid).encode();
            key.extend(k);
            let mut cur = self.db.store().cursor(oix_table, true);
            cur.insert(&key, &value.encode());
            self.notify.push(UpdateInfo::oix_changed(oid, Vec::new()));
        }

        lock.commit().c(d!())?;
        self.finished = true;
        self.db.release_locks(self.txn_id);

        for info in self.notify.drain(..) {
            self.db.hub().post(&info);
        }
        self.db.hub().post(&UpdateInfo::lifecycle(NotifyKind::Commit));
        Ok(())
    }

    fn commit_erase(&mut self, oid: u32) -> Result<()> {
        let obj_table = self.db.meta().obj_table(self.db.store()).c(d!())?;
        let prefix = Cell::Oid(oid).encode();
        let mut atoms = Vec::new();
        {
            let mut cur = self.db.store().cursor(obj_table, false);
            if cur.move_to(&prefix, true).found_equal {
                loop {
                    let Some(key) = cur.read_key() else { break };
                    if !key.starts_with(&prefix) {
                        break;
                    }
                    if let Ok((Cell::Atom(a), _)) = Cell::decode(&key[prefix.len()..]) {
                        atoms.push(a);
                    }
                    if !cur.move_next() {
                        break;
                    }
                }
            }
        }
        let mut touched: Vec<(udb_core::TableId, crate::index::IndexMeta)> = Vec::new();
        for &atom in &atoms {
            if atom == IDENTITY_ATOM {
                continue;
            }
            for (table, meta) in self.db.indices_for_atom(atom).c(d!())? {
                if !touched.iter().any(|(t, _)| *t == table) {
                    touched.push((table, meta));
                }
            }
        }
        for (table, meta) in &touched {
            let values = read_index_values(self.db, meta, oid, None).c(d!())?;
            crate::index::remove_element(self.db.store(), *table, meta, oid, &values).c(d!())?;
        }
        let identity = self.read_stored_field(oid, IDENTITY_ATOM).c(d!())?;
        {
            let mut cur = self.db.store().cursor(obj_table, true);
            for atom in std::iter::once(IDENTITY_ATOM).chain(self.used_fields_ignoring_buffer(oid)?) {
                let key = obj_key(oid, atom);
                if cur.move_to(&key, false).found_equal {
                    cur.remove_at_cursor();
                }
            }
            if let Cell::Uuid(_) = identity {
                let key = identity.encode();
                if cur.move_to(&key, false).found_equal {
                    cur.remove_at_cursor();
                }
            }
        }

        let que_table = self.db.meta().que_table(self.db.store()).c(d!())?;
        purge_prefix(self.db.store(), que_table, &prefix).c(d!())?;
        let map_table = self.db.meta().map_table(self.db.store()).c(d!())?;
        purge_prefix(self.db.store(), map_table, &prefix).c(d!())?;
        let oix_table = self.db.meta().oix_table(self.db.store()).c(d!())?;
        purge_prefix(self.db.store(), oix_table, &prefix).c(d!())?;

        self.notify.push(UpdateInfo::object_erased(oid, 0));
        Ok(())
    }

    fn used_fields_ignoring_buffer(&self, oid: u32) -> Result<Vec<u32>> {
        let obj_table = self.db.meta().obj_table(self.db.store()).c(d!())?;
        let prefix = Cell::Oid(oid).encode();
        let mut cur = self.db.store().cursor(obj_table, false);
        let mut out = Vec::new();
        if cur.move_to(&prefix, true).found_equal {
            loop {
                let Some(key) = cur.read_key() else { break };
                if !key.starts_with(&prefix) {
                    break;
                }
                if let Ok((Cell::Atom(a), _)) = Cell::decode(&key[prefix.len()..]) {
                    out.push(a);
                }
                if !cur.move_next() {
                    break;
                }
            }
        }
        Ok(out)
    }

    pub fn rollback(mut self) {
        self.do_rollback();
    }

    fn do_rollback(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        self.db.hub().post(&UpdateInfo::lifecycle(NotifyKind::PreRollback));
        self.changes.clear();
        self.erased.clear();
        self.queue.clear();
        self.map.clear();
        self.oix.clear();
        self.notify.clear();
        self.db.release_locks(self.txn_id);
        self.db.hub().post(&UpdateInfo::lifecycle(NotifyKind::Rollback));
    }
}

impl<E: Engine> Drop for Transaction<'_, E> {
    fn drop(&mut self) {
        if !self.finished {
            self.do_rollback();
        }
    }
}

pub(crate) fn obj_key(oid: u32, atom: u32) -> Vec<u8> {
    let mut k = Cell::Oid(oid).encode();
    k.extend(Cell::Atom(atom).encode());
    k
}

/// Delete every row in `table` whose key starts with `prefix`. Used by
/// `commit_erase` to drop an oid's QUE/MAP/OIX rows; keys are collected
/// first since mutating a table while a cursor walks it is unsafe.
fn purge_prefix<E: Engine>(store: &udb_core::Store<E>, table: udb_core::TableId, prefix: &[u8]) -> Result<()> {
    let mut keys = Vec::new();
    {
        let mut cur = store.cursor(table, false);
        if cur.move_to(prefix, true).found_equal {
            loop {
                let Some(key) = cur.read_key() else { break };
                if !key.starts_with(prefix) {
                    break;
                }
                keys.push(key);
                if !cur.move_next() {
                    break;
                }
            }
        }
    }
    let mut cur = store.cursor(table, true);
    for key in keys {
        if cur.move_to(&key, false).found_equal {
            cur.remove_at_cursor();
        }
    }
    Ok(())
}

/// The field values an index's declared items need for `oid`. `buffered`,
/// when given, is consulted before the store for each item: the store's
/// cursor writes for this commit only land in the write batch applied at
/// `lock.commit()`, so any atom changed elsewhere in the same commit still
/// reads stale from the store until then. Pass `None` to force a pure
/// pre-commit read (removing the old entry, or erasing); pass the commit's
/// full `changes` map to compute the post-commit entry, so an index whose
/// items span two atoms written in the same transaction sees both new
/// values instead of mixing one new value with one stale one.
fn read_index_values<E: Engine>(
    db: &Database<E>,
    meta: &crate::index::IndexMeta,
    oid: u32,
    buffered: Option<&BTreeMap<(u32, u32), Cell>>,
) -> Result<Vec<Option<Cell>>> {
    let obj_table = db.meta().obj_table(db.store()).c(d!())?;
    let mut out = Vec::with_capacity(meta.items.len());
    for item in &meta.items {
        if let Some(cell) = buffered.and_then(|m| m.get(&(oid, item.atom))) {
            out.push(Some(cell.clone()).filter(|c| !c.is_null()));
            continue;
        }
        let key = obj_key(oid, item.atom);
        let mut cur = db.store().cursor(obj_table, false);
        let cell = if cur.move_to(&key, false).found_equal {
            cur.read_value().and_then(|v| Cell::decode(&v).ok().map(|(c, _)| c))
        } else {
            None
        };
        out.push(cell.filter(|c| !c.is_null()));
    }
    Ok(out)
}
