//!
//! `Directory` — bidirectional name↔atom interning, `spec.md §4.2`.
//!
//! Grounded on `original_source/Database.cpp`'s `getAtom`/`getAtomString`/
//! `presetAtom`: a `HashMap` bi-cache guarded by a lock (the teacher's own
//! `Mapx` wrappers are likewise plain maps behind `parking_lot`), backed by
//! three rows per atom in the DIR table (counter, name→atom, atom→name).
//!

use crate::cell::Cell;
use crate::error::UdbError;
use parking_lot::Mutex;
use ruc::*;
use std::collections::HashMap;
use udb_core::{Engine, Store, TableId};

pub const MIN_RESERVED_FIELD: u32 = 0xFFFF_FF80;

#[derive(Default)]
struct Cache {
    by_name: HashMap<Vec<u8>, u32>,
    by_atom: HashMap<u32, Vec<u8>>,
}

pub struct Directory<E: Engine> {
    table: TableId,
    cache: Mutex<Cache>,
    _marker: std::marker::PhantomData<E>,
}

impl<E: Engine> Directory<E> {
    pub fn new(table: TableId) -> Self {
        Directory {
            table,
            cache: Mutex::new(Cache::default()),
            _marker: std::marker::PhantomData,
        }
    }

    pub fn table(&self) -> TableId {
        self.table
    }

    /// Latin-1 `name` → atom. Allocates a new atom (bumping the counter at
    /// `encode(null)`) when `name` is unknown and `store` is writable;
    /// returns 0 (the null atom) when read-only and absent.
    pub fn intern(&self, store: &Store<E>, name: &[u8]) -> Result<u32> {
        {
            let cache = self.cache.lock();
            if let Some(a) = cache.by_name.get(name) {
                return Ok(*a);
            }
        }

        let name_key = Cell::Latin1(name.to_vec()).encode();
        let mut cur = store.cursor(self.table, false);
        if cur.move_to(&name_key, false).found_equal {
            let raw = cur.read_value().ok_or_else(|| eg!(UdbError::DirectoryFormat))?;
            let (atom, _) = Cell::decode(&raw).c(d!())?;
            let atom = as_atom(&atom)?;
            self.remember(name.to_vec(), atom);
            return Ok(atom);
        }
        drop(cur);

        let lock = store.write_lock();
        let null_key = Cell::Null.encode();
        let mut wcur = store.cursor(self.table, true);
        let next = if wcur.move_to(&null_key, false).found_equal {
            let raw = wcur.read_value().ok_or_else(|| eg!(UdbError::DirectoryFormat))?;
            let (v, _) = Cell::decode(&raw).c(d!())?;
            as_atom(&v)? + 1
        } else {
            1
        };
        let atom_cell = Cell::Atom(next).encode();
        wcur.insert(&null_key, &atom_cell);
        wcur.insert(&name_key, &atom_cell);
        let atom_key = Cell::Atom(next).encode();
        wcur.insert(&atom_key, &Cell::Latin1(name.to_vec()).encode());
        drop(wcur);
        lock.commit().c(d!())?;

        self.remember(name.to_vec(), next);
        Ok(next)
    }

    /// Atom → Latin-1 name, or empty when the atom is 0 or unknown.
    pub fn lookup_atom_string(&self, store: &Store<E>, atom: u32) -> Vec<u8> {
        if atom == 0 {
            return Vec::new();
        }
        {
            let cache = self.cache.lock();
            if let Some(name) = cache.by_atom.get(&atom) {
                return name.clone();
            }
        }
        let key = Cell::Atom(atom).encode();
        let mut cur = store.cursor(self.table, false);
        if cur.move_to(&key, false).found_equal {
            if let Some(v) = cur.read_value() {
                if let Ok((Cell::Latin1(name), _)) = Cell::decode(&v) {
                    self.remember(name.clone(), atom);
                    return name;
                }
            }
        }
        Vec::new()
    }

    /// Bind `name` to a fixed `atom`. Conflicts with a different existing
    /// binding fail with `DuplicateAtom`; if the counter is below `atom`,
    /// it is raised so future `intern` calls don't collide.
    pub fn preset(&self, store: &Store<E>, name: &[u8], atom: u32) -> Result<()> {
        {
            let cache = self.cache.lock();
            if let Some(existing) = cache.by_name.get(name) {
                if *existing != atom {
                    return Err(eg!(UdbError::DuplicateAtom));
                }
                return Ok(());
            }
        }

        let name_key = Cell::Latin1(name.to_vec()).encode();
        let atom_cell = Cell::Atom(atom).encode();

        let lock = store.write_lock();
        let mut cur = store.cursor(self.table, true);
        if cur.move_to(&name_key, false).found_equal {
            let stored = cur.read_value().ok_or_else(|| eg!(UdbError::DirectoryFormat))?;
            let (v, _) = Cell::decode(&stored).c(d!())?;
            if as_atom(&v)? != atom {
                lock.rollback();
                return Err(eg!(UdbError::DuplicateAtom));
            }
            lock.rollback();
            self.remember(name.to_vec(), atom);
            return Ok(());
        }

        let null_key = Cell::Null.encode();
        let bump = match cur.move_to(&null_key, false).found_equal {
            true => {
                let raw = cur.read_value().ok_or_else(|| eg!(UdbError::DirectoryFormat))?;
                let (v, _) = Cell::decode(&raw).c(d!())?;
                atom > as_atom(&v)?
            }
            false => true,
        };
        if bump {
            cur.insert(&null_key, &atom_cell);
        }
        cur.insert(&name_key, &atom_cell);
        let atom_key = Cell::Atom(atom).encode();
        cur.insert(&atom_key, &Cell::Latin1(name.to_vec()).encode());
        drop(cur);
        lock.commit().c(d!())?;

        self.remember(name.to_vec(), atom);
        Ok(())
    }

    fn remember(&self, name: Vec<u8>, atom: u32) {
        let mut cache = self.cache.lock();
        cache.by_atom.insert(atom, name.clone());
        cache.by_name.insert(name, atom);
    }
}

fn as_atom(c: &Cell) -> Result<u32> {
    match c {
        Cell::Atom(a) => Ok(*a),
        _ => Err(eg!(UdbError::DirectoryFormat)),
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use udb_core::{RocksEngine, StoreConfig};

    fn open_store() -> Store<RocksEngine> {
        let path = format!("/tmp/udb_directory_test_{}", rand::random::<u128>());
        Store::open(&StoreConfig::new(path)).unwrap()
    }

    #[test]
    fn intern_is_stable_and_round_trips() {
        let store = open_store();
        let table = store.create_table().unwrap();
        let dir = Directory::new(table);

        let a1 = dir.intern(&store, b"Name").unwrap();
        let a2 = dir.intern(&store, b"Name").unwrap();
        assert_eq!(a1, a2);
        assert_eq!(dir.lookup_atom_string(&store, a1), b"Name".to_vec());

        let a3 = dir.intern(&store, b"Birthday").unwrap();
        assert_ne!(a1, a3);
    }

    #[test]
    fn preset_binds_fixed_atom_and_detects_conflict() {
        let store = open_store();
        let table = store.create_table().unwrap();
        let dir = Directory::new(table);

        dir.preset(&store, b"FieldParent", 100).unwrap();
        assert_eq!(dir.intern(&store, b"FieldParent").unwrap(), 100);

        let err = dir.preset(&store, b"FieldParent", 101);
        assert!(err.is_err());
    }

    #[test]
    fn preset_raises_counter_so_intern_does_not_collide() {
        let store = open_store();
        let table = store.create_table().unwrap();
        let dir = Directory::new(table);

        dir.preset(&store, b"Reserved", 50).unwrap();
        let next = dir.intern(&store, b"Fresh").unwrap();
        assert!(next > 50);
    }
}
