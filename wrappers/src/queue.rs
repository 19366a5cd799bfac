//!
//! `Qit` — a value-typed cursor over one object's queue slots,
//! `spec.md §4.6` / `original_source/Qit.h`.
//!
//! Slots are `encode(oid)‖encode(nr) → encode(value)` rows in the QUE
//! table; `nr` starts at 1 and is assigned by `Object::append_slot`.
//!

use crate::cell::Cell;
use crate::database::Database;
use crate::error::UdbError;
use crate::txn::obj_key;
use ruc::*;
use udb_core::Engine;

pub struct Qit<'d, E: Engine> {
    db: &'d Database<E>,
    oid: u32,
    nr: u32,
}

impl<'d, E: Engine> Qit<'d, E> {
    pub fn new(db: &'d Database<E>, oid: u32, nr: u32) -> Self {
        Qit { db, oid, nr }
    }

    pub fn oid(&self) -> u32 {
        self.oid
    }

    pub fn slot_nr(&self) -> u32 {
        self.nr
    }

    pub fn is_null(&self) -> bool {
        self.oid == 0
    }

    fn que_table(&self) -> Result<udb_core::TableId> {
        self.db.meta().que_table(self.db.store()).c(d!())
    }

    pub fn get_value(&self) -> Result<Cell> {
        let table = self.que_table().c(d!())?;
        let key = obj_key(self.oid, self.nr);
        let mut cur = self.db.store().cursor(table, false);
        if cur.move_to(&key, false).found_equal {
            if let Some(v) = cur.read_value() {
                return Ok(Cell::decode(&v).c(d!())?.0);
            }
        }
        Ok(Cell::Null)
    }

    pub fn set_value(&mut self, value: Cell) -> Result<()> {
        let table = self.que_table().c(d!())?;
        let key = obj_key(self.oid, self.nr);
        let mut cur = self.db.store().cursor(table, true);
        cur.insert(&key, &value.encode());
        Ok(())
    }

    pub fn erase(&mut self) -> Result<()> {
        let table = self.que_table().c(d!())?;
        let key = obj_key(self.oid, self.nr);
        let mut cur = self.db.store().cursor(table, true);
        if cur.move_to(&key, false).found_equal {
            cur.remove_at_cursor();
        }
        Ok(())
    }

    pub fn first(&mut self) -> Result<bool> {
        self.seek_edge(true)
    }

    pub fn last(&mut self) -> Result<bool> {
        self.seek_edge(false)
    }

    fn seek_edge(&mut self, first: bool) -> Result<bool> {
        let table = self.que_table().c(d!())?;
        let mut cur = self.db.store().cursor(table, false);
        let prefix = Cell::Oid(self.oid).encode();
        if !cur.move_to(&prefix, true).found_equal {
            return Ok(false);
        }
        if first {
            return self.read_nr_from(&cur);
        }
        let mut last = cur.read_key().ok_or_else(|| eg!(UdbError::AccessRecord))?;
        loop {
            if !cur.move_next() {
                break;
            }
            match cur.read_key() {
                Some(k) if k.starts_with(&prefix) => last = k,
                _ => break,
            }
        }
        cur.move_to(&last, false);
        self.read_nr_from(&cur)
    }

    fn read_nr_from(&mut self, cur: &udb_core::Cursor<'_, E>) -> Result<bool> {
        let Some(key) = cur.read_key() else { return Ok(false) };
        if let Ok((Cell::Atom(nr), _)) = Cell::decode(&key[Cell::Oid(self.oid).encode().len()..]) {
            self.nr = nr;
            return Ok(true);
        }
        Err(eg!(UdbError::AccessRecord))
    }

    pub fn next(&mut self) -> Result<bool> {
        let table = self.que_table().c(d!())?;
        let mut cur = self.db.store().cursor(table, false);
        let key = obj_key(self.oid, self.nr);
        if !cur.move_to(&key, false).found_equal || !cur.move_next() {
            return Ok(false);
        }
        let prefix = Cell::Oid(self.oid).encode();
        match cur.read_key() {
            Some(k) if k.starts_with(&prefix) => self.read_nr_from(&cur),
            _ => Ok(false),
        }
    }

    pub fn prev(&mut self) -> Result<bool> {
        let table = self.que_table().c(d!())?;
        let mut cur = self.db.store().cursor(table, false);
        let key = obj_key(self.oid, self.nr);
        if !cur.move_to(&key, false).found_equal || !cur.move_prev() {
            return Ok(false);
        }
        let prefix = Cell::Oid(self.oid).encode();
        match cur.read_key() {
            Some(k) if k.starts_with(&prefix) => self.read_nr_from(&cur),
            _ => Ok(false),
        }
    }
}
