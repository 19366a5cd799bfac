//!
//! `Mit`/`Xit` — value-typed cursors over the structured and extended
//! sparse maps, `spec.md §4.6` / `original_source/Mit.h`/`.cpp`.
//!
//! Like `Qit`, both only ever see rows already committed to the store:
//! `seek`/`first_key`/`next_key`/`prev_key` never observe a transaction's
//! buffered `set_cell`/`set_oix_cell` writes until commit. `Mit` keys are
//! `encode(oid)‖encode(k1)…encode(kn)`; `Xit` keys are `encode(oid)‖tail`
//! where `tail` is an opaque caller-supplied byte string, per `spec.md §3`'s
//! MAP/OIX table rows.
//!

use crate::cell::Cell;
use crate::database::Database;
use crate::error::UdbError;
use ruc::*;
use udb_core::{Engine, TableId};

/// The oid-less portion of a `Mit` key: every `KeyList` cell encoded and
/// concatenated, in order. `Transaction::set_map_value` buffers exactly
/// this (it prepends `encode(oid)` itself at commit).
pub(crate) fn keys_tail(keys: &[Cell]) -> Vec<u8> {
    let mut out = Vec::new();
    for c in keys {
        out.extend(c.encode());
    }
    out
}

pub(crate) fn map_key(oid: u32, keys: &[Cell]) -> Vec<u8> {
    let mut k = Cell::Oid(oid).encode();
    k.extend(keys_tail(keys));
    k
}

pub(crate) fn oix_key(oid: u32, tail: &[u8]) -> Vec<u8> {
    let mut k = Cell::Oid(oid).encode();
    k.extend_from_slice(tail);
    k
}

fn decode_map_key_tail(cur: &[u8]) -> Result<Vec<Cell>> {
    let (_, mut rest) = Cell::decode(cur).c(d!())?;
    let mut out = Vec::new();
    while !rest.is_empty() {
        let (c, r) = Cell::decode(rest).c(d!())?;
        out.push(c);
        rest = r;
    }
    Ok(out)
}

/// Cursor over one object's structured sparse map (`KeyList` → cell).
pub struct Mit<'d, E: Engine> {
    db: &'d Database<E>,
    oid: u32,
    key: Vec<u8>,
    cur: Vec<u8>,
}

impl<'d, E: Engine> Mit<'d, E> {
    pub fn new(db: &'d Database<E>, oid: u32) -> Self {
        Mit { db, oid, key: Vec::new(), cur: Vec::new() }
    }

    pub fn oid(&self) -> u32 {
        self.oid
    }

    pub fn is_null(&self) -> bool {
        self.oid == 0
    }

    fn check_null(&self) -> Result<()> {
        if self.oid == 0 {
            Err(eg!(UdbError::AccessRecord))
        } else {
            Ok(())
        }
    }

    fn map_table(&self) -> Result<TableId> {
        self.db.meta().map_table(self.db.store()).c(d!())
    }

    pub fn seek(&mut self, keys: &[Cell]) -> Result<bool> {
        self.check_null().c(d!())?;
        self.key = map_key(self.oid, keys);
        self.cur.clear();
        let table = self.map_table().c(d!())?;
        let mut cur = self.db.store().cursor(table, false);
        if cur.move_to(&self.key, true).found_equal {
            self.cur = cur.read_key().ok_or_else(|| eg!(UdbError::AccessRecord))?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn get_value(&self) -> Result<Cell> {
        if !self.cur.starts_with(&self.key) {
            return Ok(Cell::Null);
        }
        let table = self.map_table().c(d!())?;
        let mut cur = self.db.store().cursor(table, false);
        if cur.move_to(&self.cur, false).found_equal {
            if let Some(v) = cur.read_value() {
                return Ok(Cell::decode(&v).c(d!())?.0);
            }
        }
        Ok(Cell::Null)
    }

    pub fn get_key(&self) -> Result<Vec<Cell>> {
        if !self.cur.starts_with(&self.key) {
            return Ok(Vec::new());
        }
        decode_map_key_tail(&self.cur).c(d!())
    }

    pub fn first_key(&mut self) -> Result<bool> {
        self.check_null().c(d!())?;
        self.cur.clear();
        let table = self.map_table().c(d!())?;
        let mut cur = self.db.store().cursor(table, false);
        if cur.move_to(&self.key, true).found_equal {
            self.cur = cur.read_key().ok_or_else(|| eg!(UdbError::AccessRecord))?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn next_key(&mut self) -> Result<bool> {
        self.check_null().c(d!())?;
        let table = self.map_table().c(d!())?;
        let mut cur = self.db.store().cursor(table, false);
        cur.move_to(&self.cur, false);
        if cur.move_next() {
            let k = cur.read_key().ok_or_else(|| eg!(UdbError::AccessRecord))?;
            let matches = k.starts_with(&self.key);
            self.cur = k;
            Ok(matches)
        } else {
            Ok(false)
        }
    }

    pub fn prev_key(&mut self) -> Result<bool> {
        self.check_null().c(d!())?;
        let table = self.map_table().c(d!())?;
        let mut cur = self.db.store().cursor(table, false);
        cur.move_to(&self.cur, false);
        if cur.move_prev() {
            let k = cur.read_key().ok_or_else(|| eg!(UdbError::AccessRecord))?;
            let matches = k.starts_with(&self.key);
            self.cur = k;
            Ok(matches)
        } else {
            Ok(false)
        }
    }
}

/// Cursor over one object's extended (free-form byte key) sparse map.
pub struct Xit<'d, E: Engine> {
    db: &'d Database<E>,
    oid: u32,
    key: Vec<u8>,
    cur: Vec<u8>,
}

impl<'d, E: Engine> Xit<'d, E> {
    pub fn new(db: &'d Database<E>, oid: u32) -> Self {
        Xit { db, oid, key: Vec::new(), cur: Vec::new() }
    }

    pub fn oid(&self) -> u32 {
        self.oid
    }

    pub fn is_null(&self) -> bool {
        self.oid == 0
    }

    fn check_null(&self) -> Result<()> {
        if self.oid == 0 {
            Err(eg!(UdbError::AccessRecord))
        } else {
            Ok(())
        }
    }

    fn oix_table(&self) -> Result<TableId> {
        self.db.meta().oix_table(self.db.store()).c(d!())
    }

    pub fn seek(&mut self, key: &[u8]) -> Result<bool> {
        self.check_null().c(d!())?;
        self.key = oix_key(self.oid, key);
        self.cur.clear();
        let table = self.oix_table().c(d!())?;
        let mut cur = self.db.store().cursor(table, false);
        if cur.move_to(&self.key, true).found_equal {
            self.cur = cur.read_key().ok_or_else(|| eg!(UdbError::AccessRecord))?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn get_value(&self) -> Result<Cell> {
        if !self.cur.starts_with(&self.key) {
            return Ok(Cell::Null);
        }
        let table = self.oix_table().c(d!())?;
        let mut cur = self.db.store().cursor(table, false);
        if cur.move_to(&self.cur, false).found_equal {
            if let Some(v) = cur.read_value() {
                return Ok(Cell::decode(&v).c(d!())?.0);
            }
        }
        Ok(Cell::Null)
    }

    pub fn get_key(&self) -> Vec<u8> {
        if !self.cur.starts_with(&self.key) {
            return Vec::new();
        }
        let prefix_len = Cell::Oid(self.oid).encode().len();
        self.cur[prefix_len..].to_vec()
    }

    pub fn first_key(&mut self) -> Result<bool> {
        self.check_null().c(d!())?;
        self.cur.clear();
        let table = self.oix_table().c(d!())?;
        let mut cur = self.db.store().cursor(table, false);
        if cur.move_to(&self.key, true).found_equal {
            self.cur = cur.read_key().ok_or_else(|| eg!(UdbError::AccessRecord))?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn next_key(&mut self) -> Result<bool> {
        self.check_null().c(d!())?;
        let table = self.oix_table().c(d!())?;
        let mut cur = self.db.store().cursor(table, false);
        cur.move_to(&self.cur, false);
        if cur.move_next() {
            let k = cur.read_key().ok_or_else(|| eg!(UdbError::AccessRecord))?;
            let matches = k.starts_with(&self.key);
            self.cur = k;
            Ok(matches)
        } else {
            Ok(false)
        }
    }

    pub fn prev_key(&mut self) -> Result<bool> {
        self.check_null().c(d!())?;
        let table = self.oix_table().c(d!())?;
        let mut cur = self.db.store().cursor(table, false);
        cur.move_to(&self.cur, false);
        if cur.move_prev() {
            let k = cur.read_key().ok_or_else(|| eg!(UdbError::AccessRecord))?;
            let matches = k.starts_with(&self.key);
            self.cur = k;
            Ok(matches)
        } else {
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_key_is_prefix_safe_against_shorter_keylist() {
        let a = map_key(7, &[Cell::UInt32(1)]);
        let b = map_key(7, &[Cell::UInt32(1), Cell::UInt32(2)]);
        assert!(b.starts_with(&a));
        let c = map_key(7, &[Cell::UInt32(10)]);
        assert!(!c.starts_with(&a));
    }

    #[test]
    fn decode_map_key_tail_round_trips() {
        let keys = vec![Cell::UInt32(1), Cell::Ascii(b"x".to_vec())];
        let full = map_key(9, &keys);
        let decoded = decode_map_key_tail(&full).unwrap();
        assert_eq!(decoded, keys);
    }

    #[test]
    fn oix_key_appends_raw_tail_after_oid() {
        let k = oix_key(3, b"abc");
        assert!(k.starts_with(&Cell::Oid(3).encode()));
        assert!(k.ends_with(b"abc"));
    }
}
