//!
//! `Extent` — iterate every oid ever written to the OBJ table,
//! `spec.md §4.6` / `original_source/Extent.cpp`.
//!
//! Distinct oids are recovered by scanning OBJ's `encode(oid)‖encode(atom)`
//! keys and skipping ahead past the current oid's whole run on `next`,
//! exactly as `Extent::next`'s `moveTo(oid, partial) + moveNext` does.
//!

use crate::cell::Cell;
use crate::database::Database;
use crate::txn::obj_key;
use ruc::*;
use udb_core::Engine;

pub struct Extent<'d, E: Engine> {
    db: &'d Database<E>,
    oid: u32,
}

impl<'d, E: Engine> Extent<'d, E> {
    pub fn new(db: &'d Database<E>) -> Self {
        Extent { db, oid: 0 }
    }

    pub fn oid(&self) -> u32 {
        self.oid
    }

    pub fn first(&mut self) -> Result<bool> {
        let table = self.db.meta().obj_table(self.db.store()).c(d!())?;
        let mut cur = self.db.store().cursor(table, false);
        if !cur.move_first() {
            return Ok(false);
        }
        loop {
            let Some(key) = cur.read_key() else { return Ok(false) };
            if let Ok((Cell::Oid(oid), _)) = Cell::decode(&key) {
                self.oid = oid;
                return Ok(true);
            }
            if !cur.move_next() {
                return Ok(false);
            }
        }
    }

    pub fn next(&mut self) -> Result<bool> {
        if self.oid == 0 {
            return Ok(false);
        }
        let table = self.db.meta().obj_table(self.db.store()).c(d!())?;
        let mut cur = self.db.store().cursor(table, false);
        let prefix = Cell::Oid(self.oid).encode();
        if !cur.move_to(&prefix, true).found_equal {
            return Ok(false);
        }
        while cur.move_next() {
            let Some(key) = cur.read_key() else { return Ok(false) };
            if let Ok((Cell::Oid(oid), _)) = Cell::decode(&key) {
                if oid != self.oid {
                    self.oid = oid;
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Every atom written for the current oid, for integrity scans that
    /// need the raw row set rather than a `Transaction`'s buffered view.
    pub fn stored_fields(&self) -> Result<Vec<u32>> {
        let table = self.db.meta().obj_table(self.db.store()).c(d!())?;
        let mut cur = self.db.store().cursor(table, false);
        let prefix = Cell::Oid(self.oid).encode();
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
}

/// Build the exact key `Extent`/`Transaction` use for one object field —
/// re-exported so integrity/index code shares one key scheme.
pub fn field_key(oid: u32, atom: u32) -> Vec<u8> {
    obj_key(oid, atom)
}
