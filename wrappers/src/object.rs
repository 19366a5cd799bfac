//!
//! `Object` — a typed-attribute handle over one oid, `spec.md §4.5` /
//! `original_source/Obj.h`/`.cpp`.
//!
//! Deliberately not a polymorphic wrapper hierarchy (`spec.md §9` Design
//! Notes): `Object` is an oid plus a borrowed `Transaction`, every method a
//! thin call into `Transaction`'s buffered field/queue/map operations.
//!

use crate::cell::Cell;
use crate::error::UdbError;
use crate::notify::UpdateInfo;
use crate::txn::{IDENTITY_ATOM, Transaction};
use ruc::*;
use udb_core::Engine;
use uuid::Uuid;

/// The top 128 atom values are reserved for built-in object structure —
/// `original_source/Record.h`'s `ReservedFields`.
pub const MIN_RESERVED_FIELD: u32 = 0xFFFF_FF80;
pub const FIELD_PARENT: u32 = 0xFFFF_FF81;
pub const FIELD_PREV_OBJ: u32 = 0xFFFF_FF82;
pub const FIELD_NEXT_OBJ: u32 = 0xFFFF_FF83;
pub const FIELD_FIRST_OBJ: u32 = 0xFFFF_FF84;
pub const FIELD_LAST_OBJ: u32 = 0xFFFF_FF85;
pub const FIELD_TYPE: u32 = 0xFFFF_FF86;

pub struct Object<'t, 'd, E: Engine> {
    oid: u32,
    txn: &'t mut Transaction<'d, E>,
}

impl<'t, 'd, E: Engine> Object<'t, 'd, E> {
    pub fn new(oid: u32, txn: &'t mut Transaction<'d, E>) -> Self {
        Object { oid, txn }
    }

    pub fn oid(&self) -> u32 {
        self.oid
    }

    pub fn txn(&self) -> &Transaction<'d, E> {
        self.txn
    }

    // --- attributes --------------------------------------------------

    pub fn get_value(&self, atom: u32, force_old: bool) -> Result<Cell> {
        self.txn.get_field(self.oid, atom, force_old).c(d!())
    }

    pub fn has_value(&self, atom: u32) -> Result<bool> {
        Ok(!self.get_value(atom, false).c(d!())?.is_null())
    }

    pub fn set_value(&mut self, atom: u32, value: Cell) -> Result<()> {
        self.txn.set_field(self.oid, atom, value).c(d!())?;
        self.txn.post(UpdateInfo::value_changed(self.oid, atom));
        Ok(())
    }

    pub fn clear_value(&mut self, atom: u32) -> Result<()> {
        self.set_value(atom, Cell::Null)
    }

    pub fn inc_counter(&mut self, atom: u32) -> Result<u32> {
        let next = match self.get_value(atom, false).c(d!())? {
            Cell::UInt32(v) => v.wrapping_add(1),
            Cell::Null => 1,
            _ => return Err(eg!(UdbError::AccessRecord)),
        };
        self.set_value(atom, Cell::UInt32(next)).c(d!())?;
        Ok(next)
    }

    pub fn dec_counter(&mut self, atom: u32) -> Result<u32> {
        let next = match self.get_value(atom, false).c(d!())? {
            Cell::UInt32(v) => v.saturating_sub(1),
            Cell::Null => 0,
            _ => return Err(eg!(UdbError::AccessRecord)),
        };
        self.set_value(atom, Cell::UInt32(next)).c(d!())?;
        Ok(next)
    }

    pub fn used_fields(&self) -> Result<Vec<u32>> {
        self.txn.used_fields(self.oid).c(d!())
    }

    // --- identity ------------------------------------------------------

    pub fn uuid(&mut self, create: bool) -> Result<Option<Uuid>> {
        match self.txn.get_field(self.oid, IDENTITY_ATOM, false).c(d!())? {
            Cell::Uuid(u) => Ok(Some(u)),
            _ if create => {
                let u = Uuid::new_v4();
                self.txn.set_field(self.oid, IDENTITY_ATOM, Cell::Uuid(u)).c(d!())?;
                Ok(Some(u))
            }
            _ => Ok(None),
        }
    }

    pub fn get_type(&self) -> Result<u32> {
        match self.get_value(FIELD_TYPE, false).c(d!())? {
            Cell::Atom(a) => Ok(a),
            _ => Ok(0),
        }
    }

    pub fn set_type(&mut self, type_atom: u32) -> Result<()> {
        self.set_value(FIELD_TYPE, Cell::Atom(type_atom))
    }

    pub fn is_erased(&self) -> bool {
        self.txn.is_erased(self.oid)
    }

    // --- CRUD / aggregation --------------------------------------------

    /// `original_source/Obj.cpp::aggregateTo`. Always detaches first; a
    /// null `parent` leaves the object detached. `before`, if given, must
    /// already be a child of `parent`.
    pub fn aggregate_to(&mut self, parent: u32, before: Option<u32>) -> Result<()> {
        self.deaggregate_imp(true).c(d!())?;
        if parent == 0 {
            return Ok(());
        }
        if let Some(before) = before {
            let before_parent = self.get_id_field(before, FIELD_PARENT).c(d!())?;
            if before_parent != parent {
                return Err(eg!(UdbError::AccessRecord));
            }
            let before_prev = self.get_id_field(before, FIELD_PREV_OBJ).c(d!())?;
            self.set_raw(before, FIELD_PREV_OBJ, Cell::Oid(self.oid)).c(d!())?;
            self.set_raw(self.oid, FIELD_NEXT_OBJ, Cell::Oid(before)).c(d!())?;
            if before_prev == 0 {
                self.set_raw(parent, FIELD_FIRST_OBJ, Cell::Oid(self.oid)).c(d!())?;
            } else {
                self.set_raw(before_prev, FIELD_NEXT_OBJ, Cell::Oid(self.oid)).c(d!())?;
                self.set_raw(self.oid, FIELD_PREV_OBJ, Cell::Oid(before_prev)).c(d!())?;
            }
            self.set_raw(self.oid, FIELD_PARENT, Cell::Oid(parent)).c(d!())?;
            self.txn.post(UpdateInfo::aggregated(parent, self.oid, before));
        } else {
            let last = self.get_id_field(parent, FIELD_LAST_OBJ).c(d!())?;
            if last == 0 {
                self.set_raw(parent, FIELD_FIRST_OBJ, Cell::Oid(self.oid)).c(d!())?;
                self.set_raw(parent, FIELD_LAST_OBJ, Cell::Oid(self.oid)).c(d!())?;
            } else {
                self.set_raw(last, FIELD_NEXT_OBJ, Cell::Oid(self.oid)).c(d!())?;
                self.set_raw(self.oid, FIELD_PREV_OBJ, Cell::Oid(last)).c(d!())?;
                self.set_raw(parent, FIELD_LAST_OBJ, Cell::Oid(self.oid)).c(d!())?;
            }
            self.set_raw(self.oid, FIELD_PARENT, Cell::Oid(parent)).c(d!())?;
            self.txn.post(UpdateInfo::aggregated(parent, self.oid, 0));
        }
        Ok(())
    }

    pub fn deaggregate(&mut self) -> Result<()> {
        self.deaggregate_imp(true).map(|_| ())
    }

    /// Returns the old parent oid, or 0 if the object was already detached.
    fn deaggregate_imp(&mut self, notify: bool) -> Result<u32> {
        let parent = self.get_id_field(self.oid, FIELD_PARENT).c(d!())?;
        let prev = self.get_id_field(self.oid, FIELD_PREV_OBJ).c(d!())?;
        let next = self.get_id_field(self.oid, FIELD_NEXT_OBJ).c(d!())?;
        if parent != 0 {
            match (prev, next) {
                (0, 0) => {
                    self.set_raw(parent, FIELD_FIRST_OBJ, Cell::Null).c(d!())?;
                    self.set_raw(parent, FIELD_LAST_OBJ, Cell::Null).c(d!())?;
                }
                (0, _) => {
                    self.set_raw(parent, FIELD_FIRST_OBJ, Cell::Oid(next)).c(d!())?;
                    self.set_raw(next, FIELD_PREV_OBJ, Cell::Null).c(d!())?;
                }
                (_, 0) => {
                    self.set_raw(parent, FIELD_LAST_OBJ, Cell::Oid(prev)).c(d!())?;
                    self.set_raw(prev, FIELD_NEXT_OBJ, Cell::Null).c(d!())?;
                }
                (_, _) => {
                    self.set_raw(prev, FIELD_NEXT_OBJ, Cell::Oid(next)).c(d!())?;
                    self.set_raw(next, FIELD_PREV_OBJ, Cell::Oid(prev)).c(d!())?;
                }
            }
        }
        self.set_raw(self.oid, FIELD_PREV_OBJ, Cell::Null).c(d!())?;
        self.set_raw(self.oid, FIELD_NEXT_OBJ, Cell::Null).c(d!())?;
        self.set_raw(self.oid, FIELD_PARENT, Cell::Null).c(d!())?;
        if parent != 0 && notify {
            let type_atom = self.get_type().c(d!())?;
            self.txn.post(UpdateInfo::deaggregated(parent, self.oid, type_atom));
        }
        Ok(parent)
    }

    /// Recursively erase this object and every object aggregated under it,
    /// children first (`original_source/Obj.cpp::erase`: reads the sibling
    /// chain before recursing, since erasing a child invalidates it).
    pub fn erase(&mut self) -> Result<()> {
        if self.is_erased() {
            return Ok(());
        }
        let mut child = self.get_id_field(self.oid, FIELD_FIRST_OBJ).c(d!())?;
        while child != 0 {
            let next = self.get_id_field(child, FIELD_NEXT_OBJ).c(d!())?;
            Object::new(child, &mut *self.txn).erase().c(d!())?;
            child = next;
        }
        self.deaggregate_imp(true).c(d!())?;
        let type_atom = self.get_type().c(d!())?;
        self.txn.erase(self.oid).c(d!())?;
        self.txn.post(UpdateInfo::object_erased(self.oid, type_atom));
        Ok(())
    }

    pub fn get_parent(&self) -> Result<u32> {
        self.get_id_field(self.oid, FIELD_PARENT)
    }

    pub fn get_first_obj(&self) -> Result<u32> {
        self.get_id_field(self.oid, FIELD_FIRST_OBJ)
    }

    pub fn get_last_obj(&self) -> Result<u32> {
        self.get_id_field(self.oid, FIELD_LAST_OBJ)
    }

    pub fn get_next(&self) -> Result<u32> {
        self.get_id_field(self.oid, FIELD_NEXT_OBJ)
    }

    pub fn get_prev(&self) -> Result<u32> {
        self.get_id_field(self.oid, FIELD_PREV_OBJ)
    }

    /// Create a fresh object already aggregated under `self`.
    pub fn create_aggregate(&mut self, type_atom: u32, before: Option<u32>) -> Result<u32> {
        let child = self.txn.create().c(d!())?;
        let oid = self.oid;
        let mut child_obj = Object::new(child, &mut *self.txn);
        if type_atom != 0 {
            child_obj.set_type(type_atom).c(d!())?;
        }
        child_obj.aggregate_to(oid, before).c(d!())?;
        child_obj.txn.post(UpdateInfo::object_created(child, type_atom));
        Ok(child)
    }

    // --- queue -----------------------------------------------------------

    pub fn append_slot(&mut self, value: Cell) -> Result<u32> {
        let nr = match self.txn.read_stored_last_queue_nr(self.oid).c(d!())? {
            Some(n) => n + 1,
            None => 1,
        };
        self.txn.append_queue_slot(self.oid, nr, value).c(d!())?;
        self.txn.post(UpdateInfo::queue_added(nr, self.oid));
        Ok(nr)
    }

    // --- map / extended map ------------------------------------------------

    pub fn set_cell(&mut self, keys: &[Cell], value: Cell) -> Result<()> {
        let tail = crate::map::keys_tail(keys);
        self.txn.set_map_value(self.oid, tail, value).c(d!())?;
        self.txn.post(UpdateInfo::map_changed(self.oid, keys.to_vec()));
        Ok(())
    }

    pub fn set_oix_cell(&mut self, key: Vec<u8>, value: Cell) -> Result<()> {
        self.txn.set_oix_value(self.oid, key.clone(), value).c(d!())?;
        self.txn.post(UpdateInfo::oix_changed(self.oid, vec![Cell::Latin1(key)]));
        Ok(())
    }

    // --- helpers --------------------------------------------------------

    fn get_id_field(&self, oid: u32, atom: u32) -> Result<u32> {
        match self.txn.get_field(oid, atom, false).c(d!())? {
            Cell::Oid(o) => Ok(o),
            _ => Ok(0),
        }
    }

    fn set_raw(&mut self, oid: u32, atom: u32, value: Cell) -> Result<()> {
        self.txn.set_field(oid, atom, value).c(d!())
    }
}
