//!
//! Secondary indices, `spec.md §4.3` / `original_source/IndexMeta.h` +
//! `Idx.cpp::addElement`.
//!
//! An index is a declared `Kind` plus an ordered list of `Item`s. Each
//! declared field of an object is encoded and concatenated into a
//! composite key; `Kind::Value` disambiguates duplicates by appending the
//! OID, `Kind::Unique` does not and instead rejects (silently keeps the
//! old entry) a clashing insert from a different OID.
//!

use crate::cell::{find_frames, find_slot, parse_entries, Cell, FrameWriter};
use crate::error::UdbError;
use ruc::*;
use udb_core::{Cursor, Engine, Store, TableId};
use unicode_normalization::char::decompose_canonical;

/// Persistent enum values — on-disk format, never renumber.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Kind {
    Value = 1,
    Unique = 2,
}

impl Kind {
    fn from_u8(v: u8) -> Result<Self> {
        match v {
            1 => Ok(Kind::Value),
            2 => Ok(Kind::Unique),
            _ => Err(eg!(UdbError::DatabaseMeta)),
        }
    }
}

/// Persistent enum values — on-disk format, never renumber.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Collation {
    None = 0,
    NfkdCanonicalBase = 1,
}

impl Collation {
    fn from_u8(v: u8) -> Result<Self> {
        match v {
            0 => Ok(Collation::None),
            1 => Ok(Collation::NfkdCanonicalBase),
            _ => Err(eg!(UdbError::DatabaseMeta)),
        }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct Item {
    pub atom: u32,
    pub nocase: bool,
    pub invert: bool,
    pub collation: Collation,
}

#[derive(Clone, Debug)]
pub struct IndexMeta {
    pub kind: Kind,
    pub items: Vec<Item>,
}

impl IndexMeta {
    pub fn encode(&self) -> Vec<u8> {
        let mut w = FrameWriter::new();
        w.slot("kind", &Cell::UInt8(self.kind as u8));
        for it in &self.items {
            w.begin_frame("item");
            w.slot("atom", &Cell::Atom(it.atom));
            w.slot("nc", &Cell::Bool(it.nocase));
            w.slot("inv", &Cell::Bool(it.invert));
            w.slot("coll", &Cell::UInt8(it.collation as u8));
            w.end_frame();
        }
        w.into_bytes()
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let entries = parse_entries(bytes).c(d!())?;
        let kind = match find_slot(&entries, "kind") {
            Some(Cell::UInt8(v)) => Kind::from_u8(*v)?,
            _ => return Err(eg!(UdbError::DatabaseMeta)),
        };
        let mut items = Vec::new();
        for body in find_frames(&entries, "item") {
            let atom = match find_slot(body, "atom") {
                Some(Cell::Atom(a)) => *a,
                _ => return Err(eg!(UdbError::DatabaseMeta)),
            };
            let nocase = matches!(find_slot(body, "nc"), Some(Cell::Bool(true)));
            let invert = matches!(find_slot(body, "inv"), Some(Cell::Bool(true)));
            let collation = match find_slot(body, "coll") {
                Some(Cell::UInt8(v)) => Collation::from_u8(*v)?,
                _ => Collation::None,
            };
            items.push(Item { atom, nocase, invert, collation });
        }
        Ok(IndexMeta { kind, items })
    }
}

/// Lower-case a string cell's bytes the way the declared cell variant does:
/// `Ascii` folds byte-wise (ASCII-only), `Latin1`/`String`/`Html` fold the
/// full decoded text (Unicode-aware) — the discrepancy is deliberate, see
/// `spec.md §9`.
fn fold_case(cell: &Cell, nocase: bool) -> String {
    match cell {
        Cell::Ascii(b) => {
            let s = String::from_utf8_lossy(b).into_owned();
            if nocase {
                s.chars().map(|c| c.to_ascii_lowercase()).collect()
            } else {
                s
            }
        }
        Cell::Latin1(b) => {
            let s: String = b.iter().map(|&c| c as char).collect();
            if nocase {
                s.to_lowercase()
            } else {
                s
            }
        }
        Cell::String(s) | Cell::Html(s) => {
            if nocase {
                s.to_lowercase()
            } else {
                s.clone()
            }
        }
        _ => String::new(),
    }
}

fn collate(s: &str, collation: Collation) -> Vec<u8> {
    match collation {
        Collation::None => s.as_bytes().to_vec(),
        Collation::NfkdCanonicalBase => {
            let mut out = String::new();
            for c in s.chars() {
                let mut first = None;
                let mut more_than_one = false;
                decompose_canonical(c, |d| {
                    if first.is_none() {
                        first = Some(d);
                    } else {
                        more_than_one = true;
                    }
                });
                match first {
                    None => out.push(c),
                    Some(base) if !more_than_one => out.push(base),
                    Some(_) => {
                        decompose_canonical(c, |d| out.push(d));
                    }
                }
            }
            out.into_bytes()
        }
    }
}

/// Encode one declared field per `Idx::addElement`: string cells get
/// case-folded and collated text retagged uniformly as `String`; every
/// other cell contributes its raw payload (no type tag of its own); the
/// whole thing is prefixed by the effective type tag and inverted if the
/// item demands descending order.
fn encode_field(item: &Item, cell: &Cell) -> Vec<u8> {
    let tag = cell.index_tag();
    let mut payload = match cell {
        Cell::Latin1(_) | Cell::Ascii(_) | Cell::String(_) | Cell::Html(_) => {
            let folded = fold_case(cell, item.nocase);
            collate(&folded, item.collation)
        }
        other => {
            let mut out = Vec::new();
            other.write_cell(true, &mut out);
            out
        }
    };
    if item.invert {
        for b in payload.iter_mut() {
            *b = !*b;
        }
    }
    let mut out = Vec::with_capacity(payload.len() + 1);
    out.push(tag);
    out.append(&mut payload);
    out
}

/// Build the composite key for one object's declared field values. `values`
/// must have the same length as `meta.items`, in the same order; a `None`
/// entry means the field is absent/null for this object.
///
/// Returns `None` when every declared field is null — such an object is not
/// entered into the index at all.
pub fn build_key(meta: &IndexMeta, values: &[Option<Cell>]) -> Option<Vec<u8>> {
    debug_assert_eq!(meta.items.len(), values.len());
    if values.iter().all(|v| v.is_none()) {
        return None;
    }
    let mut out = Vec::new();
    for (item, value) in meta.items.iter().zip(values) {
        let cell = value.clone().unwrap_or(Cell::Null);
        out.extend(encode_field(item, &cell));
    }
    Some(out)
}

/// `encode(atom)‖encode(idx_table) → encode(idx_table)` registration row
/// recorded once per declared item, so `find_indices_for_atom` can locate
/// every index touching a given attribute without scanning all of them.
pub fn atom_registration_key(atom: u32, idx_table: TableId) -> Vec<u8> {
    let mut k = Cell::Atom(atom).encode();
    k.extend(Cell::Int32(idx_table.0 as i32).encode());
    k
}

/// All index tables that declare `atom` as one of their fields.
pub fn find_indices_for_atom<E: Engine>(store: &Store<E>, idx_table: TableId, atom: u32) -> Vec<TableId> {
    let prefix = Cell::Atom(atom).encode();
    let mut cur = store.cursor(idx_table, false);
    let mut out = Vec::new();
    if !cur.move_to(&prefix, true).found_equal {
        return out;
    }
    loop {
        let Some(key) = cur.read_key() else { break };
        if !key.starts_with(&prefix) {
            break;
        }
        if let Some(rest) = key.get(prefix.len()..) {
            if let Ok((Cell::Int32(t), _)) = Cell::decode(rest) {
                out.push(TableId(t as u32 as u64));
            }
        }
        if !cur.move_next() {
            break;
        }
    }
    out
}

/// Insert (or, for `Unique`, conditionally replace) one object's entry.
/// Per `spec.md §4.3`: for `Kind::Value` the OID is appended to disambiguate
/// duplicates; for `Kind::Unique` a clashing key from a different OID is
/// silently ignored (the existing entry is left untouched).
pub fn add_element<E: Engine>(store: &Store<E>, table: TableId, meta: &IndexMeta, oid: u32, values: &[Option<Cell>]) -> Result<()> {
    let Some(base_key) = build_key(meta, values) else { return Ok(()) };
    match meta.kind {
        Kind::Value => {
            let mut key = base_key;
            key.extend(Cell::Oid(oid).encode());
            let mut cur = store.cursor(table, true);
            cur.insert(&key, &Cell::Oid(oid).encode());
        }
        Kind::Unique => {
            let mut cur = store.cursor(table, true);
            if cur.move_to(&base_key, false).found_equal {
                let existing = cur
                    .read_value()
                    .ok_or_else(|| eg!(UdbError::AccessRecord))?;
                let (Cell::Oid(existing_oid), _) = Cell::decode(&existing).c(d!())? else {
                    return Err(eg!(UdbError::AccessRecord));
                };
                if existing_oid != oid {
                    return Ok(());
                }
            }
            cur.insert(&base_key, &Cell::Oid(oid).encode());
        }
    }
    Ok(())
}

/// Remove one object's entry, mirroring `add_element`'s key construction.
pub fn remove_element<E: Engine>(store: &Store<E>, table: TableId, meta: &IndexMeta, oid: u32, values: &[Option<Cell>]) -> Result<()> {
    let Some(base_key) = build_key(meta, values) else { return Ok(()) };
    let mut cur = store.cursor(table, true);
    match meta.kind {
        Kind::Value => {
            let mut key = base_key;
            key.extend(Cell::Oid(oid).encode());
            if cur.move_to(&key, false).found_equal {
                cur.remove_at_cursor();
            }
        }
        Kind::Unique => {
            if cur.move_to(&base_key, false).found_equal {
                let existing = cur
                    .read_value()
                    .ok_or_else(|| eg!(UdbError::AccessRecord))?;
                let (Cell::Oid(existing_oid), _) = Cell::decode(&existing).c(d!())? else {
                    return Err(eg!(UdbError::AccessRecord));
                };
                if existing_oid == oid {
                    cur.remove_at_cursor();
                }
            }
        }
    }
    Ok(())
}

/// Recompute and re-insert every object's key, after a scan over the object
/// extent gives `(oid, values)` pairs. Used to (re)populate an index table
/// from scratch, e.g. after creation over pre-existing data.
pub fn rebuild_index<E: Engine>(store: &Store<E>, table: TableId, meta: &IndexMeta, objects: impl Iterator<Item = (u32, Vec<Option<Cell>>)>) -> Result<()> {
    store.clear_table(table).c(d!())?;
    for (oid, values) in objects {
        add_element(store, table, meta, oid, &values).c(d!())?;
    }
    Ok(())
}

/// A value-typed cursor over one index table, carrying the field-prefix the
/// caller last `seek`ed to so `next_key`/`prev_key` stay restricted to it.
pub struct Idx<'s, E: Engine> {
    cursor: Cursor<'s, E>,
    prefix: Vec<u8>,
}

impl<'s, E: Engine> Idx<'s, E> {
    pub fn new(store: &'s Store<E>, table: TableId) -> Self {
        Idx { cursor: store.cursor(table, false), prefix: Vec::new() }
    }

    /// Encode the given field values (a prefix of `meta.items`) and
    /// position on the smallest stored key with that prefix.
    pub fn seek(&mut self, meta: &IndexMeta, values: &[Cell]) -> bool {
        let mut key = Vec::new();
        for (item, cell) in meta.items.iter().zip(values) {
            key.extend(encode_field(item, cell));
        }
        self.prefix = key.clone();
        self.cursor.move_to(&key, true).found_equal
    }

    pub fn first_key(&mut self) -> bool {
        self.prefix.clear();
        self.cursor.move_first()
    }

    pub fn next_key(&mut self) -> bool {
        if !self.cursor.move_next() {
            return false;
        }
        self.within_prefix()
    }

    pub fn prev_key(&mut self) -> bool {
        if !self.cursor.move_prev() {
            return false;
        }
        self.within_prefix()
    }

    pub fn next(&mut self) -> bool {
        self.cursor.move_next()
    }

    pub fn prev(&mut self) -> bool {
        self.cursor.move_prev()
    }

    fn within_prefix(&self) -> bool {
        if self.prefix.is_empty() {
            return true;
        }
        match self.cursor.read_key() {
            Some(k) => k.starts_with(&self.prefix),
            None => false,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.cursor.is_valid()
    }

    pub fn get_oid(&self) -> Result<u32> {
        let raw = self.cursor.read_value().ok_or_else(|| eg!(UdbError::AccessRecord))?;
        let (cell, _) = Cell::decode(&raw).c(d!())?;
        match cell {
            Cell::Oid(oid) => Ok(oid),
            _ => Err(eg!(UdbError::AccessRecord)),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use udb_core::{RocksEngine, StoreConfig};

    fn open_store() -> Store<RocksEngine> {
        let path = format!("/tmp/udb_index_test_{}", rand::random::<u128>());
        Store::open(&StoreConfig::new(path)).unwrap()
    }

    fn meta() -> IndexMeta {
        IndexMeta {
            kind: Kind::Value,
            items: vec![Item { atom: 10, nocase: true, invert: false, collation: Collation::None }],
        }
    }

    #[test]
    fn meta_round_trips() {
        let m = IndexMeta {
            kind: Kind::Unique,
            items: vec![
                Item { atom: 1, nocase: false, invert: true, collation: Collation::NfkdCanonicalBase },
                Item { atom: 2, nocase: true, invert: false, collation: Collation::None },
            ],
        };
        let bytes = m.encode();
        let back = IndexMeta::decode(&bytes).unwrap();
        assert_eq!(back.kind, Kind::Unique);
        assert_eq!(back.items.len(), 2);
        assert_eq!(back.items[0].atom, 1);
        assert!(back.items[0].invert);
        assert_eq!(back.items[1].collation, Collation::None);
    }

    #[test]
    fn nocase_strings_sort_together_regardless_of_original_case() {
        let m = meta();
        let lower = build_key(&m, &[Some(Cell::String("abc".into()))]).unwrap();
        let upper = build_key(&m, &[Some(Cell::String("ABC".into()))]).unwrap();
        assert_eq!(lower, upper);
    }

    #[test]
    fn null_only_key_is_skipped() {
        let m = meta();
        assert!(build_key(&m, &[None]).is_none());
    }

    #[test]
    fn value_index_keeps_both_oids_unique_index_keeps_first() {
        let store = open_store();
        let table = store.create_table().unwrap();
        let m = meta();

        add_element(&store, table, &m, 1, &[Some(Cell::String("x".into()))]).unwrap();
        add_element(&store, table, &m, 2, &[Some(Cell::String("x".into()))]).unwrap();

        let mut idx = Idx::new(&store, table);
        assert!(idx.seek(&m, &[Cell::String("x".into())]));
        let mut oids = Vec::new();
        loop {
            oids.push(idx.get_oid().unwrap());
            if !idx.next_key() {
                break;
            }
        }
        assert_eq!(oids, vec![1, 2]);
    }

    #[test]
    fn unique_index_rejects_second_oid_for_same_key() {
        let store = open_store();
        let table = store.create_table().unwrap();
        let mut m = meta();
        m.kind = Kind::Unique;

        add_element(&store, table, &m, 1, &[Some(Cell::String("x".into()))]).unwrap();
        add_element(&store, table, &m, 2, &[Some(Cell::String("x".into()))]).unwrap();

        let mut idx = Idx::new(&store, table);
        assert!(idx.seek(&m, &[Cell::String("x".into())]));
        assert_eq!(idx.get_oid().unwrap(), 1);
    }

    #[test]
    fn find_indices_for_atom_locates_registered_tables() {
        let store = open_store();
        let idx_table = store.create_table().unwrap();
        let target = TableId(77);

        let mut cur = store.cursor(idx_table, true);
        let key = atom_registration_key(10, target);
        let value = Cell::Int32(target.0 as i32).encode();
        cur.insert(&key, &value);

        let found = find_indices_for_atom(&store, idx_table, 10);
        assert_eq!(found, vec![target]);
    }
}
