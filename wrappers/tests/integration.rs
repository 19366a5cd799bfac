//! End-to-end scenarios over a real `Database<RocksEngine>`, one per
//! concrete walkthrough this crate's behavior is pinned against.

use std::sync::Mutex;

use udb::{
    Cell, Collation, Database, DatabaseConfig, Extent, Idx, IndexKind, IndexMeta, Item,
    NotifyKind, Object, Observer, Qit, Store, TableId, Transaction, UpdateInfo,
};

fn open_db() -> Database {
    let path = format!("/tmp/udb_integration_test_{}", rand::random::<u128>());
    Database::open(&DatabaseConfig::new(path)).unwrap()
}

/// True if `table` holds any row whose key starts with `encode(oid)`.
fn has_oid_rows(store: &Store, table: TableId, oid: u32) -> bool {
    let prefix = Cell::Oid(oid).encode();
    let mut cur = store.cursor(table, false);
    cur.move_to(&prefix, true).found_equal
}

struct Recorder(Mutex<Vec<UpdateInfo>>);

impl Recorder {
    fn new() -> Self {
        Recorder(Mutex::new(Vec::new()))
    }
    fn kinds(&self) -> Vec<NotifyKind> {
        self.0.lock().unwrap().iter().map(|i| i.kind).collect()
    }
}

impl Observer for Recorder {
    fn on_update(&self, info: &UpdateInfo) {
        self.0.lock().unwrap().push(info.clone());
    }
}

// --- Scenario 1: aggregation insert-middle ---------------------------------

#[test]
fn aggregate_to_before_moves_object_into_middle_of_chain() {
    let db = open_db();
    let recorder = std::sync::Arc::new(Recorder::new());
    db.hub().subscribe(Box::new(CloneForward(recorder.clone())));

    let (p, a, b, c) = {
        let mut txn = Transaction::new(&db);
        let p = txn.create().unwrap();
        let a = txn.create().unwrap();
        let b = txn.create().unwrap();
        let c = txn.create().unwrap();
        Object::new(a, &mut txn).aggregate_to(p, None).unwrap();
        Object::new(b, &mut txn).aggregate_to(p, None).unwrap();
        Object::new(c, &mut txn).aggregate_to(p, None).unwrap();
        txn.commit().unwrap();
        (p, a, b, c)
    };

    {
        let mut txn = Transaction::new(&db);
        Object::new(a, &mut txn).aggregate_to(p, Some(c)).unwrap();
        txn.commit().unwrap();
    }

    let mut txn = Transaction::new(&db);
    let first = Object::new(p, &mut txn).get_first_obj().unwrap();
    let last = Object::new(p, &mut txn).get_last_obj().unwrap();
    assert_eq!(first, b);
    assert_eq!(last, c);

    let mut chain = Vec::new();
    let mut cur = first;
    while cur != 0 {
        chain.push(cur);
        cur = Object::new(cur, &mut txn).get_next().unwrap();
    }
    assert_eq!(chain, vec![b, a, c]);

    let kinds = recorder.kinds();
    let deagg_pos = kinds.iter().position(|k| *k == NotifyKind::Deaggregated);
    let agg_pos = kinds.iter().rposition(|k| *k == NotifyKind::Aggregated);
    assert!(deagg_pos.is_some() && agg_pos.is_some());
    assert!(deagg_pos.unwrap() < agg_pos.unwrap());
}

/// `Hub::subscribe` needs `Box<dyn Observer>`, which can't itself be an
/// `Arc` (no blanket `Observer` impl for `Arc<T>`); this thin wrapper
/// forwards into the shared recorder so the test can inspect it afterwards.
struct CloneForward(std::sync::Arc<Recorder>);
impl Observer for CloneForward {
    fn on_update(&self, info: &UpdateInfo) {
        self.0.on_update(info);
    }
}

// --- Scenario 2: erase propagation ------------------------------------------

#[test]
fn erasing_parent_removes_every_descendant_and_its_rows() {
    let db = open_db();
    let name_atom = db.atom(b"Name").unwrap();
    let idx_table = db
        .create_index(
            b"by-name",
            IndexMeta {
                kind: IndexKind::Value,
                items: vec![Item { atom: name_atom, nocase: false, invert: false, collation: Collation::None }],
            },
        )
        .unwrap();

    let (p, a, a1, a2, b) = {
        let mut txn = Transaction::new(&db);
        let p = txn.create().unwrap();
        let a = txn.create().unwrap();
        let a1 = txn.create().unwrap();
        let a2 = txn.create().unwrap();
        let b = txn.create().unwrap();
        Object::new(a, &mut txn).aggregate_to(p, None).unwrap();
        Object::new(b, &mut txn).aggregate_to(p, None).unwrap();
        Object::new(a1, &mut txn).aggregate_to(a, None).unwrap();
        Object::new(a2, &mut txn).aggregate_to(a, None).unwrap();

        Object::new(a1, &mut txn).set_value(name_atom, Cell::String("a1".into())).unwrap();
        Object::new(a1, &mut txn).append_slot(Cell::UInt32(5)).unwrap();
        Object::new(a1, &mut txn).set_cell(&[Cell::String("k".into())], Cell::UInt32(9)).unwrap();
        Object::new(a1, &mut txn).set_oix_cell(b"oixkey".to_vec(), Cell::UInt32(3)).unwrap();
        txn.commit().unwrap();
        (p, a, a1, a2, b)
    };

    {
        let mut txn = Transaction::new(&db);
        Object::new(p, &mut txn).erase().unwrap();
        txn.commit().unwrap();
    }

    let mut seen = Vec::new();
    let mut ext = Extent::new(&db);
    if ext.first().unwrap() {
        loop {
            seen.push(ext.oid());
            if !ext.next().unwrap() {
                break;
            }
        }
    }
    for dead in [p, a, a1, a2, b] {
        assert!(!seen.contains(&dead), "oid {dead} should have been purged from the extent");
    }

    let que_table = db.meta().que_table(db.store()).unwrap();
    let map_table = db.meta().map_table(db.store()).unwrap();
    let oix_table = db.meta().oix_table(db.store()).unwrap();
    let obj_table = db.meta().obj_table(db.store()).unwrap();
    for dead in [p, a, a1, a2, b] {
        assert!(!has_oid_rows(db.store(), obj_table, dead));
        assert!(!has_oid_rows(db.store(), que_table, dead));
        assert!(!has_oid_rows(db.store(), map_table, dead));
        assert!(!has_oid_rows(db.store(), oix_table, dead));
    }

    let mut idx = Idx::new(db.store(), idx_table);
    assert!(!idx.seek(
        &IndexMeta {
            kind: IndexKind::Value,
            items: vec![Item { atom: name_atom, nocase: false, invert: false, collation: Collation::None }],
        },
        &[Cell::String("a1".into())]
    ));
}

// --- Scenario 3: index rebuild equality --------------------------------------

#[test]
fn rebuild_index_reproduces_the_same_entries() {
    let db = open_db();
    let name_atom = db.atom(b"Name").unwrap();
    let bday_atom = db.atom(b"Birthday").unwrap();
    let meta = IndexMeta {
        kind: IndexKind::Value,
        items: vec![
            Item { atom: name_atom, nocase: false, invert: false, collation: Collation::None },
            Item { atom: bday_atom, nocase: false, invert: false, collation: Collation::None },
        ],
    };
    let table = db.create_index(b"people", meta.clone()).unwrap();

    let people = [("Alice", "1990"), ("Bob", "1985"), ("Carol", "2001")];
    {
        let mut txn = Transaction::new(&db);
        for (name, bday) in people {
            let oid = txn.create().unwrap();
            Object::new(oid, &mut txn).set_value(name_atom, Cell::String(name.into())).unwrap();
            Object::new(oid, &mut txn).set_value(bday_atom, Cell::String(bday.into())).unwrap();
        }
        txn.commit().unwrap();
    }

    let before: Vec<(Vec<u8>, Vec<u8>)> = scan_table(db.store(), table);

    let mut objects: Vec<(u32, Vec<Option<Cell>>)> = Vec::new();
    {
        let txn = Transaction::new(&db);
        let mut ext = Extent::new(&db);
        if ext.first().unwrap() {
            loop {
                let oid = ext.oid();
                let values: Vec<Option<Cell>> = meta
                    .items
                    .iter()
                    .map(|it| {
                        let c = txn.get_field(oid, it.atom, true).unwrap();
                        if c.is_null() { None } else { Some(c) }
                    })
                    .collect();
                objects.push((oid, values));
                if !ext.next().unwrap() {
                    break;
                }
            }
        }
    }
    udb::index::rebuild_index(db.store(), table, &meta, objects.into_iter()).unwrap();

    let after: Vec<(Vec<u8>, Vec<u8>)> = scan_table(db.store(), table);
    assert_eq!(sorted(before), sorted(after));
}

fn scan_table(store: &Store, table: TableId) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut cur = store.cursor(table, false);
    let mut out = Vec::new();
    if !cur.move_first() {
        return out;
    }
    loop {
        let k = cur.read_key().unwrap();
        let v = cur.read_value().unwrap();
        out.push((k, v));
        if !cur.move_next() {
            break;
        }
    }
    out
}

fn sorted(mut v: Vec<(Vec<u8>, Vec<u8>)>) -> Vec<(Vec<u8>, Vec<u8>)> {
    v.sort();
    v
}

// --- Scenario 4: unique index conflict --------------------------------------

#[test]
fn unique_index_keeps_the_first_writer() {
    let db = open_db();
    let email_atom = db.atom(b"Email").unwrap();
    let meta = IndexMeta {
        kind: IndexKind::Unique,
        items: vec![Item { atom: email_atom, nocase: false, invert: false, collation: Collation::None }],
    };
    let table = db.create_index(b"by-email", meta.clone()).unwrap();

    let a = {
        let mut txn = Transaction::new(&db);
        let a = txn.create().unwrap();
        Object::new(a, &mut txn).set_value(email_atom, Cell::String("x".into())).unwrap();
        txn.commit().unwrap();
        a
    };
    {
        let mut txn = Transaction::new(&db);
        let b = txn.create().unwrap();
        Object::new(b, &mut txn).set_value(email_atom, Cell::String("x".into())).unwrap();
        txn.commit().unwrap();
    }

    let mut idx = Idx::new(db.store(), table);
    assert!(idx.seek(&meta, &[Cell::String("x".into())]));
    assert_eq!(idx.get_oid().unwrap(), a);
}

// --- Scenario 5: queue ordering with a gap ----------------------------------

#[test]
fn erasing_a_middle_slot_leaves_a_gap_but_keeps_the_counter_moving() {
    let db = open_db();
    let o = {
        let mut txn = Transaction::new(&db);
        let o = txn.create().unwrap();
        let n1 = Object::new(o, &mut txn).append_slot(Cell::UInt32(10)).unwrap();
        let n2 = Object::new(o, &mut txn).append_slot(Cell::UInt32(20)).unwrap();
        let n3 = Object::new(o, &mut txn).append_slot(Cell::UInt32(30)).unwrap();
        assert_eq!((n1, n2, n3), (1, 2, 3));
        txn.commit().unwrap();
        o
    };

    {
        let mut qit = Qit::new(&db, o, 2);
        qit.erase().unwrap();
    }

    let mut nrs = Vec::new();
    let mut qit = Qit::new(&db, o, 0);
    if qit.first().unwrap() {
        loop {
            nrs.push(qit.slot_nr());
            if !qit.next().unwrap() {
                break;
            }
        }
    }
    assert_eq!(nrs, vec![1, 3]);

    let mut last = Qit::new(&db, o, 0);
    assert!(last.last().unwrap());
    assert_eq!(last.slot_nr(), 3);

    let mut txn = Transaction::new(&db);
    let n4 = Object::new(o, &mut txn).append_slot(Cell::UInt32(40)).unwrap();
    assert_eq!(n4, 4);
}

// --- Scenario 6: cross-transaction lock -------------------------------------

#[test]
fn a_locked_object_rejects_a_second_writer_until_the_holder_commits() {
    let db = open_db();
    let atom = db.atom(b"Field").unwrap();

    let mut txn1 = Transaction::new(&db);
    let o = txn1.create().unwrap();
    Object::new(o, &mut txn1).set_value(atom, Cell::UInt32(1)).unwrap();

    let mut txn2 = Transaction::new(&db);
    let result = txn2.set_field(o, atom, Cell::UInt32(2));
    assert!(result.is_err());

    txn1.commit().unwrap();

    txn2.set_field(o, atom, Cell::UInt32(2)).unwrap();
    txn2.commit().unwrap();

    let mut txn3 = Transaction::new(&db);
    let v = Object::new(o, &mut txn3).get_value(atom, false).unwrap();
    assert_eq!(v, Cell::UInt32(2));
}
