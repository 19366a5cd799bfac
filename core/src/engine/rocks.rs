//!
//! RocksDB-backed `Engine`. Grounded on `vsdb_core`'s `rocks_backend.rs`:
//! one physical database, tables distinguished by an 8-byte big-endian id
//! prefix, bounded iteration built from `ReadOptions` lower/upper bounds
//! plus `set_prefix_same_as_start`.
//!

use super::{Batch, Engine, RawKey, RawValue, StoreConfig, TABLE_ID_SIZE, TableId, TableIdBase};
use rocksdb::{
    BlockBasedOptions, Cache, DB, DBIterator, Direction, IteratorMode, Options, ReadOptions,
    SliceTransform, WriteBatch,
};
use ruc::*;
use std::{
    borrow::Cow,
    fs,
    ops::{Bound, RangeBounds},
    sync::atomic::{AtomicU64, Ordering},
};

// key of the table-id allocator inside the meta column of the same db.
const META_KEY_TABLE_ALLOCATOR: [u8; 1] = [u8::MIN];
const META_KEY_MAX_KEYLEN: [u8; 1] = [u8::MAX];
// table id 0 is reserved for the allocator/meta-word bookkeeping itself and
// is never handed out by `alloc_table_id`.
const FIRST_TABLE_ID: TableIdBase = 1;

#[inline(always)]
fn full_key(table: TableId, key: &[u8]) -> Vec<u8> {
    let prefix = table.to_bytes();
    let mut out = Vec::with_capacity(TABLE_ID_SIZE + key.len());
    out.extend_from_slice(&prefix);
    out.extend_from_slice(key);
    out
}

pub struct RocksEngine {
    // Leaked once at open() so that cursors/iterators can carry a `'static`
    // handle instead of borrowing `Store`'s lifetime; the process owns the
    // database for its whole life anyway. Mirrors `vsdb_core`'s
    // `Box::leak(Box::new(db))` for the same reason.
    db: &'static DB,
    table_counter: AtomicU64,
    max_keylen: AtomicU64,
}

impl RocksEngine {
    fn upper_bound(&self, table: TableId) -> Vec<u8> {
        let l = self.max_keylen.load(Ordering::Relaxed) as usize;
        let mut v = table.to_bytes().to_vec();
        v.resize(TABLE_ID_SIZE + l, u8::MAX);
        v
    }

    fn note_keylen(&self, len: usize) {
        let cur = self.max_keylen.load(Ordering::Relaxed);
        if len as u64 > cur {
            self.max_keylen.store(len as u64, Ordering::Relaxed);
        }
    }
}

impl Engine for RocksEngine {
    type Batch = RocksBatch;
    type Iter = RocksIter;

    fn open(cfg: &StoreConfig) -> Result<Self> {
        fs::create_dir_all(&cfg.path).c(d!())?;

        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_prefix_extractor(SliceTransform::create_fixed_prefix(TABLE_ID_SIZE));
        opts.set_allow_mmap_writes(true);
        opts.set_allow_mmap_reads(true);

        let cache = Cache::new_lru_cache(cfg.cache_size_bytes);
        let mut table_opts = BlockBasedOptions::default();
        table_opts.set_block_cache(&cache);
        table_opts.set_bloom_filter(10.0, false);
        table_opts.set_cache_index_and_filter_blocks(true);
        opts.set_block_based_table_factory(&table_opts);

        let db = if cfg.read_only {
            DB::open_for_read_only(&opts, &cfg.path, false).c(d!())?
        } else {
            DB::open(&opts, &cfg.path).c(d!())?
        };
        let db: &'static DB = Box::leak(Box::new(db));

        let table_id_key = full_key(TableId(0), &META_KEY_TABLE_ALLOCATOR);
        let next = match db.get(&table_id_key).c(d!())? {
            Some(v) => crate::parse_int!(v, TableIdBase),
            None => {
                db.put(&table_id_key, FIRST_TABLE_ID.to_be_bytes()).c(d!())?;
                FIRST_TABLE_ID
            }
        };

        let keylen_key = full_key(TableId(0), &META_KEY_MAX_KEYLEN);
        let max_keylen = match db.get(&keylen_key).c(d!())? {
            Some(v) => crate::parse_int!(v, u64),
            None => {
                db.put(&keylen_key, 0u64.to_be_bytes()).c(d!())?;
                0
            }
        };

        Ok(RocksEngine {
            db,
            table_counter: AtomicU64::new(next),
            max_keylen: AtomicU64::new(max_keylen),
        })
    }

    fn alloc_table_id(&self) -> Result<TableId> {
        let id = self.table_counter.fetch_add(1, Ordering::SeqCst);
        let key = full_key(TableId(0), &META_KEY_TABLE_ALLOCATOR);
        self.db
            .put(&key, (id + 1).to_be_bytes())
            .c(d!())?;
        Ok(TableId(id))
    }

    fn get(&self, table: TableId, key: &[u8]) -> Option<RawValue> {
        self.db.get(full_key(table, key)).unwrap()
    }

    fn iter(&self, table: TableId) -> RocksIter {
        let unbounded: (Bound<Cow<'static, [u8]>>, Bound<Cow<'static, [u8]>>) =
            (Bound::Unbounded, Bound::Unbounded);
        self.range(table, unbounded)
    }

    fn range<'a, R: RangeBounds<Cow<'a, [u8]>>>(&self, table: TableId, bounds: R) -> RocksIter {
        let prefix = table.to_bytes();

        let mut lo_full = prefix.to_vec();
        match bounds.start_bound() {
            Bound::Included(lo) => lo_full.extend_from_slice(lo),
            Bound::Excluded(lo) => {
                lo_full.extend_from_slice(lo);
                lo_full.push(0u8);
            }
            Bound::Unbounded => {}
        }

        let hi_bound_full: Bound<Vec<u8>> = match bounds.end_bound() {
            Bound::Included(hi) => {
                let mut v = prefix.to_vec();
                v.extend_from_slice(hi);
                Bound::Included(v)
            }
            Bound::Excluded(hi) => {
                let mut v = prefix.to_vec();
                v.extend_from_slice(hi);
                Bound::Excluded(v)
            }
            Bound::Unbounded => Bound::Unbounded,
        };
        let lo_bound_full: Bound<Vec<u8>> = match bounds.start_bound() {
            Bound::Included(lo) => {
                let mut v = prefix.to_vec();
                v.extend_from_slice(lo);
                Bound::Included(v)
            }
            Bound::Excluded(lo) => {
                let mut v = prefix.to_vec();
                v.extend_from_slice(lo);
                Bound::Excluded(v)
            }
            Bound::Unbounded => Bound::Unbounded,
        };

        let upper = self.upper_bound(table);

        let mut opt = ReadOptions::default();
        opt.set_prefix_same_as_start(true);
        opt.set_iterate_lower_bound(lo_full.clone());
        opt.set_iterate_upper_bound(upper.clone());
        let inner = self
            .db
            .iterator_opt(IteratorMode::From(&lo_full, Direction::Forward), opt);

        let rev_seek = match bounds.end_bound() {
            Bound::Included(hi) | Bound::Excluded(hi) => full_key(table, hi),
            Bound::Unbounded => upper.clone(),
        };
        let mut opt_rev = ReadOptions::default();
        opt_rev.set_prefix_same_as_start(true);
        opt_rev.set_iterate_lower_bound(lo_full.clone());
        opt_rev.set_iterate_upper_bound(upper);
        let inner_rev = self
            .db
            .iterator_opt(IteratorMode::From(&rev_seek, Direction::Reverse), opt_rev);

        RocksIter {
            inner,
            inner_rev,
            prefix,
            range: (lo_bound_full, hi_bound_full),
            fwd_done: false,
            rev_done: false,
            last_fwd: None,
            last_rev: None,
        }
    }

    fn put_now(&self, table: TableId, key: &[u8], value: &[u8]) -> Result<()> {
        self.note_keylen(key.len());
        self.db.put(full_key(table, key), value).c(d!())
    }

    fn delete_now(&self, table: TableId, key: &[u8]) -> Result<()> {
        self.db.delete(full_key(table, key)).c(d!())
    }

    fn clear_table(&self, table: TableId) -> Result<()> {
        let keys: Vec<RawKey> = self.iter(table).map(|(k, _)| k).collect();
        for k in keys {
            self.delete_now(table, &k).c(d!())?;
        }
        Ok(())
    }

    fn new_batch(&self) -> RocksBatch {
        RocksBatch {
            inner: WriteBatch::default(),
            max_key_len: 0,
        }
    }

    fn commit_batch(&self, batch: RocksBatch) -> Result<()> {
        self.db.write(batch.inner).c(d!())?;
        self.note_keylen(batch.max_key_len);
        Ok(())
    }

    fn flush(&self) {
        let _ = self.db.flush();
    }
}

pub struct RocksBatch {
    inner: WriteBatch,
    max_key_len: usize,
}

impl Batch for RocksBatch {
    fn put(&mut self, table: TableId, key: &[u8], value: &[u8]) {
        self.inner.put(full_key(table, key), value);
        self.max_key_len = self.max_key_len.max(key.len());
    }

    fn delete(&mut self, table: TableId, key: &[u8]) {
        self.inner.delete(full_key(table, key));
    }
}

pub struct RocksIter {
    inner: DBIterator<'static>,
    inner_rev: DBIterator<'static>,
    prefix: [u8; TABLE_ID_SIZE],
    range: (Bound<Vec<u8>>, Bound<Vec<u8>>),
    fwd_done: bool,
    rev_done: bool,
    last_fwd: Option<Vec<u8>>,
    last_rev: Option<Vec<u8>>,
}

impl RocksIter {
    fn in_upper(&self, k: &[u8]) -> bool {
        match &self.range.1 {
            Bound::Unbounded => true,
            Bound::Included(u) => k <= u.as_slice(),
            Bound::Excluded(u) => k < u.as_slice(),
        }
    }

    fn in_lower(&self, k: &[u8]) -> bool {
        match &self.range.0 {
            Bound::Unbounded => true,
            Bound::Included(l) => k >= l.as_slice(),
            Bound::Excluded(l) => k > l.as_slice(),
        }
    }
}

impl Iterator for RocksIter {
    type Item = (RawKey, RawValue);

    fn next(&mut self) -> Option<Self::Item> {
        if self.fwd_done {
            return None;
        }
        loop {
            let Some(kv) = self.inner.next() else {
                self.fwd_done = true;
                return None;
            };
            let (k, v) = kv.unwrap();
            if !k.as_ref().starts_with(&self.prefix) || !self.in_upper(k.as_ref()) {
                self.fwd_done = true;
                return None;
            }
            if !self.in_lower(k.as_ref()) {
                continue;
            }
            if let Some(rev) = &self.last_rev {
                if k.as_ref() >= rev.as_slice() {
                    self.fwd_done = true;
                    return None;
                }
            }
            self.last_fwd = Some(k.to_vec());
            let mut key = k.into_vec();
            key.drain(..TABLE_ID_SIZE);
            return Some((key, v.into_vec()));
        }
    }
}

impl DoubleEndedIterator for RocksIter {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.rev_done {
            return None;
        }
        loop {
            let Some(kv) = self.inner_rev.next() else {
                self.rev_done = true;
                return None;
            };
            let (k, v) = kv.unwrap();
            if !k.as_ref().starts_with(&self.prefix) || !self.in_lower(k.as_ref()) {
                self.rev_done = true;
                return None;
            }
            if !self.in_upper(k.as_ref()) {
                continue;
            }
            if let Some(fwd) = &self.last_fwd {
                if k.as_ref() <= fwd.as_slice() {
                    self.rev_done = true;
                    return None;
                }
            }
            self.last_rev = Some(k.to_vec());
            let mut key = k.into_vec();
            key.drain(..TABLE_ID_SIZE);
            return Some((key, v.into_vec()));
        }
    }
}
