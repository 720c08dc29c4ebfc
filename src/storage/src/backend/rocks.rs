// Copyright 2025 RisingWave Labs
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The production backend: RocksDB with one column family per keyspace.
//!
//! Dictionary column families carry whole-key bloom filters for fast negative
//! lookups; triple-index column families carry an 8-byte fixed-prefix
//! extractor so bound-prefix scans seek instead of filtering. All data is
//! LZ4-compressed on disk. Scans are additionally clamped with an iterate
//! upper bound so they never touch keys outside the requested prefix.

use std::path::Path;
use std::sync::Arc;

use bytes::Bytes;
use rocksdb::{
    BlockBasedOptions, BoundColumnFamily, ColumnFamilyDescriptor, DBCompressionType,
    DBWithThreadMode, MultiThreaded, Options, ReadOptions, SliceTransform,
    SnapshotWithThreadMode, WriteBatchWithTransaction, WriteOptions,
};

use super::batched::{BatchedIter, ScanSource};
use super::{next_key, BatchOp, BoxedIter, Keyspace, KvEngine, KvRead, KvSnapshot, WriteBatch};
use crate::error::{StorageError, StorageResult};

type Db = DBWithThreadMode<MultiThreaded>;

const INDEX_KEY_PREFIX_LEN: usize = 8;

pub struct RocksEngine {
    db: Arc<Db>,
}

impl RocksEngine {
    /// Opens (and with `create_if_missing`, initialises) a database at
    /// `path`. All keyspaces are created eagerly so that column-family
    /// handles are an invariant, not a runtime question.
    pub fn open(path: &Path, create_if_missing: bool) -> StorageResult<Self> {
        if !create_if_missing && !path.join("CURRENT").exists() {
            return Err(StorageError::DatabaseNotFound(path.to_path_buf()));
        }
        let mut db_opts = Options::default();
        db_opts.create_if_missing(create_if_missing);
        db_opts.create_missing_column_families(true);
        let descriptors = Keyspace::ALL
            .iter()
            .map(|cf| ColumnFamilyDescriptor::new(cf.cf_name(), cf_options(*cf)));
        let db = Db::open_cf_descriptors(&db_opts, path, descriptors)?;
        Ok(Self { db: Arc::new(db) })
    }

    fn cf(&self, cf: Keyspace) -> Arc<BoundColumnFamily<'_>> {
        handle(&self.db, cf)
    }
}

fn handle(db: &Db, cf: Keyspace) -> Arc<BoundColumnFamily<'_>> {
    // Every keyspace is opened in `open`, so a missing handle is a bug, not
    // a runtime condition.
    db.cf_handle(cf.cf_name())
        .expect("column family opened at startup")
}

fn cf_options(cf: Keyspace) -> Options {
    let mut opts = Options::default();
    opts.set_compression_type(DBCompressionType::Lz4);
    let mut block = BlockBasedOptions::default();
    if cf.is_dictionary() {
        block.set_bloom_filter(10.0, false);
    }
    if cf.is_triple_index() {
        opts.set_prefix_extractor(SliceTransform::create_fixed_prefix(INDEX_KEY_PREFIX_LEN));
        opts.set_memtable_prefix_bloom_ratio(0.02);
        block.set_bloom_filter(10.0, false);
    }
    opts.set_block_based_table_factory(&block);
    opts
}

fn read_options(upper: &Option<Vec<u8>>) -> ReadOptions {
    let mut read_opts = ReadOptions::default();
    if let Some(end) = upper {
        read_opts.set_iterate_upper_bound(end.clone());
    }
    // Scans may cross extractor prefixes (full scans, skip-to-next-distinct
    // seeks), so order matters more than the prefix bloom here.
    read_opts.set_total_order_seek(true);
    read_opts
}

fn drain_raw_iter(
    mut iter: rocksdb::DBRawIteratorWithThreadMode<'_, Db>,
    from: &[u8],
    exclusive: bool,
    limit: usize,
) -> StorageResult<Vec<(Bytes, Bytes)>> {
    iter.seek(from);
    if exclusive && iter.valid() && iter.key() == Some(from) {
        iter.next();
    }
    let mut out = Vec::with_capacity(limit.min(64));
    while out.len() < limit && iter.valid() {
        let (Some(key), Some(value)) = (iter.key(), iter.value()) else {
            break;
        };
        out.push((Bytes::copy_from_slice(key), Bytes::copy_from_slice(value)));
        iter.next();
    }
    iter.status()?;
    Ok(out)
}

fn bounded(prefix: &[u8]) -> Option<Vec<u8>> {
    Some(next_key(prefix)).filter(|end| !end.is_empty())
}

struct EngineSource {
    db: Arc<Db>,
    cf: Keyspace,
    upper: Option<Vec<u8>>,
}

impl ScanSource for EngineSource {
    fn scan(
        &self,
        from: &[u8],
        exclusive: bool,
        limit: usize,
    ) -> StorageResult<Vec<(Bytes, Bytes)>> {
        let cf = handle(&self.db, self.cf);
        let iter = self.db.raw_iterator_cf_opt(&cf, read_options(&self.upper));
        drain_raw_iter(iter, from, exclusive, limit)
    }
}

impl KvRead for RocksEngine {
    fn get(&self, cf: Keyspace, key: &[u8]) -> StorageResult<Option<Bytes>> {
        Ok(self.db.get_cf(&self.cf(cf), key)?.map(Bytes::from))
    }

    fn prefix_iter(&self, cf: Keyspace, prefix: &[u8]) -> StorageResult<BoxedIter> {
        let source = EngineSource {
            db: self.db.clone(),
            cf,
            upper: bounded(prefix),
        };
        Ok(Box::new(BatchedIter::new(source, prefix.to_vec())))
    }

    fn iter_from(&self, cf: Keyspace, start: &[u8]) -> StorageResult<BoxedIter> {
        let source = EngineSource {
            db: self.db.clone(),
            cf,
            upper: None,
        };
        Ok(Box::new(BatchedIter::new(source, start.to_vec())))
    }
}

impl KvEngine for RocksEngine {
    fn put(&self, cf: Keyspace, key: &[u8], value: &[u8]) -> StorageResult<()> {
        self.db.put_cf(&self.cf(cf), key, value)?;
        Ok(())
    }

    fn delete(&self, cf: Keyspace, key: &[u8]) -> StorageResult<()> {
        self.db.delete_cf(&self.cf(cf), key)?;
        Ok(())
    }

    fn write_batch(&self, batch: WriteBatch, sync: bool) -> StorageResult<()> {
        let mut inner = WriteBatchWithTransaction::<false>::default();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { cf, key, value } => {
                    inner.put_cf(&self.cf(cf), key, value);
                }
                BatchOp::Delete { cf, key } => {
                    inner.delete_cf(&self.cf(cf), key);
                }
            }
        }
        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(sync);
        self.db.write_opt(inner, &write_opts)?;
        Ok(())
    }

    fn snapshot(&self) -> StorageResult<Box<dyn KvSnapshot>> {
        Ok(Box::new(RocksSnapshot::new(self.db.clone())))
    }

    fn flush_wal(&self, sync: bool) -> StorageResult<()> {
        self.db.flush_wal(sync)?;
        Ok(())
    }
}

struct SnapshotInner {
    // Declared before `db` so the snapshot is dropped (and unpinned in
    // RocksDB) while the database handle is still alive.
    snap: SnapshotWithThreadMode<'static, Db>,
    db: Arc<Db>,
}

// SAFETY: a RocksDB snapshot is an immutable sequence-number handle; the C
// API permits using it from any thread, and `SnapshotInner` keeps the owning
// database alive for as long as the handle exists.
unsafe impl Send for SnapshotInner {}
unsafe impl Sync for SnapshotInner {}

pub struct RocksSnapshot {
    inner: Arc<SnapshotInner>,
}

impl RocksSnapshot {
    fn new(db: Arc<Db>) -> Self {
        let snap = db.snapshot();
        // SAFETY: the snapshot borrows the database allocation behind `db`,
        // which is pinned by the `Arc` stored next to it in `SnapshotInner`
        // and outlives it by field order.
        let snap = unsafe {
            std::mem::transmute::<SnapshotWithThreadMode<'_, Db>, SnapshotWithThreadMode<'static, Db>>(
                snap,
            )
        };
        Self {
            inner: Arc::new(SnapshotInner { snap, db }),
        }
    }
}

struct SnapshotSource {
    inner: Arc<SnapshotInner>,
    cf: Keyspace,
    upper: Option<Vec<u8>>,
}

impl ScanSource for SnapshotSource {
    fn scan(
        &self,
        from: &[u8],
        exclusive: bool,
        limit: usize,
    ) -> StorageResult<Vec<(Bytes, Bytes)>> {
        let cf = handle(&self.inner.db, self.cf);
        let iter = self
            .inner
            .snap
            .raw_iterator_cf_opt(&cf, read_options(&self.upper));
        drain_raw_iter(iter, from, exclusive, limit)
    }
}

impl KvRead for RocksSnapshot {
    fn get(&self, cf: Keyspace, key: &[u8]) -> StorageResult<Option<Bytes>> {
        let cf = handle(&self.inner.db, cf);
        Ok(self.inner.snap.get_cf(&cf, key)?.map(Bytes::from))
    }

    fn prefix_iter(&self, cf: Keyspace, prefix: &[u8]) -> StorageResult<BoxedIter> {
        let source = SnapshotSource {
            inner: self.inner.clone(),
            cf,
            upper: bounded(prefix),
        };
        Ok(Box::new(BatchedIter::new(source, prefix.to_vec())))
    }

    fn iter_from(&self, cf: Keyspace, start: &[u8]) -> StorageResult<BoxedIter> {
        let source = SnapshotSource {
            inner: self.inner.clone(),
            cf,
            upper: None,
        };
        Ok(Box::new(BatchedIter::new(source, start.to_vec())))
    }
}

impl KvSnapshot for RocksSnapshot {}
