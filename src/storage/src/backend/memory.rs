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

//! An in-memory engine used in tests and by callers that want an ephemeral
//! store. One `BTreeMap` per keyspace behind a single `RwLock`; snapshots
//! clone the maps wholesale, which is plenty for the data sizes tests use.

use std::collections::BTreeMap;
use std::ops::Bound::{Excluded, Included, Unbounded};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use super::batched::{BatchedIter, ScanSource};
use super::{BatchOp, BoxedIter, Keyspace, KvEngine, KvRead, KvSnapshot, WriteBatch};
use crate::error::StorageResult;

type Table = BTreeMap<Vec<u8>, Bytes>;

#[derive(Clone, Default)]
struct Tables([Table; Keyspace::ALL.len()]);

impl Tables {
    fn table(&self, cf: Keyspace) -> &Table {
        &self.0[slot(cf)]
    }

    fn table_mut(&mut self, cf: Keyspace) -> &mut Table {
        &mut self.0[slot(cf)]
    }
}

fn slot(cf: Keyspace) -> usize {
    match cf {
        Keyspace::Str2Id => 0,
        Keyspace::Id2Str => 1,
        Keyspace::Spo => 2,
        Keyspace::Pos => 3,
        Keyspace::Osp => 4,
        Keyspace::Seq => 5,
        Keyspace::Stats => 6,
    }
}

fn scan_table(
    table: &Table,
    from: &[u8],
    exclusive: bool,
    upper: &Option<Vec<u8>>,
    limit: usize,
) -> Vec<(Bytes, Bytes)> {
    let lower = if exclusive {
        Excluded(from.to_vec())
    } else {
        Included(from.to_vec())
    };
    let upper = match upper {
        Some(end) => Excluded(end.clone()),
        None => Unbounded,
    };
    table
        .range((lower, upper))
        .take(limit)
        .map(|(k, v)| (Bytes::copy_from_slice(k), v.clone()))
        .collect()
}

#[derive(Clone, Default)]
pub struct MemoryEngine {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }
}

struct EngineSource {
    tables: Arc<RwLock<Tables>>,
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
        let tables = self.tables.read();
        Ok(scan_table(
            tables.table(self.cf),
            from,
            exclusive,
            &self.upper,
            limit,
        ))
    }
}

impl KvRead for MemoryEngine {
    fn get(&self, cf: Keyspace, key: &[u8]) -> StorageResult<Option<Bytes>> {
        Ok(self.tables.read().table(cf).get(key).cloned())
    }

    fn prefix_iter(&self, cf: Keyspace, prefix: &[u8]) -> StorageResult<BoxedIter> {
        let upper = Some(super::next_key(prefix)).filter(|end| !end.is_empty());
        let source = EngineSource {
            tables: self.tables.clone(),
            cf,
            upper,
        };
        Ok(Box::new(BatchedIter::new(source, prefix.to_vec())))
    }

    fn iter_from(&self, cf: Keyspace, start: &[u8]) -> StorageResult<BoxedIter> {
        let source = EngineSource {
            tables: self.tables.clone(),
            cf,
            upper: None,
        };
        Ok(Box::new(BatchedIter::new(source, start.to_vec())))
    }
}

impl KvEngine for MemoryEngine {
    fn put(&self, cf: Keyspace, key: &[u8], value: &[u8]) -> StorageResult<()> {
        self.tables
            .write()
            .table_mut(cf)
            .insert(key.to_vec(), Bytes::copy_from_slice(value));
        Ok(())
    }

    fn delete(&self, cf: Keyspace, key: &[u8]) -> StorageResult<()> {
        self.tables.write().table_mut(cf).remove(key);
        Ok(())
    }

    fn write_batch(&self, batch: WriteBatch, _sync: bool) -> StorageResult<()> {
        // One write guard for the whole batch makes it atomic with respect to
        // every reader and snapshot.
        let mut tables = self.tables.write();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put { cf, key, value } => {
                    tables.table_mut(cf).insert(key.to_vec(), value);
                }
                BatchOp::Delete { cf, key } => {
                    tables.table_mut(cf).remove(key.as_ref());
                }
            }
        }
        Ok(())
    }

    fn snapshot(&self) -> StorageResult<Box<dyn KvSnapshot>> {
        let tables = self.tables.read().clone();
        Ok(Box::new(MemorySnapshot {
            tables: Arc::new(tables),
        }))
    }

    fn flush_wal(&self, _sync: bool) -> StorageResult<()> {
        Ok(())
    }
}

pub struct MemorySnapshot {
    tables: Arc<Tables>,
}

struct SnapshotSource {
    tables: Arc<Tables>,
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
        Ok(scan_table(
            self.tables.table(self.cf),
            from,
            exclusive,
            &self.upper,
            limit,
        ))
    }
}

impl KvRead for MemorySnapshot {
    fn get(&self, cf: Keyspace, key: &[u8]) -> StorageResult<Option<Bytes>> {
        Ok(self.tables.table(cf).get(key).cloned())
    }

    fn prefix_iter(&self, cf: Keyspace, prefix: &[u8]) -> StorageResult<BoxedIter> {
        let upper = Some(super::next_key(prefix)).filter(|end| !end.is_empty());
        let source = SnapshotSource {
            tables: self.tables.clone(),
            cf,
            upper,
        };
        Ok(Box::new(BatchedIter::new(source, prefix.to_vec())))
    }

    fn iter_from(&self, cf: Keyspace, start: &[u8]) -> StorageResult<BoxedIter> {
        let source = SnapshotSource {
            tables: self.tables.clone(),
            cf,
            upper: None,
        };
        Ok(Box::new(BatchedIter::new(source, start.to_vec())))
    }
}

impl KvSnapshot for MemorySnapshot {}

#[cfg(test)]
mod tests {
    use itertools::Itertools;

    use super::*;

    fn collect(iter: BoxedIter) -> Vec<(Bytes, Bytes)> {
        iter.map(|kv| kv.unwrap()).collect_vec()
    }

    #[test]
    fn test_put_get_delete() {
        let engine = MemoryEngine::new();
        engine.put(Keyspace::Spo, b"a", b"1").unwrap();
        assert_eq!(
            engine.get(Keyspace::Spo, b"a").unwrap(),
            Some(Bytes::from_static(b"1"))
        );
        // Keyspaces are disjoint.
        assert_eq!(engine.get(Keyspace::Pos, b"a").unwrap(), None);
        engine.delete(Keyspace::Spo, b"a").unwrap();
        assert_eq!(engine.get(Keyspace::Spo, b"a").unwrap(), None);
    }

    #[test]
    fn test_prefix_iter_is_bounded() {
        let engine = MemoryEngine::new();
        for key in ["aa1", "aa2", "ab1", "b"] {
            engine.put(Keyspace::Spo, key.as_bytes(), b"").unwrap();
        }
        let keys = collect(engine.prefix_iter(Keyspace::Spo, b"aa").unwrap())
            .into_iter()
            .map(|(k, _)| k)
            .collect_vec();
        assert_eq!(keys, vec![Bytes::from_static(b"aa1"), Bytes::from_static(b"aa2")]);

        // Empty prefix scans everything.
        assert_eq!(collect(engine.prefix_iter(Keyspace::Spo, b"").unwrap()).len(), 4);
    }

    #[test]
    fn test_iteration_spans_multiple_batches() {
        let engine = MemoryEngine::new();
        let n = super::super::batched::BATCH_SIZE * 2 + 17;
        for i in 0..n {
            engine
                .put(Keyspace::Spo, format!("k{i:08}").as_bytes(), b"")
                .unwrap();
        }
        assert_eq!(collect(engine.prefix_iter(Keyspace::Spo, b"k").unwrap()).len(), n);
    }

    #[test]
    fn test_snapshot_isolation() {
        let engine = MemoryEngine::new();
        engine.put(Keyspace::Spo, b"k", b"v1").unwrap();
        let snapshot = engine.snapshot().unwrap();
        engine.put(Keyspace::Spo, b"k", b"v2").unwrap();
        engine.put(Keyspace::Spo, b"k2", b"v").unwrap();
        assert_eq!(
            snapshot.get(Keyspace::Spo, b"k").unwrap(),
            Some(Bytes::from_static(b"v1"))
        );
        assert_eq!(collect(snapshot.prefix_iter(Keyspace::Spo, b"k").unwrap()).len(), 1);
        assert_eq!(
            engine.get(Keyspace::Spo, b"k").unwrap(),
            Some(Bytes::from_static(b"v2"))
        );
    }

    #[test]
    fn test_write_batch_applies_all_ops() {
        let engine = MemoryEngine::new();
        engine.put(Keyspace::Spo, b"stale", b"").unwrap();
        let mut batch = WriteBatch::new();
        batch.put(Keyspace::Spo, &b"a"[..], &b"1"[..]);
        batch.put(Keyspace::Pos, &b"b"[..], &b"2"[..]);
        batch.delete(Keyspace::Spo, &b"stale"[..]);
        engine.write_batch(batch, false).unwrap();
        assert!(engine.get(Keyspace::Spo, b"a").unwrap().is_some());
        assert!(engine.get(Keyspace::Pos, b"b").unwrap().is_some());
        assert!(engine.get(Keyspace::Spo, b"stale").unwrap().is_none());
    }
}
