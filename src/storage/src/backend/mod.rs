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

//! Thin typed abstraction over an ordered key-value store with named
//! keyspaces. The production backend wraps RocksDB; tests use an in-memory
//! `BTreeMap` backend with the same semantics.

use bytes::Bytes;

use crate::error::StorageResult;

pub mod memory;
pub mod rocks;

pub use memory::MemoryEngine;
pub use rocks::RocksEngine;

/// The named keyspaces (column families) of a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyspace {
    /// Canonical term encoding -> 8-byte term id.
    Str2Id,
    /// 8-byte term id -> canonical term encoding.
    Id2Str,
    /// `s ‖ p ‖ o` triple keys.
    Spo,
    /// `p ‖ o ‖ s` triple keys.
    Pos,
    /// `o ‖ s ‖ p` triple keys.
    Osp,
    /// Persisted sequence counters.
    Seq,
    /// Statistics blob.
    Stats,
}

impl Keyspace {
    pub const ALL: [Keyspace; 7] = [
        Keyspace::Str2Id,
        Keyspace::Id2Str,
        Keyspace::Spo,
        Keyspace::Pos,
        Keyspace::Osp,
        Keyspace::Seq,
        Keyspace::Stats,
    ];

    pub fn cf_name(self) -> &'static str {
        match self {
            Keyspace::Str2Id => "str2id",
            Keyspace::Id2Str => "id2str",
            Keyspace::Spo => "spo",
            Keyspace::Pos => "pos",
            Keyspace::Osp => "osp",
            Keyspace::Seq => "seq",
            Keyspace::Stats => "stats",
        }
    }

    /// Dictionary keyspaces get whole-key bloom filters for fast negative
    /// lookups.
    pub fn is_dictionary(self) -> bool {
        matches!(self, Keyspace::Str2Id | Keyspace::Id2Str)
    }

    /// Triple-index keyspaces are scanned by 8-byte bound prefixes.
    pub fn is_triple_index(self) -> bool {
        matches!(self, Keyspace::Spo | Keyspace::Pos | Keyspace::Osp)
    }
}

/// A single operation inside an atomic batch.
#[derive(Debug, Clone)]
pub enum BatchOp {
    Put {
        cf: Keyspace,
        key: Bytes,
        value: Bytes,
    },
    Delete {
        cf: Keyspace,
        key: Bytes,
    },
}

/// An ordered set of writes applied atomically, possibly across keyspaces.
#[derive(Debug, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, cf: Keyspace, key: impl Into<Bytes>, value: impl Into<Bytes>) {
        self.ops.push(BatchOp::Put {
            cf,
            key: key.into(),
            value: value.into(),
        });
    }

    pub fn delete(&mut self, cf: Keyspace, key: impl Into<Bytes>) {
        self.ops.push(BatchOp::Delete {
            cf,
            key: key.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// A streaming iterator over key-value pairs in ascending key order.
/// Exhaustion is the `None` of the stream, never an error.
pub type BoxedIter = Box<dyn Iterator<Item = StorageResult<(Bytes, Bytes)>> + Send>;

/// Read operations, implemented both by live engines and by snapshots.
///
/// Iteration on a live engine batches reads and is therefore not guaranteed
/// to observe a single point in time; iterate through a [`KvSnapshot`] when
/// consistency across the whole scan matters.
pub trait KvRead: Send + Sync {
    fn get(&self, cf: Keyspace, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Iterates over exactly the keys starting with `prefix`, using a bounded
    /// seek rather than a scan-and-filter.
    fn prefix_iter(&self, cf: Keyspace, prefix: &[u8]) -> StorageResult<BoxedIter>;

    /// Iterates from `start` (inclusive) to the end of the keyspace. Used by
    /// the skip-to-next-distinct-prefix scans of the statistics collector.
    fn iter_from(&self, cf: Keyspace, start: &[u8]) -> StorageResult<BoxedIter>;
}

/// An immutable read view pinned at creation time, unaffected by concurrent
/// writes.
pub trait KvSnapshot: KvRead {}

/// The full engine contract: reads, point writes, atomic batches, snapshots
/// and WAL control.
pub trait KvEngine: KvRead {
    fn put(&self, cf: Keyspace, key: &[u8], value: &[u8]) -> StorageResult<()>;

    fn delete(&self, cf: Keyspace, key: &[u8]) -> StorageResult<()>;

    /// Applies all operations atomically: either every op is visible or none
    /// is, including across keyspaces.
    fn write_batch(&self, batch: WriteBatch, sync: bool) -> StorageResult<()>;

    fn snapshot(&self) -> StorageResult<Box<dyn KvSnapshot>>;

    fn flush_wal(&self, sync: bool) -> StorageResult<()>;
}

/// The smallest key strictly greater than every key with the given prefix,
/// or an empty vector when no such key exists (prefix of all `0xff`).
pub fn next_key(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last_mut() {
        if *last == u8::MAX {
            end.pop();
        } else {
            *last += 1;
            return end;
        }
    }
    end
}

pub(crate) mod batched {
    //! Iteration in batches: each refill re-seeks past the last key seen and
    //! copies up to [`BATCH_SIZE`] pairs, so no backend handle or lock is
    //! held across `next()` calls.

    use bytes::Bytes;

    use crate::error::StorageResult;

    pub const BATCH_SIZE: usize = 256;

    /// One bounded scan of the underlying store. The source owns its bounds
    /// (prefix or start key) and must return pairs in ascending key order.
    pub trait ScanSource: Send {
        fn scan(
            &self,
            from: &[u8],
            exclusive: bool,
            limit: usize,
        ) -> StorageResult<Vec<(Bytes, Bytes)>>;
    }

    pub struct BatchedIter<S: ScanSource> {
        source: S,
        cursor: Vec<u8>,
        started: bool,
        exhausted: bool,
        current: std::vec::IntoIter<(Bytes, Bytes)>,
    }

    impl<S: ScanSource> BatchedIter<S> {
        pub fn new(source: S, start: Vec<u8>) -> Self {
            Self {
                source,
                cursor: start,
                started: false,
                exhausted: false,
                current: Vec::new().into_iter(),
            }
        }

        fn refill(&mut self) -> StorageResult<()> {
            let batch = self.source.scan(&self.cursor, self.started, BATCH_SIZE)?;
            if batch.len() < BATCH_SIZE {
                self.exhausted = true;
            }
            if let Some((key, _)) = batch.last() {
                self.cursor = key.to_vec();
                self.started = true;
            }
            self.current = batch.into_iter();
            Ok(())
        }
    }

    impl<S: ScanSource> Iterator for BatchedIter<S> {
        type Item = StorageResult<(Bytes, Bytes)>;

        fn next(&mut self) -> Option<Self::Item> {
            loop {
                if let Some(kv) = self.current.next() {
                    return Some(Ok(kv));
                }
                if self.exhausted {
                    return None;
                }
                if let Err(e) = self.refill() {
                    self.exhausted = true;
                    return Some(Err(e));
                }
                if self.current.len() == 0 {
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_key() {
        assert_eq!(next_key(b"abc"), b"abd".to_vec());
        assert_eq!(next_key(&[0x01, 0xff]), vec![0x02]);
        assert_eq!(next_key(&[0xff, 0xff]), Vec::<u8>::new());
        assert_eq!(next_key(b""), Vec::<u8>::new());
    }

    #[test]
    fn test_keyspace_names_are_distinct() {
        let names: std::collections::HashSet<_> =
            Keyspace::ALL.iter().map(|cf| cf.cf_name()).collect();
        assert_eq!(names.len(), Keyspace::ALL.len());
    }
}
