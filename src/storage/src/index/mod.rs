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

//! The triple index layer: every triple is stored under three key orderings
//! (`spo`, `pos`, `osp`) so any bound prefix of a lookup pattern maps onto a
//! contiguous key range of one index. Keys are three big-endian `u64`s; the
//! value is empty, presence is the fact.

use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use itertools::Itertools;
use static_assertions::const_assert_eq;

use crate::backend::{BoxedIter, Keyspace, KvEngine, KvRead, WriteBatch};
use crate::error::{StorageError, StorageResult};
use crate::monitor::StoreMetrics;

pub const TRIPLE_KEY_LEN: usize = 24;
const_assert_eq!(TRIPLE_KEY_LEN, 3 * std::mem::size_of::<u64>());

/// A triple of term ids in canonical `(s, p, o)` orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Triple {
    pub subject: u64,
    pub predicate: u64,
    pub object: u64,
}

impl Triple {
    pub fn new(subject: u64, predicate: u64, object: u64) -> Self {
        Self {
            subject,
            predicate,
            object,
        }
    }
}

/// A lookup pattern; `None` is a wildcard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriplePattern {
    pub subject: Option<u64>,
    pub predicate: Option<u64>,
    pub object: Option<u64>,
}

impl TriplePattern {
    pub fn new(subject: Option<u64>, predicate: Option<u64>, object: Option<u64>) -> Self {
        Self {
            subject,
            predicate,
            object,
        }
    }

    /// The full-scan pattern `(*, *, *)`.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn matches(&self, triple: Triple) -> bool {
        self.subject.map_or(true, |s| s == triple.subject)
            && self.predicate.map_or(true, |p| p == triple.predicate)
            && self.object.map_or(true, |o| o == triple.object)
    }
}

/// One of the three physical key orderings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum IndexOrder {
    Spo,
    Pos,
    Osp,
}

impl IndexOrder {
    const ALL: [IndexOrder; 3] = [IndexOrder::Spo, IndexOrder::Pos, IndexOrder::Osp];

    fn keyspace(self) -> Keyspace {
        match self {
            IndexOrder::Spo => Keyspace::Spo,
            IndexOrder::Pos => Keyspace::Pos,
            IndexOrder::Osp => Keyspace::Osp,
        }
    }

    /// The triple's fields in this ordering.
    fn fields(self, triple: Triple) -> [u64; 3] {
        let Triple {
            subject,
            predicate,
            object,
        } = triple;
        match self {
            IndexOrder::Spo => [subject, predicate, object],
            IndexOrder::Pos => [predicate, object, subject],
            IndexOrder::Osp => [object, subject, predicate],
        }
    }

    fn pattern_fields(self, pattern: TriplePattern) -> [Option<u64>; 3] {
        let TriplePattern {
            subject,
            predicate,
            object,
        } = pattern;
        match self {
            IndexOrder::Spo => [subject, predicate, object],
            IndexOrder::Pos => [predicate, object, subject],
            IndexOrder::Osp => [object, subject, predicate],
        }
    }

    fn key(self, triple: Triple) -> [u8; TRIPLE_KEY_LEN] {
        let mut key = [0u8; TRIPLE_KEY_LEN];
        for (slot, field) in self.fields(triple).into_iter().enumerate() {
            BigEndian::write_u64(&mut key[slot * 8..(slot + 1) * 8], field);
        }
        key
    }

    /// Reassembles a key of this ordering into canonical orientation.
    fn decode(self, key: &[u8]) -> StorageResult<Triple> {
        if key.len() != TRIPLE_KEY_LEN {
            return Err(StorageError::InvalidEncoding("triple key length"));
        }
        let a = BigEndian::read_u64(&key[0..8]);
        let b = BigEndian::read_u64(&key[8..16]);
        let c = BigEndian::read_u64(&key[16..24]);
        Ok(match self {
            IndexOrder::Spo => Triple::new(a, b, c),
            IndexOrder::Pos => Triple::new(c, a, b),
            IndexOrder::Osp => Triple::new(b, c, a),
        })
    }

    /// Picks the ordering that turns the pattern's bound fields into a key
    /// prefix. `(s, *, o)` reorders onto `osp`.
    fn choose(pattern: TriplePattern) -> IndexOrder {
        let TriplePattern {
            subject,
            predicate,
            object,
        } = pattern;
        match (subject.is_some(), predicate.is_some(), object.is_some()) {
            (true, true, _) => IndexOrder::Spo,
            (true, false, false) => IndexOrder::Spo,
            (true, false, true) => IndexOrder::Osp,
            (false, true, _) => IndexOrder::Pos,
            (false, false, true) => IndexOrder::Osp,
            (false, false, false) => IndexOrder::Spo,
        }
    }

    /// The bound prefix of this ordering: consecutive bound fields, stopping
    /// at the first wildcard.
    fn prefix(self, pattern: TriplePattern) -> Vec<u8> {
        let mut prefix = Vec::with_capacity(TRIPLE_KEY_LEN);
        for field in self.pattern_fields(pattern) {
            let Some(id) = field else {
                break;
            };
            prefix.extend_from_slice(&id.to_be_bytes());
        }
        prefix
    }
}

/// A lazy stream of triples decoded from one index scan. Nothing is
/// materialised ahead of the consumer.
pub struct TripleStream {
    inner: BoxedIter,
    order: IndexOrder,
}

impl Iterator for TripleStream {
    type Item = StorageResult<Triple>;

    fn next(&mut self) -> Option<Self::Item> {
        let kv = self.inner.next()?;
        Some(kv.and_then(|(key, _)| self.order.decode(&key)))
    }
}

pub struct TripleIndex {
    engine: Arc<dyn KvEngine>,
    metrics: Arc<StoreMetrics>,
}

impl TripleIndex {
    pub fn new(engine: Arc<dyn KvEngine>, metrics: Arc<StoreMetrics>) -> Self {
        Self { engine, metrics }
    }

    /// Inserts one triple. Returns whether it was new; re-inserting is a
    /// successful no-op.
    pub fn insert(&self, triple: Triple) -> StorageResult<bool> {
        Ok(self.insert_batch(&[triple])? == 1)
    }

    /// Inserts a batch atomically: the three keys of every new triple go into
    /// one write batch. Returns the number of triples that were not already
    /// present.
    pub fn insert_batch(&self, triples: &[Triple]) -> StorageResult<u64> {
        let mut batch = WriteBatch::new();
        let mut inserted = 0;
        for triple in triples.iter().copied().unique() {
            if self.contains(triple)? {
                continue;
            }
            for order in IndexOrder::ALL {
                batch.put(
                    order.keyspace(),
                    order.key(triple).to_vec(),
                    Bytes::new(),
                );
            }
            inserted += 1;
        }
        if !batch.is_empty() {
            self.engine.write_batch(batch, false)?;
        }
        self.metrics.index_insert_counts.inc_by(inserted);
        Ok(inserted)
    }

    /// Deletes one triple, returning how many were actually removed (0 or 1).
    /// Deleting a missing triple is not an error.
    pub fn delete(&self, triple: Triple) -> StorageResult<u64> {
        self.delete_batch(&[triple])
    }

    pub fn delete_batch(&self, triples: &[Triple]) -> StorageResult<u64> {
        let mut batch = WriteBatch::new();
        let mut removed = 0;
        for triple in triples.iter().copied().unique() {
            if !self.contains(triple)? {
                continue;
            }
            for order in IndexOrder::ALL {
                batch.delete(order.keyspace(), order.key(triple).to_vec());
            }
            removed += 1;
        }
        if !batch.is_empty() {
            self.engine.write_batch(batch, false)?;
        }
        self.metrics.index_delete_counts.inc_by(removed);
        Ok(removed)
    }

    /// Stages the three index keys of a triple into an existing batch. The
    /// transaction manager uses this to commit an update as one atomic write.
    pub(crate) fn stage_insert(&self, batch: &mut WriteBatch, triple: Triple) {
        for order in IndexOrder::ALL {
            batch.put(order.keyspace(), order.key(triple).to_vec(), Bytes::new());
        }
    }

    pub(crate) fn stage_delete(&self, batch: &mut WriteBatch, triple: Triple) {
        for order in IndexOrder::ALL {
            batch.delete(order.keyspace(), order.key(triple).to_vec());
        }
    }

    /// Point lookup against the live engine.
    pub fn contains(&self, triple: Triple) -> StorageResult<bool> {
        self.contains_in(self.engine.as_ref(), triple)
    }

    pub fn contains_in(
        &self,
        reader: &(impl KvRead + ?Sized),
        triple: Triple,
    ) -> StorageResult<bool> {
        Ok(reader
            .get(Keyspace::Spo, &IndexOrder::Spo.key(triple))?
            .is_some())
    }

    /// Streams all triples matching the pattern from the live engine.
    pub fn lookup(&self, pattern: TriplePattern) -> StorageResult<TripleStream> {
        self.lookup_in(self.engine.as_ref(), pattern)
    }

    /// Streams matches out of `reader`, which may be a pinned snapshot. The
    /// chosen index places every bound field in the scan prefix, so the scan
    /// visits exactly the matching keys.
    pub fn lookup_in(
        &self,
        reader: &(impl KvRead + ?Sized),
        pattern: TriplePattern,
    ) -> StorageResult<TripleStream> {
        let order = IndexOrder::choose(pattern);
        let prefix = order.prefix(pattern);
        let inner = reader.prefix_iter(order.keyspace(), &prefix)?;
        Ok(TripleStream { inner, order })
    }

    /// Counts matches without materialising them.
    pub fn count(&self, pattern: TriplePattern) -> StorageResult<u64> {
        self.count_in(self.engine.as_ref(), pattern)
    }

    pub fn count_in(
        &self,
        reader: &(impl KvRead + ?Sized),
        pattern: TriplePattern,
    ) -> StorageResult<u64> {
        let order = IndexOrder::choose(pattern);
        let prefix = order.prefix(pattern);
        let mut count = 0;
        for kv in reader.prefix_iter(order.keyspace(), &prefix)? {
            kv?;
            count += 1;
        }
        Ok(count)
    }
}
