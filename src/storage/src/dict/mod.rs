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

//! The term dictionary: bidirectional mapping between RDF terms and 64-bit
//! ids.
//!
//! Writes are sharded. A term's shard is picked by a stable hash of its
//! canonical encoding, so for any single term there is exactly one critical
//! section in which the get-or-create race is decided; concurrent creates of
//! different terms proceed in parallel. All shards share the storage handle,
//! the sequence allocator and a lock-free read cache that is consulted before
//! the shard hop. Inline-encodable literals never reach storage at all.

use std::collections::HashMap;
use std::hash::Hasher;
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use itertools::Itertools;
use parking_lot::Mutex;
use trigon_common::encoding::encode_term;
use trigon_common::types::term_id::type_of;
use trigon_common::types::{Term, TermKind, TermType};
use twox_hash::XxHash64;

use crate::backend::{Keyspace, KvEngine, WriteBatch};
use crate::error::{StorageError, StorageResult};
use crate::monitor::StoreMetrics;
use crate::sequence::SequenceAllocator;

mod cache;

pub use cache::TermCache;

/// Seed of the shard-routing hash. Stable for the life of a database: the
/// same term must route identically across restarts and shard-count changes.
const SHARD_HASH_SEED: u64 = 0x7472_6967;

pub struct Dictionary {
    engine: Arc<dyn KvEngine>,
    sequence: Arc<SequenceAllocator>,
    cache: TermCache,
    shard_locks: Vec<Mutex<()>>,
    metrics: Arc<StoreMetrics>,
}

impl Dictionary {
    pub fn new(
        engine: Arc<dyn KvEngine>,
        sequence: Arc<SequenceAllocator>,
        shards: usize,
        cache_capacity: u64,
        metrics: Arc<StoreMetrics>,
    ) -> Self {
        let shards = shards.max(1);
        Self {
            engine,
            sequence,
            cache: TermCache::new(cache_capacity),
            shard_locks: (0..shards).map(|_| Mutex::new(())).collect(),
            metrics,
        }
    }

    fn shard_of(&self, key: &[u8]) -> usize {
        let mut hasher = XxHash64::with_seed(SHARD_HASH_SEED);
        hasher.write(key);
        (hasher.finish() % self.shard_locks.len() as u64) as usize
    }

    /// Returns the id of `term`, creating a dictionary entry if needed.
    /// Idempotent under concurrency: of all racing creators exactly one
    /// writes storage, and every caller observes that winner's id.
    pub fn get_or_create_id(&self, term: &Term) -> StorageResult<u64> {
        validate(term)?;
        if let Some(id) = term.inline_id() {
            return Ok(id);
        }
        let kind = term.kind();
        let key = Bytes::from(encode_term(term)?);
        if let Some(id) = self.cache.get(&key) {
            self.hit(kind);
            return Ok(id);
        }
        self.miss(kind);

        let _guard = self.shard_locks[self.shard_of(&key)].lock();
        // Losers of the race find the winner's entry here or in storage.
        if let Some(id) = self.cache.get(&key) {
            return Ok(id);
        }
        if let Some(value) = self.engine.get(Keyspace::Str2Id, &key)? {
            let id = BigEndian::read_u64(&value);
            self.cache.insert(key, id);
            return Ok(id);
        }

        let id = self.sequence.next_id(kind)?;
        self.write_entry(&key, id)?;
        self.cache.insert(key, id);
        self.created(kind);
        Ok(id)
    }

    /// Batch get-or-create preserving input order. Dictionary newcomers are
    /// grouped per shard and allocated from a single sequence range per kind.
    pub fn get_or_create_ids(&self, terms: &[Term]) -> StorageResult<Vec<u64>> {
        struct Pending {
            index: usize,
            key: Bytes,
            kind: TermKind,
        }

        let mut out = vec![0u64; terms.len()];
        let mut by_shard: Vec<Vec<Pending>> = (0..self.shard_locks.len()).map(|_| Vec::new()).collect();
        for (index, term) in terms.iter().enumerate() {
            validate(term)?;
            if let Some(id) = term.inline_id() {
                out[index] = id;
                continue;
            }
            let key = Bytes::from(encode_term(term)?);
            if let Some(id) = self.cache.get(&key) {
                self.hit(term.kind());
                out[index] = id;
                continue;
            }
            self.miss(term.kind());
            by_shard[self.shard_of(&key)].push(Pending {
                index,
                key,
                kind: term.kind(),
            });
        }

        for (shard, pending) in by_shard.into_iter().enumerate() {
            if pending.is_empty() {
                continue;
            }
            let _guard = self.shard_locks[shard].lock();

            // Resolve duplicates and terms that lost an earlier race, leaving
            // only genuine newcomers, deduplicated by key.
            let mut resolved: HashMap<Bytes, u64> = HashMap::new();
            let mut newcomers: HashMap<TermKind, Vec<Bytes>> = HashMap::new();
            for entry in &pending {
                if resolved.contains_key(&entry.key)
                    || newcomers
                        .get(&entry.kind)
                        .is_some_and(|keys| keys.contains(&entry.key))
                {
                    continue;
                }
                if let Some(id) = self.cache.get(&entry.key) {
                    resolved.insert(entry.key.clone(), id);
                } else if let Some(value) = self.engine.get(Keyspace::Str2Id, &entry.key)? {
                    resolved.insert(entry.key.clone(), BigEndian::read_u64(&value));
                } else {
                    newcomers.entry(entry.kind).or_default().push(entry.key.clone());
                }
            }

            let mut batch = WriteBatch::new();
            for (kind, keys) in newcomers.into_iter().sorted_by_key(|(kind, _)| *kind) {
                let start = self.sequence.allocate_range(kind, keys.len() as u64)?;
                for (offset, key) in keys.into_iter().enumerate() {
                    let id = trigon_common::types::term_id::encode_id(kind, start + offset as u64);
                    batch.put(Keyspace::Str2Id, key.clone(), id.to_be_bytes().to_vec());
                    batch.put(Keyspace::Id2Str, id.to_be_bytes().to_vec(), key.clone());
                    resolved.insert(key, id);
                    self.created(kind);
                }
            }
            if !batch.is_empty() {
                self.engine.write_batch(batch, false)?;
            }
            for entry in &pending {
                let id = resolved[&entry.key];
                self.cache.insert(entry.key.clone(), id);
                out[entry.index] = id;
            }
        }
        Ok(out)
    }

    /// Read-only lookup. Terms that cannot legally have a dictionary entry
    /// (oversized, NUL in the IRI) are simply not found.
    pub fn lookup_id(&self, term: &Term) -> StorageResult<Option<u64>> {
        if let Some(id) = term.inline_id() {
            return Ok(Some(id));
        }
        let Ok(key) = encode_term(term) else {
            return Ok(None);
        };
        if let Some(id) = self.cache.get(&key) {
            self.hit(term.kind());
            return Ok(Some(id));
        }
        self.miss(term.kind());
        match self.engine.get(Keyspace::Str2Id, &key)? {
            Some(value) => {
                let id = BigEndian::read_u64(&value);
                self.cache.insert(Bytes::from(key), id);
                Ok(Some(id))
            }
            None => Ok(None),
        }
    }

    /// Materialises the term behind an id: inline ids are decoded, dictionary
    /// ids are read from `id2str`.
    pub fn lookup_term(&self, id: u64) -> StorageResult<Term> {
        match type_of(id) {
            TermType::Integer | TermType::Decimal | TermType::DateTime => {
                Term::from_inline_id(id)
                    .ok_or(StorageError::InvalidEncoding("inline value out of range"))
            }
            TermType::Uri | TermType::BlankNode | TermType::Literal => {
                match self.engine.get(Keyspace::Id2Str, &id.to_be_bytes())? {
                    Some(value) => Ok(trigon_common::encoding::decode_term(&value)?),
                    None => Err(StorageError::NotFound(id)),
                }
            }
            reserved @ TermType::Reserved(_) => Err(StorageError::InvalidType(reserved)),
        }
    }

    /// Batch reverse lookup; unknown ids yield `None` instead of failing the
    /// whole batch.
    pub fn lookup_terms(&self, ids: &[u64]) -> StorageResult<Vec<Option<Term>>> {
        ids.iter()
            .map(|&id| match self.lookup_term(id) {
                Ok(term) => Ok(Some(term)),
                Err(StorageError::NotFound(_)) => Ok(None),
                Err(e) => Err(e),
            })
            .collect()
    }

    /// Reverse lookup that asserts the id names a URI, as callers resolving
    /// predicates do.
    pub fn lookup_iri(&self, id: u64) -> StorageResult<String> {
        if type_of(id) != TermType::Uri {
            return Err(StorageError::TypeMismatch {
                expected: TermType::Uri,
                actual: type_of(id),
            });
        }
        match self.lookup_term(id)? {
            Term::Iri(iri) => Ok(iri),
            _ => Err(StorageError::InvalidEncoding("id2str entry is not a URI")),
        }
    }

    fn write_entry(&self, key: &Bytes, id: u64) -> StorageResult<()> {
        let mut batch = WriteBatch::new();
        batch.put(Keyspace::Str2Id, key.clone(), id.to_be_bytes().to_vec());
        batch.put(Keyspace::Id2Str, id.to_be_bytes().to_vec(), key.clone());
        self.engine.write_batch(batch, false)
    }

    fn hit(&self, kind: TermKind) {
        self.metrics
            .dict_cache_hit_counts
            .with_label_values(&[kind.as_str()])
            .inc();
    }

    fn miss(&self, kind: TermKind) {
        self.metrics
            .dict_cache_miss_counts
            .with_label_values(&[kind.as_str()])
            .inc();
    }

    fn created(&self, kind: TermKind) {
        self.metrics
            .dict_create_counts
            .with_label_values(&[kind.as_str()])
            .inc();
    }
}

/// Terms the dictionary refuses to allocate ids for. Lookups of such terms
/// are a plain miss instead.
fn validate(term: &Term) -> StorageResult<()> {
    match term {
        Term::Iri(iri) if iri.is_empty() => {
            Err(StorageError::UnsupportedTerm("empty IRI".to_owned()))
        }
        Term::BlankNode(label) if label.is_empty() => Err(StorageError::UnsupportedTerm(
            "empty blank node label".to_owned(),
        )),
        _ => Ok(()),
    }
}
