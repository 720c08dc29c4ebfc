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

//! The store façade: wires the backend, dictionary, index, statistics,
//! snapshot registry and transaction manager together behind the operations
//! the SPARQL planner and the bulk loader call.

use std::path::{Component, Path};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use trigon_common::config::StorageConfig;
use trigon_common::types::Term;

use crate::backend::{KvEngine, KvSnapshot, MemoryEngine, RocksEngine};
use crate::backup;
use crate::dict::Dictionary;
use crate::error::{StorageError, StorageResult};
use crate::index::{Triple, TripleIndex, TriplePattern, TripleStream};
use crate::monitor::{StoreMetrics, GLOBAL_STORE_METRICS};
use crate::sequence::SequenceAllocator;
use crate::snapshot::SnapshotRegistry;
use crate::stats::StatisticsManager;
use crate::transaction::TransactionManager;

pub struct TripleStore {
    config: StorageConfig,
    engine: Arc<dyn KvEngine>,
    sequence: Arc<SequenceAllocator>,
    dictionary: Arc<Dictionary>,
    index: Arc<TripleIndex>,
    statistics: Arc<StatisticsManager>,
    snapshots: Arc<SnapshotRegistry>,
    transactions: TransactionManager,
    closed: AtomicBool,
}

impl TripleStore {
    /// Opens (creating if missing) a durable store at `path`.
    pub fn open(path: &Path, config: StorageConfig) -> StorageResult<Self> {
        check_path(path)?;
        let engine = Arc::new(RocksEngine::open(path, true)?);
        Self::with_engine(engine, config, GLOBAL_STORE_METRICS.clone())
    }

    /// An ephemeral store backed by memory; state dies with the value.
    /// Metrics go to a private registry so tests do not pollute the global
    /// one.
    pub fn open_in_memory(config: StorageConfig) -> StorageResult<Self> {
        Self::with_engine(
            Arc::new(MemoryEngine::new()),
            config,
            StoreMetrics::for_test(),
        )
    }

    fn with_engine(
        engine: Arc<dyn KvEngine>,
        config: StorageConfig,
        metrics: Arc<StoreMetrics>,
    ) -> StorageResult<Self> {
        let sequence = Arc::new(SequenceAllocator::new(
            engine.clone(),
            config.sequence_flush_interval,
            metrics.clone(),
        )?);
        let dictionary = Arc::new(Dictionary::new(
            engine.clone(),
            sequence.clone(),
            config.resolved_dictionary_shards(),
            config.dictionary_cache_capacity,
            metrics.clone(),
        ));
        let index = Arc::new(TripleIndex::new(engine.clone(), metrics.clone()));
        let statistics = Arc::new(StatisticsManager::new(engine.clone()));
        let snapshots = Arc::new(SnapshotRegistry::new(
            engine.clone(),
            config.snapshot_ttl(),
            config.snapshot_cleanup_interval(),
            metrics.clone(),
        ));
        let transactions = TransactionManager::new(
            engine.clone(),
            dictionary.clone(),
            index.clone(),
            snapshots.clone(),
            config.update_timeout(),
            metrics,
        );
        // Committed changes make both the statistics blob and any plan cache
        // stale.
        let stats = statistics.clone();
        transactions.register_invalidation_hook(move || stats.invalidate());

        Ok(Self {
            config,
            engine,
            sequence,
            dictionary,
            index,
            statistics,
            snapshots,
            transactions,
            closed: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Advisory deadline query executors should honour; the core itself
    /// never blocks reads.
    pub fn query_timeout(&self) -> std::time::Duration {
        self.config.query_timeout()
    }

    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    fn ensure_open(&self) -> StorageResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(StorageError::AlreadyClosed)
        }
    }

    /// Flushes counters and the WAL, stops background work and marks the
    /// store closed. Further operations (including a second close) fail with
    /// [`StorageError::AlreadyClosed`].
    pub fn close(&self) -> StorageResult<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Err(StorageError::AlreadyClosed);
        }
        self.sequence.flush()?;
        self.engine.flush_wal(true)?;
        self.snapshots.shutdown();
        tracing::info!("triple store closed");
        Ok(())
    }

    /// Inserts term triples through the writer queue. Returns the number of
    /// triples that were actually new.
    pub fn insert(&self, triples: &[(Term, Term, Term)]) -> StorageResult<u64> {
        self.ensure_open()?;
        let committed = self.transactions.update(|ctx| ctx.insert_terms(triples))?;
        Ok(committed.net_changes)
    }

    /// Deletes term triples, returning how many actually existed. Unknown
    /// terms simply contribute zero.
    pub fn delete(&self, triples: &[(Term, Term, Term)]) -> StorageResult<u64> {
        self.ensure_open()?;
        let committed = self.transactions.update(|ctx| ctx.delete_terms(triples))?;
        Ok(committed.net_changes)
    }

    pub fn contains(&self, triple: &(Term, Term, Term)) -> StorageResult<bool> {
        self.ensure_open()?;
        let (s, p, o) = triple;
        let (Some(s), Some(p), Some(o)) = (
            self.dictionary.lookup_id(s)?,
            self.dictionary.lookup_id(p)?,
            self.dictionary.lookup_id(o)?,
        ) else {
            return Ok(false);
        };
        self.index.contains(Triple::new(s, p, o))
    }

    /// Streams id triples matching an id pattern.
    pub fn lookup_pattern(&self, pattern: TriplePattern) -> StorageResult<TripleStream> {
        self.ensure_open()?;
        self.index.lookup(pattern)
    }

    pub fn count_pattern(&self, pattern: TriplePattern) -> StorageResult<u64> {
        self.ensure_open()?;
        self.index.count(pattern)
    }

    /// Resolves a term pattern to an id pattern. `None` means some bound
    /// term is unknown to the dictionary, so nothing can match.
    pub fn resolve_pattern(
        &self,
        subject: Option<&Term>,
        predicate: Option<&Term>,
        object: Option<&Term>,
    ) -> StorageResult<Option<TriplePattern>> {
        self.ensure_open()?;
        let mut resolved = [None; 3];
        for (slot, term) in [subject, predicate, object].into_iter().enumerate() {
            if let Some(term) = term {
                match self.dictionary.lookup_id(term)? {
                    Some(id) => resolved[slot] = Some(id),
                    None => return Ok(None),
                }
            }
        }
        Ok(Some(TriplePattern::new(
            resolved[0],
            resolved[1],
            resolved[2],
        )))
    }

    /// Reverse-maps an id triple for result materialisation.
    pub fn materialize(&self, triple: Triple) -> StorageResult<(Term, Term, Term)> {
        self.ensure_open()?;
        Ok((
            self.dictionary.lookup_term(triple.subject)?,
            self.dictionary.lookup_term(triple.predicate)?,
            self.dictionary.lookup_term(triple.object)?,
        ))
    }

    pub fn get_or_create_id(&self, term: &Term) -> StorageResult<u64> {
        self.ensure_open()?;
        self.dictionary.get_or_create_id(term)
    }

    pub fn lookup_id(&self, term: &Term) -> StorageResult<Option<u64>> {
        self.ensure_open()?;
        self.dictionary.lookup_id(term)
    }

    pub fn lookup_term(&self, id: u64) -> StorageResult<Term> {
        self.ensure_open()?;
        self.dictionary.lookup_term(id)
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    pub fn index(&self) -> &TripleIndex {
        &self.index
    }

    pub fn statistics(&self) -> &StatisticsManager {
        &self.statistics
    }

    pub fn snapshots(&self) -> &SnapshotRegistry {
        &self.snapshots
    }

    pub fn transaction(&self) -> &TransactionManager {
        &self.transactions
    }

    pub fn sequence(&self) -> &SequenceAllocator {
        &self.sequence
    }

    /// Scoped read: `f` runs against a pinned snapshot with guaranteed
    /// release.
    pub fn with_snapshot<R>(
        &self,
        f: impl FnOnce(&dyn KvSnapshot) -> StorageResult<R>,
    ) -> StorageResult<R> {
        self.ensure_open()?;
        self.snapshots.with_snapshot(None, f)
    }

    /// Writes the allocator's counter state into a backup root (§ backup
    /// contract).
    pub fn export_counter_state(&self, backup_root: &Path) -> StorageResult<()> {
        self.ensure_open()?;
        self.sequence.flush()?;
        backup::write_counter_state(backup_root, &self.sequence.export())
    }

    /// Installs counter state from a backup root onto this store. Returns
    /// whether a side file was found; a legacy backup without one leaves the
    /// counters as initialised from the restored `seq` keyspace.
    pub fn restore_counter_state(&self, backup_root: &Path) -> StorageResult<bool> {
        self.ensure_open()?;
        match backup::read_counter_state(backup_root)? {
            Some(state) => {
                self.sequence.import(&state)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

fn check_path(path: &Path) -> StorageResult<()> {
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(StorageError::PathTraversal(path.to_path_buf()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_traversal_is_rejected() {
        let err = TripleStore::open(Path::new("/tmp/a/../b"), StorageConfig::default());
        assert!(matches!(err, Err(StorageError::PathTraversal(_))));
    }

    #[test]
    fn test_operations_after_close() {
        let store = TripleStore::open_in_memory(StorageConfig::default()).unwrap();
        store.close().unwrap();
        assert!(!store.is_open());
        assert!(matches!(store.close(), Err(StorageError::AlreadyClosed)));
        assert!(matches!(
            store.insert(&[]),
            Err(StorageError::AlreadyClosed)
        ));
        assert!(matches!(
            store.count_pattern(TriplePattern::any()),
            Err(StorageError::AlreadyClosed)
        ));
    }
}
