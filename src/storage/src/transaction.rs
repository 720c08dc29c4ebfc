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

//! The transaction manager serialises writers: exactly one update runs at a
//! time, against a snapshot pinned for its read phase, committing its write
//! set as one atomic batch. Readers never pass through here; they pin their
//! own snapshots and go straight to the index.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use thiserror_ext::AsReport;
use trigon_common::types::Term;

use crate::backend::{KvEngine, KvSnapshot, WriteBatch};
use crate::dict::Dictionary;
use crate::error::{StorageError, StorageResult};
use crate::index::{Triple, TripleIndex, TriplePattern, TripleStream};
use crate::monitor::{ReleaseReason, StoreMetrics};
use crate::snapshot::SnapshotRegistry;

/// The result of a committed update: the closure's value plus the number of
/// triples that actually changed.
#[derive(Debug)]
pub struct Committed<R> {
    pub value: R,
    pub net_changes: u64,
}

type InvalidationHook = Box<dyn Fn() + Send + Sync>;

pub struct TransactionManager {
    engine: Arc<dyn KvEngine>,
    dictionary: Arc<Dictionary>,
    index: Arc<TripleIndex>,
    registry: Arc<SnapshotRegistry>,
    write_lock: Mutex<()>,
    in_progress: AtomicBool,
    current_snapshot: Mutex<Option<u64>>,
    hooks: RwLock<Vec<InvalidationHook>>,
    update_timeout: Duration,
    metrics: Arc<StoreMetrics>,
}

impl TransactionManager {
    pub fn new(
        engine: Arc<dyn KvEngine>,
        dictionary: Arc<Dictionary>,
        index: Arc<TripleIndex>,
        registry: Arc<SnapshotRegistry>,
        update_timeout: Duration,
        metrics: Arc<StoreMetrics>,
    ) -> Self {
        Self {
            engine,
            dictionary,
            index,
            registry,
            write_lock: Mutex::new(()),
            in_progress: AtomicBool::new(false),
            current_snapshot: Mutex::new(None),
            hooks: RwLock::new(Vec::new()),
            update_timeout,
            metrics,
        }
    }

    /// Registers a callback run after every update with a non-zero net
    /// change. The statistics cache and the (external) plan cache subscribe
    /// here.
    pub fn register_invalidation_hook(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.hooks.write().push(Box::new(hook));
    }

    pub fn update_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// The snapshot handle of the in-flight update, if any.
    pub fn current_snapshot(&self) -> Option<u64> {
        *self.current_snapshot.lock()
    }

    /// Runs one update. The closure reads through the pinned snapshot and
    /// stages its write set on the context; a returned error (a parse error
    /// in the update body, say) aborts cleanly without touching storage or
    /// the writer queue. Waiting for the writer slot is bounded by the
    /// configured update timeout.
    pub fn update<R>(
        &self,
        f: impl FnOnce(&mut UpdateContext<'_>) -> StorageResult<R>,
    ) -> StorageResult<Committed<R>> {
        let Some(_write_guard) = self.write_lock.try_lock_for(self.update_timeout) else {
            return Err(StorageError::UpdateTimeout(self.update_timeout));
        };
        let (handle, snapshot) = self.registry.create("update", None)?;
        self.in_progress.store(true, Ordering::SeqCst);
        *self.current_snapshot.lock() = Some(handle);
        let _state_guard = InFlightGuard {
            manager: self,
            handle,
        };

        let mut ctx = UpdateContext {
            dictionary: &self.dictionary,
            index: &self.index,
            snapshot,
            inserts: Vec::new(),
            deletes: Vec::new(),
        };
        let result = f(&mut ctx).and_then(|value| {
            let net_changes = self.commit(ctx)?;
            Ok(Committed { value, net_changes })
        });
        match &result {
            Ok(committed) => {
                self.metrics.txn_commit_counts.inc();
                if committed.net_changes > 0 {
                    for hook in self.hooks.read().iter() {
                        hook();
                    }
                }
            }
            Err(error) => {
                self.metrics.txn_abort_counts.inc();
                tracing::warn!(error = %error.as_report(), "update aborted");
            }
        }
        result
    }

    /// Turns the staged write set into one atomic batch. Deletes apply
    /// before inserts, matching SPARQL UPDATE semantics when a triple shows
    /// up in both.
    fn commit(&self, ctx: UpdateContext<'_>) -> StorageResult<u64> {
        let UpdateContext {
            inserts, deletes, ..
        } = ctx;
        let mut batch = WriteBatch::new();
        let mut net_changes = 0u64;

        let mut removed = HashSet::new();
        for triple in deletes {
            if removed.contains(&triple) || !self.index.contains(triple)? {
                continue;
            }
            self.index.stage_delete(&mut batch, triple);
            removed.insert(triple);
            net_changes += 1;
        }
        let mut added = HashSet::new();
        for triple in inserts {
            let present = !removed.contains(&triple) && self.index.contains(triple)?;
            if present || added.contains(&triple) {
                continue;
            }
            self.index.stage_insert(&mut batch, triple);
            added.insert(triple);
            net_changes += 1;
        }

        if !batch.is_empty() {
            self.engine.write_batch(batch, false)?;
        }
        self.metrics.index_delete_counts.inc_by(removed.len() as u64);
        self.metrics.index_insert_counts.inc_by(added.len() as u64);
        Ok(net_changes)
    }
}

/// Restores manager state and releases the update snapshot on every exit
/// path, panics included.
struct InFlightGuard<'a> {
    manager: &'a TransactionManager,
    handle: u64,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        *self.manager.current_snapshot.lock() = None;
        self.manager.in_progress.store(false, Ordering::SeqCst);
        let reason = if std::thread::panicking() {
            ReleaseReason::OwnerDown
        } else {
            ReleaseReason::Manual
        };
        let _ = self.manager.registry.release_as(self.handle, reason);
    }
}

/// The execution context of one update: the pinned snapshot for reads, the
/// shared dictionary for id resolution, and the staged write set.
pub struct UpdateContext<'a> {
    dictionary: &'a Dictionary,
    index: &'a TripleIndex,
    snapshot: Arc<dyn KvSnapshot>,
    inserts: Vec<Triple>,
    deletes: Vec<Triple>,
}

impl UpdateContext<'_> {
    pub fn dictionary(&self) -> &Dictionary {
        self.dictionary
    }

    pub fn snapshot(&self) -> &dyn KvSnapshot {
        self.snapshot.as_ref()
    }

    /// Reads through the update's snapshot, not the live tree: the update
    /// sees the state it started from.
    pub fn lookup(&self, pattern: TriplePattern) -> StorageResult<TripleStream> {
        self.index.lookup_in(self.snapshot.as_ref(), pattern)
    }

    pub fn contains(&self, triple: Triple) -> StorageResult<bool> {
        self.index.contains_in(self.snapshot.as_ref(), triple)
    }

    pub fn insert(&mut self, triple: Triple) {
        self.inserts.push(triple);
    }

    pub fn delete(&mut self, triple: Triple) {
        self.deletes.push(triple);
    }

    /// Resolves term triples through the dictionary (allocating ids for new
    /// terms) and stages them for insertion.
    pub fn insert_terms(&mut self, triples: &[(Term, Term, Term)]) -> StorageResult<()> {
        let mut terms = Vec::with_capacity(triples.len() * 3);
        for (s, p, o) in triples {
            terms.extend([s.clone(), p.clone(), o.clone()]);
        }
        let ids = self.dictionary.get_or_create_ids(&terms)?;
        for chunk in ids.chunks_exact(3) {
            self.inserts.push(Triple::new(chunk[0], chunk[1], chunk[2]));
        }
        Ok(())
    }

    /// Stages term triples for deletion. A triple with a term the dictionary
    /// has never seen cannot exist, so it is skipped.
    pub fn delete_terms(&mut self, triples: &[(Term, Term, Term)]) -> StorageResult<()> {
        for (s, p, o) in triples {
            let (Some(s), Some(p), Some(o)) = (
                self.dictionary.lookup_id(s)?,
                self.dictionary.lookup_id(p)?,
                self.dictionary.lookup_id(o)?,
            ) else {
                continue;
            };
            self.deletes.push(Triple::new(s, p, o));
        }
        Ok(())
    }
}
