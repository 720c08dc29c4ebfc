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

//! Process-wide registry of live read snapshots.
//!
//! Every snapshot is registered with an owner and a TTL. A background sweeper
//! releases snapshots that outlive their TTL; scoped acquisition through
//! [`SnapshotRegistry::with_snapshot`] guarantees release on every exit path,
//! including panics, which stands in for owner-liveness watching.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::backend::{KvEngine, KvSnapshot};
use crate::error::{StorageError, StorageResult};
use crate::monitor::{ReleaseReason, StoreMetrics};

struct Entry {
    snapshot: Arc<dyn KvSnapshot>,
    owner: String,
    created_at: Instant,
    ttl: Duration,
}

struct RegistryCore {
    engine: Arc<dyn KvEngine>,
    entries: Mutex<HashMap<u64, Entry>>,
    next_handle: AtomicU64,
    metrics: Arc<StoreMetrics>,
}

impl RegistryCore {
    fn release(&self, handle: u64, reason: ReleaseReason) -> StorageResult<()> {
        match self.entries.lock().remove(&handle) {
            Some(entry) => {
                self.metrics.snapshot_released(reason);
                tracing::trace!(
                    handle,
                    owner = entry.owner,
                    reason = reason.as_str(),
                    "released snapshot"
                );
                Ok(())
            }
            None => Err(StorageError::SnapshotReleased),
        }
    }

    fn expire(&self) {
        let expired: Vec<u64> = {
            let entries = self.entries.lock();
            entries
                .iter()
                .filter(|(_, entry)| entry.created_at.elapsed() > entry.ttl)
                .map(|(&handle, _)| handle)
                .collect()
        };
        for handle in expired {
            if self.release(handle, ReleaseReason::TtlExpired).is_ok() {
                tracing::debug!(handle, "snapshot exceeded its ttl");
            }
        }
    }
}

pub struct SnapshotRegistry {
    core: Arc<RegistryCore>,
    default_ttl: Duration,
    shutdown: Arc<(Mutex<bool>, Condvar)>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl SnapshotRegistry {
    pub fn new(
        engine: Arc<dyn KvEngine>,
        default_ttl: Duration,
        cleanup_interval: Duration,
        metrics: Arc<StoreMetrics>,
    ) -> Self {
        let core = Arc::new(RegistryCore {
            engine,
            entries: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
            metrics,
        });
        let shutdown = Arc::new((Mutex::new(false), Condvar::new()));
        let sweeper = {
            let core = core.clone();
            let shutdown = shutdown.clone();
            std::thread::Builder::new()
                .name("trigon-snapshot-sweeper".to_owned())
                .spawn(move || sweep_loop(core, shutdown, cleanup_interval))
                .expect("failed to spawn snapshot sweeper")
        };
        Self {
            core,
            default_ttl,
            shutdown,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    /// Pins a backend snapshot and registers it. Returns the handle used for
    /// release and the read view itself.
    pub fn create(
        &self,
        owner: impl Into<String>,
        ttl: Option<Duration>,
    ) -> StorageResult<(u64, Arc<dyn KvSnapshot>)> {
        let snapshot: Arc<dyn KvSnapshot> = Arc::from(self.core.engine.snapshot()?);
        let handle = self.core.next_handle.fetch_add(1, Ordering::Relaxed);
        self.core.entries.lock().insert(
            handle,
            Entry {
                snapshot: snapshot.clone(),
                owner: owner.into(),
                created_at: Instant::now(),
                ttl: ttl.unwrap_or(self.default_ttl),
            },
        );
        self.core.metrics.snapshot_created_counts.inc();
        Ok((handle, snapshot))
    }

    /// The read view behind a handle, if it is still live.
    pub fn get(&self, handle: u64) -> Option<Arc<dyn KvSnapshot>> {
        self.core
            .entries
            .lock()
            .get(&handle)
            .map(|entry| entry.snapshot.clone())
    }

    /// Releases a snapshot. A second release of the same handle (or of one
    /// the sweeper already expired) reports [`StorageError::SnapshotReleased`].
    pub fn release(&self, handle: u64) -> StorageResult<()> {
        self.core.release(handle, ReleaseReason::Manual)
    }

    pub(crate) fn release_as(&self, handle: u64, reason: ReleaseReason) -> StorageResult<()> {
        self.core.release(handle, reason)
    }

    pub fn live_count(&self) -> usize {
        self.core.entries.lock().len()
    }

    /// Runs `f` against a fresh snapshot, releasing it on every exit path.
    /// A panic inside `f` counts as the owner going down.
    pub fn with_snapshot<R>(
        &self,
        ttl: Option<Duration>,
        f: impl FnOnce(&dyn KvSnapshot) -> StorageResult<R>,
    ) -> StorageResult<R> {
        let owner = std::thread::current()
            .name()
            .unwrap_or("anonymous")
            .to_owned();
        let (handle, snapshot) = self.create(owner, ttl)?;
        let _guard = ReleaseGuard {
            core: &self.core,
            handle,
        };
        f(snapshot.as_ref())
    }

    /// Stops the sweeper and drops every live snapshot. Called when the store
    /// closes.
    pub fn shutdown(&self) {
        {
            let (stopped, condvar) = &*self.shutdown;
            *stopped.lock() = true;
            condvar.notify_all();
        }
        if let Some(handle) = self.sweeper.lock().take() {
            let _ = handle.join();
        }
        let handles: Vec<u64> = self.core.entries.lock().keys().copied().collect();
        for handle in handles {
            let _ = self.core.release(handle, ReleaseReason::OwnerDown);
        }
    }
}

impl Drop for SnapshotRegistry {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct ReleaseGuard<'a> {
    core: &'a RegistryCore,
    handle: u64,
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        let reason = if std::thread::panicking() {
            ReleaseReason::OwnerDown
        } else {
            ReleaseReason::Manual
        };
        // The sweeper may have expired the snapshot already.
        let _ = self.core.release(self.handle, reason);
    }
}

fn sweep_loop(
    core: Arc<RegistryCore>,
    shutdown: Arc<(Mutex<bool>, Condvar)>,
    interval: Duration,
) {
    let (stopped, condvar) = &*shutdown;
    let mut guard = stopped.lock();
    while !*guard {
        let _timeout = condvar.wait_for(&mut guard, interval);
        if *guard {
            break;
        }
        // Expire without holding the shutdown lock.
        drop(guard);
        core.expire();
        guard = stopped.lock();
    }
}
