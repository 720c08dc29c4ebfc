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

use std::sync::{Arc, LazyLock};

use prometheus::core::{AtomicU64, GenericCounter, GenericCounterVec};
use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry, Registry,
};

/// Why a snapshot left the registry, used as a label value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    Manual,
    OwnerDown,
    TtlExpired,
}

impl ReleaseReason {
    pub fn as_str(self) -> &'static str {
        match self {
            ReleaseReason::Manual => "manual",
            ReleaseReason::OwnerDown => "owner_down",
            ReleaseReason::TtlExpired => "ttl_expired",
        }
    }
}

/// [`StoreMetrics`] collects the counters of the storage core: dictionary
/// cache effectiveness, id allocation, snapshot lifecycle and the write
/// paths. Everything is monotonic; rates are derived at query time.
#[derive(Debug)]
pub struct StoreMetrics {
    pub dict_cache_hit_counts: GenericCounterVec<AtomicU64>,
    pub dict_cache_miss_counts: GenericCounterVec<AtomicU64>,
    pub dict_create_counts: GenericCounterVec<AtomicU64>,
    pub sequence_allocated_counts: GenericCounterVec<AtomicU64>,
    pub sequence_range_counts: GenericCounterVec<AtomicU64>,
    pub snapshot_created_counts: GenericCounter<AtomicU64>,
    pub snapshot_released_counts: GenericCounterVec<AtomicU64>,
    pub index_insert_counts: GenericCounter<AtomicU64>,
    pub index_delete_counts: GenericCounter<AtomicU64>,
    pub txn_commit_counts: GenericCounter<AtomicU64>,
    pub txn_abort_counts: GenericCounter<AtomicU64>,
}

pub static GLOBAL_STORE_METRICS: LazyLock<Arc<StoreMetrics>> =
    LazyLock::new(|| Arc::new(StoreMetrics::new(prometheus::default_registry())));

impl StoreMetrics {
    pub fn new(registry: &Registry) -> Self {
        let dict_cache_hit_counts = register_int_counter_vec_with_registry!(
            "storage_dict_cache_hit_counts",
            "Total number of dictionary reads served by the read cache",
            &["kind"],
            registry
        )
        .unwrap();

        let dict_cache_miss_counts = register_int_counter_vec_with_registry!(
            "storage_dict_cache_miss_counts",
            "Total number of dictionary reads that had to hop to the owning shard",
            &["kind"],
            registry
        )
        .unwrap();

        let dict_create_counts = register_int_counter_vec_with_registry!(
            "storage_dict_create_counts",
            "Total number of dictionary entries created",
            &["kind"],
            registry
        )
        .unwrap();

        let sequence_allocated_counts = register_int_counter_vec_with_registry!(
            "storage_sequence_allocated_counts",
            "Total number of sequence numbers issued",
            &["kind"],
            registry
        )
        .unwrap();

        let sequence_range_counts = register_int_counter_vec_with_registry!(
            "storage_sequence_range_counts",
            "Total number of range allocations",
            &["kind"],
            registry
        )
        .unwrap();

        let snapshot_created_counts = register_int_counter_with_registry!(
            "storage_snapshot_created_counts",
            "Total number of read snapshots created",
            registry
        )
        .unwrap();

        let snapshot_released_counts = register_int_counter_vec_with_registry!(
            "storage_snapshot_released_counts",
            "Total number of read snapshots released, by reason",
            &["reason"],
            registry
        )
        .unwrap();

        let index_insert_counts = register_int_counter_with_registry!(
            "storage_index_insert_counts",
            "Total number of triples newly inserted into the three indexes",
            registry
        )
        .unwrap();

        let index_delete_counts = register_int_counter_with_registry!(
            "storage_index_delete_counts",
            "Total number of triples removed from the three indexes",
            registry
        )
        .unwrap();

        let txn_commit_counts = register_int_counter_with_registry!(
            "storage_txn_commit_counts",
            "Total number of committed updates",
            registry
        )
        .unwrap();

        let txn_abort_counts = register_int_counter_with_registry!(
            "storage_txn_abort_counts",
            "Total number of aborted updates",
            registry
        )
        .unwrap();

        Self {
            dict_cache_hit_counts,
            dict_cache_miss_counts,
            dict_create_counts,
            sequence_allocated_counts,
            sequence_range_counts,
            snapshot_created_counts,
            snapshot_released_counts,
            index_insert_counts,
            index_delete_counts,
            txn_commit_counts,
            txn_abort_counts,
        }
    }

    /// Creates a new `StoreMetrics` instance unattached to the global
    /// registry, for tests.
    pub fn for_test() -> Arc<Self> {
        Arc::new(Self::new(&Registry::new()))
    }

    pub fn snapshot_released(&self, reason: ReleaseReason) {
        self.snapshot_released_counts
            .with_label_values(&[reason.as_str()])
            .inc();
    }
}
