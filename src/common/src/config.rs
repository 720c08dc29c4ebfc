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

use std::time::Duration;

use serde::Deserialize;

/// Tunables of the storage core. All fields have serde defaults so a partial
/// configuration file (or `StorageConfig::default()`) is always valid.
#[derive(Clone, Debug, Deserialize)]
pub struct StorageConfig {
    /// Number of dictionary shards. `0` means one per hardware thread.
    #[serde(default = "default::dictionary_shards")]
    pub dictionary_shards: usize,

    /// Capacity of the dictionary read cache in entries. `0` disables the
    /// bound (the cache may still evict under memory pressure).
    #[serde(default = "default::dictionary_cache_capacity")]
    pub dictionary_cache_capacity: u64,

    /// Number of id allocations between automatic flushes of the sequence
    /// counters.
    #[serde(default = "default::sequence_flush_interval")]
    pub sequence_flush_interval: u64,

    /// Default time-to-live of a read snapshot in seconds.
    #[serde(default = "default::snapshot_ttl_secs")]
    pub snapshot_ttl_secs: u64,

    /// Period of the snapshot sweeper tick in milliseconds.
    #[serde(default = "default::snapshot_cleanup_interval_ms")]
    pub snapshot_cleanup_interval_ms: u64,

    /// How long an update waits for the writer slot before giving up, in
    /// seconds.
    #[serde(default = "default::update_timeout_secs")]
    pub update_timeout_secs: u64,

    /// Advisory deadline for queries, in seconds.
    #[serde(default = "default::query_timeout_secs")]
    pub query_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            dictionary_shards: default::dictionary_shards(),
            dictionary_cache_capacity: default::dictionary_cache_capacity(),
            sequence_flush_interval: default::sequence_flush_interval(),
            snapshot_ttl_secs: default::snapshot_ttl_secs(),
            snapshot_cleanup_interval_ms: default::snapshot_cleanup_interval_ms(),
            update_timeout_secs: default::update_timeout_secs(),
            query_timeout_secs: default::query_timeout_secs(),
        }
    }
}

impl StorageConfig {
    pub fn resolved_dictionary_shards(&self) -> usize {
        if self.dictionary_shards > 0 {
            self.dictionary_shards
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        }
    }

    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.snapshot_ttl_secs)
    }

    pub fn snapshot_cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.snapshot_cleanup_interval_ms)
    }

    pub fn update_timeout(&self) -> Duration {
        Duration::from_secs(self.update_timeout_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}

pub mod default {
    pub fn dictionary_shards() -> usize {
        0
    }

    pub fn dictionary_cache_capacity() -> u64 {
        1 << 20
    }

    pub fn sequence_flush_interval() -> u64 {
        256
    }

    pub fn snapshot_ttl_secs() -> u64 {
        300
    }

    pub fn snapshot_cleanup_interval_ms() -> u64 {
        1000
    }

    pub fn update_timeout_secs() -> u64 {
        300
    }

    pub fn query_timeout_secs() -> u64 {
        120
    }
}
