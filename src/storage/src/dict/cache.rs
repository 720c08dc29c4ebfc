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

use bytes::Bytes;

/// Concurrent read cache from canonical term encodings to term ids.
///
/// The cache is purely an accelerator: it may evict at any time and is never
/// consulted for correctness. Readers do not block writers.
pub struct TermCache {
    inner: moka::sync::Cache<Bytes, u64>,
}

impl TermCache {
    /// `capacity` is in entries; `0` leaves the cache unbounded.
    pub fn new(capacity: u64) -> Self {
        let mut builder = moka::sync::Cache::builder();
        if capacity > 0 {
            builder = builder.max_capacity(capacity);
        }
        Self {
            inner: builder.build(),
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<u64> {
        self.inner.get(key)
    }

    pub fn insert(&self, key: Bytes, id: u64) {
        self.inner.insert(key, id);
    }

    #[cfg(test)]
    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }
}
