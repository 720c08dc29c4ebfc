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

//! The storage and indexing core of the Trigon triple store.
//!
//! The crate is organised bottom-up:
//!
//! * [`backend`] — typed wrapper over an ordered KV store with named
//!   keyspaces (RocksDB in production, an in-memory map for tests);
//! * [`sequence`] — crash-safe monotonic id allocation;
//! * [`dict`] — the sharded term dictionary with its read cache;
//! * [`index`] — the three-ordering triple index;
//! * [`stats`] — planner statistics with persistence and migration;
//! * [`snapshot`] — the registry of live read snapshots;
//! * [`transaction`] — writer serialisation and atomic commit;
//! * [`store`] — the façade wiring it all together.

pub mod backend;
pub mod backup;
pub mod dict;
pub mod error;
pub mod index;
pub mod monitor;
pub mod sequence;
pub mod snapshot;
pub mod stats;
pub mod store;
pub mod transaction;

pub use error::{StorageError, StorageResult};
pub use index::{Triple, TriplePattern};
pub use store::TripleStore;

#[cfg(test)]
mod store_tests;
