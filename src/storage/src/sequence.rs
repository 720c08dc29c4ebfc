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

//! Crash-safe monotonic sequence numbers, one counter per dictionary term
//! kind.
//!
//! Counters live in memory and are flushed to the `seq` keyspace lazily. Two
//! rules make sequences non-reusable across a crash:
//!
//! * on startup the in-memory counter jumps [`SAFETY_MARGIN`] past the
//!   persisted value, skipping anything an interrupted run may have handed
//!   out without flushing;
//! * a sequence is never returned to a caller once it is `SAFETY_MARGIN` or
//!   more ahead of the persisted value without flushing first, so the margin
//!   always covers the unflushed window.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use byteorder::{BigEndian, ByteOrder};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use trigon_common::types::term_id::{encode_id, MAX_SEQUENCE};
use trigon_common::types::TermKind;

use crate::backend::{Keyspace, KvEngine, WriteBatch};
use crate::error::{StorageError, StorageResult};
use crate::monitor::StoreMetrics;

/// Gap by which the in-memory counter leads the persisted one across
/// restarts. Public so tests can assert the exact jump.
pub const SAFETY_MARGIN: u64 = 1000;

const SEQ_KEY_PREFIX: &str = "__seq_counter__";

fn seq_key(kind: TermKind) -> Vec<u8> {
    format!("{SEQ_KEY_PREFIX}{}", kind.as_str()).into_bytes()
}

fn kind_slot(kind: TermKind) -> usize {
    match kind {
        TermKind::Uri => 0,
        TermKind::BlankNode => 1,
        TermKind::Literal => 2,
    }
}

/// Exported counter state, the payload of the backup side file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterState {
    pub counters: Vec<CounterRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CounterRecord {
    pub kind: TermKind,
    pub persisted_value: u64,
}

#[derive(Debug, Default)]
struct KindState {
    next: AtomicU64,
    persisted: AtomicU64,
}

pub struct SequenceAllocator {
    engine: Arc<dyn KvEngine>,
    states: [KindState; 3],
    unflushed: AtomicU64,
    flush_interval: u64,
    flush_lock: Mutex<()>,
    metrics: Arc<StoreMetrics>,
}

impl SequenceAllocator {
    pub fn new(
        engine: Arc<dyn KvEngine>,
        flush_interval: u64,
        metrics: Arc<StoreMetrics>,
    ) -> StorageResult<Self> {
        let states: [KindState; 3] = Default::default();
        for kind in TermKind::ALL {
            let persisted = match engine.get(Keyspace::Seq, &seq_key(kind))? {
                Some(value) => BigEndian::read_u64(&value),
                None => 0,
            };
            let state = &states[kind_slot(kind)];
            state.persisted.store(persisted, Ordering::SeqCst);
            state.next.store(resume_point(persisted), Ordering::SeqCst);
        }
        Ok(Self {
            engine,
            states,
            unflushed: AtomicU64::new(0),
            flush_interval: flush_interval.max(1),
            flush_lock: Mutex::new(()),
            metrics,
        })
    }

    /// Issues a single id of the given kind, already carrying the type
    /// nibble.
    pub fn next_id(&self, kind: TermKind) -> StorageResult<u64> {
        let sequence = self.allocate(kind, 1)?;
        Ok(encode_id(kind, sequence))
    }

    /// Atomically reserves `count` consecutive sequences and returns the
    /// first one.
    pub fn allocate_range(&self, kind: TermKind, count: u64) -> StorageResult<u64> {
        if count == 0 {
            return Err(StorageError::InvalidCount(count));
        }
        let start = self.allocate(kind, count)?;
        self.metrics
            .sequence_range_counts
            .with_label_values(&[kind.as_str()])
            .inc();
        tracing::trace!(
            kind = kind.as_str(),
            start,
            count,
            "allocated sequence range"
        );
        Ok(start)
    }

    fn allocate(&self, kind: TermKind, count: u64) -> StorageResult<u64> {
        let state = &self.states[kind_slot(kind)];
        let start = state
            .next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |next| {
                let last = next.checked_add(count - 1)?;
                (last <= MAX_SEQUENCE).then(|| next + count)
            })
            .map_err(|_| StorageError::SequenceOverflow(kind))?;
        self.metrics
            .sequence_allocated_counts
            .with_label_values(&[kind.as_str()])
            .inc_by(count);

        let last = start + count - 1;
        let persisted = state.persisted.load(Ordering::SeqCst);
        if last >= persisted + SAFETY_MARGIN {
            // The margin no longer covers this allocation; a crash from here
            // on would reuse it. Flush before handing it out.
            self.flush()?;
        } else if self.unflushed.fetch_add(count, Ordering::Relaxed) + count
            >= self.flush_interval
        {
            self.flush()?;
        }
        Ok(start)
    }

    /// Persists every kind's counter in one synchronous atomic batch.
    pub fn flush(&self) -> StorageResult<()> {
        let _guard = self.flush_lock.lock();
        let mut batch = WriteBatch::new();
        let mut targets = [0u64; 3];
        for kind in TermKind::ALL {
            let state = &self.states[kind_slot(kind)];
            // `next - 1` is the largest sequence that may have been returned.
            let current = state.next.load(Ordering::SeqCst) - 1;
            targets[kind_slot(kind)] = current;
            batch.put(Keyspace::Seq, seq_key(kind), current.to_be_bytes().to_vec());
        }
        self.engine.write_batch(batch, true)?;
        for kind in TermKind::ALL {
            self.states[kind_slot(kind)]
                .persisted
                .store(targets[kind_slot(kind)], Ordering::SeqCst);
        }
        self.unflushed.store(0, Ordering::Relaxed);
        Ok(())
    }

    /// The largest sequence issued so far (or the resume point minus one if
    /// nothing was issued yet), clamped to [`MAX_SEQUENCE`].
    pub fn current(&self, kind: TermKind) -> u64 {
        let next = self.states[kind_slot(kind)].next.load(Ordering::SeqCst);
        (next - 1).min(MAX_SEQUENCE)
    }

    pub fn export(&self) -> CounterState {
        CounterState {
            counters: TermKind::ALL
                .iter()
                .map(|&kind| CounterRecord {
                    kind,
                    persisted_value: self.states[kind_slot(kind)]
                        .persisted
                        .load(Ordering::SeqCst),
                })
                .collect(),
        }
    }

    /// Installs counters from a backup side file and persists them. Kinds
    /// absent from the state keep their current position.
    pub fn import(&self, state: &CounterState) -> StorageResult<()> {
        for record in &state.counters {
            let slot = &self.states[kind_slot(record.kind)];
            slot.persisted.store(record.persisted_value, Ordering::SeqCst);
            slot.next
                .store(resume_point(record.persisted_value), Ordering::SeqCst);
        }
        self.flush()
    }
}

/// Where the in-memory counter resumes for a given persisted value. A fresh
/// kind starts at `SAFETY_MARGIN + 1` so payloads below the margin are never
/// issued.
fn resume_point(persisted: u64) -> u64 {
    if persisted == 0 {
        SAFETY_MARGIN + 1
    } else {
        persisted + SAFETY_MARGIN
    }
}

#[cfg(test)]
mod tests {
    use trigon_common::types::term_id::{decode_id, TermType};

    use super::*;
    use crate::backend::MemoryEngine;

    fn allocator(engine: Arc<dyn KvEngine>) -> SequenceAllocator {
        SequenceAllocator::new(engine, 64, StoreMetrics::for_test()).unwrap()
    }

    #[test]
    fn test_first_sequence_clears_the_margin() {
        let alloc = allocator(Arc::new(MemoryEngine::new()));
        let id = alloc.next_id(TermKind::Uri).unwrap();
        assert_eq!(decode_id(id), (TermType::Uri, SAFETY_MARGIN + 1));
        assert_eq!(alloc.current(TermKind::Uri), SAFETY_MARGIN + 1);
        // Kinds advance independently.
        assert_eq!(alloc.current(TermKind::Literal), SAFETY_MARGIN);
    }

    #[test]
    fn test_sequences_are_strictly_monotonic() {
        let alloc = allocator(Arc::new(MemoryEngine::new()));
        let mut previous = 0;
        for _ in 0..500 {
            let (_, sequence) = decode_id(alloc.next_id(TermKind::BlankNode).unwrap());
            assert!(sequence > previous);
            previous = sequence;
        }
    }

    #[test]
    fn test_allocate_range_rejects_zero() {
        let alloc = allocator(Arc::new(MemoryEngine::new()));
        assert!(matches!(
            alloc.allocate_range(TermKind::Uri, 0),
            Err(StorageError::InvalidCount(0))
        ));
    }

    #[test]
    fn test_concurrent_ranges_are_disjoint() {
        let alloc = Arc::new(allocator(Arc::new(MemoryEngine::new())));
        let mut starts = Vec::new();
        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..20)
                .map(|_| {
                    let alloc = alloc.clone();
                    scope.spawn(move || alloc.allocate_range(TermKind::Uri, 100).unwrap())
                })
                .collect();
            for handle in handles {
                starts.push(handle.join().unwrap());
            }
        });
        starts.sort_unstable();
        for window in starts.windows(2) {
            assert!(window[0] + 100 <= window[1], "ranges overlap: {starts:?}");
        }
    }

    #[test]
    fn test_restart_skips_unflushed_allocations() {
        let engine: Arc<dyn KvEngine> = Arc::new(MemoryEngine::new());
        let highest = {
            let alloc = SequenceAllocator::new(engine.clone(), 1 << 20, StoreMetrics::for_test())
                .unwrap();
            // No explicit flush; the mandatory-flush rule must still protect
            // whatever was handed out.
            let mut highest = 0;
            for _ in 0..100 {
                let (_, sequence) = decode_id(alloc.next_id(TermKind::Uri).unwrap());
                highest = highest.max(sequence);
            }
            highest
        };
        let alloc = allocator(engine);
        let (_, sequence) = decode_id(alloc.next_id(TermKind::Uri).unwrap());
        assert!(sequence > highest);
    }

    #[test]
    fn test_flush_and_reimport_round_trip() {
        let engine: Arc<dyn KvEngine> = Arc::new(MemoryEngine::new());
        let alloc = allocator(engine.clone());
        alloc.allocate_range(TermKind::Literal, 10).unwrap();
        alloc.flush().unwrap();
        let exported = alloc.export();

        let restored: Arc<dyn KvEngine> = Arc::new(MemoryEngine::new());
        let fresh = allocator(restored);
        fresh.import(&exported).unwrap();
        let (_, sequence) = decode_id(fresh.next_id(TermKind::Literal).unwrap());
        let persisted = exported
            .counters
            .iter()
            .find(|record| record.kind == TermKind::Literal)
            .unwrap()
            .persisted_value;
        assert_eq!(sequence, persisted + SAFETY_MARGIN);
    }

    #[test]
    fn test_overflow_rolls_back() {
        let alloc = allocator(Arc::new(MemoryEngine::new()));
        alloc
            .import(&CounterState {
                counters: vec![CounterRecord {
                    kind: TermKind::Uri,
                    persisted_value: MAX_SEQUENCE - SAFETY_MARGIN,
                }],
            })
            .unwrap();
        // The resume point is exactly MAX_SEQUENCE: one id left.
        let (_, sequence) = decode_id(alloc.next_id(TermKind::Uri).unwrap());
        assert_eq!(sequence, MAX_SEQUENCE);
        assert!(matches!(
            alloc.next_id(TermKind::Uri),
            Err(StorageError::SequenceOverflow(TermKind::Uri))
        ));
        assert_eq!(alloc.current(TermKind::Uri), MAX_SEQUENCE);
    }
}
