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

//! End-to-end scenarios across the whole store.

use std::collections::HashSet;
use std::sync::Arc;

use pretty_assertions::assert_eq;
use trigon_common::config::StorageConfig;
use trigon_common::types::term_id::{decode_id, is_inline};
use trigon_common::types::{xsd, Term};

use crate::error::StorageError;
use crate::index::{Triple, TriplePattern};
use crate::stats::estimate_range_selectivity;
use crate::store::TripleStore;

fn memory_store() -> TripleStore {
    TripleStore::open_in_memory(StorageConfig::default()).unwrap()
}

fn triple(s: &str, p: &str, o: Term) -> (Term, Term, Term) {
    (Term::iri(s), Term::iri(p), o)
}

#[test]
fn test_single_triple_lifecycle() {
    let store = memory_store();
    let t = triple("http://ex/a", "http://ex/p", Term::plain_literal("v"));

    assert_eq!(store.insert(std::slice::from_ref(&t)).unwrap(), 1);
    assert!(store.contains(&t).unwrap());
    assert_eq!(store.statistics().refresh().unwrap().triple_count, 1);

    // One entry visible through each physical index.
    let ids = store
        .resolve_pattern(Some(&t.0), Some(&t.1), Some(&t.2))
        .unwrap()
        .unwrap();
    let (s, p, o) = (
        ids.subject.unwrap(),
        ids.predicate.unwrap(),
        ids.object.unwrap(),
    );
    for pattern in [
        TriplePattern::new(Some(s), None, None),
        TriplePattern::new(None, Some(p), None),
        TriplePattern::new(None, None, Some(o)),
    ] {
        assert_eq!(store.count_pattern(pattern).unwrap(), 1, "{pattern:?}");
    }

    // Lookup by subject returns the triple, materialised back into terms.
    let found: Vec<Triple> = store
        .lookup_pattern(TriplePattern::new(Some(s), None, None))
        .unwrap()
        .map(|t| t.unwrap())
        .collect();
    assert_eq!(found, vec![Triple::new(s, p, o)]);
    assert_eq!(store.materialize(found[0]).unwrap(), t);

    assert_eq!(store.delete(std::slice::from_ref(&t)).unwrap(), 1);
    assert_eq!(store.statistics().refresh().unwrap().triple_count, 0);
    assert_eq!(store.count_pattern(TriplePattern::any()).unwrap(), 0);
    // Deleting again is a no-op.
    assert_eq!(store.delete(std::slice::from_ref(&t)).unwrap(), 0);
}

#[test]
fn test_hundred_subject_statistics() {
    let store = memory_store();
    let triples: Vec<_> = (1..=100i64)
        .map(|i| {
            triple(
                &format!("http://ex/s{i}"),
                "http://ex/p",
                Term::typed_literal(i.to_string(), xsd::INTEGER),
            )
        })
        .collect();
    assert_eq!(store.insert(&triples).unwrap(), 100);

    let stats = store.statistics().get().unwrap();
    assert_eq!(stats.triple_count, 100);
    assert_eq!(stats.distinct_subjects, 100);
    assert_eq!(stats.distinct_predicates, 1);
    assert_eq!(stats.distinct_objects, 100);

    let p = store.lookup_id(&Term::iri("http://ex/p")).unwrap().unwrap();
    assert_eq!(stats.predicate_histogram[&p], 100);
    let histogram = &stats.numeric_histograms[&p];
    assert_eq!(histogram.min, 1.0);
    assert_eq!(histogram.max, 100.0);
    assert_eq!(histogram.bucket_count, 10);
    assert_eq!(histogram.buckets.iter().sum::<u64>(), 100);

    let full = estimate_range_selectivity(&stats, p, 1.0, 100.0);
    assert!(full > 0.99, "{full}");
    assert_eq!(estimate_range_selectivity(&stats, p, 200.0, 300.0), 0.0);
}

#[test]
fn test_concurrent_get_or_create_agrees() {
    let store = Arc::new(memory_store());
    let mut ids = Vec::new();
    std::thread::scope(|scope| {
        let handles: Vec<_> = (0..50)
            .map(|_| {
                let store = store.clone();
                scope.spawn(move || {
                    store
                        .get_or_create_id(&Term::iri("http://ex/shared"))
                        .unwrap()
                })
            })
            .collect();
        for handle in handles {
            ids.push(handle.join().unwrap());
        }
    });
    let distinct: HashSet<_> = ids.iter().collect();
    assert_eq!(distinct.len(), 1);
}

#[test]
fn test_snapshot_isolation_across_an_update() {
    let store = memory_store();
    let v1 = triple("http://ex/a", "http://ex/p", Term::plain_literal("v1"));
    let v2 = triple("http://ex/a", "http://ex/p", Term::plain_literal("v2"));
    store.insert(std::slice::from_ref(&v1)).unwrap();

    let pattern = store
        .resolve_pattern(Some(&v1.0), Some(&v1.1), None)
        .unwrap()
        .unwrap();
    let old_object = store.lookup_id(&v1.2).unwrap().unwrap();

    let (handle, snapshot) = store.snapshots().create("reader", None).unwrap();

    // Replace v1 with v2 through the transaction manager.
    let committed = store
        .transaction()
        .update(|ctx| {
            ctx.delete_terms(std::slice::from_ref(&v1))?;
            ctx.insert_terms(std::slice::from_ref(&v2))
        })
        .unwrap();
    assert_eq!(committed.net_changes, 2);

    // The pinned snapshot still sees the old object; a fresh lookup sees the
    // new one.
    let through_snapshot: Vec<Triple> = store
        .index()
        .lookup_in(snapshot.as_ref(), pattern)
        .unwrap()
        .map(|t| t.unwrap())
        .collect();
    assert_eq!(through_snapshot.len(), 1);
    assert_eq!(through_snapshot[0].object, old_object);

    let fresh: Vec<Triple> = store
        .lookup_pattern(pattern)
        .unwrap()
        .map(|t| t.unwrap())
        .collect();
    assert_eq!(fresh.len(), 1);
    let new_object = store.lookup_id(&v2.2).unwrap().unwrap();
    assert_eq!(fresh[0].object, new_object);

    store.snapshots().release(handle).unwrap();
    assert!(matches!(
        store.snapshots().release(handle),
        Err(StorageError::SnapshotReleased)
    ));
}

#[test]
fn test_restart_without_close_never_reuses_ids() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = StorageConfig::default();
    // Keep periodic flushing out of the picture; only the safety margin may
    // protect these allocations.
    config.sequence_flush_interval = 1 << 30;

    let (ids, highest) = {
        let store = TripleStore::open(dir.path(), config.clone()).unwrap();
        let ids: Vec<u64> = (0..100)
            .map(|i| {
                store
                    .get_or_create_id(&Term::iri(format!("http://ex/u{i}")))
                    .unwrap()
            })
            .collect();
        let highest = ids.iter().map(|&id| decode_id(id).1).max().unwrap();
        (ids, highest)
        // Dropped without close: a crash as far as the counters are
        // concerned.
    };

    let store = TripleStore::open(dir.path(), config).unwrap();
    // Existing terms keep their ids.
    assert_eq!(
        store
            .get_or_create_id(&Term::iri("http://ex/u0"))
            .unwrap(),
        ids[0]
    );
    // A new term gets a strictly greater sequence.
    let fresh = store
        .get_or_create_id(&Term::iri("http://ex/brand-new"))
        .unwrap();
    assert!(decode_id(fresh).1 > highest);
    store.close().unwrap();
}

#[test]
fn test_round_trip_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = TripleStore::open(dir.path(), StorageConfig::default()).unwrap();
    let terms = [
        Term::iri("http://ex/caf\u{00e9}"),
        Term::blank_node("b0"),
        Term::plain_literal("hello world"),
        Term::lang_literal("bonjour", "fr-ca"),
        Term::typed_literal("-17", xsd::INTEGER),
        Term::typed_literal("3.14", xsd::DECIMAL),
    ];
    for term in &terms {
        let id = store.get_or_create_id(term).unwrap();
        assert_eq!(store.lookup_term(id).unwrap(), *term, "term {term}");
    }
    // Inline literals stay inline on the durable backend too.
    let inline = store
        .get_or_create_id(&Term::typed_literal("42", xsd::INTEGER))
        .unwrap();
    assert!(is_inline(inline));
    store.close().unwrap();
}

#[test]
fn test_counter_state_backup_and_restore() {
    let backup_dir = tempfile::tempdir().unwrap();
    let source = memory_store();
    for i in 0..10 {
        source
            .get_or_create_id(&Term::iri(format!("http://ex/s{i}")))
            .unwrap();
    }
    source.export_counter_state(backup_dir.path()).unwrap();
    let exported = source.sequence().export();
    let uri_persisted = exported
        .counters
        .iter()
        .find(|r| r.kind == trigon_common::types::TermKind::Uri)
        .unwrap()
        .persisted_value;

    // Restore onto a fresh store: allocation resumes a safety margin past
    // the exported counters.
    let target = memory_store();
    assert!(target.restore_counter_state(backup_dir.path()).unwrap());
    let id = target
        .get_or_create_id(&Term::iri("http://ex/after-restore"))
        .unwrap();
    assert_eq!(
        decode_id(id).1,
        uri_persisted + crate::sequence::SAFETY_MARGIN
    );

    // A legacy backup without the side file is tolerated.
    let empty_backup = tempfile::tempdir().unwrap();
    let legacy = memory_store();
    assert!(!legacy.restore_counter_state(empty_backup.path()).unwrap());
}

#[test]
fn test_insert_and_delete_batches_net_out() {
    let store = memory_store();
    let a = triple("http://ex/a", "http://ex/p", Term::plain_literal("1"));
    let b = triple("http://ex/b", "http://ex/p", Term::plain_literal("2"));
    let c = triple("http://ex/c", "http://ex/p", Term::plain_literal("3"));

    assert_eq!(store.insert(&[a.clone(), b.clone()]).unwrap(), 2);
    // Re-inserting one, adding one.
    assert_eq!(store.insert(&[b.clone(), c.clone()]).unwrap(), 1);
    assert_eq!(store.count_pattern(TriplePattern::any()).unwrap(), 3);

    // Deleting a mix of present, absent and unknown-term triples.
    let ghost = triple("http://ex/ghost", "http://ex/p", Term::plain_literal("?"));
    assert_eq!(store.delete(&[a, ghost]).unwrap(), 1);
    assert_eq!(store.count_pattern(TriplePattern::any()).unwrap(), 2);
}

#[test]
fn test_random_interleaving_matches_set_semantics() {
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    let store = memory_store();
    let mut rng = SmallRng::seed_from_u64(0x7472_6f6e);
    let mut model: HashSet<Triple> = HashSet::new();
    let universe: Vec<(Term, Term, Term)> = (0..6)
        .flat_map(|s| {
            (0..2).flat_map(move |p| {
                (0..4).map(move |o| {
                    triple(
                        &format!("http://ex/s{s}"),
                        &format!("http://ex/p{p}"),
                        Term::typed_literal(o.to_string(), xsd::INTEGER),
                    )
                })
            })
        })
        .collect();

    for _ in 0..200 {
        let t = &universe[rng.gen_range(0..universe.len())];
        let ids = {
            let s = store.get_or_create_id(&t.0).unwrap();
            let p = store.get_or_create_id(&t.1).unwrap();
            let o = store.get_or_create_id(&t.2).unwrap();
            Triple::new(s, p, o)
        };
        if rng.gen_bool(0.6) {
            let inserted = store.insert(std::slice::from_ref(t)).unwrap();
            assert_eq!(inserted, u64::from(model.insert(ids)));
        } else {
            let removed = store.delete(std::slice::from_ref(t)).unwrap();
            assert_eq!(removed, u64::from(model.remove(&ids)));
        }
    }

    // The full scan returns exactly the model set, and all three physical
    // indexes agree on the cardinality.
    let scanned: HashSet<Triple> = store
        .lookup_pattern(TriplePattern::any())
        .unwrap()
        .map(|t| t.unwrap())
        .collect();
    assert_eq!(scanned, model);
    let stats = store.statistics().refresh().unwrap();
    assert_eq!(stats.triple_count, model.len() as u64);
    let by_predicate: u64 = stats.predicate_histogram.values().sum();
    assert_eq!(by_predicate, model.len() as u64);
    let by_object: u64 = {
        let objects: HashSet<u64> = model.iter().map(|t| t.object).collect();
        objects
            .into_iter()
            .map(|o| {
                store
                    .count_pattern(TriplePattern::new(None, None, Some(o)))
                    .unwrap()
            })
            .sum()
    };
    assert_eq!(by_object, model.len() as u64);
}

#[test]
fn test_with_snapshot_scoped_read() {
    let store = memory_store();
    let t = triple("http://ex/a", "http://ex/p", Term::plain_literal("v"));
    store.insert(std::slice::from_ref(&t)).unwrap();
    let count = store
        .with_snapshot(|snapshot| {
            let stream = store.index().lookup_in(snapshot, TriplePattern::any())?;
            Ok(stream.count())
        })
        .unwrap();
    assert_eq!(count, 1);
    assert_eq!(store.snapshots().live_count(), 0);
}
