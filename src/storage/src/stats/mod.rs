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

//! Planner statistics: exact counts, distinct cardinalities, per-predicate
//! histograms and numeric range histograms, persisted as a versioned JSON
//! blob in the `stats` keyspace.
//!
//! Distinct counts use skip-to-next-distinct-prefix seeks: after seeing a
//! key, the scan jumps straight past its leading 8 bytes instead of walking
//! every entry. Numeric histograms only consider inline-encoded objects;
//! dictionary-allocated literals are opaque to range estimation.
//!
//! Statistics are collected against a snapshot and drift afterwards:
//! deletions never compact a histogram, only `refresh` recomputes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwapOption;
use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use trigon_common::types::InlineValue;

use crate::backend::{next_key, Keyspace, KvEngine, KvRead};
use crate::error::{StorageError, StorageResult};

/// Current on-disk format. Version 1 predates `bucket_width` on histograms.
pub const STATS_VERSION: u32 = 2;

pub const DEFAULT_BUCKET_COUNT: u32 = 10;

const STATS_KEY: &[u8] = b"__statistics__";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumericHistogram {
    pub min: f64,
    pub max: f64,
    pub bucket_count: u32,
    /// Stored once at collection time; estimation must use this value, not a
    /// recomputation, so old blobs estimate the way they were built.
    pub bucket_width: f64,
    pub buckets: Vec<u64>,
    pub total_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Statistics {
    pub version: u32,
    /// Unix milliseconds.
    pub collected_at: u64,
    pub triple_count: u64,
    pub distinct_subjects: u64,
    pub distinct_predicates: u64,
    pub distinct_objects: u64,
    pub predicate_histogram: BTreeMap<u64, u64>,
    pub numeric_histograms: BTreeMap<u64, NumericHistogram>,
}

/// Collects and persists statistics; callers go through [`get`] for the
/// cached/persisted view and [`refresh`] to force recollection.
///
/// [`get`]: StatisticsManager::get
/// [`refresh`]: StatisticsManager::refresh
pub struct StatisticsManager {
    engine: Arc<dyn KvEngine>,
    cache: ArcSwapOption<Statistics>,
}

impl StatisticsManager {
    pub fn new(engine: Arc<dyn KvEngine>) -> Self {
        Self {
            engine,
            cache: ArcSwapOption::empty(),
        }
    }

    /// Collects fresh statistics against a consistent snapshot.
    pub fn collect(&self) -> StorageResult<Statistics> {
        let snapshot = self.engine.snapshot()?;
        collect_in(snapshot.as_ref())
    }

    pub fn save(&self, stats: &Statistics) -> StorageResult<()> {
        let blob = serde_json::to_vec(stats)
            .map_err(|e| StorageError::InvalidStatsStructure(e.to_string()))?;
        self.engine.put(Keyspace::Stats, STATS_KEY, &blob)
    }

    /// Loads the persisted blob, migrating older versions forward. A missing
    /// blob is `None`; a structurally broken one is an error.
    pub fn load(&self) -> StorageResult<Option<Statistics>> {
        let Some(blob) = self.engine.get(Keyspace::Stats, STATS_KEY)? else {
            return Ok(None);
        };
        let value: Value = serde_json::from_slice(&blob)
            .map_err(|e| StorageError::InvalidStatsStructure(e.to_string()))?;
        Ok(Some(migrate(value)?))
    }

    /// Persisted-or-collected: loads the saved blob if any, otherwise
    /// collects, saves and returns fresh statistics.
    pub fn get(&self) -> StorageResult<Arc<Statistics>> {
        if let Some(cached) = self.cache.load_full() {
            return Ok(cached);
        }
        let stats = match self.load()? {
            Some(stats) => stats,
            None => {
                let stats = self.collect()?;
                self.save(&stats)?;
                stats
            }
        };
        let stats = Arc::new(stats);
        self.cache.store(Some(stats.clone()));
        Ok(stats)
    }

    /// Forces recollection and overwrites the persisted blob.
    pub fn refresh(&self) -> StorageResult<Arc<Statistics>> {
        let stats = Arc::new(self.collect()?);
        self.save(&stats)?;
        self.cache.store(Some(stats.clone()));
        Ok(stats)
    }

    /// Drops the cached view; the next `get` re-reads or recollects. Wired
    /// into the transaction manager's invalidation hooks.
    pub fn invalidate(&self) {
        self.cache.store(None);
    }

    /// On-demand numeric histogram for a single predicate.
    pub fn numeric_histogram(
        &self,
        predicate: u64,
        bucket_count: u32,
    ) -> StorageResult<Option<NumericHistogram>> {
        let snapshot = self.engine.snapshot()?;
        numeric_histogram(snapshot.as_ref(), predicate, bucket_count)
    }
}

/// Collects the full statistics record from one read view.
pub fn collect_in(reader: &(impl KvRead + ?Sized)) -> StorageResult<Statistics> {
    let triple_count = count_prefix(reader, Keyspace::Spo, &[])?;
    let distinct_subjects = distinct_leading(reader, Keyspace::Spo)?;
    let distinct_objects = distinct_leading(reader, Keyspace::Osp)?;
    let predicate_histogram = predicate_histogram(reader)?;
    let distinct_predicates = predicate_histogram.len() as u64;

    let mut numeric_histograms = BTreeMap::new();
    for &predicate in predicate_histogram.keys() {
        if let Some(histogram) = numeric_histogram(reader, predicate, DEFAULT_BUCKET_COUNT)? {
            numeric_histograms.insert(predicate, histogram);
        }
    }

    Ok(Statistics {
        version: STATS_VERSION,
        collected_at: unix_millis(),
        triple_count,
        distinct_subjects,
        distinct_predicates,
        distinct_objects,
        predicate_histogram,
        numeric_histograms,
    })
}

/// Exact count of keys under a prefix.
pub fn count_prefix(
    reader: &(impl KvRead + ?Sized),
    cf: Keyspace,
    prefix: &[u8],
) -> StorageResult<u64> {
    let mut count = 0;
    for kv in reader.prefix_iter(cf, prefix)? {
        kv?;
        count += 1;
    }
    Ok(count)
}

/// Counts distinct leading-8-byte ids of a keyspace by seeking past each one
/// instead of scanning its entries.
fn distinct_leading(reader: &(impl KvRead + ?Sized), cf: Keyspace) -> StorageResult<u64> {
    let mut distinct = 0;
    let mut cursor: Vec<u8> = Vec::new();
    loop {
        let mut iter = reader.iter_from(cf, &cursor)?;
        let Some(kv) = iter.next() else {
            break;
        };
        let (key, _) = kv?;
        if key.len() < 8 {
            return Err(StorageError::InvalidEncoding("triple key length"));
        }
        distinct += 1;
        cursor = next_key(&key[..8]);
        if cursor.is_empty() {
            break;
        }
    }
    Ok(distinct)
}

/// Per-predicate triple counts from `pos`. Keys are sorted, so each
/// predicate's entries form one contiguous run.
fn predicate_histogram(reader: &(impl KvRead + ?Sized)) -> StorageResult<BTreeMap<u64, u64>> {
    let mut histogram = BTreeMap::new();
    for kv in reader.prefix_iter(Keyspace::Pos, &[])? {
        let (key, _) = kv?;
        if key.len() < 8 {
            return Err(StorageError::InvalidEncoding("triple key length"));
        }
        let predicate = BigEndian::read_u64(&key[..8]);
        *histogram.entry(predicate).or_insert(0) += 1;
    }
    Ok(histogram)
}

/// Builds an equi-width histogram over the inline numeric objects of one
/// predicate, or `None` when it has no numeric objects. Two bounded scans:
/// one for the extrema, one for the buckets.
pub fn numeric_histogram(
    reader: &(impl KvRead + ?Sized),
    predicate: u64,
    bucket_count: u32,
) -> StorageResult<Option<NumericHistogram>> {
    if bucket_count == 0 {
        return Err(StorageError::InvalidCount(0));
    }
    let prefix = predicate.to_be_bytes();

    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut total_count = 0u64;
    for kv in reader.prefix_iter(Keyspace::Pos, &prefix)? {
        let (key, _) = kv?;
        let Some(value) = numeric_object(&key)? else {
            continue;
        };
        min = min.min(value);
        max = max.max(value);
        total_count += 1;
    }
    if total_count == 0 {
        return Ok(None);
    }

    let bucket_width = (max - min) / bucket_count as f64;
    let mut buckets = vec![0u64; bucket_count as usize];
    for kv in reader.prefix_iter(Keyspace::Pos, &prefix)? {
        let (key, _) = kv?;
        let Some(value) = numeric_object(&key)? else {
            continue;
        };
        let slot = if bucket_width > 0.0 {
            (((value - min) / bucket_width) as usize).min(bucket_count as usize - 1)
        } else {
            0
        };
        buckets[slot] += 1;
    }

    Ok(Some(NumericHistogram {
        min,
        max,
        bucket_count,
        bucket_width,
        buckets,
        total_count,
    }))
}

/// The object id of a `pos` key, decoded if it is an inline numeric.
fn numeric_object(key: &[u8]) -> StorageResult<Option<f64>> {
    if key.len() != 24 {
        return Err(StorageError::InvalidEncoding("triple key length"));
    }
    let object = BigEndian::read_u64(&key[8..16]);
    Ok(InlineValue::decode(object).map(InlineValue::to_f64))
}

/// Fraction of a predicate's numeric objects expected to fall in `[lo, hi]`,
/// always in `[0, 1]`. Without a histogram the estimate is the conservative
/// `1.0`; a range entirely outside `[min, max]` is `0.0`; otherwise buckets
/// contribute their fractional overlap, using the *stored* bucket width.
pub fn estimate_range_selectivity(stats: &Statistics, predicate: u64, lo: f64, hi: f64) -> f64 {
    let Some(histogram) = stats.numeric_histograms.get(&predicate) else {
        return 1.0;
    };
    if histogram.total_count == 0 || lo > hi {
        return 0.0;
    }
    if hi < histogram.min || lo > histogram.max {
        return 0.0;
    }
    if histogram.bucket_width <= 0.0 {
        // All values sit on one point.
        return if lo <= histogram.min && histogram.min <= hi {
            1.0
        } else {
            0.0
        };
    }
    let mut selected = 0.0;
    for (slot, &count) in histogram.buckets.iter().enumerate() {
        let bucket_lo = histogram.min + slot as f64 * histogram.bucket_width;
        let bucket_hi = bucket_lo + histogram.bucket_width;
        let overlap = (hi.min(bucket_hi) - lo.max(bucket_lo)) / histogram.bucket_width;
        if overlap > 0.0 {
            selected += overlap.min(1.0) * count as f64;
        }
    }
    (selected / histogram.total_count as f64).clamp(0.0, 1.0)
}

/// Forward-only migration pipeline keyed on the stored version. Each step
/// either derives a missing field or rejects the blob.
fn migrate(mut value: Value) -> StorageResult<Statistics> {
    let invalid = |reason: &str| StorageError::InvalidStatsStructure(reason.to_string());
    let object = value
        .as_object_mut()
        .ok_or_else(|| invalid("blob is not an object"))?;
    let version = object
        .get("version")
        .and_then(Value::as_u64)
        .ok_or_else(|| invalid("missing or non-numeric version"))?;
    if version == 0 || version > STATS_VERSION as u64 {
        return Err(invalid(&format!("unsupported version {version}")));
    }

    if version < 2 {
        // v1 histograms were stored without their bucket width.
        if let Some(histograms) = object
            .get_mut("numeric_histograms")
            .and_then(Value::as_object_mut)
        {
            for (predicate, histogram) in histograms {
                let histogram = histogram
                    .as_object_mut()
                    .ok_or_else(|| invalid("histogram is not an object"))?;
                if histogram.contains_key("bucket_width") {
                    continue;
                }
                let field = |name: &str| {
                    histogram.get(name).and_then(Value::as_f64).ok_or_else(|| {
                        invalid(&format!("histogram for {predicate} missing {name}"))
                    })
                };
                let (min, max, bucket_count) = (field("min")?, field("max")?, field("bucket_count")?);
                let width = if bucket_count > 0.0 {
                    (max - min) / bucket_count
                } else {
                    0.0
                };
                histogram.insert("bucket_width".to_owned(), width.into());
            }
        }
        object.insert("version".to_owned(), STATS_VERSION.into());
    }

    serde_json::from_value(value).map_err(|e| StorageError::InvalidStatsStructure(e.to_string()))
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use trigon_common::types::Term;

    use super::*;
    use crate::backend::MemoryEngine;
    use crate::dict::Dictionary;
    use crate::index::{Triple, TripleIndex};
    use crate::monitor::StoreMetrics;
    use crate::sequence::SequenceAllocator;

    struct Fixture {
        engine: Arc<dyn KvEngine>,
        dict: Dictionary,
        index: TripleIndex,
    }

    fn fixture() -> Fixture {
        let engine: Arc<dyn KvEngine> = Arc::new(MemoryEngine::new());
        let metrics = StoreMetrics::for_test();
        let sequence =
            Arc::new(SequenceAllocator::new(engine.clone(), 64, metrics.clone()).unwrap());
        Fixture {
            engine: engine.clone(),
            dict: Dictionary::new(engine.clone(), sequence, 2, 1 << 16, metrics.clone()),
            index: TripleIndex::new(engine, metrics),
        }
    }

    /// 100 triples `<s{i}> <p> "i"^^xsd:integer`, the seed of the planner
    /// statistics checks.
    fn populate(fixture: &Fixture) -> u64 {
        let predicate = fixture
            .dict
            .get_or_create_id(&Term::iri("http://ex/p"))
            .unwrap();
        for i in 1..=100i64 {
            let subject = fixture
                .dict
                .get_or_create_id(&Term::iri(format!("http://ex/s{i}")))
                .unwrap();
            let object = fixture
                .dict
                .get_or_create_id(&Term::typed_literal(
                    i.to_string(),
                    trigon_common::types::xsd::INTEGER,
                ))
                .unwrap();
            fixture
                .index
                .insert(Triple::new(subject, predicate, object))
                .unwrap();
        }
        predicate
    }

    #[test]
    fn test_collect_counts_and_histograms() {
        let fixture = fixture();
        let predicate = populate(&fixture);
        let manager = StatisticsManager::new(fixture.engine.clone());
        let stats = manager.refresh().unwrap();

        assert_eq!(stats.version, STATS_VERSION);
        assert_eq!(stats.triple_count, 100);
        assert_eq!(stats.distinct_subjects, 100);
        assert_eq!(stats.distinct_predicates, 1);
        assert_eq!(stats.distinct_objects, 100);
        assert_eq!(stats.predicate_histogram[&predicate], 100);

        let histogram = &stats.numeric_histograms[&predicate];
        assert_eq!(histogram.min, 1.0);
        assert_eq!(histogram.max, 100.0);
        assert_eq!(histogram.bucket_count, DEFAULT_BUCKET_COUNT);
        assert_eq!(histogram.buckets.iter().sum::<u64>(), 100);
        assert_eq!(histogram.total_count, 100);
    }

    #[test]
    fn test_non_numeric_objects_are_ignored() {
        let fixture = fixture();
        let predicate = fixture
            .dict
            .get_or_create_id(&Term::iri("http://ex/name"))
            .unwrap();
        let subject = fixture
            .dict
            .get_or_create_id(&Term::iri("http://ex/s"))
            .unwrap();
        let object = fixture
            .dict
            .get_or_create_id(&Term::plain_literal("alice"))
            .unwrap();
        fixture
            .index
            .insert(Triple::new(subject, predicate, object))
            .unwrap();
        assert_eq!(
            numeric_histogram(fixture.engine.as_ref(), predicate, 10).unwrap(),
            None
        );
    }

    #[test]
    fn test_histogram_of_single_value() {
        let fixture = fixture();
        let subject = fixture
            .dict
            .get_or_create_id(&Term::iri("http://ex/s"))
            .unwrap();
        let predicate = fixture
            .dict
            .get_or_create_id(&Term::iri("http://ex/age"))
            .unwrap();
        let object = fixture
            .dict
            .get_or_create_id(&Term::typed_literal(
                "30",
                trigon_common::types::xsd::INTEGER,
            ))
            .unwrap();
        fixture
            .index
            .insert(Triple::new(subject, predicate, object))
            .unwrap();
        let histogram = numeric_histogram(fixture.engine.as_ref(), predicate, 10)
            .unwrap()
            .unwrap();
        assert_eq!(histogram.min, 30.0);
        assert_eq!(histogram.max, 30.0);
        assert_eq!(histogram.bucket_width, 0.0);
        assert_eq!(histogram.buckets[0], 1);
    }

    fn sample_stats() -> Statistics {
        Statistics {
            version: STATS_VERSION,
            collected_at: 0,
            triple_count: 100,
            distinct_subjects: 100,
            distinct_predicates: 1,
            distinct_objects: 100,
            predicate_histogram: BTreeMap::from([(7, 100)]),
            numeric_histograms: BTreeMap::from([(
                7,
                NumericHistogram {
                    min: 0.0,
                    max: 100.0,
                    bucket_count: 10,
                    bucket_width: 10.0,
                    buckets: vec![10; 10],
                    total_count: 100,
                },
            )]),
        }
    }

    #[test]
    fn test_selectivity_bounds() {
        let stats = sample_stats();
        // Unknown predicate: conservative 1.0.
        assert_eq!(estimate_range_selectivity(&stats, 99, 0.0, 1.0), 1.0);
        // Fully outside.
        assert_eq!(estimate_range_selectivity(&stats, 7, -10.0, -1.0), 0.0);
        assert_eq!(estimate_range_selectivity(&stats, 7, 101.0, 200.0), 0.0);
        // Full range.
        let full = estimate_range_selectivity(&stats, 7, 0.0, 100.0);
        assert!(full > 0.999, "{full}");
        // Half range.
        let half = estimate_range_selectivity(&stats, 7, 0.0, 50.0);
        assert!((half - 0.5).abs() < 1e-9, "{half}");
        // Partial bucket overlap stays proportional and bounded.
        let sliver = estimate_range_selectivity(&stats, 7, 0.0, 5.0);
        assert!((sliver - 0.05).abs() < 1e-9, "{sliver}");
        for (lo, hi) in [(-5.0, 3.0), (97.0, 1000.0), (42.0, 42.0)] {
            let estimate = estimate_range_selectivity(&stats, 7, lo, hi);
            assert!((0.0..=1.0).contains(&estimate));
        }
    }

    #[test]
    fn test_save_load_round_trip() {
        let fixture = fixture();
        populate(&fixture);
        let manager = StatisticsManager::new(fixture.engine.clone());
        assert!(manager.load().unwrap().is_none());
        let stats = manager.refresh().unwrap();
        let loaded = manager.load().unwrap().unwrap();
        assert_eq!(&loaded, &*stats);
    }

    #[test]
    fn test_get_caches_until_invalidated() {
        let fixture = fixture();
        populate(&fixture);
        let manager = StatisticsManager::new(fixture.engine.clone());
        let before = manager.get().unwrap();
        assert_eq!(before.triple_count, 100);

        // New triples are invisible until invalidation.
        let extra = Triple::new(1, 2, 3);
        fixture.index.insert(extra).unwrap();
        assert_eq!(manager.get().unwrap().triple_count, 100);

        manager.invalidate();
        // The persisted blob is also stale; only refresh recollects.
        assert_eq!(manager.get().unwrap().triple_count, 100);
        assert_eq!(manager.refresh().unwrap().triple_count, 101);
    }

    #[test]
    fn test_v1_blob_is_migrated() {
        let engine: Arc<dyn KvEngine> = Arc::new(MemoryEngine::new());
        let manager = StatisticsManager::new(engine.clone());
        let v1 = serde_json::json!({
            "version": 1,
            "collected_at": 123,
            "triple_count": 4,
            "distinct_subjects": 2,
            "distinct_predicates": 1,
            "distinct_objects": 4,
            "predicate_histogram": {"7": 4},
            "numeric_histograms": {
                "7": {
                    "min": 0.0,
                    "max": 40.0,
                    "bucket_count": 4,
                    "buckets": [1, 1, 1, 1],
                    "total_count": 4
                }
            }
        });
        engine
            .put(
                Keyspace::Stats,
                STATS_KEY,
                &serde_json::to_vec(&v1).unwrap(),
            )
            .unwrap();
        let stats = manager.load().unwrap().unwrap();
        assert_eq!(stats.version, STATS_VERSION);
        assert_eq!(stats.numeric_histograms[&7].bucket_width, 10.0);
    }

    #[test]
    fn test_broken_blob_is_rejected() {
        let engine: Arc<dyn KvEngine> = Arc::new(MemoryEngine::new());
        let manager = StatisticsManager::new(engine.clone());
        for blob in [
            serde_json::json!([1, 2, 3]),
            serde_json::json!({"triple_count": 1}),
            serde_json::json!({"version": 99, "triple_count": 1}),
            serde_json::json!({"version": 2, "triple_count": "not a number"}),
        ] {
            engine
                .put(
                    Keyspace::Stats,
                    STATS_KEY,
                    &serde_json::to_vec(&blob).unwrap(),
                )
                .unwrap();
            assert!(
                matches!(
                    manager.load(),
                    Err(StorageError::InvalidStatsStructure(_))
                ),
                "blob {blob}"
            );
        }
    }
}
