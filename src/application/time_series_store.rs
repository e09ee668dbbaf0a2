// Time-series store - append-only indexed telemetry history with cached range queries
use crate::application::query_cache::QueryCache;
use crate::domain::series::SeriesPoint;
use crate::domain::telemetry::{TelemetryField, TelemetrySample};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

pub const DEFAULT_QUERY_CACHE_SIZE: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryFilter {
    pub start_time: Option<u64>,
    pub end_time: Option<u64>,
    /// Only applied together with `sort_by`.
    pub min_value: Option<f64>,
    /// Only applied together with `sort_by`.
    pub max_value: Option<f64>,
    pub fields: Option<Vec<TelemetryField>>,
    pub limit: Option<usize>,
    pub sort_by: Option<TelemetryField>,
    pub sort_direction: Option<SortDirection>,
}

impl QueryFilter {
    pub fn time_range(start_time: u64, end_time: u64) -> Self {
        Self {
            start_time: Some(start_time),
            end_time: Some(end_time),
            ..Self::default()
        }
    }

    /// Value bounds are keyed by their bit pattern so NaN and infinities
    /// never collide with an absent bound.
    fn cache_key(&self) -> String {
        format!(
            "{:?}|{:?}|{:?}|{:?}|{:?}|{:?}|{:?}|{:?}",
            self.start_time,
            self.end_time,
            self.min_value.map(f64::to_bits),
            self.max_value.map(f64::to_bits),
            self.fields,
            self.limit,
            self.sort_by,
            self.sort_direction,
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryRow {
    Full(TelemetrySample),
    Projected(BTreeMap<TelemetryField, f64>),
}

impl QueryRow {
    pub fn value(&self, field: TelemetryField) -> Option<f64> {
        match self {
            QueryRow::Full(sample) => Some(sample.value(field)),
            QueryRow::Projected(values) => values.get(&field).copied(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QueryResult {
    pub rows: Vec<QueryRow>,
    /// Matches before `limit` was applied.
    pub total: usize,
}

/// Nearest-preceding (or exact) match for a timestamp lookup.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimestampMatch {
    pub sample: TelemetrySample,
    /// Position in insertion order.
    pub index: usize,
    /// Position in timestamp order.
    pub position: usize,
    pub exact: bool,
}

/// Indexed, append-only telemetry history.
///
/// `sorted_timestamps[i]` always maps through `timestamp_map` to a sample in
/// `indexed_data` with that timestamp; the three structures always hold the
/// same number of entries and timestamps are unique.
pub struct TimeSeriesStore {
    indexed_data: Vec<TelemetrySample>,
    sorted_timestamps: Vec<u64>,
    timestamp_map: HashMap<u64, usize>,
    query_cache: QueryCache<QueryResult>,
}

impl TimeSeriesStore {
    pub fn new(query_cache_size: usize) -> Self {
        Self {
            indexed_data: Vec::new(),
            sorted_timestamps: Vec::new(),
            timestamp_map: HashMap::new(),
            query_cache: QueryCache::new(query_cache_size),
        }
    }

    pub fn len(&self) -> usize {
        self.indexed_data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indexed_data.is_empty()
    }

    pub fn time_span(&self) -> Option<(u64, u64)> {
        Some((
            *self.sorted_timestamps.first()?,
            *self.sorted_timestamps.last()?,
        ))
    }

    pub fn cached_queries(&self) -> usize {
        self.query_cache.len()
    }

    /// Merge new samples. Samples whose timestamp is already stored (or
    /// repeated within the batch) are discarded. Returns how many were added.
    pub fn insert<I>(&mut self, samples: I) -> usize
    where
        I: IntoIterator<Item = TelemetrySample>,
    {
        let mut inserted = 0;
        let mut needs_sort = false;

        for sample in samples {
            if self.timestamp_map.contains_key(&sample.timestamp) {
                continue;
            }

            let index = self.indexed_data.len();
            if self
                .sorted_timestamps
                .last()
                .is_some_and(|&last| last > sample.timestamp)
            {
                needs_sort = true;
            }
            self.timestamp_map.insert(sample.timestamp, index);
            self.sorted_timestamps.push(sample.timestamp);
            self.indexed_data.push(sample);
            inserted += 1;
        }

        if needs_sort {
            self.sorted_timestamps.sort_unstable();
        }

        if inserted > 0 {
            self.query_cache.clear();
            tracing::debug!(
                "Merged {} samples into time-series store ({} total)",
                inserted,
                self.len()
            );
        }

        inserted
    }

    /// Sample at a rank in timestamp order.
    pub fn sample_at_position(&self, position: usize) -> Option<&TelemetrySample> {
        let ts = self.sorted_timestamps.get(position)?;
        self.timestamp_map
            .get(ts)
            .and_then(|&idx| self.indexed_data.get(idx))
    }

    /// Exact or nearest-preceding sample for `timestamp`, in O(log n).
    pub fn query_by_timestamp(&self, timestamp: u64) -> Option<TimestampMatch> {
        let after = self.sorted_timestamps.partition_point(|&ts| ts <= timestamp);
        let position = after.checked_sub(1)?;
        let found = self.sorted_timestamps[position];
        let index = *self.timestamp_map.get(&found)?;

        Some(TimestampMatch {
            sample: self.indexed_data[index],
            index,
            position,
            exact: found == timestamp,
        })
    }

    /// Time bound, then value bound on `sort_by`, then sort, then limit, then project.
    pub fn query_range(&mut self, filter: &QueryFilter) -> Arc<QueryResult> {
        let key = filter.cache_key();
        if let Some(cached) = self.query_cache.get(&key) {
            return cached;
        }

        let result = Arc::new(self.execute(filter));
        self.query_cache.insert(key, result.clone());
        result
    }

    fn execute(&self, filter: &QueryFilter) -> QueryResult {
        let start = filter.start_time.unwrap_or(0);
        let end = filter.end_time.unwrap_or(u64::MAX);
        if self.is_empty() || start > end {
            return QueryResult::default();
        }

        let from = self.sorted_timestamps.partition_point(|&ts| ts < start);
        let to = self.sorted_timestamps.partition_point(|&ts| ts <= end);

        let mut matches: Vec<TelemetrySample> = self.sorted_timestamps[from..to]
            .iter()
            .filter_map(|ts| self.timestamp_map.get(ts))
            .map(|&idx| self.indexed_data[idx])
            .collect();

        if let Some(field) = filter.sort_by {
            if filter.min_value.is_some() || filter.max_value.is_some() {
                let min = filter.min_value.unwrap_or(f64::NEG_INFINITY);
                let max = filter.max_value.unwrap_or(f64::INFINITY);
                matches.retain(|s| {
                    let v = s.value(field);
                    v >= min && v <= max
                });
            }

            let direction = filter.sort_direction.unwrap_or_default();
            matches.sort_by(|a, b| {
                let ordering = a.value(field).total_cmp(&b.value(field));
                match direction {
                    SortDirection::Asc => ordering,
                    SortDirection::Desc => ordering.reverse(),
                }
            });
        } else if filter.sort_direction == Some(SortDirection::Desc) {
            matches.reverse();
        }

        let total = matches.len();
        if let Some(limit) = filter.limit {
            matches.truncate(limit);
        }

        let rows = match &filter.fields {
            Some(fields) => matches
                .iter()
                .map(|s| QueryRow::Projected(fields.iter().map(|&f| (f, s.value(f))).collect()))
                .collect(),
            None => matches.into_iter().map(QueryRow::Full).collect(),
        };

        QueryResult { rows, total }
    }

    /// Chart points for one field, x being the timestamp, in timestamp order.
    pub fn to_series(&self, field: TelemetryField) -> Vec<SeriesPoint> {
        self.sorted_timestamps
            .iter()
            .filter_map(|ts| self.timestamp_map.get(ts))
            .map(|&idx| {
                let sample = &self.indexed_data[idx];
                SeriesPoint::new(sample.timestamp as f64, sample.value(field))
            })
            .collect()
    }
}

impl Default for TimeSeriesStore {
    fn default() -> Self {
        Self::new(DEFAULT_QUERY_CACHE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(timestamp: u64, speed: f64) -> TelemetrySample {
        TelemetrySample::new(timestamp, speed, 50.0, 0.0, 4, 9000.0, false)
    }

    fn store_with(timestamps: &[u64]) -> TimeSeriesStore {
        let mut store = TimeSeriesStore::default();
        store.insert(timestamps.iter().map(|&ts| sample(ts, ts as f64 / 10.0)));
        store
    }

    fn assert_invariants(store: &TimeSeriesStore) {
        assert_eq!(store.indexed_data.len(), store.sorted_timestamps.len());
        assert_eq!(store.indexed_data.len(), store.timestamp_map.len());
        assert!(store.sorted_timestamps.windows(2).all(|w| w[0] < w[1]));
        for ts in &store.sorted_timestamps {
            let idx = store.timestamp_map[ts];
            assert_eq!(store.indexed_data[idx].timestamp, *ts);
        }
    }

    #[test]
    fn test_non_finite_bound_does_not_share_cache_entry() {
        let mut store = store_with(&[1000, 2000, 3000]);

        let nan_bound = QueryFilter {
            min_value: Some(f64::NAN),
            sort_by: Some(TelemetryField::Speed),
            ..QueryFilter::default()
        };
        let unbounded = QueryFilter {
            sort_by: Some(TelemetryField::Speed),
            ..QueryFilter::default()
        };
        assert_ne!(nan_bound.cache_key(), unbounded.cache_key());

        assert_eq!(store.query_range(&nan_bound).total, 0);
        assert_eq!(store.query_range(&unbounded).total, 3);
        assert_eq!(store.cached_queries(), 2);
    }

    #[test]
    fn test_insert_dedups_and_keeps_order() {
        let mut store = TimeSeriesStore::default();
        assert_eq!(store.insert(vec![sample(3000, 1.0), sample(1000, 2.0)]), 2);
        assert_invariants(&store);

        assert_eq!(
            store.insert(vec![sample(2000, 3.0), sample(1000, 9.0), sample(2000, 9.0)]),
            1
        );
        assert_invariants(&store);
        assert_eq!(store.len(), 3);

        // duplicate keeps the original value
        assert_eq!(store.query_by_timestamp(1000).unwrap().sample.speed, 2.0);
        assert_eq!(store.time_span(), Some((1000, 3000)));
    }

    #[test]
    fn test_nearest_preceding_lookup() {
        let store = store_with(&[1000, 2000, 3000, 5000]);

        let hit = store.query_by_timestamp(4000).unwrap();
        assert_eq!(hit.sample.timestamp, 3000);
        assert_eq!(hit.position, 2);
        assert!(!hit.exact);

        assert!(store.query_by_timestamp(5000).unwrap().exact);
        assert_eq!(store.query_by_timestamp(9999).unwrap().sample.timestamp, 5000);
        assert!(store.query_by_timestamp(999).is_none());
    }

    #[test]
    fn test_range_is_inclusive() {
        let mut store = store_with(&[1000, 2000, 3000, 4000, 5000]);
        let result = store.query_range(&QueryFilter::time_range(2000, 4000));

        let timestamps: Vec<f64> = result
            .rows
            .iter()
            .filter_map(|r| r.value(TelemetryField::Timestamp))
            .collect();
        assert_eq!(timestamps, vec![2000.0, 3000.0, 4000.0]);
        assert_eq!(result.total, 3);
    }

    #[test]
    fn test_empty_and_out_of_range_queries() {
        let mut empty = TimeSeriesStore::default();
        let result = empty.query_range(&QueryFilter::default());
        assert!(result.rows.is_empty());
        assert_eq!(result.total, 0);
        assert!(empty.query_by_timestamp(10).is_none());

        let mut store = store_with(&[1000, 2000]);
        assert!(store.query_range(&QueryFilter::time_range(5000, 6000)).rows.is_empty());
        assert!(store.query_range(&QueryFilter::time_range(2000, 1000)).rows.is_empty());
    }

    #[test]
    fn test_value_bound_sort_limit_and_projection() {
        let mut store = TimeSeriesStore::default();
        store.insert(vec![
            sample(1, 120.0),
            sample(2, 310.0),
            sample(3, 250.0),
            sample(4, 90.0),
            sample(5, 280.0),
        ]);

        let result = store.query_range(&QueryFilter {
            min_value: Some(100.0),
            max_value: Some(300.0),
            sort_by: Some(TelemetryField::Speed),
            sort_direction: Some(SortDirection::Desc),
            limit: Some(2),
            fields: Some(vec![TelemetryField::Timestamp, TelemetryField::Speed]),
            ..QueryFilter::default()
        });

        assert_eq!(result.total, 3);
        assert_eq!(result.rows.len(), 2);
        let speeds: Vec<f64> = result
            .rows
            .iter()
            .filter_map(|r| r.value(TelemetryField::Speed))
            .collect();
        assert_eq!(speeds, vec![280.0, 250.0]);
        assert_eq!(result.rows[0].value(TelemetryField::Rpm), None);
    }

    #[test]
    fn test_value_bound_ignored_without_sort_field() {
        let mut store = store_with(&[1000, 2000, 3000]);
        let result = store.query_range(&QueryFilter {
            min_value: Some(1_000_000.0),
            ..QueryFilter::default()
        });
        assert_eq!(result.total, 3);
    }

    #[test]
    fn test_cache_is_cleared_on_insert() {
        let mut store = store_with(&[1000, 2000]);
        let filter = QueryFilter::time_range(0, 10_000);

        let first = store.query_range(&filter);
        let second = store.query_range(&filter);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(store.cached_queries(), 1);

        store.insert(vec![sample(1000, 1.0)]);
        assert_eq!(store.cached_queries(), 1);

        store.insert(vec![sample(3000, 1.0)]);
        assert_eq!(store.cached_queries(), 0);
        assert_eq!(store.query_range(&filter).total, 3);
    }

    #[test]
    fn test_cache_is_bounded() {
        let mut store = TimeSeriesStore::new(2);
        store.insert(vec![sample(1, 1.0)]);
        for end in 0..5 {
            store.query_range(&QueryFilter::time_range(0, end));
        }
        assert_eq!(store.cached_queries(), 2);
    }

    #[test]
    fn test_series_follows_timestamp_order() {
        let store = store_with(&[3000, 1000, 2000]);
        let laps: Vec<f64> = store
            .to_series(TelemetryField::Speed)
            .iter()
            .map(|p| p.lap)
            .collect();
        assert_eq!(laps, vec![1000.0, 2000.0, 3000.0]);
        assert_eq!(store.sample_at_position(0).unwrap().timestamp, 1000);
    }
}
