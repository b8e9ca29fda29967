//! Mergeable running statistics for benchmark measurements.
//!
//! [`BenchmarkResults`] keeps count, sum and sum of squares so two
//! accumulators can be combined in any order. With a granularity above one,
//! raw measurements are batched and each batch contributes its average as a
//! single sample, which damps coarse timer resolution.

use crate::error::{GasForgeError, Result};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Display;

/// Granularity used by keyed aggregators when none is given
pub const DEFAULT_GRANULARITY: u64 = 100;

#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkResults {
    granularity: u64,
    count: u64,
    sum: f64,
    squared_sum: f64,
    pending_sum: f64,
    pending_count: u64,
    samples: Option<Vec<f64>>,
}

/// Serializable summary of a [`BenchmarkResults`]
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResultsReport {
    pub count: u64,
    pub sum: f64,
    pub squared_sum: f64,
    pub granularity: u64,
    pub mean: f64,
    pub variance: f64,
    pub stdev: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub median: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub samples: Option<Vec<f64>>,
}

impl BenchmarkResults {
    /// A granularity of zero is treated as one.
    pub fn new(granularity: u64) -> Self {
        Self {
            granularity: granularity.max(1),
            count: 0,
            sum: 0.0,
            squared_sum: 0.0,
            pending_sum: 0.0,
            pending_count: 0,
            samples: None,
        }
    }

    /// Same as [`BenchmarkResults::new`] but also retains every committed sample
    pub fn with_samples(granularity: u64) -> Self {
        Self {
            samples: Some(Vec::new()),
            ..Self::new(granularity)
        }
    }

    pub fn add_measurement(&mut self, value: f64) {
        self.pending_sum += value;
        self.pending_count += 1;
        if self.pending_count >= self.granularity {
            self.commit_pending();
        }
    }

    fn commit_pending(&mut self) {
        let sample = self.pending_sum / self.pending_count as f64;
        self.commit(sample);
        self.pending_sum = 0.0;
        self.pending_count = 0;
    }

    fn commit(&mut self, sample: f64) {
        self.count += 1;
        self.sum += sample;
        self.squared_sum += sample * sample;
        if let Some(samples) = self.samples.as_mut() {
            samples.push(sample);
        }
    }

    /// Fold the committed samples of `other` into `self`. Both sides must
    /// share a granularity.
    ///
    /// Only committed samples are combined. A partial batch stays with the
    /// accumulator that received it, so merging is associative and
    /// commutative and no sample ever averages more than `granularity` values.
    pub fn merge(&mut self, other: &BenchmarkResults) -> Result<()> {
        if self.granularity != other.granularity {
            return Err(GasForgeError::MergeError {
                left: self.granularity,
                right: other.granularity,
            });
        }
        self.count += other.count;
        self.sum += other.sum;
        self.squared_sum += other.squared_sum;
        // a side without the raw series makes the merged series incomplete
        if other.samples.is_none() && other.count > 0 {
            self.samples = None;
        }
        if let (Some(mine), Some(theirs)) = (self.samples.as_mut(), other.samples.as_ref()) {
            mine.extend_from_slice(theirs);
        }
        Ok(())
    }

    pub fn granularity(&self) -> u64 {
        self.granularity
    }

    /// Raw measurements waiting for their batch to fill
    pub fn pending(&self) -> u64 {
        self.pending_count
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn squared_sum(&self) -> f64 {
        self.squared_sum
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum / self.count as f64
    }

    /// Population variance
    pub fn variance(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let mean = self.mean();
        (self.squared_sum / self.count as f64 - mean * mean).max(0.0)
    }

    pub fn stdev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Median of the committed samples, if they are retained
    pub fn median(&self) -> Option<f64> {
        let samples = self.samples.as_ref()?;
        if samples.is_empty() {
            return None;
        }
        let mut sorted = samples.clone();
        sorted.sort_by(f64::total_cmp);
        let mid = sorted.len() / 2;
        if sorted.len() % 2 == 0 {
            Some((sorted[mid - 1] + sorted[mid]) / 2.0)
        } else {
            Some(sorted[mid])
        }
    }

    pub fn samples(&self) -> Option<&[f64]> {
        self.samples.as_deref()
    }

    /// Summary; `full` also includes the raw sample series when retained
    pub fn report(&self, full: bool) -> ResultsReport {
        ResultsReport {
            count: self.count,
            sum: self.sum,
            squared_sum: self.squared_sum,
            granularity: self.granularity,
            mean: self.mean(),
            variance: self.variance(),
            stdev: self.stdev(),
            median: self.median(),
            samples: if full { self.samples.clone() } else { None },
        }
    }
}

impl Default for BenchmarkResults {
    fn default() -> Self {
        Self::new(1)
    }
}

/// Per-key aggregators sharing one granularity
#[derive(Debug, Clone)]
pub struct BenchmarkResultsMap<K: Ord> {
    results: BTreeMap<K, BenchmarkResults>,
    total_count: u64,
    granularity: u64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResultsMapReport {
    pub granularity: u64,
    pub total_count: u64,
    pub stats: BTreeMap<String, ResultsReport>,
}

impl<K: Ord + Clone + Display> BenchmarkResultsMap<K> {
    pub fn new(granularity: u64) -> Self {
        Self {
            results: BTreeMap::new(),
            total_count: 0,
            granularity: granularity.max(1),
        }
    }

    pub fn add_measurement(&mut self, key: &K, value: f64) {
        self.total_count += 1;
        let granularity = self.granularity;
        self.results
            .entry(key.clone())
            .or_insert_with(|| BenchmarkResults::new(granularity))
            .add_measurement(value);
    }

    pub fn merge(&mut self, other: &BenchmarkResultsMap<K>) -> Result<()> {
        if self.granularity != other.granularity {
            return Err(GasForgeError::MergeError {
                left: self.granularity,
                right: other.granularity,
            });
        }
        for (key, theirs) in &other.results {
            match self.results.get_mut(key) {
                Some(mine) => mine.merge(theirs)?,
                None => {
                    self.results.insert(key.clone(), theirs.clone());
                }
            }
        }
        self.total_count += other.total_count;
        Ok(())
    }

    pub fn total_count(&self) -> u64 {
        self.total_count
    }

    pub fn get(&self, key: &K) -> Option<&BenchmarkResults> {
        self.results.get(key)
    }

    pub fn is_empty(&self) -> bool {
        self.total_count == 0
    }

    pub fn report(&self, full: bool) -> ResultsMapReport {
        ResultsMapReport {
            granularity: self.granularity,
            total_count: self.total_count,
            stats: self
                .results
                .iter()
                .map(|(key, results)| (key.to_string(), results.report(full)))
                .collect(),
        }
    }
}

impl<K: Ord + Clone + Display> Default for BenchmarkResultsMap<K> {
    fn default() -> Self {
        Self::new(DEFAULT_GRANULARITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-9, "{} != {}", a, b);
    }

    #[test]
    fn test_add_measurement() {
        let mut results = BenchmarkResults::default();
        results.add_measurement(1.0);
        assert_eq!(results.count(), 1);
        results.add_measurement(2.0);
        assert_eq!(results.count(), 2);
        assert_eq!(results.sum(), 3.0);
        assert_eq!(results.squared_sum(), 5.0);
    }

    #[test]
    fn test_mean_and_stdev() {
        let mut results = BenchmarkResults::default();
        for i in 1..=7 {
            results.add_measurement(i as f64);
        }
        assert_close(results.mean(), 4.0);
        assert_close(results.stdev(), 2.0);
    }

    #[test]
    fn test_empty_is_zero() {
        let results = BenchmarkResults::new(3);
        assert_eq!(results.mean(), 0.0);
        assert_eq!(results.variance(), 0.0);
        assert_eq!(results.median(), None);
    }

    #[test]
    fn test_granularity_batches() {
        let mut results = BenchmarkResults::new(2);
        results.add_measurement(1.0);
        assert_eq!(results.count(), 0);
        results.add_measurement(2.0);
        assert_eq!(results.count(), 1);
        results.add_measurement(5.0);
        assert_eq!(results.count(), 1);
        results.add_measurement(1.0);
        assert_eq!(results.count(), 2);
        assert_close(results.mean(), 2.25);
    }

    #[test]
    fn test_merge_requires_equal_granularity() {
        let mut a = BenchmarkResults::new(1);
        let b = BenchmarkResults::new(2);
        match a.merge(&b) {
            Err(GasForgeError::MergeError { left, right }) => assert_eq!((left, right), (1, 2)),
            other => panic!("expected merge error, got {:?}", other),
        }
    }

    #[test]
    fn test_merge_is_commutative() {
        let mut a = BenchmarkResults::new(1);
        let mut b = BenchmarkResults::new(1);
        for v in [3.0, 9.0, 4.0] {
            a.add_measurement(v);
        }
        for v in [1.0, 2.0] {
            b.add_measurement(v);
        }
        let mut ab = a.clone();
        ab.merge(&b).unwrap();
        let mut ba = b.clone();
        ba.merge(&a).unwrap();
        assert_eq!(ab.count(), ba.count());
        assert_eq!(ab.sum(), ba.sum());
        assert_eq!(ab.squared_sum(), ba.squared_sum());
    }

    #[test]
    fn test_split_and_merge_matches_whole() {
        let values: Vec<f64> = (0..40).map(|i| ((i * 37) % 11) as f64 + 0.5).collect();
        let mut whole = BenchmarkResults::new(1);
        for v in &values {
            whole.add_measurement(*v);
        }
        for split in [0, 1, 17, 39, 40] {
            let mut left = BenchmarkResults::new(1);
            let mut right = BenchmarkResults::new(1);
            values[..split].iter().for_each(|v| left.add_measurement(*v));
            values[split..].iter().for_each(|v| right.add_measurement(*v));
            left.merge(&right).unwrap();
            assert_eq!(left.count(), whole.count());
            assert_close(left.mean(), whole.mean());
            assert_close(left.variance(), whole.variance());
        }
    }

    #[test]
    fn test_merge_is_associative() {
        let make = |values: &[f64]| {
            let mut r = BenchmarkResults::new(2);
            values.iter().for_each(|v| r.add_measurement(*v));
            r
        };
        let a = make(&[1.0, 3.0]);
        let b = make(&[2.0, 2.0, 8.0, 4.0]);
        let c = make(&[5.0, 7.0]);

        let mut left = a.clone();
        left.merge(&b).unwrap();
        left.merge(&c).unwrap();

        let mut bc = b.clone();
        bc.merge(&c).unwrap();
        let mut right = a.clone();
        right.merge(&bc).unwrap();

        assert_eq!(left.count(), right.count());
        assert_close(left.sum(), right.sum());
        assert_close(left.squared_sum(), right.squared_sum());
    }

    #[test]
    fn test_merge_keeps_partial_batches_local() {
        let mut a = BenchmarkResults::new(2);
        let mut b = BenchmarkResults::new(2);
        a.add_measurement(1.0);
        b.add_measurement(3.0);
        a.merge(&b).unwrap();
        assert_eq!(a.count(), 0);
        assert_eq!(a.pending(), 1);
        // the next value completes a's own batch only
        a.add_measurement(5.0);
        assert_eq!(a.count(), 1);
        assert_close(a.mean(), 3.0);
    }

    #[test]
    fn test_merge_with_partial_batches_is_associative() {
        let make = |value: f64| {
            let mut r = BenchmarkResults::new(2);
            r.add_measurement(value);
            r
        };
        let (a, b, c) = (make(1.0), make(3.0), make(5.0));

        let mut left = a.clone();
        left.merge(&b).unwrap();
        left.merge(&c).unwrap();

        let mut bc = b.clone();
        bc.merge(&c).unwrap();
        let mut right = a.clone();
        right.merge(&bc).unwrap();

        assert_eq!(left.count(), right.count());
        assert_eq!(left.sum(), right.sum());
        assert_eq!(left.squared_sum(), right.squared_sum());
        assert_eq!(left.pending(), right.pending());

        let mut ba = b.clone();
        ba.merge(&a).unwrap();
        let mut ab = a.clone();
        ab.merge(&b).unwrap();
        assert_eq!((ab.count(), ab.sum()), (ba.count(), ba.sum()));
    }

    #[test]
    fn test_median_with_samples() {
        let mut results = BenchmarkResults::with_samples(1);
        for v in [5.0, 1.0, 9.0, 3.0] {
            results.add_measurement(v);
        }
        assert_eq!(results.median(), Some(4.0));
        results.add_measurement(100.0);
        assert_eq!(results.median(), Some(5.0));
        assert_eq!(BenchmarkResults::new(1).median(), None);
    }

    #[test]
    fn test_report_fields() {
        let mut results = BenchmarkResults::with_samples(1);
        results.add_measurement(2.0);
        results.add_measurement(4.0);
        let json = serde_json::to_value(results.report(false)).unwrap();
        assert_eq!(json["count"], 2);
        assert_eq!(json["squaredSum"], 20.0);
        assert_eq!(json["mean"], 3.0);
        assert!(json.get("samples").is_none());
        let full = serde_json::to_value(results.report(true)).unwrap();
        assert_eq!(full["samples"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_results_map() {
        let mut map: BenchmarkResultsMap<String> = BenchmarkResultsMap::new(1);
        map.add_measurement(&"ADD".to_string(), 3.0);
        map.add_measurement(&"ADD".to_string(), 5.0);
        map.add_measurement(&"SUB".to_string(), 1.0);
        assert_eq!(map.total_count(), 3);
        assert_eq!(map.get(&"ADD".to_string()).unwrap().mean(), 4.0);

        let mut other: BenchmarkResultsMap<String> = BenchmarkResultsMap::new(1);
        other.add_measurement(&"SUB".to_string(), 3.0);
        map.merge(&other).unwrap();
        assert_eq!(map.total_count(), 4);
        assert_eq!(map.get(&"SUB".to_string()).unwrap().mean(), 2.0);

        let report = map.report(false);
        assert_eq!(report.stats.len(), 2);
        assert!(map.merge(&BenchmarkResultsMap::new(5)).is_err());
    }
}
