//! Aggregator: folds per-file results into one running state and computes the
//! final histogram and summary statistics.

use serde::Serialize;

use crate::error::EmptyResultError;
use crate::worker::{FileFailure, FileResult, FileStats};

// ---------------------------------------------------------------------------
// Running state
// ---------------------------------------------------------------------------

/// Everything folded in so far. Owned by the parent thread only.
///
/// `fold` and `merge` only append and add, so the finished report does not
/// depend on the order files completed in.
#[derive(Debug, Clone, Default)]
pub struct AggregateState {
    /// Files dispatched, whether or not a result ever arrived for them.
    files_expected: usize,
    values: Vec<f64>,
    stats: FileStats,
    files_succeeded: usize,
    failures: Vec<FileFailure>,
}

impl AggregateState {
    pub fn new() -> Self {
        Self::default()
    }

    /// State for a run that dispatched `files` tasks. `files_total` in the
    /// report is this count even if some results never arrive.
    pub fn with_files(files: usize) -> Self {
        Self {
            files_expected: files,
            ..Self::default()
        }
    }

    pub fn fold(&mut self, result: FileResult) {
        match result {
            FileResult::Matched { values, stats, .. } => {
                self.values.extend(values.iter().filter_map(|v| v.as_f64()));
                self.stats.merge(&stats);
                self.files_succeeded += 1;
            }
            FileResult::Failed(failure) => {
                log::warn!(
                    target: "regionstat::failures",
                    "file_path={} error={}",
                    failure.path.display(),
                    failure.error
                );
                self.failures.push(failure);
            }
        }
    }

    pub fn merge(&mut self, other: AggregateState) {
        self.files_expected += other.files_expected;
        self.values.extend(other.values);
        self.stats.merge(&other.stats);
        self.files_succeeded += other.files_succeeded;
        self.failures.extend(other.failures);
    }

    /// Numeric matched values folded so far.
    pub fn count(&self) -> usize {
        self.values.len()
    }

    /// Matched records, numeric or not.
    pub fn matched(&self) -> u64 {
        self.stats.matched
    }

    pub fn files_failed(&self) -> usize {
        self.failures.len()
    }

    pub fn finish(mut self) -> RunReport {
        self.values.sort_by(f64::total_cmp);
        self.failures.sort_by(|a, b| a.path.cmp(&b.path));

        let summary = Statistics::from_sorted(&self.values).ok();
        if summary.is_none() {
            log::warn!("{}", EmptyResultError);
        }

        let reported = self.files_succeeded + self.failures.len();
        if reported < self.files_expected {
            log::error!(
                "{} of {} files never reported a result",
                self.files_expected - reported,
                self.files_expected
            );
        }

        RunReport {
            files_total: self.files_expected.max(reported),
            files_succeeded: self.files_succeeded,
            files_failed: self.failures.len(),
            failures: self
                .failures
                .iter()
                .map(|f| FailureRecord {
                    file_path: f.path.display().to_string(),
                    error: f.error.to_string(),
                })
                .collect(),
            batches: self.stats.batches,
            records_read: self.stats.records_read,
            matched: self.stats.matched,
            malformed: self.stats.malformed,
            count: self.values.len(),
            summary,
        }
    }
}

// ---------------------------------------------------------------------------
// Final report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailureRecord {
    pub file_path: String,
    pub error: String,
}

/// What the run produced. `summary` is `None` when nothing matched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub files_total: usize,
    pub files_succeeded: usize,
    pub files_failed: usize,
    pub failures: Vec<FailureRecord>,
    pub batches: u64,
    pub records_read: u64,
    /// Records inside the boundary, including ones with a malformed value.
    pub matched: u64,
    pub malformed: u64,
    /// Numeric values the statistics are computed over.
    pub count: usize,
    pub summary: Option<Statistics>,
}

impl RunReport {
    pub fn is_empty(&self) -> bool {
        self.summary.is_none()
    }

    pub fn statistics(&self) -> Result<&Statistics, EmptyResultError> {
        self.summary.as_ref().ok_or(EmptyResultError)
    }
}

// ---------------------------------------------------------------------------
// Statistics and histogram
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Statistics {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub histogram: Histogram,
}

impl Statistics {
    pub fn from_values(values: &[f64]) -> Result<Self, EmptyResultError> {
        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        Self::from_sorted(&sorted)
    }

    /// `sorted` must be ascending. Summing in sorted order keeps the mean
    /// bit-identical however the values arrived.
    fn from_sorted(sorted: &[f64]) -> Result<Self, EmptyResultError> {
        let (Some(&min), Some(&max)) = (sorted.first(), sorted.last()) else {
            return Err(EmptyResultError);
        };
        let n = sorted.len();
        let mean = sorted.iter().sum::<f64>() / n as f64;
        let median = if n % 2 == 1 {
            sorted[n / 2]
        } else {
            (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
        };

        Ok(Statistics {
            count: n,
            min,
            max,
            mean,
            median,
            histogram: Histogram::build(sorted, min, max),
        })
    }
}

/// `edges` holds `bin_count` evenly spaced points from min to max; `counts`
/// has one entry per interval between consecutive edges, the last interval
/// closed on the right.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Histogram {
    pub bin_count: usize,
    pub edges: Vec<f64>,
    pub counts: Vec<u64>,
}

impl Histogram {
    fn build(values: &[f64], min: f64, max: f64) -> Self {
        let bin_count = sturges_bins(values.len());
        let edges = linspace(min, max, bin_count);
        let intervals = bin_count.saturating_sub(1).max(1);

        // A value on edge k belongs to interval k; max falls in the last one.
        let mut counts = vec![0u64; intervals];
        for &v in values {
            let idx = edges.partition_point(|&e| e <= v).saturating_sub(1);
            counts[idx.min(intervals - 1)] += 1;
        }

        Histogram {
            bin_count,
            edges,
            counts,
        }
    }

    /// Distance between consecutive edges (0 when there is only one).
    pub fn bin_width(&self) -> f64 {
        match self.edges.as_slice() {
            [first, second, ..] => second - first,
            _ => 0.0,
        }
    }

    /// `(lower, upper, count)` per interval.
    pub fn intervals(&self) -> Vec<(f64, f64, u64)> {
        if self.edges.len() < 2 {
            let edge = self.edges.first().copied().unwrap_or(0.0);
            return self.counts.iter().map(|&c| (edge, edge, c)).collect();
        }
        self.edges
            .windows(2)
            .zip(&self.counts)
            .map(|(w, &c)| (w[0], w[1], c))
            .collect()
    }
}

/// Sturges' rule: `ceil(log2(n)) + 1`. `n` must be positive.
pub fn sturges_bins(n: usize) -> usize {
    (n as f64).log2().ceil() as usize + 1
}

/// `num` evenly spaced points from `start` to `stop`, both included.
pub fn linspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    match num {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (num - 1) as f64;
            (0..num)
                .map(|i| if i == num - 1 { stop } else { start + step * i as f64 })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use proptest::prelude::*;

    use super::*;
    use crate::data::model::MeasuredValue;
    use crate::error::{FileAccessError, FileError};

    fn matched(name: &str, values: &[f64]) -> FileResult {
        FileResult::Matched {
            path: PathBuf::from(name),
            values: values.iter().map(|&v| MeasuredValue::Number(v)).collect(),
            stats: FileStats {
                batches: 1,
                records_read: values.len() as u64 * 2,
                matched: values.len() as u64,
                malformed: 0,
            },
        }
    }

    fn failed(name: &str) -> FileResult {
        FileResult::Failed(FileFailure {
            path: PathBuf::from(name),
            error: FileError::Access(FileAccessError::Open {
                path: PathBuf::from(name),
                reason: "gone".into(),
            }),
        })
    }

    #[test]
    fn sturges_rule() {
        assert_eq!(sturges_bins(1), 1);
        assert_eq!(sturges_bins(2), 2);
        assert_eq!(sturges_bins(6), 4);
        assert_eq!(sturges_bins(8), 4);
        assert_eq!(sturges_bins(9), 5);
        assert_eq!(sturges_bins(1000), 11);
    }

    #[test]
    fn linspace_includes_both_ends() {
        assert_eq!(linspace(0.0, 1.0, 5), vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(linspace(3.0, 9.0, 1), vec![3.0]);
        assert!(linspace(0.0, 1.0, 0).is_empty());
    }

    #[test]
    fn statistics_over_six_values() {
        let stats = Statistics::from_values(&[6.0, 1.0, 5.0, 2.0, 4.0, 3.0]).unwrap();
        assert_eq!(stats.count, 6);
        assert_eq!((stats.min, stats.max), (1.0, 6.0));
        assert_eq!(stats.mean, 3.5);
        assert_eq!(stats.median, 3.5);

        let h = &stats.histogram;
        assert_eq!(h.bin_count, 4);
        assert_eq!(h.edges, vec![1.0, 1.0 + 5.0 / 3.0, 1.0 + 10.0 / 3.0, 6.0]);
        assert_eq!(h.counts.len(), 3);
        assert_eq!(h.counts.iter().sum::<u64>(), 6);
        assert_eq!(h.counts, vec![2, 2, 2]);
    }

    #[test]
    fn odd_median_and_single_value() {
        assert_eq!(Statistics::from_values(&[9.0, 1.0, 4.0]).unwrap().median, 4.0);

        let one = Statistics::from_values(&[7.5]).unwrap();
        assert_eq!(one.histogram.bin_count, 1);
        assert_eq!(one.histogram.edges, vec![7.5]);
        assert_eq!(one.histogram.counts, vec![1]);
        assert_eq!(one.histogram.bin_width(), 0.0);
    }

    #[test]
    fn identical_values_share_one_interval() {
        let stats = Statistics::from_values(&[2.0; 5]).unwrap();
        assert_eq!(stats.histogram.bin_count, 4);
        assert_eq!(stats.histogram.counts, vec![0, 0, 5]);
    }

    #[test]
    fn values_on_edges_land_in_the_interval_they_open() {
        let grid = linspace(0.1, 0.2, 5);
        let mut values = vec![grid[0]; 5];
        values.extend_from_slice(&grid[1..]);

        let h = Statistics::from_values(&values).unwrap().histogram;
        assert_eq!(h.edges, grid);
        assert_eq!(h.counts, vec![5, 1, 1, 2]);
    }

    #[test]
    fn quarter_steps_follow_the_published_edges() {
        // 17 values, 6 edges with a step of 0.35
        let values: Vec<f64> = (0..17).map(|i| 10.0 + f64::from(i % 8) * 0.25).collect();
        let h = Statistics::from_values(&values).unwrap().histogram;
        for (lower, upper, count) in h.intervals() {
            let last = upper == *h.edges.last().unwrap();
            let expected = values
                .iter()
                .filter(|&&v| v >= lower && (v < upper || (last && v <= upper)))
                .count() as u64;
            assert_eq!(count, expected, "interval [{lower}, {upper}]");
        }
    }

    #[test]
    fn empty_input_is_an_error() {
        assert_eq!(Statistics::from_values(&[]), Err(EmptyResultError));
    }

    #[test]
    fn failures_contribute_nothing() {
        let mut state = AggregateState::new();
        state.fold(matched("a", &[1.0, 2.0]));
        state.fold(failed("b"));
        state.fold(matched("c", &[3.0, 4.0, 5.0, 6.0]));

        assert_eq!(state.count(), 6);
        assert_eq!(state.files_failed(), 1);
        let report = state.finish();
        assert_eq!(report.files_total, 3);
        assert_eq!(report.files_succeeded, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].file_path, "b");
        assert_eq!(report.count, 6);
        assert_eq!(report.statistics().unwrap().median, 3.5);
    }

    #[test]
    fn files_total_counts_dispatched_tasks() {
        let mut state = AggregateState::with_files(3);
        state.fold(matched("a", &[1.0]));
        state.fold(failed("b"));
        let report = state.finish();
        assert_eq!(report.files_total, 3);
        assert_eq!(report.files_succeeded, 1);
        assert_eq!(report.files_failed, 1);
    }

    #[test]
    fn missing_values_are_counted_but_not_summarised() {
        let mut state = AggregateState::new();
        state.fold(FileResult::Matched {
            path: PathBuf::from("a"),
            values: vec![
                MeasuredValue::Number(0.0),
                MeasuredValue::Missing,
                MeasuredValue::Number(10.0),
            ],
            stats: FileStats {
                batches: 1,
                records_read: 3,
                matched: 3,
                malformed: 1,
            },
        });
        let report = state.finish();
        assert_eq!(report.matched, 3);
        assert_eq!(report.malformed, 1);
        assert_eq!(report.count, 2);
        assert_eq!(report.statistics().unwrap().mean, 5.0);
    }

    #[test]
    fn nothing_matched_reports_empty() {
        let mut state = AggregateState::new();
        state.fold(matched("a", &[]));
        state.fold(matched("b", &[]));
        let report = state.finish();
        assert!(report.is_empty());
        assert_eq!(report.count, 0);
        assert_eq!(report.files_succeeded, 2);
        assert_eq!(report.statistics(), Err(EmptyResultError));
    }

    fn arb_results() -> impl Strategy<Value = Vec<FileResult>> {
        prop::collection::vec(
            prop_oneof![
                prop::collection::vec(-1000.0f64..1000.0, 0..20).prop_map(|v| (false, v)),
                Just((true, Vec::<f64>::new())),
            ],
            0..12,
        )
        .prop_map(|files| {
            files
                .into_iter()
                .enumerate()
                .map(|(i, (fail, values))| {
                    let name = format!("f{i}");
                    if fail {
                        failed(&name)
                    } else {
                        matched(&name, &values)
                    }
                })
                .collect()
        })
    }

    proptest! {
        #[test]
        fn fold_is_order_independent(
            (results, shuffled) in arb_results()
                .prop_flat_map(|r| (Just(r.clone()), Just(r).prop_shuffle()))
        ) {
            let mut forward = AggregateState::new();
            for r in results.clone() {
                forward.fold(r);
            }
            let mut permuted = AggregateState::new();
            for r in shuffled {
                permuted.fold(r);
            }
            let expected: usize = results
                .iter()
                .map(|r| match r {
                    FileResult::Matched { values, .. } => values.len(),
                    FileResult::Failed(_) => 0,
                })
                .sum();
            prop_assert_eq!(forward.count(), expected);
            prop_assert_eq!(forward.finish(), permuted.finish());
        }

        #[test]
        fn merge_matches_single_fold(results in arb_results(), split in 0usize..12) {
            let split = split.min(results.len());
            let mut whole = AggregateState::new();
            let mut left = AggregateState::new();
            let mut right = AggregateState::new();
            for (i, r) in results.into_iter().enumerate() {
                whole.fold(r.clone());
                if i < split { left.fold(r) } else { right.fold(r) }
            }
            right.merge(left);
            prop_assert_eq!(whole.finish(), right.finish());
        }

        #[test]
        fn histogram_shape_follows_sturges(values in prop::collection::vec(-1e6f64..1e6, 1..500)) {
            let stats = Statistics::from_values(&values).unwrap();
            let h = &stats.histogram;
            prop_assert_eq!(h.bin_count, sturges_bins(values.len()));
            prop_assert_eq!(h.edges.len(), h.bin_count);
            prop_assert_eq!(h.edges[0], stats.min);
            prop_assert_eq!(*h.edges.last().unwrap(), stats.max);
            prop_assert_eq!(h.counts.iter().sum::<u64>(), values.len() as u64);
        }

        #[test]
        fn counts_agree_with_edges(steps in prop::collection::vec(0u32..40, 1..200)) {
            // Values on a 0.1 grid, so many of them coincide with edges.
            let values: Vec<f64> = steps.iter().map(|&s| f64::from(s) * 0.1).collect();
            let h = Statistics::from_values(&values).unwrap().histogram;
            let last = h.counts.len() - 1;
            let mut expected = vec![0u64; h.counts.len()];
            for &v in &values {
                let k = (0..last)
                    .find(|&k| v >= h.edges[k] && v < h.edges[k + 1])
                    .unwrap_or(last);
                expected[k] += 1;
            }
            prop_assert_eq!(&h.counts, &expected);
        }
    }
}
