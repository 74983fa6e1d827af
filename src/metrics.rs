//! Latency and recall statistics for benchmark runs.
//!
//! # Per-query breakdown
//!
//! A [`LatencyBreakdown`] is filled stage by stage while a query runs:
//!
//! ```ignore
//! let mut timer = QueryTimer::start();
//! let predicate = resolve(&caller, policies, store)?;
//! timer.resolved();
//! let targets = snapshot.select(&predicate, scope)?;
//! timer.selected();
//! // ...
//! let breakdown = timer.finish();
//! println!("{}", breakdown.summary());
//! ```
//!
//! # Aggregates
//!
//! [`LatencyStats::from_samples`] reduces many measurements to mean and
//! nearest-rank percentiles.

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Duration in milliseconds.
#[inline]
pub fn ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Time spent in each stage of one query, in milliseconds.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyBreakdown {
    pub resolve_ms: f64,
    pub select_ms: f64,
    /// Wall time of the partition fan-out, rebuilds excluded.
    pub search_ms: f64,
    /// Synchronous index rebuilds charged to this query.
    pub rebuild_ms: f64,
    pub aggregate_ms: f64,
    pub total_ms: f64,
}

impl LatencyBreakdown {
    pub fn summary(&self) -> String {
        format!(
            "LatencyBreakdown:\n  \
             Total: {:.3}ms\n  \
             Resolve: {:.3}ms, Select: {:.3}ms\n  \
             Search: {:.3}ms (rebuild: {:.3}ms)\n  \
             Aggregate: {:.3}ms",
            self.total_ms,
            self.resolve_ms,
            self.select_ms,
            self.search_ms,
            self.rebuild_ms,
            self.aggregate_ms
        )
    }
}

/// Stage timer producing a [`LatencyBreakdown`].
///
/// Each stage method records the time since the previous mark.
pub struct QueryTimer {
    start: Instant,
    mark: Instant,
    breakdown: LatencyBreakdown,
}

impl QueryTimer {
    pub fn start() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            mark: now,
            breakdown: LatencyBreakdown::default(),
        }
    }

    fn lap(&mut self) -> f64 {
        let now = Instant::now();
        let lap = ms(now - self.mark);
        self.mark = now;
        lap
    }

    pub fn resolved(&mut self) {
        self.breakdown.resolve_ms = self.lap();
    }

    pub fn selected(&mut self) {
        self.breakdown.select_ms = self.lap();
    }

    /// End of the search stage.
    ///
    /// `rebuild` is the wall-clock share of the stage spent rebuilding. Rebuilds
    /// on different partitions overlap, so pass the longest one, not the sum.
    pub fn searched(&mut self, rebuild: Duration) {
        let lap = self.lap();
        self.breakdown.rebuild_ms = ms(rebuild).min(lap);
        self.breakdown.search_ms = lap - self.breakdown.rebuild_ms;
    }

    pub fn aggregated(&mut self) {
        self.breakdown.aggregate_ms = self.lap();
    }

    /// Time since start.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn finish(mut self) -> LatencyBreakdown {
        self.breakdown.total_ms = ms(self.start.elapsed());
        self.breakdown
    }
}

/// Summary statistics over a set of millisecond samples.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub count: usize,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub min_ms: f64,
    pub max_ms: f64,
}

impl LatencyStats {
    /// Reduce `samples`; all-zero stats for no samples.
    pub fn from_samples(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        let mut sorted = samples.to_vec();
        sorted.sort_by(f64::total_cmp);

        let count = sorted.len();
        Self {
            count,
            mean_ms: sorted.iter().sum::<f64>() / count as f64,
            p50_ms: percentile(&sorted, 50.0),
            p95_ms: percentile(&sorted, 95.0),
            p99_ms: percentile(&sorted, 99.0),
            min_ms: sorted[0],
            max_ms: sorted[count - 1],
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "n={} mean={:.3}ms p50={:.3}ms p95={:.3}ms p99={:.3}ms",
            self.count, self.mean_ms, self.p50_ms, self.p95_ms, self.p99_ms
        )
    }
}

/// Nearest-rank percentile of an ascending, non-empty slice.
fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}

/// Mean of the defined recall values.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RecallStats {
    /// Queries with a defined recall.
    pub count: usize,
    pub mean: Option<f64>,
    pub min: Option<f64>,
}

impl RecallStats {
    pub fn from_values(values: impl IntoIterator<Item = f64>) -> Self {
        let mut count = 0;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        for v in values {
            count += 1;
            sum += v;
            min = min.min(v);
        }
        if count == 0 {
            return Self::default();
        }
        Self {
            count,
            mean: Some(sum / count as f64),
            min: Some(min),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_stats() {
        let samples: Vec<f64> = (1..=100).map(f64::from).collect();
        let stats = LatencyStats::from_samples(&samples);
        assert_eq!(stats.count, 100);
        assert!((stats.mean_ms - 50.5).abs() < 1e-9);
        assert_eq!(stats.p50_ms, 50.0);
        assert_eq!(stats.p95_ms, 95.0);
        assert_eq!(stats.p99_ms, 99.0);
        assert_eq!(stats.min_ms, 1.0);
        assert_eq!(stats.max_ms, 100.0);
        assert!(stats.summary().contains("p95=95.000ms"));
    }

    #[test]
    fn test_latency_stats_small() {
        let stats = LatencyStats::from_samples(&[3.0]);
        assert_eq!(stats.p50_ms, 3.0);
        assert_eq!(stats.p99_ms, 3.0);
        assert_eq!(LatencyStats::from_samples(&[]), LatencyStats::default());
    }

    #[test]
    fn test_recall_stats() {
        let stats = RecallStats::from_values([1.0, 0.5, 0.75]);
        assert_eq!(stats.count, 3);
        assert_eq!(stats.mean, Some(0.75));
        assert_eq!(stats.min, Some(0.5));
        assert_eq!(RecallStats::from_values([]).mean, None);
    }

    #[test]
    fn test_query_timer() {
        let mut timer = QueryTimer::start();
        timer.resolved();
        timer.selected();
        std::thread::sleep(Duration::from_millis(2));
        timer.searched(Duration::from_millis(1));
        timer.aggregated();
        let b = timer.finish();

        assert!((b.rebuild_ms - 1.0).abs() < 1e-9);
        assert!(b.search_ms >= 0.9);
        assert!(b.total_ms + 1e-9 >= b.resolve_ms + b.select_ms + b.search_ms + b.rebuild_ms);
        assert!(b.summary().contains("rebuild"));
    }
}
