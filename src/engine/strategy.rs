//! Per-partition search strategy selection.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether the engine consults the ANN indexes at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Use each partition's index, choosing a filtering strategy per partition.
    #[default]
    Approximate,
    /// Exact scan of every eligible record. Yields recall 1.0.
    Exhaustive,
}

/// How one partition was searched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    /// Over-fetch unfiltered candidates, then drop the ones the predicate rejects.
    PostFilter,
    /// Push the predicate into the index traversal.
    PreFilter,
    /// Exact scan of the partition's eligible records.
    ExhaustiveScan,
}

impl fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SearchStrategy::PostFilter => "post_filter",
            SearchStrategy::PreFilter => "pre_filter",
            SearchStrategy::ExhaustiveScan => "exhaustive_scan",
        };
        f.write_str(name)
    }
}

/// What to do when a partition's index handle does not match its version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StalePolicy {
    /// Rebuild synchronously and publish the new handle.
    #[default]
    Rebuild,
    /// Fail the query with `StaleIndex`.
    Fail,
}

/// First strategy to try on a partition.
pub fn choose(
    mode: SearchMode,
    selectivity: f64,
    post_filter_threshold: f64,
    supports_filter: bool,
) -> SearchStrategy {
    match mode {
        SearchMode::Exhaustive => SearchStrategy::ExhaustiveScan,
        SearchMode::Approximate if selectivity >= post_filter_threshold => {
            SearchStrategy::PostFilter
        }
        SearchMode::Approximate if supports_filter => SearchStrategy::PreFilter,
        SearchMode::Approximate => SearchStrategy::ExhaustiveScan,
    }
}

/// Next strategy after `current` came back underfilled, if any.
pub fn fallback(current: SearchStrategy, supports_filter: bool) -> Option<SearchStrategy> {
    match current {
        SearchStrategy::PostFilter if supports_filter => Some(SearchStrategy::PreFilter),
        SearchStrategy::PostFilter | SearchStrategy::PreFilter => {
            Some(SearchStrategy::ExhaustiveScan)
        }
        SearchStrategy::ExhaustiveScan => None,
    }
}

/// Candidates to request from the index for a post-filtered search:
/// `ceil(k * overfetch / selectivity)`, never below `k` nor above the
/// partition size.
pub fn overfetch_k(k: usize, selectivity: f64, overfetch: f64, partition_len: usize) -> usize {
    if selectivity <= 0.0 {
        return partition_len;
    }
    let wanted = (k as f64 * overfetch / selectivity).ceil();
    let wanted = if wanted.is_finite() && wanted < partition_len as f64 {
        wanted as usize
    } else {
        partition_len
    };
    wanted.max(k.min(partition_len))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_choose() {
        use SearchStrategy::*;
        assert_eq!(choose(SearchMode::Exhaustive, 0.9, 0.5, true), ExhaustiveScan);
        assert_eq!(choose(SearchMode::Approximate, 0.5, 0.5, true), PostFilter);
        assert_eq!(choose(SearchMode::Approximate, 0.49, 0.5, true), PreFilter);
        assert_eq!(choose(SearchMode::Approximate, 0.1, 0.5, false), ExhaustiveScan);
    }

    #[test]
    fn test_fallback_order() {
        use SearchStrategy::*;
        assert_eq!(fallback(PostFilter, true), Some(PreFilter));
        assert_eq!(fallback(PostFilter, false), Some(ExhaustiveScan));
        assert_eq!(fallback(PreFilter, true), Some(ExhaustiveScan));
        assert_eq!(fallback(ExhaustiveScan, true), None);
    }

    #[test]
    fn test_overfetch_k() {
        // ceil(10 * 1.5 / 0.6) = 25
        assert_eq!(overfetch_k(10, 0.6, 1.5, 1000), 25);
        assert_eq!(overfetch_k(10, 0.6, 1.5, 20), 20);
        assert_eq!(overfetch_k(10, 1.0, 1.0, 5), 5);
        assert_eq!(overfetch_k(10, 0.0, 1.5, 40), 40);
    }

    #[test]
    fn test_strategy_names() {
        assert_eq!(SearchStrategy::PreFilter.to_string(), "pre_filter");
        assert_eq!(
            serde_json::to_string(&SearchStrategy::ExhaustiveScan).unwrap(),
            "\"exhaustive_scan\""
        );
    }
}
