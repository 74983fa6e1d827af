//! Benchmark report and exit status.

use super::recall_model::RecallModel;
use crate::catalog::BuildSummary;
use crate::config::BenchConfig;
use crate::engine::{PartitionResult, SearchStrategy};
use crate::error::{BenchError, QueryStatus, Result};
use crate::metrics::{ms, LatencyBreakdown, LatencyStats, RecallStats};
use crate::types::{PartitionId, RecordId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Stage of the per-query pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStage {
    Resolving,
    PartitionSelection,
    Searching,
    Aggregating,
    Done,
}

impl fmt::Display for QueryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryStage::Resolving => "resolving",
            QueryStage::PartitionSelection => "partition_selection",
            QueryStage::Searching => "searching",
            QueryStage::Aggregating => "aggregating",
            QueryStage::Done => "done",
        };
        f.write_str(name)
    }
}

/// Work done on one partition by one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionRecord {
    pub partition: PartitionId,
    pub strategy: SearchStrategy,
    pub fallbacks: usize,
    pub eligible: u64,
    /// Search time on this partition, excluding any rebuild.
    pub search_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rebuild_ms: Option<f64>,
}

impl From<&PartitionResult> for PartitionRecord {
    fn from(result: &PartitionResult) -> Self {
        Self {
            partition: result.partition,
            strategy: result.strategy,
            fallbacks: result.fallbacks,
            eligible: result.eligible,
            search_ms: ms(result.search_time),
            rebuild_ms: result.rebuild_time.map(ms),
        }
    }
}

/// Outcome of one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub query_id: u64,
    pub caller: String,
    pub status: QueryStatus,
    /// `Done` on success, otherwise the stage that failed.
    pub stage: QueryStage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub latency: LatencyBreakdown,
    /// Recall@k; `None` for failed queries and empty ground truth.
    pub recall: Option<f64>,
    pub selectivity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ef_search: Option<usize>,
    pub candidates: usize,
    pub partitions_searched: Vec<PartitionId>,
    pub strategies: Vec<SearchStrategy>,
    /// One entry per searched partition, in target order.
    pub partitions: Vec<PartitionRecord>,
    pub rebuilds: usize,
    pub results: Vec<RecordId>,
}

impl QueryRecord {
    pub(crate) fn started(query_id: u64, caller: &str, ef_search: Option<usize>) -> Self {
        Self {
            query_id,
            caller: caller.to_string(),
            status: QueryStatus::Ok,
            stage: QueryStage::Resolving,
            error: None,
            latency: LatencyBreakdown::default(),
            recall: None,
            selectivity: None,
            ef_search,
            candidates: 0,
            partitions_searched: Vec::new(),
            strategies: Vec::new(),
            partitions: Vec::new(),
            rebuilds: 0,
            results: Vec::new(),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == QueryStatus::Ok
    }
}

/// Query count per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub ok: usize,
    pub unauthorized: usize,
    pub policy_conflict: usize,
    pub stale_index: usize,
    pub timeout: usize,
    pub failed: usize,
}

impl StatusCounts {
    pub fn record(&mut self, status: QueryStatus) {
        match status {
            QueryStatus::Ok => self.ok += 1,
            QueryStatus::Unauthorized => self.unauthorized += 1,
            QueryStatus::PolicyConflict => self.policy_conflict += 1,
            QueryStatus::StaleIndex => self.stale_index += 1,
            QueryStatus::Timeout => self.timeout += 1,
            QueryStatus::Failed => self.failed += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.ok + self.not_ok()
    }

    pub fn not_ok(&self) -> usize {
        self.unauthorized + self.policy_conflict + self.stale_index + self.timeout + self.failed
    }
}

/// Aggregate statistics of a set of queries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub statuses: StatusCounts,
    /// End-to-end latency of successful queries.
    pub latency: LatencyStats,
    pub search_latency: LatencyStats,
    /// Mean over successful queries with defined recall; timeouts never count.
    pub recall: RecallStats,
    pub mean_selectivity: Option<f64>,
    pub mean_partitions_searched: f64,
    pub rebuilds: usize,
}

impl Summary {
    pub fn from_records(records: &[QueryRecord]) -> Self {
        let mut statuses = StatusCounts::default();
        for r in records {
            statuses.record(r.status);
        }

        let ok: Vec<&QueryRecord> = records.iter().filter(|r| r.is_ok()).collect();
        let totals: Vec<f64> = ok.iter().map(|r| r.latency.total_ms).collect();
        let searches: Vec<f64> = ok.iter().map(|r| r.latency.search_ms).collect();
        let selectivities: Vec<f64> = ok.iter().filter_map(|r| r.selectivity).collect();
        let mean_partitions_searched = if ok.is_empty() {
            0.0
        } else {
            ok.iter().map(|r| r.partitions_searched.len()).sum::<usize>() as f64 / ok.len() as f64
        };

        Self {
            statuses,
            latency: LatencyStats::from_samples(&totals),
            search_latency: LatencyStats::from_samples(&searches),
            recall: RecallStats::from_values(ok.iter().filter_map(|r| r.recall)),
            mean_selectivity: (!selectivities.is_empty())
                .then(|| selectivities.iter().sum::<f64>() / selectivities.len() as f64),
            mean_partitions_searched,
            rebuilds: records.iter().map(|r| r.rebuilds).sum(),
        }
    }
}

/// Index build between phases.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BuildReport {
    pub built: usize,
    pub reused: usize,
    pub skipped_empty: usize,
    pub elapsed_ms: f64,
}

impl From<BuildSummary> for BuildReport {
    fn from(summary: BuildSummary) -> Self {
        Self {
            built: summary.built,
            reused: summary.reused,
            skipped_empty: summary.skipped_empty,
            elapsed_ms: summary.elapsed.as_secs_f64() * 1000.0,
        }
    }
}

/// One catalog configuration and the queries run against it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseReport {
    pub name: String,
    pub epoch: u64,
    pub strategy: String,
    pub partitions: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub build: Option<BuildReport>,
    pub summary: Summary,
    pub queries: Vec<QueryRecord>,
}

/// One ef_search value of a sweep.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SweepPoint {
    pub ef_search: usize,
    /// Effective beam `ef_search * selectivity / k`.
    pub effective_x: f64,
    pub mean_recall: Option<f64>,
    pub mean_latency_ms: f64,
    pub queries: usize,
}

/// ef_search sweep results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    pub k: usize,
    pub selectivity: Option<f64>,
    pub points: Vec<SweepPoint>,
    /// `None` with fewer than two usable points.
    pub model: Option<RecallModel>,
}

/// Predicate cache counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheReport {
    pub hits: u64,
    pub misses: u64,
}

/// Everything a run produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkReport {
    pub config: BenchConfig,
    pub phases: Vec<PhaseReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sweep: Option<SweepReport>,
    pub predicate_cache: CacheReport,
    /// Error that stopped the run early, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub halted: Option<String>,
    pub summary: Summary,
}

impl BenchmarkReport {
    pub(crate) fn new(config: BenchConfig) -> Self {
        Self {
            config,
            phases: Vec::new(),
            sweep: None,
            predicate_cache: CacheReport::default(),
            halted: None,
            summary: Summary::default(),
        }
    }

    /// Every query of every phase.
    pub fn queries(&self) -> impl Iterator<Item = &QueryRecord> {
        self.phases.iter().flat_map(|p| p.queries.iter())
    }

    pub(crate) fn finish(&mut self) {
        let all: Vec<QueryRecord> = self.queries().cloned().collect();
        self.summary = Summary::from_records(&all);
    }

    /// Exit status the binary should report.
    pub fn exit_status(&self) -> ExitStatus {
        let statuses = &self.summary.statuses;
        if self.halted.is_some() || statuses.stale_index > 0 || statuses.policy_conflict > 0 {
            ExitStatus::RuntimeError
        } else if self.summary.statuses.not_ok() > 0 {
            ExitStatus::Partial
        } else {
            ExitStatus::Success
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the pretty-printed JSON report to `path`.
    pub fn write_to(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

/// Process exit status of the `rls-bench` binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    Success,
    ConfigError,
    RuntimeError,
    /// The run completed but some queries failed or timed out.
    Partial,
}

impl ExitStatus {
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Success => 0,
            ExitStatus::ConfigError => 2,
            ExitStatus::RuntimeError => 3,
            ExitStatus::Partial => 4,
        }
    }

    /// Exit status for an error that prevented a report.
    pub fn from_error(err: &BenchError) -> Self {
        match err {
            BenchError::Config(_) | BenchError::InvalidParameter(_) => ExitStatus::ConfigError,
            _ => ExitStatus::RuntimeError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u64, status: QueryStatus, total_ms: f64, recall: Option<f64>) -> QueryRecord {
        let mut r = QueryRecord::started(id, "analyst-0", None);
        r.status = status;
        r.stage = if status == QueryStatus::Ok {
            QueryStage::Done
        } else {
            QueryStage::Searching
        };
        r.latency.total_ms = total_ms;
        r.recall = recall;
        r.selectivity = Some(0.25);
        r
    }

    #[test]
    fn test_summary_excludes_failures_from_recall() {
        let records = vec![
            record(0, QueryStatus::Ok, 1.0, Some(1.0)),
            record(1, QueryStatus::Ok, 3.0, Some(0.5)),
            record(2, QueryStatus::Timeout, 50.0, None),
            record(3, QueryStatus::Unauthorized, 0.1, None),
        ];
        let summary = Summary::from_records(&records);
        assert_eq!(summary.statuses.ok, 2);
        assert_eq!(summary.statuses.timeout, 1);
        assert_eq!(summary.statuses.total(), 4);
        assert_eq!(summary.recall.count, 2);
        assert_eq!(summary.recall.mean, Some(0.75));
        assert_eq!(summary.latency.count, 2);
        assert_eq!(summary.latency.max_ms, 3.0);
        assert_eq!(summary.mean_selectivity, Some(0.25));
    }

    #[test]
    fn test_exit_status() {
        let mut report = BenchmarkReport::new(BenchConfig::default());
        report.phases.push(PhaseReport {
            name: "initial".into(),
            epoch: 1,
            strategy: "range/4".into(),
            partitions: 4,
            build: None,
            summary: Summary::default(),
            queries: vec![record(0, QueryStatus::Ok, 1.0, Some(1.0))],
        });
        report.finish();
        assert_eq!(report.exit_status(), ExitStatus::Success);

        report.phases[0].queries.push(record(1, QueryStatus::Timeout, 9.0, None));
        report.finish();
        assert_eq!(report.exit_status(), ExitStatus::Partial);
        assert_eq!(report.exit_status().code(), 4);

        report.halted = Some("catalog inconsistent".into());
        assert_eq!(report.exit_status(), ExitStatus::RuntimeError);
        report.halted = None;

        report.phases[0]
            .queries
            .push(record(2, QueryStatus::PolicyConflict, 0.5, None));
        report.finish();
        assert_eq!(report.summary.statuses.policy_conflict, 1);
        assert_eq!(report.exit_status(), ExitStatus::RuntimeError);
        assert_eq!(report.exit_status().code(), 3);

        assert_eq!(
            ExitStatus::from_error(&BenchError::config("bad")).code(),
            2
        );
    }

    #[test]
    fn test_report_json() {
        let mut report = BenchmarkReport::new(BenchConfig::default());
        report.finish();
        let json = report.to_json().unwrap();
        assert!(json.contains("\"predicate_cache\""));
        assert!(!json.contains("\"halted\""));
        let back: BenchmarkReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }
}
