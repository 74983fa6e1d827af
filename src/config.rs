//! Benchmark configuration.
//!
//! A [`BenchConfig`] is read from a JSON file (every field optional, missing
//! ones take their defaults) and adjusted with `with_*` setters, typically from
//! command line flags:
//!
//! ```ignore
//! let config = BenchConfig::load("bench.json")?
//!     .with_queries(500)
//!     .with_execution(ExecutionMode::Concurrent { workers: 8 });
//! config.validate()?;
//! ```

use crate::ann::{FlatBuilder, HnswBuilder, IndexBuilder};
use crate::catalog::PartitionStrategy;
use crate::constants::workload::{DEFAULT_K, DEFAULT_QUERIES, DEFAULT_SEED};
use crate::engine::{EngineConfig, SearchMode};
use crate::error::{BenchError, Result};
use crate::policy::PolicySet;
use crate::store::SyntheticSpec;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Which ANN index family the partitions use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexKind {
    #[default]
    Hnsw,
    Flat,
}

/// Index section.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub kind: IndexKind,
    pub hnsw: HnswBuilder,
}

impl IndexConfig {
    /// Builder for the configured index family. The engine metric is used so
    /// index distances and reranked distances agree.
    pub fn builder(&self, engine: &EngineConfig) -> Arc<dyn IndexBuilder> {
        match self.kind {
            IndexKind::Hnsw => Arc::new(HnswBuilder {
                metric: engine.metric,
                ..self.hnsw
            }),
            IndexKind::Flat => Arc::new(FlatBuilder::new(engine.metric)),
        }
    }
}

/// Who issues the workload's queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallerMix {
    /// Tenant analysts, round-robin.
    #[default]
    Analysts,
    /// The auditor only.
    Auditor,
    /// Analysts and the auditor, round-robin.
    All,
}

/// Workload section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkloadConfig {
    pub queries: usize,
    pub k: usize,
    pub seed: u64,
    pub callers: CallerMix,
    /// Share of queries issued by a caller no policy applies to.
    pub guest_fraction: f64,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            queries: DEFAULT_QUERIES,
            k: DEFAULT_K,
            seed: DEFAULT_SEED,
            callers: CallerMix::default(),
            guest_fraction: 0.0,
        }
    }
}

/// How queries of one phase are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One query at a time; clean latency numbers.
    #[default]
    Sequential,
    /// Queries in parallel on `workers` threads (0 uses every core).
    Concurrent { workers: usize },
}

/// Run section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub execution: ExecutionMode,
    /// Partition counts of the phases after the first; each phase repartitions
    /// with the same strategy and reruns the workload.
    pub repartition_to: Vec<usize>,
    /// Build every stale or empty index slot before a phase starts. When
    /// false, the engine's stale policy decides at query time.
    pub build_before_phase: bool,
    /// ef_search values swept after the phases.
    pub ef_sweep: Vec<usize>,
    /// Store reachability check before the run.
    pub store_ping_timeout_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            execution: ExecutionMode::default(),
            repartition_to: Vec::new(),
            build_before_phase: true,
            ef_sweep: Vec::new(),
            store_ping_timeout_ms: 1_000,
        }
    }
}

/// Full benchmark configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchConfig {
    pub dataset: SyntheticSpec,
    pub partitioning: PartitionStrategy,
    pub index: IndexConfig,
    pub engine: EngineConfig,
    pub workload: WorkloadConfig,
    pub run: RunConfig,
    /// Policy definitions of the store; `None` uses the synthetic defaults.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policies: Option<PolicySet>,
}

impl BenchConfig {
    /// Read a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
            .map_err(|e| BenchError::config(format!("{}: {}", path.display(), e)))
    }

    /// Parse a JSON configuration.
    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| BenchError::config(e.to_string()))
    }

    pub fn with_queries(mut self, queries: usize) -> Self {
        self.workload.queries = queries;
        self
    }

    pub fn with_execution(mut self, execution: ExecutionMode) -> Self {
        self.run.execution = execution;
        self
    }

    pub fn with_search_mode(mut self, mode: SearchMode) -> Self {
        self.engine.mode = mode;
        self
    }

    pub fn with_repartition_to(mut self, partitions: Vec<usize>) -> Self {
        self.run.repartition_to = partitions;
        self
    }

    pub fn with_policies(mut self, policies: PolicySet) -> Self {
        self.policies = Some(policies);
        self
    }

    /// Policies the store is built with.
    pub fn policy_set(&self) -> PolicySet {
        self.policies.clone().unwrap_or_else(SyntheticSpec::policies)
    }

    pub fn with_ef_sweep(mut self, values: Vec<usize>) -> Self {
        self.run.ef_sweep = values;
        self
    }

    /// Check every section; the first problem is reported as `Config`.
    pub fn validate(&self) -> Result<()> {
        let d = &self.dataset;
        if d.records == 0 || d.dimension == 0 || d.tenants == 0 {
            return Err(BenchError::config(
                "dataset.records, dataset.dimension and dataset.tenants must be positive",
            ));
        }
        self.partitioning
            .validate()
            .map_err(|e| BenchError::config(format!("partitioning: {}", e)))?;
        if self.index.hnsw.m < 2 || self.index.hnsw.ef_construction == 0 {
            return Err(BenchError::config("index.hnsw needs m >= 2 and ef_construction > 0"));
        }
        self.engine.validate()?;

        let w = &self.workload;
        if w.queries == 0 || w.k == 0 {
            return Err(BenchError::config("workload.queries and workload.k must be positive"));
        }
        if !(0.0..=1.0).contains(&w.guest_fraction) {
            return Err(BenchError::config("workload.guest_fraction must be in [0, 1]"));
        }
        if self.run.repartition_to.contains(&0) {
            return Err(BenchError::config("run.repartition_to entries must be positive"));
        }
        if self.run.ef_sweep.contains(&0) {
            return Err(BenchError::config("run.ef_sweep entries must be positive"));
        }
        if self.policies.as_ref().is_some_and(|p| p.policies.is_empty()) {
            return Err(BenchError::config("policies must define at least one policy"));
        }
        Ok(())
    }
}
