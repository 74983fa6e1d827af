//! rls-ann-bench: benchmark harness for row-level-security filtered ANN search.
//!
//! Vectors live in a record store guarded by row-level security policies and
//! are split into partitions, each with its own ANN index. A query resolves
//! the caller's policies into a predicate, prunes the partitions that cannot
//! hold an admitted record, searches the rest under the predicate, and merges
//! the per-partition answers into one top-k list that is scored against
//! brute-force ground truth.
//!
//! # Components
//!
//! - **Predicate resolution** ([`policy`]): policies + caller -> bitmap predicate
//! - **Partition catalog** ([`catalog`]): versioned partitions, atomic snapshots
//! - **Filtered search** ([`engine`]): per-partition strategy, stale-index checks
//! - **Aggregation** ([`aggregate`]): k-way merge, dedup, recall
//! - **Driver** ([`bench`]): workloads, phases, ef sweeps, JSON reports
//!
//! # Example
//!
//! ```no_run
//! use rls_ann_bench::{BenchConfig, BenchmarkDriver};
//!
//! let driver = BenchmarkDriver::new(BenchConfig::default()).unwrap();
//! let report = driver.run();
//! println!("mean recall: {:?}", report.summary.recall.mean);
//! ```

pub mod aggregate;
pub mod ann;
pub mod bench;
pub mod catalog;
pub mod config;
pub mod constants;
pub mod distance;
pub mod engine;
pub mod error;
pub mod kmeans;
pub mod metrics;
pub mod policy;
pub mod store;
pub mod types;
pub mod vector;

// Re-export commonly used types at crate root
pub use aggregate::{aggregate, compute_recall, ground_truth, CandidateResult};
pub use ann::{AnnIndex, FlatBuilder, HnswBuilder, IndexBuilder, Neighbor, SearchParams};
pub use bench::{BenchmarkDriver, BenchmarkReport, ExitStatus, Query, QueryRecord, RecallModel};
pub use catalog::{CatalogSnapshot, Partition, PartitionCatalog, PartitionStrategy};
pub use config::{BenchConfig, ExecutionMode};
pub use distance::DistanceMetric;
pub use engine::{
    Deadline, EngineConfig, FilteredSearchEngine, SearchMode, SearchRequest, SearchStrategy,
    StalePolicy,
};
pub use error::{BenchError, QueryStatus, Result};
pub use policy::{resolve, CallerIdentity, PolicySet, Precedence, Predicate, SecurityPolicy};
pub use store::{InMemoryStore, Record, RecordStore, SyntheticSpec};
pub use types::{PartitionId, PartitionVersion, RecordId};
pub use vector::Vector;
