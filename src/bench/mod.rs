//! Benchmark driver, workload, report and recall model.

mod driver;
mod recall_model;
mod report;
pub mod workload;

pub use driver::BenchmarkDriver;
pub use recall_model::RecallModel;
pub use report::{
    BenchmarkReport, BuildReport, CacheReport, ExitStatus, PartitionRecord, PhaseReport,
    QueryRecord, QueryStage, StatusCounts, Summary, SweepPoint, SweepReport,
};
pub use workload::Query;
