//! Error types for benchmark operations.
//!
//! One error enum covers policy resolution, catalog maintenance, filtered
//! search and the driver. Per-query failures are classified with
//! [`BenchError::status`]; only a few variants are allowed to stop a run.

use crate::types::{PartitionId, PartitionVersion, RecordId};
use std::io;
use thiserror::Error;

/// Result type alias using [`BenchError`].
pub type Result<T> = std::result::Result<T, BenchError>;

/// Errors that can occur while resolving, searching or benchmarking.
#[derive(Error, Debug)]
pub enum BenchError {
    /// No security policy applies to the caller's roles.
    #[error("unauthorized caller '{caller}': no policy applies to roles {roles:?}")]
    UnauthorizedCaller {
        /// Caller identifier.
        caller: String,
        /// Roles presented by the caller.
        roles: Vec<String>,
    },

    /// Two applicable policies disagree on a record and the precedence rule
    /// cannot decide between them.
    #[error("policy conflict between '{first}' and '{second}' on {record}")]
    PolicyConflict {
        /// Name of the admitting policy.
        first: String,
        /// Name of the rejecting policy.
        second: String,
        /// First record on which the policies disagree.
        record: RecordId,
    },

    /// A record is assigned to zero or several partitions, or a partition
    /// lists a record the store does not know.
    #[error("catalog inconsistent: {record} found in {count} partitions")]
    CatalogInconsistent {
        /// Offending record.
        record: RecordId,
        /// Number of partitions that list it.
        count: usize,
    },

    /// A partition's index handle was built from an older member set.
    #[error("stale index for partition {partition}: built from {built:?}, catalog at {current}")]
    StaleIndex {
        /// Partition whose handle is stale.
        partition: PartitionId,
        /// Version the handle was built from (`None` if never built).
        built: Option<PartitionVersion>,
        /// Current catalog version of the partition.
        current: PartitionVersion,
    },

    /// The query exceeded its deadline and was abandoned.
    #[error("query timed out after {elapsed_ms:.3}ms (limit {limit_ms}ms)")]
    Timeout {
        /// Elapsed time when the deadline check fired.
        elapsed_ms: f64,
        /// Configured limit.
        limit_ms: u64,
    },

    /// Vector dimensions do not match the expected dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected vector dimension.
        expected: usize,
        /// Actual vector dimension provided.
        actual: usize,
    },

    /// Operation requires a non-empty vector set but received empty input.
    #[error("empty vector set: operation requires at least one vector")]
    EmptyVectorSet,

    /// Invalid parameter value provided.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Configuration file is missing fields or has out-of-range values.
    #[error("configuration error: {0}")]
    Config(String),

    /// The record store could not be reached or answered too late.
    #[error("record store unavailable: {0}")]
    StoreUnavailable(String),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Error during serialization or deserialization.
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Outcome class of a single benchmark query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryStatus {
    /// Query completed and produced a result.
    Ok,
    /// Caller had no applicable policy.
    Unauthorized,
    /// Policy precedence could not decide.
    PolicyConflict,
    /// A stale index handle was refused.
    StaleIndex,
    /// Query exceeded its deadline.
    Timeout,
    /// Any other per-query failure.
    Failed,
}

impl BenchError {
    /// Creates a new `DimensionMismatch` error.
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch { expected, actual }
    }

    /// Creates a new `InvalidParameter` error.
    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    /// Creates a new `Config` error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Creates a new `StoreUnavailable` error.
    pub fn store_unavailable(msg: impl Into<String>) -> Self {
        Self::StoreUnavailable(msg.into())
    }

    /// Creates a new `Timeout` error from the elapsed time and the limit.
    pub fn timeout(elapsed: std::time::Duration, limit_ms: u64) -> Self {
        Self::Timeout {
            elapsed_ms: elapsed.as_secs_f64() * 1000.0,
            limit_ms,
        }
    }

    /// Whether this error invalidates the whole benchmark run.
    ///
    /// A run continues past per-query failures; it halts only when its
    /// premises are broken.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(
            self,
            BenchError::CatalogInconsistent { .. }
                | BenchError::StoreUnavailable(_)
                | BenchError::Io(_)
        )
    }

    /// Classify this error for per-query reporting.
    pub fn status(&self) -> QueryStatus {
        match self {
            BenchError::UnauthorizedCaller { .. } => QueryStatus::Unauthorized,
            BenchError::PolicyConflict { .. } => QueryStatus::PolicyConflict,
            BenchError::StaleIndex { .. } => QueryStatus::StaleIndex,
            BenchError::Timeout { .. } => QueryStatus::Timeout,
            _ => QueryStatus::Failed,
        }
    }
}

impl From<serde_json::Error> for BenchError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_display() {
        let err = BenchError::dimension_mismatch(128, 256);
        assert_eq!(err.to_string(), "dimension mismatch: expected 128, got 256");

        let err = BenchError::PolicyConflict {
            first: "tenant_read".into(),
            second: "embargo".into(),
            record: RecordId(17),
        };
        assert_eq!(
            err.to_string(),
            "policy conflict between 'tenant_read' and 'embargo' on RecordId(17)"
        );

        let err = BenchError::StaleIndex {
            partition: PartitionId(2),
            built: Some(PartitionVersion(1)),
            current: PartitionVersion(2),
        };
        assert!(err.to_string().contains("partition p2"));

        let err = BenchError::timeout(Duration::from_millis(12), 10);
        assert_eq!(err.to_string(), "query timed out after 12.000ms (limit 10ms)");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: BenchError = io_err.into();
        assert!(matches!(err, BenchError::Io(_)));
        assert!(err.is_fatal_to_run());
    }

    #[test]
    fn test_fatality_and_status() {
        let inconsistent = BenchError::CatalogInconsistent {
            record: RecordId(3),
            count: 2,
        };
        assert!(inconsistent.is_fatal_to_run());

        let unauthorized = BenchError::UnauthorizedCaller {
            caller: "mallory".into(),
            roles: vec![],
        };
        assert!(!unauthorized.is_fatal_to_run());
        assert_eq!(unauthorized.status(), QueryStatus::Unauthorized);

        let timeout = BenchError::timeout(Duration::from_millis(5), 1);
        assert!(!timeout.is_fatal_to_run());
        assert_eq!(timeout.status(), QueryStatus::Timeout);

        assert_eq!(
            BenchError::invalid_parameter("k").status(),
            QueryStatus::Failed
        );
    }
}
