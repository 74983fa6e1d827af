//! Core newtypes for type-safe benchmark operations.
//!
//! These types keep record identifiers, partition identifiers and version
//! counters apart at compile time. They are all plain integers underneath.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A stable, unique identifier for a record in the store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
#[repr(transparent)]
pub struct RecordId(pub u64);

impl RecordId {
    /// Create a new RecordId.
    #[inline]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the raw u64 value.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RecordId({})", self.0)
    }
}

impl From<u64> for RecordId {
    #[inline]
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl From<RecordId> for u64 {
    #[inline]
    fn from(id: RecordId) -> Self {
        id.0
    }
}

/// Identifier of a partition inside a catalog snapshot.
///
/// Partition ids are dense (`0..n`) for every partitioning strategy, so a
/// partition id doubles as an index into the snapshot's partition list.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
#[repr(transparent)]
pub struct PartitionId(pub u32);

impl PartitionId {
    /// Create a new PartitionId.
    #[inline]
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the id as a list index.
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "p{}", self.0)
    }
}

impl From<u32> for PartitionId {
    #[inline]
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Membership version of a partition.
///
/// Incremented every time the partition's member set changes. An index handle
/// remembers the version it was built from; a mismatch means the handle is stale.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
#[repr(transparent)]
pub struct PartitionVersion(pub u64);

impl PartitionVersion {
    /// Version assigned to a partition the first time it appears.
    pub const INITIAL: PartitionVersion = PartitionVersion(1);

    /// The version that follows this one.
    #[inline]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// Get the raw u64 value.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for PartitionVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_id() {
        let id = RecordId::new(42);
        assert_eq!(id.as_u64(), 42);
        assert_eq!(format!("{}", id), "RecordId(42)");

        let id2: RecordId = 100u64.into();
        assert_eq!(id2.as_u64(), 100);

        let raw: u64 = id.into();
        assert_eq!(raw, 42);
    }

    #[test]
    fn test_partition_id() {
        let pid = PartitionId::new(3);
        assert_eq!(pid.index(), 3);
        assert_eq!(pid.to_string(), "p3");
    }

    #[test]
    fn test_version_next() {
        let v = PartitionVersion::INITIAL;
        assert_eq!(v.next(), PartitionVersion(2));
        assert!(v < v.next());
        assert_eq!(v.next().to_string(), "v2");
    }

    #[test]
    fn test_serde_transparent() {
        let json = serde_json::to_string(&RecordId(7)).unwrap();
        assert_eq!(json, "7");
        let pid: PartitionId = serde_json::from_str("5").unwrap();
        assert_eq!(pid, PartitionId(5));
    }
}
