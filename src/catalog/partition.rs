//! A partition and its index slot.

use crate::ann::{AnnIndex, IndexBuilder};
use crate::error::{BenchError, Result};
use crate::store::RecordStore;
use crate::types::{PartitionId, PartitionVersion, RecordId};
use crate::vector::Vector;
use arc_swap::ArcSwapOption;
use roaring::RoaringTreemap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A built index, stamped with the partition version it reflects.
pub struct IndexHandle {
    pub index: Box<dyn AnnIndex>,
    pub built_version: PartitionVersion,
    pub builder: &'static str,
    pub build_time: Duration,
}

impl fmt::Debug for IndexHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexHandle")
            .field("builder", &self.builder)
            .field("built_version", &self.built_version)
            .field("len", &self.index.len())
            .finish()
    }
}

/// Disjoint subset of the record universe with its own index.
///
/// The member set and version are fixed for the lifetime of the value; a
/// membership change produces a new `Partition` through [`Partition::successor`].
/// Only the index slot is mutable.
pub struct Partition {
    id: PartitionId,
    members: RoaringTreemap,
    version: PartitionVersion,
    slot: ArcSwapOption<IndexHandle>,
}

impl Partition {
    /// A partition seen for the first time: version 1, no index.
    pub fn new(id: PartitionId, members: RoaringTreemap) -> Self {
        Self {
            id,
            members,
            version: PartitionVersion::INITIAL,
            slot: ArcSwapOption::empty(),
        }
    }

    /// The next version of `previous` with a new member set.
    ///
    /// The previous handle is carried over so the staleness is visible to the
    /// engine instead of looking like a partition that was never built.
    pub fn successor(previous: &Partition, members: RoaringTreemap) -> Self {
        Self {
            id: previous.id,
            members,
            version: previous.version.next(),
            slot: ArcSwapOption::new(previous.slot.load_full()),
        }
    }

    pub fn id(&self) -> PartitionId {
        self.id
    }

    pub fn members(&self) -> &RoaringTreemap {
        &self.members
    }

    pub fn version(&self) -> PartitionVersion {
        self.version
    }

    pub fn len(&self) -> u64 {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Lowest and highest member id, if any.
    pub fn id_range(&self) -> Option<(RecordId, RecordId)> {
        Some((RecordId(self.members.min()?), RecordId(self.members.max()?)))
    }

    /// Current index handle, stale or not.
    pub fn handle(&self) -> Option<Arc<IndexHandle>> {
        self.slot.load_full()
    }

    /// Handle only if it was built from the current member set.
    pub fn fresh_handle(&self) -> Option<Arc<IndexHandle>> {
        self.handle().filter(|h| h.built_version == self.version)
    }

    /// Whether the slot is empty or holds a handle from another version.
    pub fn needs_build(&self) -> bool {
        self.fresh_handle().is_none()
    }

    /// Error describing why the current handle cannot be used.
    pub fn stale_error(&self) -> BenchError {
        BenchError::StaleIndex {
            partition: self.id,
            built: self.handle().map(|h| h.built_version),
            current: self.version,
        }
    }

    /// Member vectors in id order, read from `store`.
    pub fn vectors(&self, store: &dyn RecordStore) -> Result<Vec<Vector>> {
        self.members
            .iter()
            .map(|id| {
                store
                    .get(RecordId(id))
                    .map(|r| r.vector.clone())
                    .ok_or(BenchError::CatalogInconsistent {
                        record: RecordId(id),
                        count: 1,
                    })
            })
            .collect()
    }

    /// Build an index over the current members and publish it into the slot.
    pub fn build_index(
        &self,
        builder: &dyn IndexBuilder,
        store: &dyn RecordStore,
    ) -> Result<Arc<IndexHandle>> {
        let start = Instant::now();
        let vectors = self.vectors(store)?;
        let index = builder.build(&vectors)?;
        let handle = Arc::new(IndexHandle {
            index,
            built_version: self.version,
            builder: builder.name(),
            build_time: start.elapsed(),
        });
        self.slot.store(Some(Arc::clone(&handle)));
        Ok(handle)
    }
}

impl fmt::Debug for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partition")
            .field("id", &self.id)
            .field("members", &self.members.len())
            .field("version", &self.version)
            .field("handle", &self.handle())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ann::FlatBuilder;
    use crate::store::SyntheticSpec;

    fn members(ids: impl IntoIterator<Item = u64>) -> RoaringTreemap {
        ids.into_iter().collect()
    }

    #[test]
    fn test_new_partition_needs_build() {
        let p = Partition::new(PartitionId(0), members(0..10));
        assert_eq!(p.version(), PartitionVersion::INITIAL);
        assert!(p.needs_build());
        assert_eq!(p.id_range(), Some((RecordId(0), RecordId(9))));
        assert!(matches!(
            p.stale_error(),
            BenchError::StaleIndex { built: None, .. }
        ));
    }

    #[test]
    fn test_successor_carries_stale_handle() {
        let store = SyntheticSpec::default().build().unwrap();
        let builder = FlatBuilder::default();

        let p = Partition::new(PartitionId(1), members(0..50));
        let handle = p.build_index(&builder, &store).unwrap();
        assert_eq!(handle.index.len(), 50);
        assert!(!p.needs_build());

        let next = Partition::successor(&p, members(0..60));
        assert_eq!(next.version(), PartitionVersion(2));
        assert!(next.needs_build());
        assert_eq!(
            next.handle().map(|h| h.built_version),
            Some(PartitionVersion::INITIAL)
        );

        next.build_index(&builder, &store).unwrap();
        assert!(!next.needs_build());
        // The old partition still sees its own handle.
        assert!(!p.needs_build());
    }

    #[test]
    fn test_unknown_member_is_inconsistent() {
        let store = SyntheticSpec::default().build().unwrap();
        let p = Partition::new(PartitionId(0), members([5, 1_000_000]));
        assert!(matches!(
            p.vectors(&store),
            Err(BenchError::CatalogInconsistent { .. })
        ));
    }

    #[test]
    fn test_empty_partition() {
        let p = Partition::new(PartitionId(2), RoaringTreemap::new());
        assert!(p.is_empty());
        assert_eq!(p.id_range(), None);
    }
}
