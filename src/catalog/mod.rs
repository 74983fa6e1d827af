//! Partition catalog: which records live in which partition, and which
//! partitions have a usable index.
//!
//! The catalog publishes immutable [`CatalogSnapshot`]s through an atomic
//! pointer. A query pins one snapshot for its whole life by holding a
//! [`QueryPhase`]; [`PartitionCatalog::repartition`] waits for every open
//! phase to close before it swaps in the next snapshot, so membership never
//! changes under an in-flight search.

mod partition;
mod strategy;

pub use partition::{IndexHandle, Partition};
pub use strategy::PartitionStrategy;

use crate::ann::IndexBuilder;
use crate::error::{BenchError, Result};
use crate::policy::Predicate;
use crate::store::RecordStore;
use crate::types::{PartitionId, RecordId};
use arc_swap::ArcSwap;
use parking_lot::{RwLock, RwLockReadGuard};
use roaring::RoaringTreemap;
use std::collections::HashSet;
use std::ops::Deref;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// One immutable generation of the catalog.
#[derive(Debug)]
pub struct CatalogSnapshot {
    epoch: u64,
    strategy: Option<PartitionStrategy>,
    partitions: Vec<Arc<Partition>>,
}

impl CatalogSnapshot {
    fn empty() -> Self {
        Self {
            epoch: 0,
            strategy: None,
            partitions: Vec::new(),
        }
    }

    /// Incremented by every repartition; 0 before the first one.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Strategy that produced this snapshot.
    pub fn strategy(&self) -> Option<&PartitionStrategy> {
        self.strategy.as_ref()
    }

    pub fn partitions(&self) -> &[Arc<Partition>] {
        &self.partitions
    }

    pub fn partition(&self, id: PartitionId) -> Option<&Arc<Partition>> {
        self.partitions.get(id.index())
    }

    pub fn len(&self) -> usize {
        self.partitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_empty()
    }

    /// Partition holding `record`, if any.
    pub fn partition_of(&self, record: RecordId) -> Option<PartitionId> {
        self.partitions
            .iter()
            .find(|p| p.members().contains(record.as_u64()))
            .map(|p| p.id())
    }

    /// Partitions that may contain a record admitted by `predicate`.
    ///
    /// A partition is excluded only when it provably holds no admitted record:
    /// first by its id range, then by exact bitmap disjointness. An empty
    /// predicate selects nothing.
    pub fn partitions_for(&self, predicate: &Predicate) -> Vec<PartitionId> {
        if predicate.is_empty() {
            return Vec::new();
        }
        self.partitions
            .iter()
            .filter(|p| match p.id_range() {
                None => false,
                Some((lo, hi)) => {
                    predicate.intersects_range(lo, hi) && !predicate.is_disjoint(p.members())
                }
            })
            .map(|p| p.id())
            .collect()
    }

    /// Pruned partitions, narrowed to `scope` when the query names one.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` if `scope` names a partition this snapshot lacks.
    pub fn select(
        &self,
        predicate: &Predicate,
        scope: Option<&[PartitionId]>,
    ) -> Result<Vec<PartitionId>> {
        let pruned = self.partitions_for(predicate);
        let Some(scope) = scope else {
            return Ok(pruned);
        };
        if let Some(unknown) = scope.iter().find(|id| self.partition(**id).is_none()) {
            return Err(BenchError::invalid_parameter(format!(
                "partition {} not in catalog epoch {} ({} partitions)",
                unknown,
                self.epoch,
                self.len()
            )));
        }
        let wanted: HashSet<PartitionId> = scope.iter().copied().collect();
        Ok(pruned.into_iter().filter(|id| wanted.contains(id)).collect())
    }

    /// Verify that every store record is in exactly one partition and that
    /// no partition lists an unknown record.
    pub fn check_consistency(&self, store: &dyn RecordStore) -> Result<()> {
        let mut seen = RoaringTreemap::new();
        for partition in &self.partitions {
            let overlap = &seen & partition.members();
            if let Some(record) = overlap.min() {
                let count = self
                    .partitions
                    .iter()
                    .filter(|p| p.members().contains(record))
                    .count();
                return Err(BenchError::CatalogInconsistent {
                    record: RecordId(record),
                    count,
                });
            }
            seen |= partition.members();
        }

        let universe = store.universe();
        if let Some(missing) = (universe - &seen).min() {
            return Err(BenchError::CatalogInconsistent {
                record: RecordId(missing),
                count: 0,
            });
        }
        if let Some(unknown) = (&seen - universe).min() {
            return Err(BenchError::CatalogInconsistent {
                record: RecordId(unknown),
                count: 1,
            });
        }
        Ok(())
    }

    fn from_members(
        previous: &CatalogSnapshot,
        strategy: PartitionStrategy,
        members: Vec<RoaringTreemap>,
    ) -> (Self, RepartitionSummary) {
        let mut summary = RepartitionSummary::default();
        let partitions = members
            .into_iter()
            .enumerate()
            .map(|(idx, members)| {
                let id = PartitionId(idx as u32);
                match previous.partition(id) {
                    Some(old) if old.members() == &members => {
                        summary.unchanged += 1;
                        Arc::clone(old)
                    }
                    Some(old) => {
                        summary.changed += 1;
                        Arc::new(Partition::successor(old, members))
                    }
                    None => {
                        summary.created += 1;
                        Arc::new(Partition::new(id, members))
                    }
                }
            })
            .collect::<Vec<_>>();
        summary.dropped = previous.len().saturating_sub(partitions.len());

        let snapshot = Self {
            epoch: previous.epoch + 1,
            strategy: Some(strategy),
            partitions,
        };
        (snapshot, summary)
    }
}

/// What a repartition did to the previous snapshot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepartitionSummary {
    pub unchanged: usize,
    pub changed: usize,
    pub created: usize,
    pub dropped: usize,
}

/// Result of [`PartitionCatalog::build_indexes`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct BuildSummary {
    pub built: usize,
    pub reused: usize,
    pub skipped_empty: usize,
    pub elapsed: Duration,
}

/// Read guard pinning one catalog snapshot for the duration of a query.
///
/// Repartitioning blocks until every live `QueryPhase` is dropped.
pub struct QueryPhase<'a> {
    _gate: RwLockReadGuard<'a, ()>,
    snapshot: Arc<CatalogSnapshot>,
}

impl QueryPhase<'_> {
    pub fn snapshot(&self) -> &Arc<CatalogSnapshot> {
        &self.snapshot
    }
}

impl Deref for QueryPhase<'_> {
    type Target = CatalogSnapshot;

    fn deref(&self) -> &CatalogSnapshot {
        &self.snapshot
    }
}

/// The live catalog.
pub struct PartitionCatalog {
    current: ArcSwap<CatalogSnapshot>,
    gate: RwLock<()>,
}

impl Default for PartitionCatalog {
    fn default() -> Self {
        Self::new()
    }
}

impl PartitionCatalog {
    /// An empty catalog at epoch 0.
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(CatalogSnapshot::empty()),
            gate: RwLock::new(()),
        }
    }

    /// A catalog partitioned once with `strategy`.
    pub fn with_strategy(strategy: PartitionStrategy, store: &dyn RecordStore) -> Result<Self> {
        let catalog = Self::new();
        catalog.repartition(strategy, store)?;
        Ok(catalog)
    }

    /// Latest published snapshot, without entering a query phase.
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        self.current.load_full()
    }

    /// Current epoch.
    pub fn epoch(&self) -> u64 {
        self.current.load().epoch
    }

    /// Enter a query phase and pin the current snapshot.
    pub fn begin_query(&self) -> QueryPhase<'_> {
        let gate = self.gate.read();
        QueryPhase {
            _gate: gate,
            snapshot: self.current.load_full(),
        }
    }

    /// Recompute membership with `strategy` and publish a new snapshot.
    ///
    /// Unchanged partitions keep their version and index; changed ones are
    /// bumped and left stale. Waits for in-flight queries first. Must not be
    /// called while the calling thread holds a [`QueryPhase`].
    pub fn repartition(
        &self,
        strategy: PartitionStrategy,
        store: &dyn RecordStore,
    ) -> Result<Arc<CatalogSnapshot>> {
        let start = Instant::now();
        let members = strategy.assign(store)?;

        let _exclusive = self.gate.write();
        let previous = self.current.load_full();
        let (snapshot, summary) = CatalogSnapshot::from_members(&previous, strategy, members);
        snapshot.check_consistency(store)?;

        let snapshot = Arc::new(snapshot);
        self.current.store(Arc::clone(&snapshot));
        info!(
            epoch = snapshot.epoch,
            strategy = %snapshot.strategy.as_ref().map(ToString::to_string).unwrap_or_default(),
            partitions = snapshot.len(),
            unchanged = summary.unchanged,
            changed = summary.changed,
            created = summary.created,
            dropped = summary.dropped,
            elapsed_ms = start.elapsed().as_secs_f64() * 1000.0,
            "catalog repartitioned"
        );
        Ok(snapshot)
    }

    /// Consistency check of the current snapshot.
    pub fn check_consistency(&self, store: &dyn RecordStore) -> Result<()> {
        self.current.load().check_consistency(store)
    }

    /// Build every empty or stale index slot of the current snapshot.
    pub fn build_indexes(
        &self,
        builder: &dyn IndexBuilder,
        store: &dyn RecordStore,
    ) -> Result<BuildSummary> {
        let start = Instant::now();
        let phase = self.begin_query();
        let mut summary = BuildSummary::default();

        for partition in phase.partitions() {
            if partition.is_empty() {
                summary.skipped_empty += 1;
            } else if partition.needs_build() {
                let handle = partition.build_index(builder, store)?;
                debug!(
                    partition = %partition.id(),
                    version = %partition.version(),
                    members = partition.len(),
                    build_ms = handle.build_time.as_secs_f64() * 1000.0,
                    "index built"
                );
                summary.built += 1;
            } else {
                summary.reused += 1;
            }
        }

        summary.elapsed = start.elapsed();
        info!(
            epoch = phase.epoch(),
            builder = builder.name(),
            built = summary.built,
            reused = summary.reused,
            elapsed_ms = summary.elapsed.as_secs_f64() * 1000.0,
            "indexes ready"
        );
        Ok(summary)
    }
}
