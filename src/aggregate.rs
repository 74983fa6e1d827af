//! Result aggregation: merge per-partition candidates into one top-k list,
//! and score it against brute-force ground truth.

use crate::ann::{scan_top_k, Neighbor};
use crate::distance::{rank_order, DistanceMetric};
use crate::policy::Predicate;
use crate::store::RecordStore;
use crate::types::{PartitionId, RecordId};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

/// A candidate produced by one partition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CandidateResult {
    pub id: RecordId,
    pub distance: f32,
    pub partition: PartitionId,
}

impl CandidateResult {
    pub fn new(id: RecordId, distance: f32, partition: PartitionId) -> Self {
        Self {
            id,
            distance,
            partition,
        }
    }

    /// Ascending distance, ties by lower record id.
    #[inline]
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        rank_order((self.distance, self.id), (other.distance, other.id))
    }
}

/// Head of one input list inside the merge heap.
struct Cursor {
    head: CandidateResult,
    list: usize,
    pos: usize,
}

impl PartialEq for Cursor {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Cursor {}

impl PartialOrd for Cursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Cursor {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap and we pop the best head first.
        other
            .head
            .rank_cmp(&self.head)
            .then_with(|| other.list.cmp(&self.list))
    }
}

/// Merge rank-ordered per-partition lists into the global top-k.
///
/// K-way heap merge; the first occurrence of a record id in merged order is
/// its minimum-distance entry, so later duplicates are dropped. Stops as soon
/// as `k` distinct ids are collected.
pub fn aggregate<L>(per_partition: &[L], k: usize) -> Vec<CandidateResult>
where
    L: AsRef<[CandidateResult]>,
{
    if k == 0 {
        return Vec::new();
    }
    debug_assert!(per_partition
        .iter()
        .all(|l| l.as_ref().windows(2).all(|w| w[0].rank_cmp(&w[1]) != Ordering::Greater)));

    let mut heap: BinaryHeap<Cursor> = per_partition
        .iter()
        .enumerate()
        .filter_map(|(list, items)| {
            items.as_ref().first().map(|&head| Cursor { head, list, pos: 0 })
        })
        .collect();

    let mut seen = HashSet::with_capacity(k);
    let mut merged = Vec::with_capacity(k);
    while let Some(Cursor { head, list, pos }) = heap.pop() {
        if seen.insert(head.id) {
            merged.push(head);
            if merged.len() == k {
                break;
            }
        }
        if let Some(&next) = per_partition[list].as_ref().get(pos + 1) {
            heap.push(Cursor {
                head: next,
                list,
                pos: pos + 1,
            });
        }
    }
    merged
}

/// Fraction of the ground truth found in `result`.
///
/// `None` when the ground truth is empty (the caller may see no record).
pub fn compute_recall(result: &[CandidateResult], ground_truth: &[Neighbor]) -> Option<f64> {
    if ground_truth.is_empty() {
        return None;
    }
    let found: HashSet<RecordId> = result.iter().map(|c| c.id).collect();
    let hits = ground_truth.iter().filter(|n| found.contains(&n.id)).count();
    Some(hits as f64 / ground_truth.len() as f64)
}

/// Exact top-k over every store record admitted by `predicate`.
pub fn ground_truth(
    store: &dyn RecordStore,
    predicate: &Predicate,
    query: &[f32],
    k: usize,
    metric: DistanceMetric,
) -> Vec<Neighbor> {
    let admits = |id: RecordId| predicate.test(id);
    scan_top_k(store.records(), |r| &r.vector, query, k, metric, Some(&admits))
}
