//! Partitioning strategies: how records are mapped to partitions.

use crate::constants::kmeans::DEFAULT_MAX_ITERATIONS;
use crate::constants::workload::{DEFAULT_PARTITIONS, DEFAULT_SEED};
use crate::error::{BenchError, Result};
use crate::kmeans::KMeans;
use crate::store::{AttributeValue, RecordStore};
use roaring::RoaringTreemap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Rule that assigns every record of a store to exactly one partition.
///
/// Partition ids are always dense: the strategy produces `partitions` member
/// sets, some of which may be empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PartitionStrategy {
    /// Contiguous blocks of ids, in ascending id order.
    Range { partitions: usize },
    /// Seeded hash of the record id.
    Hash { partitions: usize, seed: u64 },
    /// K-means over the record vectors.
    Cluster {
        partitions: usize,
        #[serde(default = "default_max_iters")]
        max_iters: usize,
        #[serde(default = "default_seed")]
        seed: u64,
    },
    /// One partition per distinct value of `field`, round-robin when there are
    /// more values than partitions. Records missing the field go to partition 0.
    Attribute { field: String, partitions: usize },
}

fn default_max_iters() -> usize {
    DEFAULT_MAX_ITERATIONS
}

fn default_seed() -> u64 {
    DEFAULT_SEED
}

impl Default for PartitionStrategy {
    fn default() -> Self {
        PartitionStrategy::Range {
            partitions: DEFAULT_PARTITIONS,
        }
    }
}

impl fmt::Display for PartitionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionStrategy::Range { partitions } => write!(f, "range/{}", partitions),
            PartitionStrategy::Hash { partitions, .. } => write!(f, "hash/{}", partitions),
            PartitionStrategy::Cluster { partitions, .. } => write!(f, "cluster/{}", partitions),
            PartitionStrategy::Attribute { field, partitions } => {
                write!(f, "attribute({})/{}", field, partitions)
            }
        }
    }
}

impl PartitionStrategy {
    /// Number of partitions this strategy produces.
    pub fn partitions(&self) -> usize {
        match self {
            PartitionStrategy::Range { partitions }
            | PartitionStrategy::Hash { partitions, .. }
            | PartitionStrategy::Cluster { partitions, .. }
            | PartitionStrategy::Attribute { partitions, .. } => *partitions,
        }
    }

    /// The same strategy with a different partition count.
    pub fn with_partitions(&self, n: usize) -> Self {
        let mut next = self.clone();
        match &mut next {
            PartitionStrategy::Range { partitions }
            | PartitionStrategy::Hash { partitions, .. }
            | PartitionStrategy::Cluster { partitions, .. }
            | PartitionStrategy::Attribute { partitions, .. } => *partitions = n,
        }
        next
    }

    /// Validate the strategy parameters.
    pub fn validate(&self) -> Result<()> {
        if self.partitions() == 0 {
            return Err(BenchError::invalid_parameter(format!(
                "{}: partition count must be at least 1",
                self
            )));
        }
        if let PartitionStrategy::Attribute { field, .. } = self {
            if field.is_empty() {
                return Err(BenchError::invalid_parameter("attribute strategy needs a field"));
            }
        }
        Ok(())
    }

    /// Compute the member set of every partition.
    ///
    /// The result has exactly [`partitions`](Self::partitions) entries and
    /// every record of `store` appears in exactly one of them.
    pub fn assign(&self, store: &dyn RecordStore) -> Result<Vec<RoaringTreemap>> {
        self.validate()?;
        let n = self.partitions();
        let mut members = vec![RoaringTreemap::new(); n];

        match self {
            PartitionStrategy::Range { .. } => {
                let total = store.universe().len() as usize;
                let block = total.div_ceil(n).max(1);
                for (pos, id) in store.universe().iter().enumerate() {
                    members[pos / block].insert(id);
                }
            }
            PartitionStrategy::Hash { seed, .. } => {
                for id in store.universe().iter() {
                    members[(mix64(id ^ seed) % n as u64) as usize].insert(id);
                }
            }
            PartitionStrategy::Cluster { max_iters, seed, .. } => {
                let records = store.records();
                let points: Vec<&[f32]> = records.iter().map(|r| &*r.vector.data).collect();
                let assignments = KMeans::new(n, *max_iters, *seed).fit(&points)?;
                for (record, cluster) in records.iter().zip(assignments) {
                    members[cluster].insert(record.id().as_u64());
                }
            }
            PartitionStrategy::Attribute { field, .. } => {
                let mut records: Vec<_> = store.records().iter().collect();
                records.sort_by_key(|r| r.id());

                let mut slots: HashMap<&AttributeValue, usize> = HashMap::new();
                for record in records {
                    let slot = match record.attribute(field) {
                        None | Some(AttributeValue::Null) => 0,
                        Some(value) => {
                            let next = slots.len() % n;
                            *slots.entry(value).or_insert(next)
                        }
                    };
                    members[slot].insert(record.id().as_u64());
                }
            }
        }

        Ok(members)
    }
}

/// SplitMix64 finalizer.
#[inline]
fn mix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}
