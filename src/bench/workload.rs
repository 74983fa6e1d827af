//! Query workload generation.

use crate::config::{CallerMix, WorkloadConfig};
use crate::policy::CallerIdentity;
use crate::store::SyntheticSpec;
use crate::types::PartitionId;
use crate::vector::Vector;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// One benchmark query.
#[derive(Debug, Clone)]
pub struct Query {
    pub id: u64,
    pub vector: Vec<f32>,
    pub caller: CallerIdentity,
    pub k: usize,
    /// Restrict the search to these partitions (still subject to pruning).
    pub scope: Option<Vec<PartitionId>>,
}

impl Query {
    pub fn new(id: u64, vector: Vec<f32>, caller: CallerIdentity, k: usize) -> Self {
        Self {
            id,
            vector,
            caller,
            k,
            scope: None,
        }
    }

    pub fn with_scope(mut self, scope: Vec<PartitionId>) -> Self {
        self.scope = Some(scope);
        self
    }
}

/// Callers of `mix` over a synthetic data set.
pub fn callers(mix: CallerMix, dataset: &SyntheticSpec) -> Vec<CallerIdentity> {
    match mix {
        CallerMix::Analysts => dataset.analysts(),
        CallerMix::Auditor => vec![SyntheticSpec::auditor()],
        CallerMix::All => {
            let mut all = dataset.analysts();
            all.push(SyntheticSpec::auditor());
            all
        }
    }
}

/// Generate `config.queries` queries of dimension `dimension`.
///
/// Vectors are drawn uniformly from `[-1, 1)` like the synthetic records.
/// Callers rotate through `callers`; with probability `guest_fraction` a query
/// is issued by [`SyntheticSpec::guest`] instead. The same config always
/// yields the same queries.
pub fn generate(config: &WorkloadConfig, callers: &[CallerIdentity], dimension: usize) -> Vec<Query> {
    let mut rng = ChaCha8Rng::seed_from_u64(config.seed);
    let guest = SyntheticSpec::guest();

    (0..config.queries as u64)
        .map(|id| {
            let vector = Vector::random(&mut rng, id, dimension).data.to_vec();
            let is_guest = config.guest_fraction > 0.0 && rng.gen_bool(config.guest_fraction);
            let caller = match callers {
                _ if is_guest => guest.clone(),
                [] => guest.clone(),
                list => list[id as usize % list.len()].clone(),
            };
            Query::new(id, vector, caller, config.k)
        })
        .collect()
}
