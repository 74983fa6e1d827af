//! Property tests for partition assignment, pruning and aggregation.
//!
//! Run with: cargo test --test properties

use proptest::prelude::*;
use rls_ann_bench::{
    aggregate, CandidateResult, PartitionCatalog, PartitionId, PartitionStrategy, Predicate,
    RecordId, RecordStore, SyntheticSpec,
};
use roaring::RoaringTreemap;
use std::collections::HashSet;

fn store(records: usize, tenants: usize, seed: u64) -> Box<dyn RecordStore> {
    let spec = SyntheticSpec {
        records,
        dimension: 4,
        tenants,
        seed,
    };
    Box::new(spec.build().unwrap())
}

fn strategy() -> impl Strategy<Value = PartitionStrategy> {
    prop_oneof![
        (1usize..10).prop_map(|partitions| PartitionStrategy::Range { partitions }),
        (1usize..10, any::<u64>()).prop_map(|(partitions, seed)| PartitionStrategy::Hash {
            partitions,
            seed
        }),
        (1usize..6, any::<u64>()).prop_map(|(partitions, seed)| PartitionStrategy::Cluster {
            partitions,
            max_iters: 5,
            seed
        }),
        (1usize..6, prop_oneof![Just("tenant"), Just("region"), Just("missing")]).prop_map(
            |(partitions, field)| PartitionStrategy::Attribute {
                field: field.to_string(),
                partitions
            }
        ),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_every_record_in_exactly_one_partition(
        records in 1usize..300,
        tenants in 1usize..6,
        seed in any::<u64>(),
        first in strategy(),
        second in strategy(),
    ) {
        let store = store(records, tenants, seed);
        let catalog = PartitionCatalog::with_strategy(first.clone(), store.as_ref()).unwrap();
        catalog.check_consistency(store.as_ref()).unwrap();

        catalog.repartition(second.clone(), store.as_ref()).unwrap();
        let snapshot = catalog.snapshot();
        snapshot.check_consistency(store.as_ref()).unwrap();
        prop_assert_eq!(snapshot.len(), second.partitions());

        let total: u64 = snapshot.partitions().iter().map(|p| p.len()).sum();
        prop_assert_eq!(total, records as u64);
        for record in store.records() {
            let owner = snapshot.partition_of(record.id()).unwrap();
            let holders = snapshot
                .partitions()
                .iter()
                .filter(|p| p.members().contains(record.id().as_u64()))
                .count();
            prop_assert_eq!(holders, 1);
            prop_assert!(snapshot.partition(owner).unwrap().members().contains(record.id().as_u64()));
        }
    }

    #[test]
    fn prop_partition_pruning_is_sound(
        records in 1usize..300,
        seed in any::<u64>(),
        partitioning in strategy(),
        mask in prop::collection::vec(prop::bool::weighted(0.2), 300),
    ) {
        let store = store(records, 4, seed);
        let catalog = PartitionCatalog::with_strategy(partitioning, store.as_ref()).unwrap();
        let snapshot = catalog.snapshot();

        let admitted: RoaringTreemap = (0..records as u64).filter(|&i| mask[i as usize]).collect();
        let predicate = Predicate::new(admitted, records as u64);
        let selected: HashSet<PartitionId> = snapshot.partitions_for(&predicate).into_iter().collect();

        // Exhaustive check: any partition holding an admitted record is kept.
        for id in predicate.iter() {
            let owner = snapshot.partition_of(id).unwrap();
            prop_assert!(selected.contains(&owner), "{} in {} was pruned", id, owner);
        }
        for pid in &selected {
            prop_assert!(snapshot.partition(*pid).is_some());
        }
    }

    #[test]
    fn prop_aggregate_is_deduplicated_prefix_of_merge(
        raw in prop::collection::vec(prop::collection::vec((0u64..40, 0u32..50), 0..20), 0..6),
        k in 0usize..25,
    ) {
        let lists: Vec<Vec<CandidateResult>> = raw
            .iter()
            .enumerate()
            .map(|(p, entries)| {
                let mut list: Vec<CandidateResult> = entries
                    .iter()
                    .map(|&(id, d)| CandidateResult::new(RecordId(id), d as f32 / 10.0, PartitionId(p as u32)))
                    .collect();
                list.sort_by(|a, b| a.rank_cmp(b));
                list
            })
            .collect();

        let merged = aggregate(&lists, k);
        prop_assert!(merged.len() <= k);
        let ids: HashSet<RecordId> = merged.iter().map(|c| c.id).collect();
        prop_assert_eq!(ids.len(), merged.len());
        prop_assert!(merged.windows(2).all(|w| w[0].rank_cmp(&w[1]).is_lt()));

        let mut all: Vec<CandidateResult> = lists.iter().flatten().copied().collect();
        all.sort_by(|a, b| a.rank_cmp(b));
        let mut seen = HashSet::new();
        let expected: Vec<(RecordId, f32)> = all
            .iter()
            .filter(|c| seen.insert(c.id))
            .take(k)
            .map(|c| (c.id, c.distance))
            .collect();
        let actual: Vec<(RecordId, f32)> = merged.iter().map(|c| (c.id, c.distance)).collect();
        prop_assert_eq!(actual, expected);
    }
}
