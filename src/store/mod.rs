//! Relational store collaborator.
//!
//! The store is the source of truth for records (id, vector, attributes) and
//! for the security policies that govern them. It is read-only for the whole
//! benchmark run. [`InMemoryStore`] is the shipped implementation;
//! [`synthetic`] generates one from a seed.

mod attribute;
pub mod synthetic;

pub use attribute::{AttributeValue, Attributes};
pub use synthetic::SyntheticSpec;

use crate::error::{BenchError, Result};
use crate::policy::PolicySet;
use crate::types::RecordId;
use crate::vector::Vector;
use roaring::RoaringTreemap;
use std::collections::HashMap;
use std::time::Duration;

/// A stored row: vector plus the attributes policies are evaluated against.
#[derive(Clone, Debug)]
pub struct Record {
    /// The vector data (carries the record id).
    pub vector: Vector,
    /// Attribute key-value pairs.
    pub attributes: Attributes,
}

impl Record {
    /// Create a record without attributes.
    pub fn new(vector: Vector) -> Self {
        Self {
            vector,
            attributes: Attributes::new(),
        }
    }

    /// Add an attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Get the record ID.
    pub fn id(&self) -> RecordId {
        self.vector.id
    }

    /// Get an attribute by field name.
    pub fn attribute(&self, field: &str) -> Option<&AttributeValue> {
        self.attributes.get(field)
    }
}

/// Read-only access to records and policy definitions.
///
/// Implementations must be `Send + Sync`: ground-truth scans and concurrent
/// benchmark queries read the store from many threads.
pub trait RecordStore: Send + Sync {
    /// Dimension shared by every record vector.
    fn dimension(&self) -> usize;

    /// All records, ordered by id.
    fn records(&self) -> &[Record];

    /// Look up one record.
    fn get(&self, id: RecordId) -> Option<&Record>;

    /// Every record id, as a bitmap.
    fn universe(&self) -> &RoaringTreemap;

    /// Security policy definitions.
    fn policies(&self) -> &PolicySet;

    /// Check that the store answers within `timeout`.
    fn ping(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    /// Number of records.
    fn len(&self) -> usize {
        self.records().len()
    }

    /// Return true if the store holds no records.
    fn is_empty(&self) -> bool {
        self.records().is_empty()
    }
}

/// Store that keeps every record in memory.
pub struct InMemoryStore {
    dimension: usize,
    records: Vec<Record>,
    positions: HashMap<RecordId, usize>,
    universe: RoaringTreemap,
    policies: PolicySet,
}

impl InMemoryStore {
    /// Build a store from records and policies.
    ///
    /// # Errors
    ///
    /// Returns `EmptyVectorSet` for no records, `DimensionMismatch` when vectors
    /// disagree on dimension, and `InvalidParameter` on duplicate ids.
    pub fn new(mut records: Vec<Record>, policies: PolicySet) -> Result<Self> {
        let first = records.first().ok_or(BenchError::EmptyVectorSet)?;
        let dimension = first.vector.dim();

        records.sort_by_key(|r| r.id());

        let mut positions = HashMap::with_capacity(records.len());
        let mut universe = RoaringTreemap::new();
        for (pos, record) in records.iter().enumerate() {
            if record.vector.dim() != dimension {
                return Err(BenchError::dimension_mismatch(dimension, record.vector.dim()));
            }
            if positions.insert(record.id(), pos).is_some() {
                return Err(BenchError::invalid_parameter(format!(
                    "duplicate record id {}",
                    record.id()
                )));
            }
            universe.insert(record.id().as_u64());
        }

        Ok(Self {
            dimension,
            records,
            positions,
            universe,
            policies,
        })
    }
}

impl RecordStore for InMemoryStore {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn records(&self) -> &[Record] {
        &self.records
    }

    fn get(&self, id: RecordId) -> Option<&Record> {
        self.positions.get(&id).map(|&pos| &self.records[pos])
    }

    fn universe(&self) -> &RoaringTreemap {
        &self.universe
    }

    fn policies(&self) -> &PolicySet {
        &self.policies
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: u64, data: Vec<f32>) -> Record {
        Record::new(Vector::new(id, data)).with_attribute("tenant", "acme")
    }

    #[test]
    fn test_store_orders_and_indexes() {
        let store = InMemoryStore::new(
            vec![record(5, vec![0.0, 1.0]), record(2, vec![1.0, 0.0])],
            PolicySet::default(),
        )
        .unwrap();

        assert_eq!(store.len(), 2);
        assert_eq!(store.dimension(), 2);
        assert_eq!(store.records()[0].id(), RecordId(2));
        assert_eq!(store.get(RecordId(5)).unwrap().vector.data[1], 1.0);
        assert!(store.get(RecordId(3)).is_none());
        assert!(store.universe().contains(5));
        assert_eq!(
            store.get(RecordId(2)).unwrap().attribute("tenant"),
            Some(&AttributeValue::from("acme"))
        );
    }

    #[test]
    fn test_store_rejects_bad_input() {
        assert!(matches!(
            InMemoryStore::new(vec![], PolicySet::default()),
            Err(BenchError::EmptyVectorSet)
        ));
        assert!(matches!(
            InMemoryStore::new(
                vec![record(1, vec![0.0]), record(2, vec![0.0, 1.0])],
                PolicySet::default()
            ),
            Err(BenchError::DimensionMismatch { expected: 1, actual: 2 })
        ));
        assert!(matches!(
            InMemoryStore::new(
                vec![record(1, vec![0.0]), record(1, vec![1.0])],
                PolicySet::default()
            ),
            Err(BenchError::InvalidParameter(_))
        ));
    }
}
