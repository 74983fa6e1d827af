//! Resolved row predicate backed by a roaring bitmap.

use crate::types::RecordId;
use roaring::RoaringTreemap;

/// The set of records a caller may see, materialized over a record universe.
///
/// Membership tests are bitmap lookups, so the engine can call [`test`] from
/// inside an index traversal without measurable overhead.
///
/// [`test`]: Predicate::test
#[derive(Clone, Debug, PartialEq)]
pub struct Predicate {
    admitted: RoaringTreemap,
    universe_size: u64,
}

impl Predicate {
    /// Create a predicate from the admitted ids and the universe size.
    pub fn new(admitted: RoaringTreemap, universe_size: u64) -> Self {
        debug_assert!(admitted.len() <= universe_size);
        Self {
            admitted,
            universe_size,
        }
    }

    /// A predicate that admits every record of `universe`.
    pub fn allow_all(universe: &RoaringTreemap) -> Self {
        Self::new(universe.clone(), universe.len())
    }

    /// Whether the record passes.
    #[inline]
    pub fn test(&self, id: RecordId) -> bool {
        self.admitted.contains(id.as_u64())
    }

    /// Fraction of the universe that passes, in `[0, 1]`.
    ///
    /// Exact here because the predicate is fully materialized; returns 0.0 for
    /// an empty universe.
    pub fn estimated_selectivity(&self) -> f64 {
        if self.universe_size == 0 {
            0.0
        } else {
            self.admitted.len() as f64 / self.universe_size as f64
        }
    }

    /// Number of admitted records.
    pub fn matching_count(&self) -> u64 {
        self.admitted.len()
    }

    /// Size of the universe the predicate was resolved over.
    pub fn universe_size(&self) -> u64 {
        self.universe_size
    }

    /// Return true if no record passes.
    pub fn is_empty(&self) -> bool {
        self.admitted.is_empty()
    }

    /// Whether any admitted id lies in `[lo, hi]`.
    pub fn intersects_range(&self, lo: RecordId, hi: RecordId) -> bool {
        if lo > hi || self.admitted.is_empty() {
            return false;
        }
        let upto_hi = self.admitted.rank(hi.as_u64());
        let below_lo = match lo.as_u64() {
            0 => 0,
            lo => self.admitted.rank(lo - 1),
        };
        upto_hi > below_lo
    }

    /// Whether no admitted id is in `members`.
    pub fn is_disjoint(&self, members: &RoaringTreemap) -> bool {
        self.admitted.is_disjoint(members)
    }

    /// Admitted ids that are also in `members`, ascending.
    pub fn eligible(&self, members: &RoaringTreemap) -> RoaringTreemap {
        &self.admitted & members
    }

    /// Admitted ids, ascending.
    pub fn iter(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.admitted.iter().map(RecordId)
    }
}
