//! The ANN index collaborator.
//!
//! The engine only talks to [`AnnIndex`] and [`IndexBuilder`]; swapping the
//! graph family means writing another pair of implementations, nothing else.
//! Two are shipped: [`HnswBuilder`] (graph index with filtered beam search)
//! and [`FlatBuilder`] (exact scan).

pub mod flat;
pub mod hnsw;

pub use flat::{scan_top_k, FlatBuilder, FlatIndex};
pub use hnsw::{HnswBuilder, HnswIndex};

use crate::distance::rank_order;
use crate::error::Result;
use crate::types::RecordId;
use crate::vector::Vector;
use std::cmp::Ordering;

/// A candidate returned by an index: record id and distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// The matched record.
    pub id: RecordId,
    /// The distance from the query vector.
    pub distance: f32,
}

impl Neighbor {
    /// Create a new Neighbor.
    #[inline]
    pub fn new(id: impl Into<RecordId>, distance: f32) -> Self {
        Self {
            id: id.into(),
            distance,
        }
    }

    /// Rank order: ascending distance, ties by lower id.
    #[inline]
    pub fn rank_cmp(&self, other: &Self) -> Ordering {
        rank_order((self.distance, self.id), (other.distance, other.id))
    }
}

/// Per-call search knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchParams {
    /// Number of neighbours requested.
    pub k: usize,
    /// Beam width override for graph indexes; `None` keeps the index default.
    pub ef_search: Option<usize>,
}

impl SearchParams {
    /// Request `k` neighbours with default beam width.
    pub fn top(k: usize) -> Self {
        Self { k, ef_search: None }
    }

    /// Set the beam width.
    pub fn with_ef_search(mut self, ef: Option<usize>) -> Self {
        self.ef_search = ef;
        self
    }
}

/// Row filter pushed into an index traversal.
pub type RowFilter<'a> = &'a (dyn Fn(RecordId) -> bool + Sync);

/// A built index over one partition's vectors.
///
/// # Contract
///
/// - results are sorted by [`Neighbor::rank_cmp`] and hold no duplicate ids;
/// - with a filter, every returned id passes it;
/// - identical index state and query give identical results.
pub trait AnnIndex: Send + Sync {
    /// Search for the `params.k` nearest neighbours, optionally filtered.
    fn search(&self, query: &[f32], params: &SearchParams, filter: Option<RowFilter<'_>>)
        -> Vec<Neighbor>;

    /// Whether a filter passed to [`search`](AnnIndex::search) is applied
    /// during traversal. Indexes returning `false` ignore the filter.
    fn supports_filter(&self) -> bool;

    /// Return the number of vectors in the index.
    fn len(&self) -> usize;

    /// Return true if the index contains no vectors.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Return the dimensionality of vectors in this index.
    fn dimension(&self) -> usize;
}

/// Builds an [`AnnIndex`] over a vector set.
pub trait IndexBuilder: Send + Sync {
    /// Short name for logs and reports.
    fn name(&self) -> &'static str;

    /// Build an index over `vectors` (ids travel with the vectors).
    ///
    /// # Errors
    ///
    /// `EmptyVectorSet` for no input, `DimensionMismatch` for ragged input.
    fn build(&self, vectors: &[Vector]) -> Result<Box<dyn AnnIndex>>;
}
