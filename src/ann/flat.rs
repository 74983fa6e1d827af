//! Exact flat index.
//!
//! Computes distances to every stored vector and keeps the k closest. Used as
//! the exhaustive-scan path of the engine, for brute-force ground truth, and as
//! an [`AnnIndex`] with exact recall.

use super::{AnnIndex, IndexBuilder, Neighbor, RowFilter, SearchParams};
use crate::constants::scan::CHUNK_SIZE;
use crate::distance::{rank_order, DistanceMetric};
use crate::error::{BenchError, Result};
use crate::types::RecordId;
use crate::vector::Vector;
use rayon::prelude::*;
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// A record with its computed distance, used for heap operations.
#[derive(Clone, Copy)]
struct ScoredRecord {
    id: RecordId,
    distance: f32,
}

impl PartialEq for ScoredRecord {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScoredRecord {}

impl PartialOrd for ScoredRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap on rank order: peek() is the current worst of the k best.
        rank_order((self.distance, self.id), (other.distance, other.id))
    }
}

/// Bounded max-heap keeping the k best records seen so far.
struct TopK {
    k: usize,
    heap: BinaryHeap<ScoredRecord>,
}

impl TopK {
    fn new(k: usize) -> Self {
        Self {
            k,
            heap: BinaryHeap::with_capacity(k + 1),
        }
    }

    #[inline]
    fn offer(&mut self, candidate: ScoredRecord) {
        if self.heap.len() < self.k {
            self.heap.push(candidate);
        } else if let Some(worst) = self.heap.peek() {
            if candidate < *worst {
                self.heap.pop();
                self.heap.push(candidate);
            }
        }
    }

    fn merge(mut self, other: TopK) -> TopK {
        for item in other.heap {
            self.offer(item);
        }
        self
    }

    fn into_sorted(self) -> Vec<Neighbor> {
        self.heap
            .into_sorted_vec()
            .into_iter()
            .map(|sr| Neighbor::new(sr.id, sr.distance))
            .collect()
    }
}

/// Exact top-k over `items`, in parallel chunks.
///
/// `vector_of` projects an item to its vector, so the same scan runs over
/// index-owned vectors and over store records. Items whose id fails `filter`
/// are skipped. Output is in rank order; the result does not depend on the
/// chunking because rank order is total.
pub fn scan_top_k<T, F>(
    items: &[T],
    vector_of: F,
    query: &[f32],
    k: usize,
    metric: DistanceMetric,
    filter: Option<RowFilter<'_>>,
) -> Vec<Neighbor>
where
    T: Sync,
    F: Fn(&T) -> &Vector + Sync,
{
    if k == 0 {
        return Vec::new();
    }

    items
        .par_chunks(CHUNK_SIZE)
        .map(|chunk| {
            let mut local = TopK::new(k);
            for item in chunk {
                let vector = vector_of(item);
                if filter.is_some_and(|f| !f(vector.id)) {
                    continue;
                }
                local.offer(ScoredRecord {
                    id: vector.id,
                    distance: metric.compute(query, &vector.data),
                });
            }
            local
        })
        .reduce(|| TopK::new(k), TopK::merge)
        .into_sorted()
}

/// Flat index that performs exact nearest neighbor search.
pub struct FlatIndex {
    vectors: Vec<Vector>,
    metric: DistanceMetric,
    dim: usize,
}

impl FlatIndex {
    /// Create an index over `vectors`.
    pub fn new(vectors: Vec<Vector>, metric: DistanceMetric) -> Result<Self> {
        let dim = vectors.first().ok_or(BenchError::EmptyVectorSet)?.dim();
        if let Some(bad) = vectors.iter().find(|v| v.dim() != dim) {
            return Err(BenchError::dimension_mismatch(dim, bad.dim()));
        }
        Ok(Self {
            vectors,
            metric,
            dim,
        })
    }
}

impl AnnIndex for FlatIndex {
    fn search(
        &self,
        query: &[f32],
        params: &SearchParams,
        filter: Option<RowFilter<'_>>,
    ) -> Vec<Neighbor> {
        scan_top_k(&self.vectors, |v| v, query, params.k, self.metric, filter)
    }

    fn supports_filter(&self) -> bool {
        true
    }

    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}

/// Builder for [`FlatIndex`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FlatBuilder {
    pub metric: DistanceMetric,
}

impl FlatBuilder {
    /// Create a builder using `metric`.
    pub fn new(metric: DistanceMetric) -> Self {
        Self { metric }
    }
}

impl IndexBuilder for FlatBuilder {
    fn name(&self) -> &'static str {
        "flat"
    }

    fn build(&self, vectors: &[Vector]) -> Result<Box<dyn AnnIndex>> {
        Ok(Box::new(FlatIndex::new(vectors.to_vec(), self.metric)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn random_vectors(n: u64, dim: usize) -> Vec<Vector> {
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        (0..n).map(|i| Vector::random(&mut rng, i, dim)).collect()
    }

    #[test]
    fn test_basic_search() {
        let index = FlatIndex::new(random_vectors(100, 16), DistanceMetric::Euclidean).unwrap();
        let query = vec![0.1; 16];
        let results = index.search(&query, &SearchParams::top(10), None);

        assert_eq!(results.len(), 10);
        for pair in results.windows(2) {
            assert_ne!(pair[0].rank_cmp(&pair[1]), Ordering::Greater);
        }
    }

    #[test]
    fn test_filter_is_respected() {
        let index =
            FlatIndex::new(random_vectors(500, 8), DistanceMetric::EuclideanSquared).unwrap();
        let even = |id: RecordId| id.as_u64() % 2 == 0;
        let results = index.search(&[0.0; 8], &SearchParams::top(20), Some(&even));
        assert_eq!(results.len(), 20);
        assert!(results.iter().all(|n| n.id.as_u64() % 2 == 0));
    }

    #[test]
    fn test_chunking_does_not_change_result() {
        let vectors = random_vectors(3 * CHUNK_SIZE as u64 + 17, 4);
        let query = [0.2, -0.3, 0.5, 0.0];
        let parallel = scan_top_k(&vectors, |v| v, &query, 15, DistanceMetric::Euclidean, None);

        let mut sequential: Vec<Neighbor> = vectors
            .iter()
            .map(|v| Neighbor::new(v.id, DistanceMetric::Euclidean.compute(&query, &v.data)))
            .collect();
        sequential.sort_by(Neighbor::rank_cmp);
        sequential.truncate(15);

        assert_eq!(parallel, sequential);
    }

    #[test]
    fn test_ties_break_by_id() {
        let vectors: Vec<Vector> = (0..10u64).rev().map(|i| Vector::new(i, vec![1.0])).collect();
        let results = scan_top_k(&vectors, |v| v, &[0.0], 3, DistanceMetric::Euclidean, None);
        let ids: Vec<u64> = results.iter().map(|n| n.id.as_u64()).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn test_build_rejects_empty() {
        assert!(FlatBuilder::default().build(&[]).is_err());
        assert_eq!(scan_top_k(&random_vectors(5, 2), |v| v, &[0.0, 0.0], 0, DistanceMetric::Euclidean, None).len(), 0);
    }
}
