//! HNSW (Hierarchical Navigable Small World) adapter with filtered search.
//!
//! The graph is built once per partition and is immutable afterwards, which
//! matches how the catalog treats index handles: a membership change means a
//! rebuild, never an in-place edit.
//!
//! # Filtered search
//!
//! Upper layers are descended greedily without the filter. On layer 0 the
//! beam expands through every node, but only nodes passing the filter enter
//! the result set. Rejected nodes still act as bridges, so low-selectivity
//! filters do not disconnect the graph; they just widen the traversal.
//!
//! # Parameters
//!
//! - `m`: Max connections per node (layer 0 gets `2 * m`)
//! - `ef_construction`: Beam width during index building
//! - `ef_search`: Default beam width during search
//! - `seed`: Level assignment is drawn from a seeded RNG, so the same input
//!   always produces the same graph

use super::{AnnIndex, IndexBuilder, Neighbor, RowFilter, SearchParams};
use crate::constants::hnsw;
use crate::distance::{rank_order, DistanceMetric};
use crate::error::{BenchError, Result};
use crate::types::RecordId;
use crate::vector::Vector;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

/// Node identifier within the index.
type NodeId = usize;

/// Neighbour list of one node on one layer.
type Links = SmallVec<[NodeId; 32]>;

/// A node with its computed distance, used for heap operations.
#[derive(Clone, Copy, Debug)]
struct ScoredNode {
    id: NodeId,
    record: RecordId,
    distance: f32,
}

impl PartialEq for ScoredNode {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for ScoredNode {}

impl PartialOrd for ScoredNode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScoredNode {
    fn cmp(&self, other: &Self) -> Ordering {
        rank_order((self.distance, self.record), (other.distance, other.record))
    }
}

/// Build and search parameters of the HNSW adapter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HnswBuilder {
    pub m: usize,
    pub ef_construction: usize,
    pub ef_search: usize,
    pub metric: DistanceMetric,
    pub seed: u64,
}

impl Default for HnswBuilder {
    fn default() -> Self {
        Self {
            m: hnsw::DEFAULT_M,
            ef_construction: hnsw::DEFAULT_EF_CONSTRUCTION,
            ef_search: hnsw::DEFAULT_EF_SEARCH,
            metric: DistanceMetric::default(),
            seed: hnsw::DEFAULT_SEED,
        }
    }
}

impl IndexBuilder for HnswBuilder {
    fn name(&self) -> &'static str {
        "hnsw"
    }

    fn build(&self, vectors: &[Vector]) -> Result<Box<dyn AnnIndex>> {
        Ok(Box::new(HnswIndex::build(self, vectors)?))
    }
}

/// HNSW index for approximate nearest neighbor search.
pub struct HnswIndex {
    /// Record ids (for returning results)
    ids: Vec<RecordId>,
    /// Flat vector data for cache-efficient distance computation
    data: Vec<f32>,
    dim: usize,
    /// links[node][layer]
    links: Vec<Vec<Links>>,
    entry_point: Option<NodeId>,
    max_layer: usize,
    m_max: usize,
    m_max0: usize,
    ef_construction: usize,
    ef_search: usize,
    /// Normalization factor for level generation
    ml: f64,
    metric: DistanceMetric,
    rng: ChaCha8Rng,
}

impl HnswIndex {
    /// Create an empty index.
    pub fn new(params: &HnswBuilder) -> Self {
        let m = params.m.max(2);
        Self {
            ids: Vec::new(),
            data: Vec::new(),
            dim: 0,
            links: Vec::new(),
            entry_point: None,
            max_layer: 0,
            m_max: m,
            m_max0: m * 2,
            ef_construction: params.ef_construction.max(1),
            ef_search: params.ef_search.max(1),
            ml: 1.0 / (m as f64).ln(),
            metric: params.metric,
            rng: ChaCha8Rng::seed_from_u64(params.seed),
        }
    }

    /// Build an index over `vectors`, inserting them in input order.
    pub fn build(params: &HnswBuilder, vectors: &[Vector]) -> Result<Self> {
        if vectors.is_empty() {
            return Err(BenchError::EmptyVectorSet);
        }
        let mut index = Self::new(params);
        for vector in vectors {
            index.add(vector)?;
        }
        Ok(index)
    }

    /// Generate a random layer for a new node.
    fn random_layer(&mut self) -> usize {
        let r: f64 = self.rng.gen_range(f64::MIN_POSITIVE..1.0);
        (-r.ln() * self.ml).floor() as usize
    }

    /// Add a vector to the index.
    pub fn add(&mut self, vector: &Vector) -> Result<()> {
        if self.dim == 0 {
            self.dim = vector.dim();
        } else if vector.dim() != self.dim {
            return Err(BenchError::dimension_mismatch(self.dim, vector.dim()));
        }

        let node = self.ids.len();
        let level = self.random_layer();
        self.ids.push(vector.id);
        self.data.extend_from_slice(&vector.data);
        self.links.push(vec![Links::new(); level + 1]);

        let Some(entry) = self.entry_point else {
            self.entry_point = Some(node);
            self.max_layer = level;
            return Ok(());
        };

        let query = &vector.data;
        let mut ep = vec![self.score(query, entry)];

        // Search from top layer down to target layer + 1
        for layer in (level + 1..=self.max_layer).rev() {
            ep = self.search_layer(query, &ep, 1, layer, None);
        }

        for layer in (0..=level.min(self.max_layer)).rev() {
            let candidates = self.search_layer(query, &ep, self.ef_construction, layer, None);
            let limit = if layer == 0 { self.m_max0 } else { self.m_max };
            let neighbors: Links = candidates.iter().take(limit).map(|c| c.id).collect();

            for &neighbor in &neighbors {
                self.links[neighbor][layer].push(node);
                if self.links[neighbor][layer].len() > limit {
                    self.prune(neighbor, layer, limit);
                }
            }
            self.links[node][layer] = neighbors;
            ep = candidates;
        }

        if level > self.max_layer {
            self.entry_point = Some(node);
            self.max_layer = level;
        }
        Ok(())
    }

    #[inline]
    fn vector_data(&self, node: NodeId) -> &[f32] {
        let start = node * self.dim;
        &self.data[start..start + self.dim]
    }

    #[inline]
    fn score(&self, query: &[f32], node: NodeId) -> ScoredNode {
        ScoredNode {
            id: node,
            record: self.ids[node],
            distance: self.metric.compute(query, self.vector_data(node)),
        }
    }

    /// Keep the `limit` closest links of `node` on `layer`.
    fn prune(&mut self, node: NodeId, layer: usize, limit: usize) {
        let base = self.vector_data(node).to_vec();
        let mut scored: Vec<ScoredNode> = self.links[node][layer]
            .iter()
            .map(|&n| self.score(&base, n))
            .collect();
        scored.sort();
        scored.truncate(limit);
        self.links[node][layer] = scored.into_iter().map(|s| s.id).collect();
    }

    /// Beam search on one layer. Returns up to `ef` nodes in rank order; with a
    /// filter, only nodes whose record passes it.
    fn search_layer(
        &self,
        query: &[f32],
        entry_points: &[ScoredNode],
        ef: usize,
        layer: usize,
        filter: Option<RowFilter<'_>>,
    ) -> Vec<ScoredNode> {
        let admits = |node: &ScoredNode| filter.map_or(true, |f| f(node.record));

        let mut visited = vec![false; self.ids.len()];
        let mut candidates: BinaryHeap<Reverse<ScoredNode>> = BinaryHeap::with_capacity(ef);
        let mut results: BinaryHeap<ScoredNode> = BinaryHeap::with_capacity(ef + 1);

        for ep in entry_points {
            if !visited[ep.id] {
                visited[ep.id] = true;
                candidates.push(Reverse(*ep));
                if admits(ep) {
                    results.push(*ep);
                }
            }
        }
        while results.len() > ef {
            results.pop();
        }

        while let Some(Reverse(current)) = candidates.pop() {
            if results.len() >= ef {
                if let Some(worst) = results.peek() {
                    if current > *worst {
                        break;
                    }
                }
            }

            let Some(neighbors) = self.links[current.id].get(layer) else {
                continue;
            };
            for &neighbor in neighbors {
                if visited[neighbor] {
                    continue;
                }
                visited[neighbor] = true;

                let scored = self.score(query, neighbor);
                let improves = results.len() < ef || results.peek().map_or(true, |w| scored < *w);
                if improves {
                    candidates.push(Reverse(scored));
                    if admits(&scored) {
                        results.push(scored);
                        if results.len() > ef {
                            results.pop();
                        }
                    }
                }
            }
        }

        results.into_sorted_vec()
    }
}

impl AnnIndex for HnswIndex {
    fn search(
        &self,
        query: &[f32],
        params: &SearchParams,
        filter: Option<RowFilter<'_>>,
    ) -> Vec<Neighbor> {
        let Some(entry) = self.entry_point else {
            return Vec::new();
        };
        if params.k == 0 {
            return Vec::new();
        }

        let mut ep = vec![self.score(query, entry)];
        for layer in (1..=self.max_layer).rev() {
            ep = self.search_layer(query, &ep, 1, layer, None);
        }

        let ef = params.ef_search.unwrap_or(self.ef_search).max(params.k);
        self.search_layer(query, &ep, ef, 0, filter)
            .into_iter()
            .take(params.k)
            .map(|s| Neighbor::new(s.record, s.distance))
            .collect()
    }

    fn supports_filter(&self) -> bool {
        true
    }

    fn len(&self) -> usize {
        self.ids.len()
    }

    fn dimension(&self) -> usize {
        self.dim
    }
}
