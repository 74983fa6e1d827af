//! Distance metrics and the total order used to rank candidates.
//!
//! Every ranked list in the crate (per-partition results, merged results,
//! ground truth) is ordered by [`rank_order`]: ascending distance, ties broken
//! by the lower record id.

use crate::types::RecordId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Supported distance metrics for similarity search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    /// Euclidean (L2) distance: sqrt(sum((a[i] - b[i])^2))
    Euclidean,
    /// Squared Euclidean distance: sum((a[i] - b[i])^2)
    /// Faster than Euclidean when only relative ordering matters.
    #[default]
    EuclideanSquared,
    /// Cosine distance: 1 - cosine_similarity(a, b)
    Cosine,
    /// Negative dot product: -dot(a, b)
    /// Negated so that smaller is closer, like the other metrics.
    DotProduct,
}

impl DistanceMetric {
    /// Compute the distance between two vectors using this metric.
    ///
    /// # Panics
    /// Panics if the vectors have different dimensions.
    #[inline]
    pub fn compute(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Euclidean => euclidean_distance_squared(a, b).sqrt(),
            DistanceMetric::EuclideanSquared => euclidean_distance_squared(a, b),
            DistanceMetric::Cosine => 1.0 - cosine_similarity(a, b),
            DistanceMetric::DotProduct => -dot_product(a, b),
        }
    }
}

/// Order two scored records: ascending distance, then ascending id.
///
/// Uses `total_cmp` so NaN distances sort last instead of poisoning the order.
#[inline]
pub fn rank_order(a: (f32, RecordId), b: (f32, RecordId)) -> Ordering {
    a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1))
}

/// Compute the squared Euclidean distance between two vectors.
#[inline]
pub fn euclidean_distance_squared(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let diff = x - y;
            diff * diff
        })
        .sum()
}

/// Compute the dot product of two vectors.
#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Compute the cosine similarity between two vectors.
///
/// Returns 0.0 when either vector has zero norm.
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "Vector dimensions must match");

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = (norm_a * norm_b).sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}
