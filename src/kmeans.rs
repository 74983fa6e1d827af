//! K-Means clustering for cluster partitioning.
//!
//! Implements Lloyd's algorithm with k-means++ initialization. All random
//! choices come from a seeded RNG so the same records and seed always yield
//! the same clusters, which keeps repartitioning reproducible between runs.

use crate::constants::kmeans::{CONVERGENCE_THRESHOLD, KMEANSPP_THRESHOLD};
use crate::distance::euclidean_distance_squared;
use crate::error::{BenchError, Result};
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;

/// K-Means clustering algorithm.
pub struct KMeans {
    /// The computed cluster centroids.
    pub centroids: Vec<Vec<f32>>,
    k: usize,
    max_iters: usize,
    rng: ChaCha8Rng,
}

impl KMeans {
    /// Create a new K-Means instance.
    ///
    /// # Arguments
    /// * `k` - Number of clusters
    /// * `max_iters` - Maximum iterations for convergence
    /// * `seed` - Seed for centroid initialization
    pub fn new(k: usize, max_iters: usize, seed: u64) -> Self {
        Self {
            centroids: Vec::new(),
            k,
            max_iters,
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Fit the model and return the cluster of every input point.
    ///
    /// With fewer points than clusters, every point gets its own cluster and
    /// the remaining clusters stay empty.
    pub fn fit(&mut self, points: &[&[f32]]) -> Result<Vec<usize>> {
        if self.k == 0 {
            return Err(BenchError::invalid_parameter("k-means needs at least one cluster"));
        }
        let Some(first) = points.first() else {
            return Err(BenchError::EmptyVectorSet);
        };
        let dim = first.len();
        if let Some(bad) = points.iter().find(|p| p.len() != dim) {
            return Err(BenchError::dimension_mismatch(dim, bad.len()));
        }
        if points.len() <= self.k {
            self.centroids = points.iter().map(|p| p.to_vec()).collect();
            return Ok((0..points.len()).collect());
        }

        // Random init for large k: k-means++ is O(k²n)
        self.centroids = if self.k > KMEANSPP_THRESHOLD {
            index::sample(&mut self.rng, points.len(), self.k)
                .into_iter()
                .map(|i| points[i].to_vec())
                .collect()
        } else {
            self.kmeans_plus_plus_init(points)
        };

        let mut assignments = self.assign(points);
        for _ in 0..self.max_iters {
            let new_centroids = self.update_centroids(points, &assignments, dim);
            let change = self.measure_change(&new_centroids);
            self.centroids = new_centroids;
            assignments = self.assign(points);

            if change < CONVERGENCE_THRESHOLD {
                break;
            }
        }
        Ok(assignments)
    }

    /// Selects initial centroids with probability proportional to squared
    /// distance from the centroids chosen so far.
    fn kmeans_plus_plus_init(&mut self, points: &[&[f32]]) -> Vec<Vec<f32>> {
        let mut centroids: Vec<Vec<f32>> = Vec::with_capacity(self.k);
        centroids.push(points[self.rng.gen_range(0..points.len())].to_vec());

        while centroids.len() < self.k {
            let distances: Vec<f32> = points
                .par_iter()
                .map(|p| {
                    centroids
                        .iter()
                        .map(|c| euclidean_distance_squared(p, c))
                        .fold(f32::MAX, f32::min)
                })
                .collect();

            let total: f32 = distances.iter().sum();
            if total <= 0.0 {
                // All points coincide with a centroid
                centroids.push(points[self.rng.gen_range(0..points.len())].to_vec());
                continue;
            }

            let mut r = self.rng.gen_range(0.0..total);
            // Floating point leftovers fall back to the last point
            let mut chosen = points.len() - 1;
            for (i, &d) in distances.iter().enumerate() {
                r -= d;
                if r <= 0.0 {
                    chosen = i;
                    break;
                }
            }
            centroids.push(points[chosen].to_vec());
        }

        centroids
    }

    /// Assign each point to its nearest centroid (lowest index on ties).
    pub fn assign(&self, points: &[&[f32]]) -> Vec<usize> {
        points.par_iter().map(|p| self.nearest(p)).collect()
    }

    fn nearest(&self, point: &[f32]) -> usize {
        let mut best = 0;
        let mut best_dist = f32::INFINITY;
        for (idx, c) in self.centroids.iter().enumerate() {
            let d = euclidean_distance_squared(point, c);
            if d < best_dist {
                best = idx;
                best_dist = d;
            }
        }
        best
    }

    /// Empty clusters retain their old centroid.
    fn update_centroids(&self, points: &[&[f32]], assignments: &[usize], dim: usize) -> Vec<Vec<f32>> {
        let mut sums = vec![vec![0.0f32; dim]; self.centroids.len()];
        let mut counts = vec![0usize; self.centroids.len()];
        for (p, &a) in points.iter().zip(assignments) {
            counts[a] += 1;
            for (s, &v) in sums[a].iter_mut().zip(p.iter()) {
                *s += v;
            }
        }

        sums.into_iter()
            .zip(counts)
            .enumerate()
            .map(|(k, (mut sum, count))| {
                if count == 0 {
                    return self.centroids[k].clone();
                }
                for s in &mut sum {
                    *s /= count as f32;
                }
                sum
            })
            .collect()
    }

    /// Average squared movement of the centroids.
    fn measure_change(&self, new_centroids: &[Vec<f32>]) -> f32 {
        let total: f32 = self
            .centroids
            .iter()
            .zip(new_centroids)
            .map(|(old, new)| euclidean_distance_squared(old, new))
            .sum();
        total / self.centroids.len().max(1) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::Vector;

    fn points(n: u64, dim: usize, seed: u64) -> Vec<Vector> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        (0..n).map(|i| Vector::random(&mut rng, i, dim)).collect()
    }

    fn slices(vectors: &[Vector]) -> Vec<&[f32]> {
        vectors.iter().map(|v| &*v.data).collect()
    }

    #[test]
    fn test_kmeans_basic() {
        let vectors = points(300, 8, 1);
        let mut kmeans = KMeans::new(5, 50, 7);
        let assignments = kmeans.fit(&slices(&vectors)).unwrap();

        assert_eq!(kmeans.centroids.len(), 5);
        assert_eq!(assignments.len(), 300);
        assert!(assignments.iter().all(|&a| a < 5));
        for c in &kmeans.centroids {
            assert_eq!(c.len(), 8);
        }
    }

    #[test]
    fn test_separated_clusters() {
        let mut data = Vec::new();
        for i in 0..20u64 {
            let offset = if i < 10 { 0.0 } else { 100.0 };
            data.push(Vector::new(i, vec![offset + (i % 10) as f32 * 0.01, offset]));
        }
        let mut kmeans = KMeans::new(2, 20, 3);
        let assignments = kmeans.fit(&slices(&data)).unwrap();
        assert!(assignments[..10].iter().all(|&a| a == assignments[0]));
        assert!(assignments[10..].iter().all(|&a| a == assignments[10]));
        assert_ne!(assignments[0], assignments[10]);
    }

    #[test]
    fn test_seeded_fit_is_deterministic() {
        let vectors = points(200, 4, 2);
        let a = KMeans::new(4, 10, 11).fit(&slices(&vectors)).unwrap();
        let b = KMeans::new(4, 10, 11).fit(&slices(&vectors)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_fewer_points_than_clusters() {
        let vectors = points(3, 4, 5);
        let assignments = KMeans::new(8, 10, 0).fit(&slices(&vectors)).unwrap();
        assert_eq!(assignments, vec![0, 1, 2]);
    }

    #[test]
    fn test_rejects_empty_input() {
        assert!(matches!(
            KMeans::new(2, 10, 0).fit(&[]),
            Err(BenchError::EmptyVectorSet)
        ));
    }
}
