//! Named constants for configuration values.
//!
//! Defaults used by the config layer and the components live here so they
//! can be found and tuned in one place.

/// Constants for the filtered search engine.
pub mod engine {
    /// Selectivity at or above which the engine over-fetches and post-filters.
    pub const POST_FILTER_THRESHOLD: f64 = 0.5;

    /// Multiplier applied to `k / selectivity` when over-fetching.
    pub const OVERFETCH_FACTOR: f64 = 1.5;

    /// Default per-query deadline in milliseconds.
    pub const QUERY_TIMEOUT_MS: u64 = 1_000;
}

/// Constants for the HNSW adapter.
pub mod hnsw {
    /// Default M parameter (max connections per layer).
    pub const DEFAULT_M: usize = 16;

    /// Default ef_construction (beam width during build).
    pub const DEFAULT_EF_CONSTRUCTION: usize = 200;

    /// Default ef_search (beam width during search).
    pub const DEFAULT_EF_SEARCH: usize = 64;

    /// Default seed for level assignment.
    pub const DEFAULT_SEED: u64 = 0x5eed_cafe;
}

/// Constants for k-means clustering.
pub mod kmeans {
    /// Threshold for switching from k-means++ to random initialization.
    /// k-means++ has O(k²n) complexity, which becomes expensive for large k.
    pub const KMEANSPP_THRESHOLD: usize = 64;

    /// Convergence threshold for early stopping.
    pub const CONVERGENCE_THRESHOLD: f32 = 0.001;

    /// Default number of iterations for cluster partitioning.
    pub const DEFAULT_MAX_ITERATIONS: usize = 25;
}

/// Constants for brute-force scans.
pub mod scan {
    /// Chunk size for parallel brute force search.
    /// Sized to fit multiple vectors in L2 cache.
    pub const CHUNK_SIZE: usize = 1000;
}

/// Constants for the synthetic data set and workload.
pub mod workload {
    /// Default number of records.
    pub const DEFAULT_RECORDS: usize = 1_000;

    /// Default vector dimension.
    pub const DEFAULT_DIMENSION: usize = 32;

    /// Default number of tenants; one tenant admits `1 / tenants` of the records.
    pub const DEFAULT_TENANTS: usize = 4;

    /// Default number of queries per trial.
    pub const DEFAULT_QUERIES: usize = 100;

    /// Default top-k.
    pub const DEFAULT_K: usize = 10;

    /// Default number of partitions.
    pub const DEFAULT_PARTITIONS: usize = 4;

    /// Default RNG seed.
    pub const DEFAULT_SEED: u64 = 42;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_constants() {
        assert!(engine::POST_FILTER_THRESHOLD > 0.0 && engine::POST_FILTER_THRESHOLD <= 1.0);
        assert!(engine::OVERFETCH_FACTOR >= 1.0);
    }

    #[test]
    fn test_hnsw_constants() {
        assert!(hnsw::DEFAULT_M >= 2);
        assert!(hnsw::DEFAULT_EF_CONSTRUCTION >= hnsw::DEFAULT_M);
    }
}
