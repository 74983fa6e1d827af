//! Filtered search engine.
//!
//! Given a query vector, a resolved [`Predicate`] and the partitions selected
//! from a pinned [`CatalogSnapshot`], the engine searches every partition that
//! can hold an admitted record and returns the per-partition candidate lists.
//! Merging them into one answer is the aggregator's job.
//!
//! ```text
//!   targets ──► par_iter over rayon pool ──► per partition:
//!                 deadline check
//!                 eligible = members ∩ predicate   (empty → skipped)
//!                 handle fresh? ── no ──► Rebuild | Fail(StaleIndex)
//!                 strategy: PostFilter | PreFilter | ExhaustiveScan
//!                 underfilled → next strategy
//!                 rerank by true distance, truncate to k
//!                 deadline check
//! ```
//!
//! A timeout in any partition fails the whole query; partial answers are
//! never returned.

mod strategy;

pub use strategy::{choose, fallback, overfetch_k, SearchMode, SearchStrategy, StalePolicy};

use crate::aggregate::CandidateResult;
use crate::ann::{IndexBuilder, Neighbor, SearchParams, scan_top_k};
use crate::catalog::{CatalogSnapshot, IndexHandle, Partition};
use crate::constants::engine::{OVERFETCH_FACTOR, POST_FILTER_THRESHOLD, QUERY_TIMEOUT_MS};
use crate::distance::DistanceMetric;
use crate::error::{BenchError, Result};
use crate::policy::Predicate;
use crate::store::{Record, RecordStore};
use crate::types::{PartitionId, RecordId};
use rayon::prelude::*;
use roaring::RoaringTreemap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub mode: SearchMode,
    /// Partition-local selectivity at or above which post-filtering is used.
    pub post_filter_threshold: f64,
    pub overfetch: f64,
    pub stale_policy: StalePolicy,
    /// Beam width passed to graph indexes; `None` keeps the index default.
    pub ef_search: Option<usize>,
    /// Fan-out threads; 0 uses every core.
    pub threads: usize,
    /// Recompute candidate distances from the store before ranking.
    pub rerank: bool,
    /// Per-query deadline; `None` disables it.
    pub query_timeout_ms: Option<u64>,
    pub metric: DistanceMetric,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            mode: SearchMode::default(),
            post_filter_threshold: POST_FILTER_THRESHOLD,
            overfetch: OVERFETCH_FACTOR,
            stale_policy: StalePolicy::default(),
            ef_search: None,
            threads: 0,
            rerank: true,
            query_timeout_ms: Some(QUERY_TIMEOUT_MS),
            metric: DistanceMetric::default(),
        }
    }
}

impl EngineConfig {
    pub fn with_mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_stale_policy(mut self, policy: StalePolicy) -> Self {
        self.stale_policy = policy;
        self
    }

    pub fn with_ef_search(mut self, ef: Option<usize>) -> Self {
        self.ef_search = ef;
        self
    }

    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads;
        self
    }

    pub fn with_query_timeout_ms(mut self, timeout_ms: Option<u64>) -> Self {
        self.query_timeout_ms = timeout_ms;
        self
    }

    pub fn with_metric(mut self, metric: DistanceMetric) -> Self {
        self.metric = metric;
        self
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.post_filter_threshold) {
            return Err(BenchError::config(format!(
                "engine.post_filter_threshold must be in [0, 1], got {}",
                self.post_filter_threshold
            )));
        }
        if !(self.overfetch >= 1.0 && self.overfetch.is_finite()) {
            return Err(BenchError::config(format!(
                "engine.overfetch must be >= 1, got {}",
                self.overfetch
            )));
        }
        if self.ef_search == Some(0) {
            return Err(BenchError::config("engine.ef_search must be positive"));
        }
        Ok(())
    }
}

/// Query deadline, checked at partition boundaries.
///
/// Checked, not preemptive: a rebuild or index call that is already running
/// finishes before the next check can report `Timeout`.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    limit_ms: Option<u64>,
}

impl Deadline {
    /// Start the clock now.
    pub fn start(limit_ms: Option<u64>) -> Self {
        Self {
            start: Instant::now(),
            limit_ms,
        }
    }

    /// A deadline that never fires.
    pub fn none() -> Self {
        Self::start(None)
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// `Timeout` once the limit is reached.
    pub fn check(&self) -> Result<()> {
        match self.limit_ms {
            Some(limit_ms) => {
                let elapsed = self.start.elapsed();
                if elapsed >= Duration::from_millis(limit_ms) {
                    Err(BenchError::timeout(elapsed, limit_ms))
                } else {
                    Ok(())
                }
            }
            None => Ok(()),
        }
    }
}

/// One search request.
#[derive(Debug, Clone, Copy)]
pub struct SearchRequest<'a> {
    pub query: &'a [f32],
    pub k: usize,
    /// Overrides [`EngineConfig::ef_search`] for this request.
    pub ef_search: Option<usize>,
}

impl<'a> SearchRequest<'a> {
    pub fn new(query: &'a [f32], k: usize) -> Self {
        Self {
            query,
            k,
            ef_search: None,
        }
    }

    pub fn with_ef_search(mut self, ef: Option<usize>) -> Self {
        self.ef_search = ef;
        self
    }
}

/// Candidates and timings of one searched partition.
#[derive(Debug, Clone)]
pub struct PartitionResult {
    pub partition: PartitionId,
    /// Strategy that produced the candidates (after any fallback).
    pub strategy: SearchStrategy,
    /// Strategies tried before `strategy`.
    pub fallbacks: usize,
    pub eligible: u64,
    /// Rank-ordered, at most k, no duplicate ids.
    pub candidates: Vec<CandidateResult>,
    /// Search time, excluding any rebuild.
    pub search_time: Duration,
    pub rebuild_time: Option<Duration>,
}

/// Everything the engine produced for one query.
#[derive(Debug, Clone, Default)]
pub struct SearchOutcome {
    pub partitions: Vec<PartitionResult>,
    /// Targets with no eligible record.
    pub skipped: Vec<PartitionId>,
    pub elapsed: Duration,
}

impl SearchOutcome {
    /// Candidate lists, one per searched partition.
    pub fn candidate_lists(&self) -> Vec<&[CandidateResult]> {
        self.partitions.iter().map(|p| p.candidates.as_slice()).collect()
    }

    pub fn candidate_count(&self) -> usize {
        self.partitions.iter().map(|p| p.candidates.len()).sum()
    }

    pub fn partitions_searched(&self) -> Vec<PartitionId> {
        self.partitions.iter().map(|p| p.partition).collect()
    }

    /// Total time spent rebuilding stale indexes, over all partitions.
    pub fn rebuild_time(&self) -> Duration {
        self.partitions.iter().filter_map(|p| p.rebuild_time).sum()
    }

    /// Longest single rebuild. Partitions are searched in parallel, so this
    /// is the rebuild share of the query's wall-clock search time.
    pub fn longest_rebuild(&self) -> Duration {
        self.partitions
            .iter()
            .filter_map(|p| p.rebuild_time)
            .max()
            .unwrap_or_default()
    }

    /// Sum of per-partition search times.
    pub fn search_time(&self) -> Duration {
        self.partitions.iter().map(|p| p.search_time).sum()
    }

    pub fn rebuilds(&self) -> usize {
        self.partitions.iter().filter(|p| p.rebuild_time.is_some()).count()
    }
}

/// Searches catalog partitions under a row predicate.
pub struct FilteredSearchEngine {
    config: EngineConfig,
    builder: Arc<dyn IndexBuilder>,
    store: Arc<dyn RecordStore>,
    pool: rayon::ThreadPool,
}

impl FilteredSearchEngine {
    /// Create an engine with its own fan-out pool.
    pub fn new(
        config: EngineConfig,
        builder: Arc<dyn IndexBuilder>,
        store: Arc<dyn RecordStore>,
    ) -> Result<Self> {
        config.validate()?;
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.threads)
            .thread_name(|i| format!("rls-search-{}", i))
            .build()
            .map_err(|e| BenchError::invalid_parameter(format!("search pool: {}", e)))?;
        Ok(Self {
            config,
            builder,
            store,
            pool,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Builder used for synchronous rebuilds.
    pub fn builder(&self) -> &Arc<dyn IndexBuilder> {
        &self.builder
    }

    /// A deadline started now with the configured limit.
    pub fn deadline(&self) -> Deadline {
        Deadline::start(self.config.query_timeout_ms)
    }

    /// Search `targets` of `snapshot` for the `request.k` nearest records
    /// admitted by `predicate`.
    ///
    /// # Errors
    ///
    /// - `InvalidParameter` for k = 0 or a target missing from the snapshot
    /// - `DimensionMismatch` if the query does not match the store
    /// - `StaleIndex` under [`StalePolicy::Fail`]
    /// - `Timeout` if the deadline fires at any partition boundary
    pub fn search(
        &self,
        request: &SearchRequest<'_>,
        predicate: &Predicate,
        targets: &[PartitionId],
        snapshot: &CatalogSnapshot,
        deadline: &Deadline,
    ) -> Result<SearchOutcome> {
        if request.k == 0 {
            return Err(BenchError::invalid_parameter("k must be positive"));
        }
        if request.query.len() != self.store.dimension() {
            return Err(BenchError::dimension_mismatch(
                self.store.dimension(),
                request.query.len(),
            ));
        }
        let partitions = targets
            .iter()
            .map(|id| {
                snapshot.partition(*id).ok_or_else(|| {
                    BenchError::invalid_parameter(format!(
                        "partition {} not in catalog epoch {}",
                        id,
                        snapshot.epoch()
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let start = Instant::now();
        deadline.check()?;
        let results = self
            .pool
            .install(|| {
                partitions
                    .par_iter()
                    .map(|p| self.search_partition(p, request, predicate, deadline))
                    .collect::<Result<Vec<_>>>()
            })
            .inspect_err(|err| {
                if let BenchError::Timeout { .. } = err {
                    warn!(error = %err, partitions = targets.len(), "query abandoned");
                }
            })?;

        let mut outcome = SearchOutcome::default();
        for (id, result) in targets.iter().zip(results) {
            match result {
                Some(result) => outcome.partitions.push(result),
                None => outcome.skipped.push(*id),
            }
        }
        outcome.elapsed = start.elapsed();
        Ok(outcome)
    }

    fn search_partition(
        &self,
        partition: &Partition,
        request: &SearchRequest<'_>,
        predicate: &Predicate,
        deadline: &Deadline,
    ) -> Result<Option<PartitionResult>> {
        deadline.check()?;

        let eligible = predicate.eligible(partition.members());
        if eligible.is_empty() {
            debug!(partition = %partition.id(), "no eligible records, skipped");
            return Ok(None);
        }

        let (handle, rebuild_time) = match self.config.mode {
            SearchMode::Exhaustive => (None, None),
            SearchMode::Approximate => {
                let (handle, rebuild) = self.index_for(partition)?;
                (Some(handle), rebuild)
            }
        };

        let start = Instant::now();
        let selectivity = eligible.len() as f64 / partition.len() as f64;
        let want = request.k.min(eligible.len() as usize);
        let supports_filter = handle.as_ref().is_some_and(|h| h.index.supports_filter());
        let mut strategy = choose(
            self.config.mode,
            selectivity,
            self.config.post_filter_threshold,
            supports_filter,
        );
        let mut fallbacks = 0;

        let neighbors = loop {
            let found = match (&handle, strategy) {
                (Some(handle), SearchStrategy::PostFilter) => {
                    self.post_filter(handle, request, predicate, selectivity)
                }
                (Some(handle), SearchStrategy::PreFilter) => {
                    self.pre_filter(handle, request, predicate)
                }
                _ => self.exact_scan(&eligible, request)?,
            };
            if found.len() >= want {
                break found;
            }
            match fallback(strategy, supports_filter) {
                Some(next) => {
                    debug!(
                        partition = %partition.id(),
                        from = %strategy,
                        to = %next,
                        found = found.len(),
                        want,
                        "underfilled, falling back"
                    );
                    strategy = next;
                    fallbacks += 1;
                }
                None => break found,
            }
        };

        let mut neighbors = if strategy == SearchStrategy::ExhaustiveScan {
            neighbors
        } else {
            self.rerank(request.query, neighbors)?
        };
        neighbors.truncate(request.k);

        let search_time = start.elapsed();
        debug!(
            partition = %partition.id(),
            %strategy,
            selectivity,
            eligible = eligible.len(),
            returned = neighbors.len(),
            "partition searched"
        );
        deadline.check()?;

        Ok(Some(PartitionResult {
            partition: partition.id(),
            strategy,
            fallbacks,
            eligible: eligible.len(),
            candidates: neighbors
                .into_iter()
                .map(|n| CandidateResult::new(n.id, n.distance, partition.id()))
                .collect(),
            search_time,
            rebuild_time,
        }))
    }

    /// Fresh handle of `partition`, rebuilding it if the stale policy allows.
    fn index_for(&self, partition: &Partition) -> Result<(Arc<IndexHandle>, Option<Duration>)> {
        if let Some(handle) = partition.fresh_handle() {
            return Ok((handle, None));
        }

        let stale = partition.stale_error();
        match self.config.stale_policy {
            StalePolicy::Fail => {
                warn!(error = %stale, "refusing stale index");
                Err(stale)
            }
            StalePolicy::Rebuild => {
                let start = Instant::now();
                let handle = partition.build_index(self.builder.as_ref(), self.store.as_ref())?;
                let elapsed = start.elapsed();
                info!(
                    partition = %partition.id(),
                    version = %partition.version(),
                    builder = handle.builder,
                    rebuild_ms = elapsed.as_secs_f64() * 1000.0,
                    "stale index rebuilt"
                );
                Ok((handle, Some(elapsed)))
            }
        }
    }

    fn ef_search(&self, request: &SearchRequest<'_>) -> Option<usize> {
        request.ef_search.or(self.config.ef_search)
    }

    fn post_filter(
        &self,
        handle: &IndexHandle,
        request: &SearchRequest<'_>,
        predicate: &Predicate,
        selectivity: f64,
    ) -> Vec<Neighbor> {
        let fetch = overfetch_k(request.k, selectivity, self.config.overfetch, handle.index.len());
        let params = SearchParams::top(fetch).with_ef_search(self.ef_search(request));
        let mut found = handle.index.search(request.query, &params, None);
        found.retain(|n| predicate.test(n.id));
        found
    }

    fn pre_filter(
        &self,
        handle: &IndexHandle,
        request: &SearchRequest<'_>,
        predicate: &Predicate,
    ) -> Vec<Neighbor> {
        let admits = |id: RecordId| predicate.test(id);
        let params = SearchParams::top(request.k).with_ef_search(self.ef_search(request));
        handle.index.search(request.query, &params, Some(&admits))
    }

    fn exact_scan(&self, eligible: &RoaringTreemap, request: &SearchRequest<'_>) -> Result<Vec<Neighbor>> {
        let records = eligible
            .iter()
            .map(|id| {
                self.store.get(RecordId(id)).ok_or(BenchError::CatalogInconsistent {
                    record: RecordId(id),
                    count: 1,
                })
            })
            .collect::<Result<Vec<&Record>>>()?;
        Ok(scan_top_k(
            &records,
            |r| &r.vector,
            request.query,
            request.k,
            self.config.metric,
            None,
        ))
    }

    /// Replace index distances by true distances, drop duplicate ids, and
    /// sort by rank.
    fn rerank(&self, query: &[f32], neighbors: Vec<Neighbor>) -> Result<Vec<Neighbor>> {
        let mut seen = HashSet::with_capacity(neighbors.len());
        let mut ranked = Vec::with_capacity(neighbors.len());
        for n in neighbors {
            if !seen.insert(n.id) {
                continue;
            }
            let distance = if self.config.rerank {
                let record = self.store.get(n.id).ok_or(BenchError::CatalogInconsistent {
                    record: n.id,
                    count: 1,
                })?;
                self.config.metric.compute(query, &record.vector.data)
            } else {
                n.distance
            };
            ranked.push(Neighbor::new(n.id, distance));
        }
        ranked.sort_by(Neighbor::rank_cmp);
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ann::{FlatBuilder, HnswBuilder};
    use crate::catalog::{PartitionCatalog, PartitionStrategy};
    use crate::policy::resolve;
    use crate::store::SyntheticSpec;

    struct Fixture {
        spec: SyntheticSpec,
        store: Arc<dyn RecordStore>,
        catalog: PartitionCatalog,
    }

    fn fixture() -> Fixture {
        let spec = SyntheticSpec {
            records: 400,
            dimension: 8,
            tenants: 4,
            seed: 5,
        };
        let store: Arc<dyn RecordStore> = Arc::new(spec.build().unwrap());
        let catalog =
            PartitionCatalog::with_strategy(PartitionStrategy::Range { partitions: 4 }, store.as_ref())
                .unwrap();
        Fixture {
            spec,
            store,
            catalog,
        }
    }

    fn engine(f: &Fixture, config: EngineConfig) -> FilteredSearchEngine {
        FilteredSearchEngine::new(config, Arc::new(HnswBuilder::default()), Arc::clone(&f.store))
            .unwrap()
    }

    fn run(
        engine: &FilteredSearchEngine,
        f: &Fixture,
        predicate: &Predicate,
        query: &[f32],
    ) -> Result<SearchOutcome> {
        let phase = f.catalog.begin_query();
        let targets = phase.partitions_for(predicate);
        engine.search(
            &SearchRequest::new(query, 10),
            predicate,
            &targets,
            &phase,
            &engine.deadline(),
        )
    }

    #[test]
    fn test_exhaustive_results_are_admitted_and_sorted() {
        let f = fixture();
        let engine = engine(&f, EngineConfig::default().with_mode(SearchMode::Exhaustive));
        let analyst = &f.spec.analysts()[2];
        let predicate = resolve(analyst, f.store.policies(), f.store.as_ref()).unwrap();

        let query = vec![0.0; 8];
        let outcome = run(&engine, &f, &predicate, &query).unwrap();
        assert_eq!(outcome.partitions.len(), 4);
        for p in &outcome.partitions {
            assert_eq!(p.strategy, SearchStrategy::ExhaustiveScan);
            assert_eq!(p.candidates.len(), 10);
            assert!(p.candidates.iter().all(|c| predicate.test(c.id)));
            assert!(p.candidates.windows(2).all(|w| w[0].rank_cmp(&w[1]).is_lt()));
            assert!(p.rebuild_time.is_none());
        }
    }

    #[test]
    fn test_rebuild_on_missing_index() {
        let f = fixture();
        let engine = engine(&f, EngineConfig::default());
        let predicate = Predicate::allow_all(f.store.universe());

        let outcome = run(&engine, &f, &predicate, &[0.1; 8]).unwrap();
        assert_eq!(outcome.rebuilds(), 4);
        assert!(outcome
            .partitions
            .iter()
            .all(|p| p.strategy == SearchStrategy::PostFilter));

        let longest = outcome.longest_rebuild();
        assert!(longest > Duration::ZERO);
        assert!(longest <= outcome.rebuild_time());
        assert!(outcome
            .partitions
            .iter()
            .all(|p| p.rebuild_time.is_some_and(|t| t <= longest)));

        // Handles were published; the second query reuses them.
        let again = run(&engine, &f, &predicate, &[0.1; 8]).unwrap();
        assert_eq!(again.longest_rebuild(), Duration::ZERO);
        assert_eq!(again.rebuilds(), 0);
        assert_eq!(
            outcome.partitions[0].candidates,
            again.partitions[0].candidates
        );
    }

    #[test]
    fn test_fail_policy_reports_stale() {
        let f = fixture();
        let engine = engine(&f, EngineConfig::default().with_stale_policy(StalePolicy::Fail));
        let predicate = Predicate::allow_all(f.store.universe());
        assert!(matches!(
            run(&engine, &f, &predicate, &[0.1; 8]),
            Err(BenchError::StaleIndex { built: None, .. })
        ));

        f.catalog.build_indexes(&HnswBuilder::default(), f.store.as_ref()).unwrap();
        assert!(run(&engine, &f, &predicate, &[0.1; 8]).is_ok());
    }

    #[test]
    fn test_low_selectivity_uses_pre_filter() {
        let f = fixture();
        f.catalog.build_indexes(&FlatBuilder::default(), f.store.as_ref()).unwrap();
        let engine = engine(&f, EngineConfig::default());
        let predicate = resolve(&f.spec.analysts()[0], f.store.policies(), f.store.as_ref()).unwrap();

        let outcome = run(&engine, &f, &predicate, &[0.0; 8]).unwrap();
        assert!(outcome
            .partitions
            .iter()
            .all(|p| p.strategy == SearchStrategy::PreFilter && p.fallbacks == 0));
    }

    #[test]
    fn test_skips_partitions_without_eligible_records() {
        let f = fixture();
        let engine = engine(&f, EngineConfig::default().with_mode(SearchMode::Exhaustive));
        let predicate = Predicate::new([1u64, 2, 3].into_iter().collect(), 400);
        let phase = f.catalog.begin_query();
        let all: Vec<PartitionId> = phase.partitions().iter().map(|p| p.id()).collect();

        let outcome = engine
            .search(
                &SearchRequest::new(&[0.0; 8], 10),
                &predicate,
                &all,
                &phase,
                &Deadline::none(),
            )
            .unwrap();
        assert_eq!(outcome.partitions_searched(), vec![PartitionId(0)]);
        assert_eq!(outcome.skipped.len(), 3);
        assert_eq!(outcome.candidate_count(), 3);
    }

    #[test]
    fn test_expired_deadline_times_out() {
        let f = fixture();
        let engine = engine(
            &f,
            EngineConfig::default()
                .with_mode(SearchMode::Exhaustive)
                .with_query_timeout_ms(Some(0)),
        );
        let predicate = Predicate::allow_all(f.store.universe());
        assert!(matches!(
            run(&engine, &f, &predicate, &[0.0; 8]),
            Err(BenchError::Timeout { limit_ms: 0, .. })
        ));
    }

    #[test]
    fn test_rejects_bad_requests() {
        let f = fixture();
        let engine = engine(&f, EngineConfig::default());
        let predicate = Predicate::allow_all(f.store.universe());
        assert!(matches!(
            run(&engine, &f, &predicate, &[0.0; 3]),
            Err(BenchError::DimensionMismatch { expected: 8, actual: 3 })
        ));

        let phase = f.catalog.begin_query();
        let err = engine
            .search(
                &SearchRequest::new(&[0.0; 8], 10),
                &predicate,
                &[PartitionId(7)],
                &phase,
                &Deadline::none(),
            )
            .unwrap_err();
        assert!(matches!(err, BenchError::InvalidParameter(_)));
    }

    #[test]
    fn test_config_validation() {
        assert!(EngineConfig::default().validate().is_ok());
        let bad = EngineConfig {
            post_filter_threshold: 1.5,
            ..EngineConfig::default()
        };
        assert!(matches!(bad.validate(), Err(BenchError::Config(_))));
        let bad = EngineConfig {
            overfetch: 0.5,
            ..EngineConfig::default()
        };
        assert!(bad.validate().is_err());
    }
}
