//! The benchmark driver: runs workloads through resolve, select, search and
//! aggregate, and collects the report.

use super::recall_model::RecallModel;
use super::report::{
    BenchmarkReport, CacheReport, PartitionRecord, PhaseReport, QueryRecord, QueryStage, Summary,
    SweepPoint, SweepReport,
};
use super::workload::{self, Query};
use crate::aggregate::{aggregate, compute_recall, ground_truth};
use crate::ann::IndexBuilder;
use crate::catalog::{CatalogSnapshot, PartitionCatalog};
use crate::config::{BenchConfig, ExecutionMode};
use crate::engine::{FilteredSearchEngine, SearchRequest};
use crate::error::{BenchError, QueryStatus, Result};
use crate::metrics::QueryTimer;
use crate::policy::PredicateCache;
use crate::store::RecordStore;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Query result plus the error that produced it, if any.
struct Execution {
    record: QueryRecord,
    error: Option<BenchError>,
}

/// Owns the store, catalog, engine and predicate cache of one run.
pub struct BenchmarkDriver {
    config: BenchConfig,
    store: Arc<dyn RecordStore>,
    catalog: PartitionCatalog,
    engine: FilteredSearchEngine,
    builder: Arc<dyn IndexBuilder>,
    cache: PredicateCache,
}

impl BenchmarkDriver {
    /// Driver over the synthetic data set described by `config.dataset`.
    pub fn new(config: BenchConfig) -> Result<Self> {
        config.validate()?;
        let store: Arc<dyn RecordStore> = Arc::new(config.dataset.build_with(config.policy_set())?);
        Self::with_store(config, store)
    }

    /// Driver over an existing store.
    ///
    /// Pings the store, partitions it with `config.partitioning` and, if
    /// configured, builds every index.
    pub fn with_store(config: BenchConfig, store: Arc<dyn RecordStore>) -> Result<Self> {
        config.validate()?;
        store.ping(Duration::from_millis(config.run.store_ping_timeout_ms))?;

        let builder = config.index.builder(&config.engine);
        let engine =
            FilteredSearchEngine::new(config.engine.clone(), Arc::clone(&builder), Arc::clone(&store))?;
        let catalog = PartitionCatalog::with_strategy(config.partitioning.clone(), store.as_ref())?;

        info!(
            records = store.len(),
            dimension = store.dimension(),
            strategy = %config.partitioning,
            builder = builder.name(),
            mode = ?config.engine.mode,
            execution = ?config.run.execution,
            "benchmark driver ready"
        );
        Ok(Self {
            config,
            store,
            catalog,
            engine,
            builder,
            cache: PredicateCache::new(),
        })
    }

    pub fn config(&self) -> &BenchConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub fn catalog(&self) -> &PartitionCatalog {
        &self.catalog
    }

    pub fn engine(&self) -> &FilteredSearchEngine {
        &self.engine
    }

    /// The configured workload over the synthetic callers.
    pub fn workload(&self) -> Vec<Query> {
        let callers = workload::callers(self.config.workload.callers, &self.config.dataset);
        workload::generate(&self.config.workload, &callers, self.store.dimension())
    }

    /// Run every configured phase and the ef sweep.
    ///
    /// Per-query failures are recorded and the run continues. An error that
    /// invalidates the run (an inconsistent catalog, for instance) stops it;
    /// the report then carries the error in `halted`.
    pub fn run(&self) -> BenchmarkReport {
        let queries = self.workload();
        let mut report = BenchmarkReport::new(self.config.clone());

        let mut phases = vec![None];
        phases.extend(self.config.run.repartition_to.iter().map(|&n| Some(n)));
        for (i, partitions) in phases.into_iter().enumerate() {
            let name = match partitions {
                None => "initial".to_string(),
                Some(n) => format!("repartition-{}-to-{}", i, n),
            };
            match self.run_phase(&name, partitions, &queries) {
                Ok(phase) => report.phases.push(phase),
                Err((phase, err)) => {
                    error!(phase = %name, error = %err, "run halted");
                    report.phases.extend(phase);
                    report.halted = Some(err.to_string());
                    break;
                }
            }
        }

        if report.halted.is_none() && !self.config.run.ef_sweep.is_empty() {
            match self.sweep(&queries) {
                Ok(sweep) => report.sweep = Some(sweep),
                Err(err) => {
                    error!(error = %err, "ef sweep halted");
                    report.halted = Some(err.to_string());
                }
            }
        }

        report.predicate_cache = CacheReport {
            hits: self.cache.hits(),
            misses: self.cache.misses(),
        };
        report.finish();
        info!(
            phases = report.phases.len(),
            ok = report.summary.statuses.ok,
            failed = report.summary.statuses.not_ok(),
            mean_recall = ?report.summary.recall.mean,
            p50_ms = report.summary.latency.p50_ms,
            p99_ms = report.summary.latency.p99_ms,
            "run complete"
        );
        report
    }

    /// Optionally repartition to `partitions`, prepare indexes, and run `queries`.
    ///
    /// On a run-fatal error, returns the partial phase (if queries ran) and
    /// the error.
    #[allow(clippy::result_large_err)]
    fn run_phase(
        &self,
        name: &str,
        partitions: Option<usize>,
        queries: &[Query],
    ) -> std::result::Result<PhaseReport, (Option<PhaseReport>, BenchError)> {
        if let Some(n) = partitions {
            let strategy = self.config.partitioning.with_partitions(n);
            self.catalog
                .repartition(strategy, self.store.as_ref())
                .map_err(|e| (None, e))?;
        }
        self.catalog
            .check_consistency(self.store.as_ref())
            .map_err(|e| (None, e))?;

        let build = if self.config.run.build_before_phase {
            let summary = self
                .catalog
                .build_indexes(self.builder.as_ref(), self.store.as_ref())
                .map_err(|e| (None, e))?;
            Some(summary.into())
        } else {
            None
        };

        let snapshot = self.catalog.snapshot();
        info!(phase = name, epoch = snapshot.epoch(), partitions = snapshot.len(), "phase start");
        let (records, fatal) = self.run_queries(queries, None);

        let mut phase = PhaseReport {
            name: name.to_string(),
            epoch: snapshot.epoch(),
            strategy: describe(&snapshot),
            partitions: snapshot.len(),
            build,
            summary: Summary::from_records(&records),
            queries: records,
        };
        info!(
            phase = name,
            ok = phase.summary.statuses.ok,
            mean_recall = ?phase.summary.recall.mean,
            p50_ms = phase.summary.latency.p50_ms,
            "phase complete"
        );
        match fatal {
            Some(err) => {
                phase.summary = Summary::from_records(&phase.queries);
                Err((Some(phase), err))
            }
            None => Ok(phase),
        }
    }

    /// Run `queries` at each configured ef_search and fit the recall model.
    fn sweep(&self, queries: &[Query]) -> Result<SweepReport> {
        let mut points = Vec::with_capacity(self.config.run.ef_sweep.len());
        let mut selectivities = Vec::new();
        for &ef in &self.config.run.ef_sweep {
            let (records, fatal) = self.run_queries(queries, Some(ef));
            if let Some(err) = fatal {
                return Err(err);
            }
            let summary = Summary::from_records(&records);
            selectivities.extend(records.iter().filter_map(|r| r.selectivity));
            points.push((ef, summary));
        }

        let k = self.config.workload.k;
        let selectivity = (!selectivities.is_empty())
            .then(|| selectivities.iter().sum::<f64>() / selectivities.len() as f64);
        let points: Vec<SweepPoint> = points
            .into_iter()
            .map(|(ef, summary)| SweepPoint {
                ef_search: ef,
                effective_x: RecallModel::effective_x(ef, selectivity.unwrap_or(0.0), k),
                mean_recall: summary.recall.mean,
                mean_latency_ms: summary.latency.mean_ms,
                queries: summary.statuses.ok,
            })
            .collect();

        let model = selectivity.and_then(|sel| {
            let xy: Vec<(f64, f64)> = points
                .iter()
                .filter_map(|p| p.mean_recall.map(|y| (p.ef_search as f64, y)))
                .collect();
            RecallModel::fit(&xy, sel, k)
                .inspect_err(|err| debug!(error = %err, "recall model not fitted"))
                .ok()
        });
        if let Some(model) = &model {
            info!(k = model.k, beta = model.beta, residual = model.residual, "recall model fitted");
        }

        Ok(SweepReport {
            k,
            selectivity,
            points,
            model,
        })
    }

    /// Run queries in the configured execution mode.
    ///
    /// Returns the records of every query that ran, in workload order, and the
    /// first run-fatal error, if any. No query starts after that error.
    fn run_queries(&self, queries: &[Query], ef: Option<usize>) -> (Vec<QueryRecord>, Option<BenchError>) {
        let executions = match self.config.run.execution {
            ExecutionMode::Sequential => {
                let mut out = Vec::with_capacity(queries.len());
                for query in queries {
                    let execution = self.execute(query, ef);
                    let fatal = execution.error.as_ref().is_some_and(BenchError::is_fatal_to_run);
                    out.push(execution);
                    if fatal {
                        break;
                    }
                }
                out
            }
            ExecutionMode::Concurrent { workers } => self.run_concurrent(queries, ef, workers),
        };

        let mut fatal = None;
        let mut records = Vec::with_capacity(executions.len());
        for execution in executions {
            if fatal.is_none() {
                fatal = execution.error.filter(BenchError::is_fatal_to_run);
            }
            records.push(execution.record);
        }
        (records, fatal)
    }

    /// Run `queries` on `workers` scoped threads pulling from a shared cursor.
    ///
    /// Each worker holds at most one query phase at a time and blocks on the
    /// engine's fan-out pool from outside it, so pools never nest.
    fn run_concurrent(&self, queries: &[Query], ef: Option<usize>, workers: usize) -> Vec<Execution> {
        let workers = match workers {
            0 => thread::available_parallelism().map_or(1, |n| n.get()),
            n => n,
        }
        .min(queries.len().max(1));
        let next = AtomicUsize::new(0);
        let halted = AtomicBool::new(false);
        let done = Mutex::new(Vec::with_capacity(queries.len()));

        thread::scope(|scope| {
            for _ in 0..workers {
                scope.spawn(|| loop {
                    if halted.load(Ordering::Acquire) {
                        break;
                    }
                    let i = next.fetch_add(1, Ordering::AcqRel);
                    let Some(query) = queries.get(i) else {
                        break;
                    };
                    let execution = self.execute(query, ef);
                    if execution.error.as_ref().is_some_and(BenchError::is_fatal_to_run) {
                        halted.store(true, Ordering::Release);
                    }
                    done.lock().push((i, execution));
                });
            }
        });

        let mut done = done.into_inner();
        done.sort_by_key(|(i, _)| *i);
        done.into_iter().map(|(_, execution)| execution).collect()
    }

    /// Run a single query through the pipeline and record its outcome.
    pub fn run_query(&self, query: &Query, ef_search: Option<usize>) -> QueryRecord {
        self.execute(query, ef_search).record
    }

    fn execute(&self, query: &Query, ef: Option<usize>) -> Execution {
        let mut record = QueryRecord::started(query.id, &query.caller.id, ef);
        let mut timer = QueryTimer::start();

        let error = self.pipeline(query, ef, &mut record, &mut timer).err();
        record.latency = timer.finish();
        if let Some(err) = &error {
            record.status = err.status();
            record.error = Some(err.to_string());
            record.recall = None;
            match record.status {
                QueryStatus::Timeout | QueryStatus::PolicyConflict | QueryStatus::StaleIndex => {
                    warn!(
                        query = query.id,
                        caller = %query.caller.id,
                        stage = %record.stage,
                        error = %err,
                        "query failed"
                    );
                }
                _ => {
                    debug!(
                        query = query.id,
                        caller = %query.caller.id,
                        stage = %record.stage,
                        error = %err,
                        "query failed"
                    );
                }
            }
        }
        Execution { record, error }
    }

    /// Resolving -> PartitionSelection -> Searching -> Aggregating -> Done.
    ///
    /// `record.stage` is advanced before each stage runs, so on error it names
    /// the stage that failed.
    fn pipeline(
        &self,
        query: &Query,
        ef: Option<usize>,
        record: &mut QueryRecord,
        timer: &mut QueryTimer,
    ) -> Result<()> {
        let deadline = self.engine.deadline();
        let phase = self.catalog.begin_query();

        record.stage = QueryStage::Resolving;
        let predicate = self
            .cache
            .get_or_resolve(&query.caller, self.store.policies(), self.store.as_ref())?;
        record.selectivity = Some(predicate.estimated_selectivity());
        timer.resolved();

        record.stage = QueryStage::PartitionSelection;
        let targets = phase.select(&predicate, query.scope.as_deref())?;
        timer.selected();

        record.stage = QueryStage::Searching;
        let request = SearchRequest::new(&query.vector, query.k).with_ef_search(ef);
        let outcome = self
            .engine
            .search(&request, &predicate, &targets, phase.snapshot(), &deadline)?;
        timer.searched(outcome.longest_rebuild());

        record.stage = QueryStage::Aggregating;
        let merged = aggregate(&outcome.candidate_lists(), query.k);
        deadline.check()?;
        timer.aggregated();
        drop(phase);

        record.stage = QueryStage::Done;
        record.candidates = outcome.candidate_count();
        record.partitions_searched = outcome.partitions_searched();
        record.strategies = outcome.partitions.iter().map(|p| p.strategy).collect();
        record.partitions = outcome.partitions.iter().map(PartitionRecord::from).collect();
        record.rebuilds = outcome.rebuilds();
        record.results = merged.iter().map(|c| c.id).collect();

        let truth = ground_truth(
            self.store.as_ref(),
            &predicate,
            &query.vector,
            query.k,
            self.engine.config().metric,
        );
        record.recall = compute_recall(&merged, &truth);
        Ok(())
    }
}

fn describe(snapshot: &CatalogSnapshot) -> String {
    snapshot
        .strategy()
        .map(ToString::to_string)
        .unwrap_or_else(|| "none".to_string())
}
