//! meterline-engine — turns metric query results into classified reports.
//!
//! # Pipeline
//!
//! ```text
//! AnalysisRequest
//!   └── plan()            → QueryPlan (rendered PromQL, bindings, derivations)
//!       └── Fetcher        → one outcome per query (concurrent, per-query timeout)
//!           └── Joiner     → EntityKey → EntityRow (union, unknown-filled)
//!               └── Calculator → derived fields (burn rate, ratios, projections)
//!                   └── Classifier → Finding (flags additive, severity max)
//!                       └── SeverityDebouncer (optional hold-down)
//!                           └── ReportAssembler → Report
//! ```
//!
//! Each stage takes the previous stage's output by value and returns a
//! new structure. Only the debouncer keeps state between runs, and it is
//! injected, so the rest of the pipeline stays a pure function of the
//! backend's answers.

pub mod analysis;
pub mod classify;
pub mod debounce;
pub mod derive;
pub mod error;
pub mod join;
pub mod report;
pub mod stats;

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use meterline_core::{MeterlineConfig, QuerySpec, Series};
use meterline_fetch::{FetchPolicy, FetchResult, FetchStats, Fetcher, MetricsBackend};

pub use analysis::{AnalysisKind, AnalysisRequest, PlannedQuery, QueryPlan};
pub use classify::{Classifier, Finding};
pub use debounce::{ConsecutiveDebounce, NoDebounce, SeverityDebouncer};
pub use derive::{Calculator, Derivation};
pub use error::{EngineError, EngineResult};
pub use join::{Collision, EntityRow, FieldBinding, JoinOutput, Joiner, Reduction};
pub use report::{EntityReport, QueryErrorReport, Report, ReportAssembler, Summary};
pub use stats::EngineStats;

/// Source of report timestamps.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Runs analyses against one metrics backend.
pub struct Engine {
    config: MeterlineConfig,
    fetcher: Fetcher,
    classifier: Classifier,
    debouncer: Arc<dyn SeverityDebouncer>,
    clock: Clock,
    stats: Arc<EngineStats>,
}

impl Engine {
    /// Build an engine from a validated configuration.
    ///
    /// The debouncer follows `[debounce]`; replace it with
    /// [`Engine::with_debouncer`].
    pub fn new(config: MeterlineConfig, backend: Arc<dyn MetricsBackend>) -> EngineResult<Self> {
        config
            .slo_target()
            .map_err(|_| EngineError::InvalidSloTarget(config.slo.target))?;

        let fetcher = Fetcher::new(backend, FetchPolicy::from_config(&config.backend));
        let classifier = Classifier::new(config.policy());
        let debouncer: Arc<dyn SeverityDebouncer> = if config.debounce.enabled {
            Arc::new(ConsecutiveDebounce::from_config(&config.debounce))
        } else {
            Arc::new(NoDebounce)
        };

        Ok(Self {
            config,
            fetcher,
            classifier,
            debouncer,
            clock: Arc::new(Utc::now),
            stats: Arc::new(EngineStats::new()),
        })
    }

    pub fn with_debouncer(mut self, debouncer: Arc<dyn SeverityDebouncer>) -> Self {
        self.debouncer = debouncer;
        self
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &MeterlineConfig {
        &self.config
    }

    pub fn stats(&self) -> Arc<EngineStats> {
        Arc::clone(&self.stats)
    }

    pub fn fetch_stats(&self) -> Arc<FetchStats> {
        self.fetcher.stats()
    }

    /// Engine and fetcher counters in Prometheus text format.
    pub fn render_metrics(&self) -> String {
        self.stats.render_prometheus(&self.fetcher.stats())
    }

    pub fn plan(&self, request: &AnalysisRequest) -> EngineResult<QueryPlan> {
        analysis::plan(&self.config, request)
    }

    /// Plan and run one predefined analysis.
    pub async fn run(&self, request: &AnalysisRequest) -> EngineResult<Report> {
        let plan = match self.plan(request) {
            Ok(plan) => plan,
            Err(e) => {
                warn!(analysis = %request.kind, error = %e, "rejected analysis request");
                self.stats.record_failure(request.kind);
                return Err(e);
            }
        };
        self.run_plan(&plan).await
    }

    /// Run a prepared plan.
    ///
    /// Dropping the returned future cancels every in-flight query.
    pub async fn run_plan(&self, plan: &QueryPlan) -> EngineResult<Report> {
        let result = self.execute(plan).await;
        match &result {
            Ok(report) => self.stats.record_report(plan.kind, report),
            Err(e) => {
                error!(analysis = %plan.kind, kind = e.kind(), error = %e, "analysis failed");
                self.stats.record_failure(plan.kind);
            }
        }
        result
    }

    /// Run one ad hoc query with the same timeout and retry policy.
    pub async fn raw_query(&self, spec: &QuerySpec) -> FetchResult<Vec<Series>> {
        self.fetcher.fetch_one(spec).await
    }

    async fn execute(&self, plan: &QueryPlan) -> EngineResult<Report> {
        if plan.queries.is_empty() {
            return Err(EngineError::NoQueries);
        }
        let started = Instant::now();
        let specs = plan.specs();

        let deadline = self.config.backend.request_deadline();
        let outcomes = tokio::time::timeout(deadline, self.fetcher.fetch_all(&specs))
            .await
            .map_err(|_| EngineError::DeadlineExceeded(deadline))?;

        let mut failures = Vec::new();
        for (query, outcome) in plan.queries.iter().zip(&outcomes) {
            if let Err(e) = outcome {
                failures.push((query.spec.name.clone(), e.clone()));
            }
        }
        if failures.len() == outcomes.len() {
            return Err(EngineError::AllQueriesFailed(failures));
        }
        let query_errors: Vec<QueryErrorReport> = failures
            .iter()
            .map(|(name, e)| QueryErrorReport::new(name, e))
            .collect();

        let inputs: Vec<(&FieldBinding, Option<&[Series]>)> = plan
            .queries
            .iter()
            .zip(&outcomes)
            .flat_map(|(query, outcome)| {
                let series = outcome.as_ref().ok().map(Vec::as_slice);
                query.bindings.iter().map(move |b| (b, series))
            })
            .collect();
        let joined = Joiner::new(plan.key_label.as_str()).join(&inputs);

        let calculator = Calculator::new(plan.slo_target, plan.derivations.clone());
        let findings: Vec<Finding> = joined
            .rows
            .into_iter()
            .map(|(key, row)| {
                let finding = self.classifier.classify(key, calculator.apply(row));
                self.debouncer.observe(plan.kind, finding)
            })
            .collect();

        let report = ReportAssembler.assemble(
            plan.kind.as_str(),
            (self.clock)(),
            findings,
            query_errors,
            joined.skipped_series,
        );

        if report.partial {
            warn!(
                analysis = %plan.kind,
                failed = report.query_errors.len(),
                queries = outcomes.len(),
                "report built from partial data"
            );
        }
        info!(
            analysis = %plan.kind,
            entities = report.summary.total,
            critical = report.summary.critical,
            warning = report.summary.warning,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "analysis complete"
        );
        debug!(analysis = %plan.kind, skipped_series = report.skipped_series, "join stats");
        Ok(report)
    }
}
