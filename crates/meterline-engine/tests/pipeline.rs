//! Full-pipeline tests: a stub backend feeds canned series through
//! fetch → join → derive → classify → report.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};

use meterline_core::{MeterlineConfig, QuerySpec, Reading, Series, SeriesPoint, Severity};
use meterline_engine::{
    AnalysisKind, AnalysisRequest, Clock, ConsecutiveDebounce, Engine, EngineError, QueryPlan,
};
use meterline_fetch::{BoxFuture, FetchError, FetchResult, MetricsBackend};

/// Canned answers by query name, with an optional artificial delay.
#[derive(Default)]
struct StubBackend {
    answers: HashMap<String, FetchResult<Vec<Series>>>,
    delay: Option<Duration>,
}

impl StubBackend {
    fn answer(mut self, name: &str, series: Vec<Series>) -> Self {
        self.answers.insert(name.to_string(), Ok(series));
        self
    }

    fn fail(mut self, name: &str, err: FetchError) -> Self {
        self.answers.insert(name.to_string(), Err(err));
        self
    }

    fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl MetricsBackend for StubBackend {
    fn query<'a>(
        &'a self,
        spec: &'a QuerySpec,
        _timeout: Duration,
    ) -> BoxFuture<'a, FetchResult<Vec<Series>>> {
        Box::pin(async move {
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            self.answers.get(&spec.name).cloned().unwrap_or(Ok(vec![]))
        })
    }
}

fn sample(labels: &[(&str, &str)], value: f64) -> Series {
    let labels: BTreeMap<String, String> = labels
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Series::instant(
        labels,
        SeriesPoint {
            timestamp: 1_700_000_000.0,
            value: Reading::from_f64(value),
        },
    )
}

fn job(name: &str, value: f64) -> Series {
    sample(&[("job", name)], value)
}

fn fixed_clock() -> Clock {
    Arc::new(|| Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap())
}

fn engine(backend: StubBackend) -> Engine {
    engine_with(MeterlineConfig::default(), backend)
}

fn engine_with(config: MeterlineConfig, backend: StubBackend) -> Engine {
    Engine::new(config, Arc::new(backend))
        .unwrap()
        .with_clock(fixed_clock())
}

fn slo_backend() -> StubBackend {
    StubBackend::default()
        .answer("availability_30d", vec![job("checkout", 0.9996), job("search", 0.9999)])
        // 2% errors in the last hour: burn rate 20.
        .answer("availability_1h", vec![job("checkout", 0.98), job("search", 0.9999)])
        .answer("availability_6h", vec![job("checkout", 0.998), job("search", 0.9999)])
        .answer("error_budget", vec![job("checkout", 0.4), job("search", 0.9)])
        .answer("error_rate_5m", vec![job("checkout", 0.02), job("search", 0.0001)])
}

#[tokio::test]
async fn burn_rate_critical() {
    let report = engine(slo_backend())
        .run(&AnalysisRequest::new(AnalysisKind::SloStatus))
        .await
        .unwrap();

    let checkout = report.entity("checkout").unwrap();
    assert_eq!(checkout.severity, Severity::Critical);
    assert!(checkout.flags.contains(&"fast_burn".to_string()));
    assert!(!checkout.flags.contains(&"slow_burn".to_string()));
    assert!(!checkout.flags.contains(&"budget_low".to_string()));
    assert!(
        checkout
            .reasons
            .contains(&"2% of 30-day budget would be consumed in 1 hour at this rate".to_string())
    );
    assert_eq!(checkout.fields["burn_rate_1h"], Reading::Known(20.0));
    assert_eq!(checkout.fields["burn_rate_6h"], Reading::Known(2.0));
    assert_eq!(checkout.fields["error_budget_remaining_pct"], Reading::Known(40.0));

    let search = report.entity("search").unwrap();
    assert_eq!(search.severity, Severity::Ok);
    assert!(search.flags.is_empty());

    // Critical first.
    assert_eq!(report.entities[0].key, "checkout");
    assert_eq!(report.summary.total, 2);
    assert_eq!(report.summary.critical, 1);
    assert!(!report.partial);
}

#[tokio::test]
async fn traffic_drop_with_no_error() {
    let backend = StubBackend::default()
        .answer("request_rate", vec![job("search", 30.0)])
        .answer("request_rate_prior", vec![job("search", 100.0)])
        .answer("error_rate_5m", vec![job("search", 0.001)])
        .answer("latency_p95_s", vec![job("search", 0.2)])
        .answer("latency_p99_s", vec![job("search", 0.4)]);
    let report = engine(backend)
        .run(&AnalysisRequest::new(AnalysisKind::Traffic))
        .await
        .unwrap();

    let search = report.entity("search").unwrap();
    assert_eq!(search.severity, Severity::Warning);
    assert_eq!(search.flags, vec!["traffic_drop"]);
    assert_eq!(search.fields["traffic_ratio"], Reading::Known(0.3));
    assert_eq!(search.fields["error_rate_5m_pct"], Reading::Known(0.1));
}

#[tokio::test]
async fn zero_cost_is_zero_waste() {
    let backend = StubBackend::default()
        .answer(
            "total_cost_usd",
            vec![sample(&[("agent_name", "batch-job"), ("model", "small")], 0.0)],
        )
        .answer("idle_cost_usd", vec![sample(&[("agent_name", "batch-job")], 0.0)])
        .answer("cost_rate", vec![sample(&[("agent_name", "batch-job")], 0.0)]);
    let report = engine(backend)
        .run(&AnalysisRequest::new(AnalysisKind::CostReport))
        .await
        .unwrap();

    let batch = report.entity("batch-job").unwrap();
    assert_eq!(batch.fields["waste_percentage"], Reading::Known(0.0));
    assert_eq!(batch.fields["hourly_cost_usd"], Reading::Known(0.0));
    assert_eq!(batch.severity, Severity::Ok);
    // Per-model row from the same query.
    let model = report.entity("batch-job/small").unwrap();
    assert_eq!(model.fields["model_cost_usd"], Reading::Known(0.0));
}

#[tokio::test]
async fn partial_backend_failure_still_reports() {
    let backend = StubBackend::default()
        .answer("request_rate", vec![job("api", 50.0)])
        .answer("request_rate_prior", vec![job("api", 40.0)])
        .fail(
            "error_rate_5m",
            FetchError::QueryTimeout {
                detail: "no response within 15s".into(),
            },
        );
    let report = engine(backend)
        .run(&AnalysisRequest::new(AnalysisKind::Traffic))
        .await
        .unwrap();

    assert!(report.partial);
    assert_eq!(report.query_errors.len(), 1);
    assert_eq!(report.query_errors[0].query, "error_rate_5m");
    assert_eq!(report.query_errors[0].kind, "QueryTimeout");

    let api = report.entity("api").unwrap();
    assert_eq!(api.fields["error_rate_5m"], Reading::Unknown);
    assert_eq!(api.fields["error_rate_5m_pct"], Reading::Unknown);
    assert_eq!(api.fields["traffic_ratio"], Reading::Known(1.25));
}

#[tokio::test]
async fn empty_match_is_an_empty_report() {
    let report = engine(StubBackend::default())
        .run(&AnalysisRequest::new(AnalysisKind::SloStatus).with_filter("does-not-exist"))
        .await
        .unwrap();
    assert_eq!(report.summary.total, 0);
    assert!(report.entities.is_empty());
    assert!(!report.partial);
}

#[tokio::test]
async fn identical_inputs_give_byte_identical_reports() {
    let engine = engine(slo_backend());
    let request = AnalysisRequest::new(AnalysisKind::SloStatus);
    let first = serde_json::to_string(&engine.run(&request).await.unwrap()).unwrap();
    let second = serde_json::to_string(&engine.run(&request).await.unwrap()).unwrap();
    assert_eq!(first, second);
}

#[tokio::test]
async fn all_queries_down_is_a_request_error() {
    let down = FetchError::BackendUnavailable {
        reason: "connection refused".into(),
        status: None,
    };
    let mut backend = StubBackend::default();
    for name in ["request_rate", "request_rate_prior", "error_rate_5m", "latency_p95_s", "latency_p99_s"] {
        backend = backend.fail(name, down.clone());
    }
    let engine = engine(backend);
    let err = engine
        .run(&AnalysisRequest::new(AnalysisKind::Traffic))
        .await
        .unwrap_err();
    match &err {
        EngineError::AllQueriesFailed(errors) => assert_eq!(errors.len(), 5),
        other => panic!("expected AllQueriesFailed, got {other:?}"),
    }
    assert!(!err.all_rejected());
    assert_eq!(engine.stats().failures(AnalysisKind::Traffic), 1);
}

#[tokio::test]
async fn invalid_filter_fails_before_any_query() {
    let engine = engine(StubBackend::default());
    let err = engine
        .run(&AnalysisRequest::new(AnalysisKind::Traffic).with_filter("(unclosed"))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidFilter { .. }));
    assert_eq!(engine.fetch_stats().snapshot().queries_total, 0);
}

#[tokio::test]
async fn slow_backend_hits_request_deadline() {
    let mut config = MeterlineConfig::default();
    config.backend.request_deadline = "100ms".to_string();
    let engine = engine_with(config, StubBackend::default().delayed(Duration::from_secs(5)));
    let err = engine
        .run(&AnalysisRequest::new(AnalysisKind::SloStatus))
        .await
        .unwrap_err();
    assert_eq!(err, EngineError::DeadlineExceeded(Duration::from_millis(100)));
}

#[tokio::test]
async fn empty_plan_is_rejected() {
    let engine = engine(StubBackend::default());
    let mut plan: QueryPlan = engine
        .plan(&AnalysisRequest::new(AnalysisKind::Traffic))
        .unwrap();
    plan.queries.clear();
    assert_eq!(engine.run_plan(&plan).await.unwrap_err(), EngineError::NoQueries);
}

#[tokio::test]
async fn agent_cost_sums_models_and_flags_spend() {
    let backend = StubBackend::default()
        .answer(
            "cost_rate",
            vec![
                // USD per second: 0.002 + 0.001 → $10.80/hour.
                sample(&[("agent_name", "planner"), ("model", "large")], 0.002),
                sample(&[("agent_name", "planner"), ("model", "small")], 0.001),
                sample(&[("agent_name", "coder"), ("model", "small")], 0.0001),
            ],
        )
        .answer(
            "error_rate_5m",
            vec![
                sample(&[("agent_name", "planner")], 0.01),
                sample(&[("agent_name", "coder")], 0.08),
            ],
        )
        .answer(
            "llm_p95_latency_s",
            vec![sample(&[("agent_name", "planner"), ("model", "large")], 1.5)],
        );
    let report = engine(backend)
        .run(&AnalysisRequest::new(AnalysisKind::AgentCost))
        .await
        .unwrap();

    let planner = report.entity("planner").unwrap();
    assert_eq!(planner.severity, Severity::Critical);
    assert_eq!(planner.fields["hourly_cost_usd"], Reading::Known(10.8));
    assert_eq!(planner.fields["projected_daily_usd"], Reading::Known(259.2));
    assert_eq!(planner.flags, vec!["hourly_cost_critical", "daily_cost_projection"]);

    let coder = report.entity("coder").unwrap();
    assert_eq!(coder.severity, Severity::Warning);
    assert_eq!(coder.flags, vec!["high_error_rate"]);

    let large = report.entity("planner/large").unwrap();
    assert_eq!(large.fields["model_hourly_cost_usd"], Reading::Known(7.2));
    assert_eq!(large.fields["llm_p95_latency_s"], Reading::Known(1.5));
    assert_eq!(large.severity, Severity::Ok);

    assert_eq!(report.entities[0].key, "planner");
}

#[tokio::test]
async fn backend_status_flags_down_and_degraded_services() {
    let service = |name: &str, value: f64| sample(&[("service", name)], value);
    let backend = StubBackend::default()
        .answer(
            "servers_up",
            vec![service("web@docker", 0.0), service("api@docker", 2.0), service("auth@docker", 3.0)],
        )
        .answer(
            "servers_down",
            vec![service("web@docker", 2.0), service("api@docker", 1.0), service("auth@docker", 0.0)],
        );
    let report = engine(backend)
        .run(&AnalysisRequest::new(AnalysisKind::BackendStatus))
        .await
        .unwrap();

    assert_eq!(report.summary.total, 3);
    let web = report.entity("web@docker").unwrap();
    assert_eq!(web.severity, Severity::Critical);
    assert_eq!(web.flags, vec!["backend_down"]);

    let api = report.entity("api@docker").unwrap();
    assert_eq!(api.severity, Severity::Warning);
    assert_eq!(api.flags, vec!["backend_degraded"]);

    let auth = report.entity("auth@docker").unwrap();
    assert_eq!(auth.severity, Severity::Ok);
    assert!(auth.flags.is_empty());
}

#[tokio::test]
async fn debounced_engine_holds_new_warnings() {
    let backend = StubBackend::default()
        .answer("request_rate", vec![job("search", 30.0)])
        .answer("request_rate_prior", vec![job("search", 100.0)]);
    let engine = engine(backend).with_debouncer(Arc::new(ConsecutiveDebounce::new(2, 1)));
    let request = AnalysisRequest::new(AnalysisKind::Traffic);

    let first = engine.run(&request).await.unwrap();
    let search = first.entity("search").unwrap();
    assert_eq!(search.severity, Severity::Ok);
    assert_eq!(search.raw_severity, Some(Severity::Warning));
    assert_eq!(search.flags, vec!["traffic_drop"]);
    assert_eq!(first.summary.ok, 1);

    let second = engine.run(&request).await.unwrap();
    let search = second.entity("search").unwrap();
    assert_eq!(search.severity, Severity::Warning);
    assert_eq!(search.raw_severity, None);
}
