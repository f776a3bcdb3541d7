//! REST API handlers.
//!
//! Analyses and raw queries go through the shared `Engine`; every JSON
//! answer uses the same `{success, data, error, kind}` envelope.

use std::time::Duration;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use meterline_core::duration::parse_duration;
use meterline_core::{QuerySpec, SeriesPoint};
use meterline_engine::{AnalysisKind, AnalysisRequest, EngineError};
use meterline_fetch::{FetchError, check_stack};

use crate::ApiState;

/// Series returned by `/api/v1/query` before truncation.
pub const MAX_RAW_SERIES: usize = 50;
/// Points kept per range series in `/api/v1/query`.
pub const MAX_RAW_POINTS: usize = 5;
/// Longest range window accepted by `/api/v1/query`: one week.
pub const MAX_RAW_RANGE_MINUTES: u64 = 7 * 24 * 60;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
            kind: None,
        })
    }
}

fn error_response(msg: &str, kind: &'static str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
            kind: Some(kind),
        }),
    )
}

/// HTTP status for a request-level engine failure.
pub fn engine_status(err: &EngineError) -> StatusCode {
    match err {
        EngineError::InvalidFilter { .. }
        | EngineError::InvalidSloTarget(_)
        | EngineError::InvalidParameter { .. }
        | EngineError::UnknownAnalysis(_) => StatusCode::BAD_REQUEST,
        EngineError::NoQueries => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::AllQueriesFailed(_) if err.all_rejected() => StatusCode::UNPROCESSABLE_ENTITY,
        EngineError::AllQueriesFailed(_) => StatusCode::BAD_GATEWAY,
        EngineError::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
    }
}

/// HTTP status for a failed raw query.
pub fn fetch_status(err: &FetchError) -> StatusCode {
    match err {
        FetchError::QueryRejected { .. } => StatusCode::BAD_REQUEST,
        FetchError::QueryTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        FetchError::BackendUnavailable { .. } | FetchError::MalformedResponse(_) => {
            StatusCode::BAD_GATEWAY
        }
    }
}

fn engine_error(err: &EngineError) -> axum::response::Response {
    error_response(&err.to_string(), err.kind(), engine_status(err)).into_response()
}

// ── Analyses ───────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct AnalysisInfo {
    pub name: &'static str,
    pub description: &'static str,
}

fn describe(kind: AnalysisKind) -> &'static str {
    match kind {
        AnalysisKind::SloStatus => "SLO compliance, error budget and multi-window burn rate per job",
        AnalysisKind::Traffic => "Request rate against a prior period, error rate and latency per job",
        AnalysisKind::CostReport => "Spend, idle spend and projected cost per agent and model",
        AnalysisKind::AgentCost => "Cost rate, token throughput, error rate and LLM p95 latency per agent and model",
        AnalysisKind::BackendStatus => "Upstream servers up and down per ingress service",
    }
}

/// GET /api/v1/analyses
pub async fn list_analyses() -> impl IntoResponse {
    let infos: Vec<AnalysisInfo> = AnalysisKind::ALL
        .into_iter()
        .map(|kind| AnalysisInfo {
            name: kind.as_str(),
            description: describe(kind),
        })
        .collect();
    ApiResponse::ok(infos)
}

/// Query string of an analysis run.
#[derive(Debug, Default, Deserialize)]
pub struct AnalysisParams {
    pub filter: Option<String>,
    /// Traffic comparison offset, e.g. "1h" or "7d".
    pub offset: Option<String>,
    pub slo_target: Option<f64>,
    pub days: Option<u32>,
}

impl AnalysisParams {
    fn into_request(self, kind: AnalysisKind) -> Result<AnalysisRequest, EngineError> {
        let mut request = AnalysisRequest::new(kind);
        if let Some(filter) = self.filter {
            request = request.with_filter(filter);
        }
        if let Some(offset) = self.offset {
            let parsed = parse_duration(&offset).ok_or_else(|| EngineError::InvalidParameter {
                name: "offset".to_string(),
                reason: format!("not a duration: {offset:?}"),
            })?;
            request = request.with_offset(parsed);
        }
        if let Some(target) = self.slo_target {
            request = request.with_slo_target(target);
        }
        if let Some(days) = self.days {
            request = request.with_days(days);
        }
        Ok(request)
    }
}

/// GET /api/v1/analyses/{kind}
pub async fn run_analysis(
    State(state): State<ApiState>,
    Path(kind): Path<String>,
    Query(params): Query<AnalysisParams>,
) -> impl IntoResponse {
    let request = match kind
        .parse::<AnalysisKind>()
        .and_then(|kind| params.into_request(kind))
    {
        Ok(request) => request,
        Err(e) => return engine_error(&e),
    };

    match state.engine.run(&request).await {
        Ok(report) => ApiResponse::ok(report).into_response(),
        Err(e) => engine_error(&e),
    }
}

// ── Raw queries ────────────────────────────────────────────────

/// Query string of `/api/v1/query`.
#[derive(Debug, Default, Deserialize)]
pub struct QueryParams {
    pub query: Option<String>,
    /// When set, run a range query over this many minutes.
    pub range_minutes: Option<u64>,
    pub step_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
pub struct RawSeries {
    pub labels: std::collections::BTreeMap<String, String>,
    pub points: Vec<SeriesPoint>,
}

#[derive(Debug, Serialize)]
pub struct RawQueryResult {
    pub query: String,
    /// "vector" for instant queries, "matrix" for range queries.
    pub result_type: &'static str,
    pub series_count: usize,
    pub truncated: bool,
    pub series: Vec<RawSeries>,
}

fn invalid_param(name: &str, reason: &str) -> axum::response::Response {
    engine_error(&EngineError::InvalidParameter {
        name: name.to_string(),
        reason: reason.to_string(),
    })
}

/// GET /api/v1/query
pub async fn raw_query(
    State(state): State<ApiState>,
    Query(params): Query<QueryParams>,
) -> impl IntoResponse {
    let query = match params.query.as_deref().map(str::trim) {
        Some(q) if !q.is_empty() => q.to_string(),
        _ => return invalid_param("query", "must not be empty"),
    };

    let spec = match params.range_minutes {
        None => QuerySpec::instant("raw", query.clone()),
        Some(0) => return invalid_param("range_minutes", "must be at least 1"),
        Some(minutes) if minutes > MAX_RAW_RANGE_MINUTES => {
            return invalid_param(
                "range_minutes",
                &format!("must be at most {MAX_RAW_RANGE_MINUTES}"),
            );
        }
        Some(minutes) => {
            let step = params.step_seconds.unwrap_or(60);
            if step == 0 {
                return invalid_param("step_seconds", "must be at least 1");
            }
            QuerySpec::range(
                "raw",
                query.clone(),
                Duration::from_secs(minutes * 60),
                Duration::from_secs(step),
            )
        }
    };

    match state.engine.raw_query(&spec).await {
        Ok(series) => {
            let series_count = series.len();
            let series: Vec<RawSeries> = series
                .into_iter()
                .take(MAX_RAW_SERIES)
                .map(|s| {
                    let points = s.points();
                    let tail = points.len().saturating_sub(MAX_RAW_POINTS);
                    RawSeries {
                        points: points[tail..].to_vec(),
                        labels: s.labels,
                    }
                })
                .collect();
            info!(query = %query, series = series_count, "raw query");
            ApiResponse::ok(RawQueryResult {
                query,
                result_type: if spec.is_range() { "matrix" } else { "vector" },
                series_count,
                truncated: series_count > MAX_RAW_SERIES,
                series,
            })
            .into_response()
        }
        Err(e) => {
            warn!(query = %query, error = %e, "raw query failed");
            error_response(&e.message(), e.kind(), fetch_status(&e)).into_response()
        }
    }
}

// ── Stack health ───────────────────────────────────────────────

/// GET /api/v1/stack/health
pub async fn stack_health(State(state): State<ApiState>) -> impl IntoResponse {
    ApiResponse::ok(check_stack(&state.stack).await)
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        state.engine.render_metrics(),
    )
}
