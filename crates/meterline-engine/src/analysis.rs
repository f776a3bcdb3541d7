//! Predefined analyses and their query plans.
//!
//! An analysis is a fixed plan: named PromQL templates, the key label to
//! join on, how each query binds into row fields, and which derived
//! metrics to compute. Templates use these placeholders:
//!
//! | Placeholder | Value |
//! |---|---|
//! | `{filter}` | entity filter regex, escaped for a PromQL string |
//! | `{label}` | join key label |
//! | `{sub_label}` | secondary label of sub-grouped rows |
//! | `{days}` | cost period in days |
//! | `{offset}` | traffic comparison offset (PromQL duration) |
//! | `{window}` | burn-rate window (PromQL duration), per-window templates only |
//!
//! Any template can be replaced from `[queries.<analysis>]` in the config.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use meterline_core::duration::promql_duration;
use meterline_core::{MeterlineConfig, QuerySpec, SloTarget};

use crate::derive::Derivation;
use crate::error::{EngineError, EngineResult};
use crate::join::{Collision, FieldBinding};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisKind {
    SloStatus,
    Traffic,
    CostReport,
    AgentCost,
    BackendStatus,
}

impl AnalysisKind {
    pub const ALL: [AnalysisKind; 5] = [
        AnalysisKind::SloStatus,
        AnalysisKind::Traffic,
        AnalysisKind::CostReport,
        AnalysisKind::AgentCost,
        AnalysisKind::BackendStatus,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            AnalysisKind::SloStatus => "slo_status",
            AnalysisKind::Traffic => "traffic",
            AnalysisKind::CostReport => "cost_report",
            AnalysisKind::AgentCost => "agent_cost",
            AnalysisKind::BackendStatus => "backend_status",
        }
    }
}

impl fmt::Display for AnalysisKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnalysisKind {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AnalysisKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| EngineError::UnknownAnalysis(s.to_string()))
    }
}

/// What the caller asked for. Unset parameters fall back to configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisRequest {
    pub kind: AnalysisKind,
    /// Regex over the join-key label. Defaults to `.*`.
    pub filter: Option<String>,
    /// Traffic comparison offset.
    pub offset: Option<Duration>,
    pub slo_target: Option<f64>,
    /// Cost period.
    pub days: Option<u32>,
}

impl AnalysisRequest {
    pub fn new(kind: AnalysisKind) -> Self {
        Self {
            kind,
            filter: None,
            offset: None,
            slo_target: None,
            days: None,
        }
    }

    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    pub fn with_offset(mut self, offset: Duration) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_slo_target(mut self, target: f64) -> Self {
        self.slo_target = Some(target);
        self
    }

    pub fn with_days(mut self, days: u32) -> Self {
        self.days = Some(days);
        self
    }
}

/// One query of a plan and the row fields it feeds.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedQuery {
    pub spec: QuerySpec,
    pub bindings: Vec<FieldBinding>,
}

/// Everything the engine needs to run one analysis.
#[derive(Debug, Clone)]
pub struct QueryPlan {
    pub kind: AnalysisKind,
    pub key_label: String,
    pub slo_target: SloTarget,
    pub queries: Vec<PlannedQuery>,
    pub derivations: Vec<Derivation>,
}

impl QueryPlan {
    pub fn specs(&self) -> Vec<QuerySpec> {
        self.queries.iter().map(|q| q.spec.clone()).collect()
    }
}

/// Validate a filter as a regex and escape it for a double-quoted PromQL
/// string.
pub fn escape_filter(filter: &str) -> EngineResult<String> {
    regex::Regex::new(filter).map_err(|e| EngineError::InvalidFilter {
        filter: filter.to_string(),
        reason: e.to_string(),
    })?;
    let mut out = String::with_capacity(filter.len() + 8);
    for c in filter.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    Ok(out)
}

/// Placeholder values for one plan.
struct TemplateVars {
    filter: String,
    label: String,
    sub_label: String,
    days: u32,
    offset: Duration,
}

impl TemplateVars {
    /// `{filter}` goes in last: it is caller text and may itself contain
    /// placeholder-shaped substrings.
    fn render(&self, template: &str, window: Option<Duration>) -> String {
        let mut out = template
            .replace("{label}", &self.label)
            .replace("{sub_label}", &self.sub_label)
            .replace("{days}", &self.days.to_string())
            .replace("{offset}", &promql_duration(self.offset));
        if let Some(w) = window {
            out = out.replace("{window}", &promql_duration(w));
        }
        out.replace("{filter}", &self.filter)
    }
}

/// A query before rendering: the default template and its bindings.
struct QueryTemplate {
    name: String,
    template: &'static str,
    window: Option<Duration>,
    /// Config key that overrides this template besides `name` itself.
    override_key: Option<&'static str>,
    bindings: Vec<FieldBinding>,
}

impl QueryTemplate {
    fn new(name: &str, template: &'static str, collision: Collision) -> Self {
        Self {
            name: name.to_string(),
            template,
            window: None,
            override_key: None,
            bindings: vec![FieldBinding::new(name, collision)],
        }
    }

    fn bind(mut self, field: &str, collision: Collision) -> Self {
        self.bindings.push(FieldBinding::new(field, collision));
        self
    }
}

fn sub_group(label: &str) -> Collision {
    Collision::SubGroup {
        label: label.to_string(),
    }
}

/// Build the plan for `request` under `config`.
pub fn plan(config: &MeterlineConfig, request: &AnalysisRequest) -> EngineResult<QueryPlan> {
    let kind = request.kind;
    let slo_target = match request.slo_target {
        Some(t) => SloTarget::new(t).map_err(|_| EngineError::InvalidSloTarget(t))?,
        None => config
            .slo_target()
            .map_err(|_| EngineError::InvalidSloTarget(config.slo.target))?,
    };
    let days = request.days.unwrap_or(config.cost.period_days);
    if days == 0 {
        return Err(EngineError::InvalidParameter {
            name: "days".to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    let offset = request.offset.unwrap_or_else(|| config.traffic.offset());
    if offset.is_zero() {
        return Err(EngineError::InvalidParameter {
            name: "offset".to_string(),
            reason: "must be a positive duration".to_string(),
        });
    }

    let key_label = match kind {
        AnalysisKind::SloStatus => config.slo.key_label.clone(),
        AnalysisKind::Traffic => config.traffic.key_label.clone(),
        AnalysisKind::CostReport | AnalysisKind::AgentCost => config.cost.key_label.clone(),
        AnalysisKind::BackendStatus => config.traffic.backend_label.clone(),
    };
    let vars = TemplateVars {
        filter: escape_filter(request.filter.as_deref().unwrap_or(".*"))?,
        label: key_label.clone(),
        sub_label: config.cost.model_label.clone(),
        days,
        offset,
    };

    let (templates, derivations) = match kind {
        AnalysisKind::SloStatus => slo_status(&config.slo.windows()),
        AnalysisKind::Traffic => traffic(),
        AnalysisKind::CostReport => cost_report(&vars.sub_label),
        AnalysisKind::AgentCost => agent_cost(&vars.sub_label),
        AnalysisKind::BackendStatus => backend_status(),
    };

    let overrides = config.queries.get(kind.as_str());
    if let Some(overrides) = overrides {
        for field in overrides.keys() {
            let known = templates
                .iter()
                .any(|t| &t.name == field || t.override_key == Some(field.as_str()));
            if !known {
                warn!(analysis = %kind, %field, "ignoring override for unknown query");
            }
        }
    }

    let queries = templates
        .into_iter()
        .map(|t| {
            let template = overrides
                .and_then(|o| {
                    o.get(&t.name)
                        .or_else(|| t.override_key.and_then(|k| o.get(k)))
                })
                .map(String::as_str)
                .unwrap_or(t.template);
            PlannedQuery {
                spec: QuerySpec::instant(t.name.clone(), vars.render(template, t.window)),
                bindings: t.bindings,
            }
        })
        .collect();

    Ok(QueryPlan {
        kind,
        key_label,
        slo_target,
        queries,
        derivations,
    })
}

fn slo_status(windows: &[Duration]) -> (Vec<QueryTemplate>, Vec<Derivation>) {
    let mut templates = vec![QueryTemplate::new(
        "availability_30d",
        r#"job:slo_availability:ratio_rate30d{{label}=~"{filter}"}"#,
        Collision::First,
    )];
    let mut derivations = Vec::new();

    for &w in windows {
        let suffix = promql_duration(w);
        let field = format!("availability_{suffix}");
        templates.push(QueryTemplate {
            window: Some(w),
            override_key: Some("availability_window"),
            ..QueryTemplate::new(
                &field,
                r#"job:slo_availability:ratio_rate{window}{{label}=~"{filter}"}"#,
                Collision::First,
            )
        });
        derivations.push(Derivation::BurnRate {
            availability: field,
            output: format!("burn_rate_{suffix}"),
        });
    }

    templates.push(QueryTemplate::new(
        "error_budget",
        r#"job:slo_error_budget_remaining:ratio{{label}=~"{filter}"}"#,
        Collision::First,
    ));
    templates.push(QueryTemplate::new(
        "error_rate_5m",
        r#"job:http_error_ratio:rate5m{{label}=~"{filter}"}"#,
        Collision::First,
    ));

    derivations.extend([
        Derivation::BudgetRemainingPct {
            remaining: "error_budget".into(),
            availability: "availability_30d".into(),
            output: "error_budget_remaining_pct".into(),
        },
        Derivation::Percent {
            ratio: "availability_30d".into(),
            output: "availability_30d_pct".into(),
        },
        Derivation::Percent {
            ratio: "error_rate_5m".into(),
            output: "error_rate_5m_pct".into(),
        },
    ]);
    (templates, derivations)
}

fn traffic() -> (Vec<QueryTemplate>, Vec<Derivation>) {
    let templates = vec![
        QueryTemplate::new(
            "request_rate",
            r#"sum(rate(http_requests_total{{label}=~"{filter}"}[5m])) by ({label})"#,
            Collision::Sum,
        ),
        QueryTemplate::new(
            "request_rate_prior",
            r#"sum(rate(http_requests_total{{label}=~"{filter}"}[5m] offset {offset})) by ({label})"#,
            Collision::Sum,
        ),
        QueryTemplate::new(
            "error_rate_5m",
            r#"job:http_error_ratio:rate5m{{label}=~"{filter}"}"#,
            Collision::First,
        ),
        QueryTemplate::new(
            "latency_p95_s",
            r#"job:http_request_duration_p95:rate5m{{label}=~"{filter}"}"#,
            Collision::First,
        ),
        QueryTemplate::new(
            "latency_p99_s",
            r#"job:http_request_duration_p99:rate5m{{label}=~"{filter}"}"#,
            Collision::First,
        ),
    ];
    let derivations = vec![
        Derivation::TrafficRatio {
            current: "request_rate".into(),
            prior: "request_rate_prior".into(),
            output: "traffic_ratio".into(),
        },
        Derivation::Percent {
            ratio: "error_rate_5m".into(),
            output: "error_rate_5m_pct".into(),
        },
    ];
    (templates, derivations)
}

fn cost_report(sub_label: &str) -> (Vec<QueryTemplate>, Vec<Derivation>) {
    let templates = vec![
        QueryTemplate::new(
            "total_cost_usd",
            r#"sum(increase(llm_cost_usd_total{{label}=~"{filter}"}[{days}d])) by ({label}, {sub_label})"#,
            Collision::Sum,
        )
        .bind("model_cost_usd", sub_group(sub_label)),
        // Spend on failed runs bought nothing; agents without failures report 0.
        QueryTemplate::new(
            "idle_cost_usd",
            r#"sum(increase(llm_cost_usd_total{{label}=~"{filter}",status="error"}[{days}d])) by ({label}) or (0 * sum(increase(llm_cost_usd_total{{label}=~"{filter}"}[{days}d])) by ({label}))"#,
            Collision::Sum,
        ),
        QueryTemplate::new(
            "cost_rate",
            r#"sum(rate(llm_cost_usd_total{{label}=~"{filter}"}[1h])) by ({label})"#,
            Collision::Sum,
        ),
    ];
    let derivations = vec![
        Derivation::WastePct {
            idle: "idle_cost_usd".into(),
            total: "total_cost_usd".into(),
            output: "waste_percentage".into(),
        },
        Derivation::Hourly {
            rate: "cost_rate".into(),
            output: "hourly_cost_usd".into(),
        },
        Derivation::Daily {
            hourly: "hourly_cost_usd".into(),
            output: "projected_daily_usd".into(),
        },
    ];
    (templates, derivations)
}

fn agent_cost(sub_label: &str) -> (Vec<QueryTemplate>, Vec<Derivation>) {
    let templates = vec![
        QueryTemplate::new(
            "cost_rate",
            r#"sum(rate(llm_cost_usd_total{{label}=~"{filter}"}[1h])) by ({label}, {sub_label})"#,
            Collision::Sum,
        )
        .bind("model_cost_rate", sub_group(sub_label)),
        QueryTemplate::new(
            "prompt_tokens_rate",
            r#"sum(rate(llm_tokens_total{{label}=~"{filter}",token_type="prompt"}[5m])) by ({label}, {sub_label})"#,
            sub_group(sub_label),
        ),
        QueryTemplate::new(
            "completion_tokens_rate",
            r#"sum(rate(llm_tokens_total{{label}=~"{filter}",token_type="completion"}[5m])) by ({label}, {sub_label})"#,
            sub_group(sub_label),
        ),
        QueryTemplate::new(
            "error_rate_5m",
            r#"sum(rate(agent_runs_total{{label}=~"{filter}",status="error"}[5m])) by ({label}) / sum(rate(agent_runs_total{{label}=~"{filter}"}[5m])) by ({label})"#,
            Collision::First,
        ),
        QueryTemplate::new(
            "total_cost_30d_usd",
            r#"sum(increase(llm_cost_usd_total{{label}=~"{filter}"}[30d])) by ({label})"#,
            Collision::Sum,
        ),
        QueryTemplate::new(
            "llm_p95_latency_s",
            r#"histogram_quantile(0.95, sum(rate(llm_request_duration_seconds_bucket{{label}=~"{filter}"}[5m])) by ({label}, {sub_label}, le))"#,
            sub_group(sub_label),
        ),
    ];
    let derivations = vec![
        Derivation::Hourly {
            rate: "cost_rate".into(),
            output: "hourly_cost_usd".into(),
        },
        Derivation::Hourly {
            rate: "model_cost_rate".into(),
            output: "model_hourly_cost_usd".into(),
        },
        Derivation::Daily {
            hourly: "hourly_cost_usd".into(),
            output: "projected_daily_usd".into(),
        },
        Derivation::Percent {
            ratio: "error_rate_5m".into(),
            output: "error_rate_5m_pct".into(),
        },
    ];
    (templates, derivations)
}

/// Upstream server health behind the ingress, keyed by service.
fn backend_status() -> (Vec<QueryTemplate>, Vec<Derivation>) {
    let templates = vec![
        QueryTemplate::new(
            "servers_up",
            r#"sum(traefik_service_server_up{{label}=~"{filter}"}) by ({label})"#,
            Collision::Sum,
        ),
        QueryTemplate::new(
            "servers_down",
            r#"count(traefik_service_server_up{{label}=~"{filter}"} == 0) by ({label}) or (0 * sum(traefik_service_server_up{{label}=~"{filter}"}) by ({label}))"#,
            Collision::Sum,
        ),
    ];
    (templates, Vec::new())
}
