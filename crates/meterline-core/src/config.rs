//! meterline.toml configuration.
//!
//! One `MeterlineConfig` is loaded at startup and passed explicitly to
//! the backend client, fetcher, and engine. Every field has a default, so
//! an empty file is a valid configuration.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::parse_duration;
use crate::policy::PolicyTable;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("invalid `{field}`: {reason}")]
    Invalid { field: String, reason: String },

    #[error("SLO target must be strictly between 0 and 1, got {0}")]
    SloTarget(f64),
}

/// An SLO target such as 0.999. Always strictly between 0 and 1, so the
/// error budget `1 - target` is never zero.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize)]
pub struct SloTarget(f64);

impl SloTarget {
    pub fn new(target: f64) -> Result<Self, ConfigError> {
        if target.is_finite() && target > 0.0 && target < 1.0 {
            Ok(Self(target))
        } else {
            Err(ConfigError::SloTarget(target))
        }
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// Allowed error fraction, e.g. 0.001 for a 99.9% target.
    pub fn error_budget(self) -> f64 {
        1.0 - self.0
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MeterlineConfig {
    pub backend: BackendConfig,
    pub slo: SloConfig,
    pub traffic: TrafficConfig,
    pub cost: CostConfig,
    pub debounce: DebounceConfig,
    pub stack: StackConfig,
    /// Replaces the standard rule table when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicyTable>,
    /// Query template overrides: analysis name → field → PromQL template.
    pub queries: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub url: String,
    pub instant_timeout: String,
    pub range_timeout: String,
    /// Timeout for the single retry of a transient failure.
    pub retry_timeout: String,
    /// Outer bound on the fetch phase of one analysis.
    pub request_deadline: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9090".to_string(),
            instant_timeout: "15s".to_string(),
            range_timeout: "30s".to_string(),
            retry_timeout: "5s".to_string(),
            request_deadline: "60s".to_string(),
        }
    }
}

impl BackendConfig {
    pub fn instant_timeout(&self) -> Duration {
        parse_duration(&self.instant_timeout).unwrap_or(Duration::from_secs(15))
    }

    pub fn range_timeout(&self) -> Duration {
        parse_duration(&self.range_timeout).unwrap_or(Duration::from_secs(30))
    }

    pub fn retry_timeout(&self) -> Duration {
        parse_duration(&self.retry_timeout).unwrap_or(Duration::from_secs(5))
    }

    pub fn request_deadline(&self) -> Duration {
        parse_duration(&self.request_deadline).unwrap_or(Duration::from_secs(60))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SloConfig {
    pub target: f64,
    /// Burn-rate windows, shortest first.
    pub windows: Vec<String>,
    pub key_label: String,
}

impl Default for SloConfig {
    fn default() -> Self {
        Self {
            target: 0.999,
            windows: vec!["1h".to_string(), "6h".to_string()],
            key_label: "job".to_string(),
        }
    }
}

impl SloConfig {
    pub fn windows(&self) -> Vec<Duration> {
        self.windows.iter().filter_map(|w| parse_duration(w)).collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrafficConfig {
    /// How far back the comparison window sits.
    pub offset: String,
    pub key_label: String,
    /// Ingress service label for `backend_status`.
    pub backend_label: String,
}

impl Default for TrafficConfig {
    fn default() -> Self {
        Self {
            offset: "1h".to_string(),
            key_label: "job".to_string(),
            backend_label: "service".to_string(),
        }
    }
}

impl TrafficConfig {
    pub fn offset(&self) -> Duration {
        parse_duration(&self.offset).unwrap_or(Duration::from_secs(3600))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CostConfig {
    pub period_days: u32,
    /// Join label for both cost analyses.
    pub key_label: String,
    /// Secondary label for per-model rows (`agent/model`).
    pub model_label: String,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            period_days: 7,
            key_label: "agent_name".to_string(),
            model_label: "model".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebounceConfig {
    pub enabled: bool,
    /// Consecutive observations of a more severe level before escalating.
    pub escalate_after: u32,
    /// Consecutive observations of a less severe level before recovering.
    pub recover_after: u32,
}

impl Default for DebounceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            escalate_after: 3,
            recover_after: 1,
        }
    }
}

/// Observability component endpoints polled by the stack health check.
/// Unset components are skipped.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prometheus: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grafana: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loki: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tempo: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otel_collector: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alertmanager: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
}

impl StackConfig {
    /// (component, base url, health path) for every configured component.
    pub fn endpoints(&self) -> Vec<(&'static str, String, &'static str)> {
        let candidates = [
            ("prometheus", &self.prometheus, "/-/healthy"),
            ("grafana", &self.grafana, "/api/health"),
            ("loki", &self.loki, "/ready"),
            ("tempo", &self.tempo, "/ready"),
            ("otel-collector", &self.otel_collector, "/"),
            ("alertmanager", &self.alertmanager, "/-/healthy"),
        ];
        candidates
            .into_iter()
            .filter_map(|(name, url, path)| url.as_ref().map(|u| (name, u.clone(), path)))
            .collect()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
            .as_deref()
            .and_then(parse_duration)
            .unwrap_or(Duration::from_secs(5))
    }
}

impl MeterlineConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: MeterlineConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// The configured SLO target.
    pub fn slo_target(&self) -> Result<SloTarget, ConfigError> {
        SloTarget::new(self.slo.target)
    }

    /// The rule table in effect: the configured override or the standard one.
    pub fn policy(&self) -> PolicyTable {
        self.policy.clone().unwrap_or_else(PolicyTable::standard)
    }

    /// Reject values that would otherwise silently fall back to defaults.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.backend.url.starts_with("http://") {
            return Err(invalid("backend.url", "only plain http:// backends are supported"));
        }

        let durations = [
            ("backend.instant_timeout", &self.backend.instant_timeout),
            ("backend.range_timeout", &self.backend.range_timeout),
            ("backend.retry_timeout", &self.backend.retry_timeout),
            ("backend.request_deadline", &self.backend.request_deadline),
            ("traffic.offset", &self.traffic.offset),
        ];
        for (field, value) in durations {
            match parse_duration(value) {
                Some(d) if !d.is_zero() => {}
                _ => return Err(invalid(field, &format!("not a positive duration: {value:?}"))),
            }
        }
        if let Some(t) = &self.stack.timeout
            && parse_duration(t).is_none()
        {
            return Err(invalid("stack.timeout", &format!("not a duration: {t:?}")));
        }

        self.slo_target()?;
        if self.slo.windows.len() < 2 {
            return Err(invalid(
                "slo.windows",
                "at least two burn-rate windows are required",
            ));
        }
        for w in &self.slo.windows {
            if parse_duration(w).is_none_or(|d| d.is_zero()) {
                return Err(invalid("slo.windows", &format!("not a positive duration: {w:?}")));
            }
        }

        if self.cost.period_days == 0 {
            return Err(invalid("cost.period_days", "must be at least 1"));
        }
        if self.debounce.escalate_after == 0 || self.debounce.recover_after == 0 {
            return Err(invalid("debounce", "thresholds must be at least 1"));
        }
        if let Some(policy) = &self.policy {
            policy.validate().map_err(|reason| invalid("policy", &reason))?;
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}
