//! Declarative threshold policy.
//!
//! The policy is an ordered list of rule families. Within a family the
//! first matching rule wins (families list their most severe rule first).
//! Across families results are additive: every family that matches
//! contributes its flag, and the entity's severity is the maximum.
//!
//! # Standard table
//!
//! | Family | Field | Rule | Severity | Flag |
//! |---|---|---|---|---|
//! | slo | `burn_rate_1h` | ≥ 14.4 | critical | `fast_burn` |
//! | slo | `burn_rate_6h` | ≥ 6.0 | warning | `slow_burn` |
//! | slo | `error_budget_remaining_pct` | < 10 | warning | `budget_low` |
//! | errors | `error_rate_5m_pct` | > 5 | warning | `high_error_rate` |
//! | traffic | `traffic_ratio` | < 0.5 | warning | `traffic_drop` |
//! | latency | `latency_p99_s` | > 2.0 | warning | `slow_p99` |
//! | cost | `hourly_cost_usd` | > 10 | critical | `hourly_cost_critical` |
//! | cost | `hourly_cost_usd` | > 5 | warning | `hourly_cost_warning` |
//! | projection | `projected_daily_usd` | > 100 | warning | `daily_cost_projection` |
//! | backends | `servers_up` | ≤ 0 | critical | `backend_down` |
//! | backends | `servers_down` | > 0 | warning | `backend_degraded` |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::Reading;

/// Classification severity. Ordered: `Ok < Warning < Critical`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Ok,
    Warning,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Ok => write!(f, "ok"),
            Severity::Warning => write!(f, "warning"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Comparison {
    Gt,
    Ge,
    Lt,
    Le,
}

impl Comparison {
    pub fn holds(self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::Gt => value > threshold,
            Comparison::Ge => value >= threshold,
            Comparison::Lt => value < threshold,
            Comparison::Le => value <= threshold,
        }
    }
}

/// One predicate → severity → message entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Row field the predicate reads.
    pub field: String,
    pub op: Comparison,
    pub threshold: f64,
    pub severity: Severity,
    /// Short machine identifier reported in `flags`.
    pub flag: String,
    /// Human-readable reason reported in `reasons`.
    pub message: String,
}

impl Rule {
    pub fn new(
        field: &str,
        op: Comparison,
        threshold: f64,
        severity: Severity,
        flag: &str,
        message: &str,
    ) -> Self {
        Self {
            field: field.to_string(),
            op,
            threshold,
            severity,
            flag: flag.to_string(),
            message: message.to_string(),
        }
    }

    /// An unknown reading never matches.
    pub fn matches(&self, reading: Reading) -> bool {
        reading
            .value()
            .is_some_and(|v| self.op.holds(v, self.threshold))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleFamily {
    pub name: String,
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyTable {
    pub families: Vec<RuleFamily>,
}

impl PolicyTable {
    /// The built-in table (see module docs).
    pub fn standard() -> Self {
        use Comparison::{Ge, Gt, Le, Lt};
        use Severity::{Critical, Warning};

        let family = |name: &str, rules: Vec<Rule>| RuleFamily {
            name: name.to_string(),
            rules,
        };

        PolicyTable {
            families: vec![
                family(
                    "slo",
                    vec![
                        Rule::new(
                            "burn_rate_1h",
                            Ge,
                            14.4,
                            Critical,
                            "fast_burn",
                            "2% of 30-day budget would be consumed in 1 hour at this rate",
                        ),
                        Rule::new(
                            "burn_rate_6h",
                            Ge,
                            6.0,
                            Warning,
                            "slow_burn",
                            "5% of 30-day budget would be consumed in 6 hours at this rate",
                        ),
                        Rule::new(
                            "error_budget_remaining_pct",
                            Lt,
                            10.0,
                            Warning,
                            "budget_low",
                            "less than 10% of the error budget remains",
                        ),
                    ],
                ),
                family(
                    "errors",
                    vec![Rule::new(
                        "error_rate_5m_pct",
                        Gt,
                        5.0,
                        Warning,
                        "high_error_rate",
                        "more than 5% of requests failed over the last 5 minutes",
                    )],
                ),
                family(
                    "traffic",
                    vec![Rule::new(
                        "traffic_ratio",
                        Lt,
                        0.5,
                        Warning,
                        "traffic_drop",
                        "traffic fell below half of the comparison window (possible partial outage or client-side issue)",
                    )],
                ),
                family(
                    "latency",
                    vec![Rule::new(
                        "latency_p99_s",
                        Gt,
                        2.0,
                        Warning,
                        "slow_p99",
                        "p99 latency above 2s",
                    )],
                ),
                family(
                    "cost",
                    vec![
                        Rule::new(
                            "hourly_cost_usd",
                            Gt,
                            10.0,
                            Critical,
                            "hourly_cost_critical",
                            "spending more than $10/hour; check for runaway loops or model misconfiguration",
                        ),
                        Rule::new(
                            "hourly_cost_usd",
                            Gt,
                            5.0,
                            Warning,
                            "hourly_cost_warning",
                            "spending more than $5/hour; review request rate and batching",
                        ),
                    ],
                ),
                family(
                    "projection",
                    vec![Rule::new(
                        "projected_daily_usd",
                        Gt,
                        100.0,
                        Warning,
                        "daily_cost_projection",
                        "projected daily spend above $100; review request rate and model selection",
                    )],
                ),
                family(
                    "backends",
                    vec![
                        Rule::new(
                            "servers_up",
                            Le,
                            0.0,
                            Critical,
                            "backend_down",
                            "no upstream server of this service is up",
                        ),
                        Rule::new(
                            "servers_down",
                            Gt,
                            0.0,
                            Warning,
                            "backend_degraded",
                            "some upstream servers of this service are down",
                        ),
                    ],
                ),
            ],
        }
    }

    /// Structural checks for a table loaded from configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.families.is_empty() {
            return Err("policy has no rule families".to_string());
        }
        for family in &self.families {
            if family.rules.is_empty() {
                return Err(format!("rule family `{}` has no rules", family.name));
            }
            for rule in &family.rules {
                if rule.field.is_empty() || rule.flag.is_empty() {
                    return Err(format!(
                        "rule family `{}` has a rule without a field or flag",
                        family.name
                    ));
                }
                if !rule.threshold.is_finite() {
                    return Err(format!("rule `{}` has a non-finite threshold", rule.flag));
                }
            }
        }
        Ok(())
    }

    pub fn family(&self, name: &str) -> Option<&RuleFamily> {
        self.families.iter().find(|f| f.name == name)
    }
}

impl Default for PolicyTable {
    fn default() -> Self {
        Self::standard()
    }
}
