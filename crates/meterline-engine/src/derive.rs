//! Derived-metric calculator.
//!
//! Each derivation reads named fields of a row and writes one new field.
//! Derivations are independent: a missing input makes only that output
//! unknown, never another derivation's.

use meterline_core::{Reading, SloTarget};

use crate::join::EntityRow;

pub const SECONDS_PER_HOUR: f64 = 3600.0;
pub const HOURS_PER_DAY: f64 = 24.0;

/// Observed error ratio over the error ratio the SLO allows.
pub fn burn_rate(error_ratio: Reading, target: SloTarget) -> Reading {
    error_ratio.map(|e| e.max(0.0) / target.error_budget())
}

/// Error budget left, in percent. Prefers a directly queried remaining
/// ratio; otherwise computes it from the compliance-window availability.
pub fn budget_remaining_pct(
    remaining_ratio: Reading,
    availability: Reading,
    target: SloTarget,
) -> Reading {
    if remaining_ratio.is_known() {
        return remaining_ratio.map(|r| r * 100.0);
    }
    availability.map(|a| (1.0 - (1.0 - a) / target.error_budget()) * 100.0)
}

/// Current over prior rate. A zero prior rate has no meaningful ratio.
pub fn traffic_ratio(current: Reading, prior: Reading) -> Reading {
    match (current, prior) {
        (Reading::Known(c), Reading::Known(p)) if p != 0.0 => Reading::from_f64(c / p),
        _ => Reading::Unknown,
    }
}

/// Idle share of total cost, in percent. Zero total cost is zero waste.
pub fn waste_percentage(idle: Reading, total: Reading) -> Reading {
    match (idle, total) {
        (_, Reading::Known(t)) if t == 0.0 => Reading::Known(0.0),
        (Reading::Known(i), Reading::Known(t)) => Reading::from_f64(i / t * 100.0),
        _ => Reading::Unknown,
    }
}

/// A per-second rate projected to one hour.
pub fn hourly(rate_per_second: Reading) -> Reading {
    rate_per_second.map(|r| r * SECONDS_PER_HOUR)
}

/// An hourly figure projected to one day.
pub fn daily(per_hour: Reading) -> Reading {
    per_hour.map(|h| h * HOURS_PER_DAY)
}

pub fn percent(ratio: Reading) -> Reading {
    ratio.map(|r| r * 100.0)
}

/// One derived field.
#[derive(Debug, Clone, PartialEq)]
pub enum Derivation {
    /// `output = (1 - availability) / (1 - target)`
    BurnRate { availability: String, output: String },
    BudgetRemainingPct {
        remaining: String,
        availability: String,
        output: String,
    },
    TrafficRatio {
        current: String,
        prior: String,
        output: String,
    },
    WastePct {
        idle: String,
        total: String,
        output: String,
    },
    Hourly { rate: String, output: String },
    Daily { hourly: String, output: String },
    Percent { ratio: String, output: String },
}

impl Derivation {
    pub fn output(&self) -> &str {
        match self {
            Derivation::BurnRate { output, .. }
            | Derivation::BudgetRemainingPct { output, .. }
            | Derivation::TrafficRatio { output, .. }
            | Derivation::WastePct { output, .. }
            | Derivation::Hourly { output, .. }
            | Derivation::Daily { output, .. }
            | Derivation::Percent { output, .. } => output,
        }
    }

    fn evaluate(&self, row: &EntityRow, target: SloTarget) -> Reading {
        match self {
            Derivation::BurnRate { availability, .. } => {
                burn_rate(row.get(availability).map(|a| 1.0 - a), target)
            }
            Derivation::BudgetRemainingPct {
                remaining,
                availability,
                ..
            } => budget_remaining_pct(row.get(remaining), row.get(availability), target),
            Derivation::TrafficRatio { current, prior, .. } => {
                traffic_ratio(row.get(current), row.get(prior))
            }
            Derivation::WastePct { idle, total, .. } => {
                waste_percentage(row.get(idle), row.get(total))
            }
            Derivation::Hourly { rate, .. } => hourly(row.get(rate)),
            Derivation::Daily { hourly: h, .. } => daily(row.get(h)),
            Derivation::Percent { ratio, .. } => percent(row.get(ratio)),
        }
    }
}

/// Applies an ordered list of derivations to rows.
///
/// Later derivations may read earlier outputs (hourly → daily).
#[derive(Debug, Clone)]
pub struct Calculator {
    target: SloTarget,
    derivations: Vec<Derivation>,
}

impl Calculator {
    pub fn new(target: SloTarget, derivations: Vec<Derivation>) -> Self {
        Self {
            target,
            derivations,
        }
    }

    /// Return `row` with every derived field added.
    pub fn apply(&self, mut row: EntityRow) -> EntityRow {
        for d in &self.derivations {
            let value = d.evaluate(&row, self.target);
            row.insert(d.output(), value);
        }
        row
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target() -> SloTarget {
        SloTarget::new(0.999).unwrap()
    }

    fn approx(r: Reading, expected: f64) {
        let v = r.value().unwrap_or_else(|| panic!("expected {expected}, got unknown"));
        assert!((v - expected).abs() < 1e-9, "expected {expected}, got {v}");
    }

    #[test]
    fn burn_rate_against_target() {
        // 2% errors against a 0.1% budget.
        approx(burn_rate(Reading::Known(0.02), target()), 20.0);
        approx(burn_rate(Reading::Known(0.001), target()), 1.0);
        assert_eq!(burn_rate(Reading::Unknown, target()), Reading::Unknown);
    }

    #[test]
    fn traffic_ratio_zero_prior_is_unknown() {
        approx(traffic_ratio(Reading::Known(30.0), Reading::Known(100.0)), 0.3);
        assert_eq!(traffic_ratio(Reading::Known(5.0), Reading::Known(0.0)), Reading::Unknown);
        assert_eq!(traffic_ratio(Reading::Known(0.0), Reading::Known(0.0)), Reading::Unknown);
        assert_eq!(traffic_ratio(Reading::Unknown, Reading::Known(1.0)), Reading::Unknown);
    }

    #[test]
    fn zero_cost_is_zero_waste() {
        assert_eq!(waste_percentage(Reading::Known(0.0), Reading::Known(0.0)), Reading::Known(0.0));
        approx(waste_percentage(Reading::Known(25.0), Reading::Known(100.0)), 25.0);
        assert_eq!(waste_percentage(Reading::Known(1.0), Reading::Unknown), Reading::Unknown);
        assert_eq!(waste_percentage(Reading::Unknown, Reading::Known(10.0)), Reading::Unknown);
    }

    #[test]
    fn budget_remaining_falls_back_to_availability() {
        approx(
            budget_remaining_pct(Reading::Known(0.4), Reading::Known(0.0), target()),
            40.0,
        );
        // 0.05% errors used half of a 0.1% budget.
        approx(
            budget_remaining_pct(Reading::Unknown, Reading::Known(0.9995), target()),
            50.0,
        );
        assert_eq!(
            budget_remaining_pct(Reading::Unknown, Reading::Unknown, target()),
            Reading::Unknown
        );
    }

    #[test]
    fn cost_projection_chain() {
        let calc = Calculator::new(
            target(),
            vec![
                Derivation::Hourly {
                    rate: "cost_rate".into(),
                    output: "hourly_cost_usd".into(),
                },
                Derivation::Daily {
                    hourly: "hourly_cost_usd".into(),
                    output: "projected_daily_usd".into(),
                },
            ],
        );
        let mut row = EntityRow::new();
        row.insert("cost_rate", Reading::Known(0.002));
        let row = calc.apply(row);
        approx(row.get("hourly_cost_usd"), 7.2);
        approx(row.get("projected_daily_usd"), 172.8);
    }

    #[test]
    fn missing_input_only_affects_its_own_output() {
        let calc = Calculator::new(
            target(),
            vec![
                Derivation::BurnRate {
                    availability: "availability_1h".into(),
                    output: "burn_rate_1h".into(),
                },
                Derivation::Hourly {
                    rate: "cost_rate".into(),
                    output: "hourly_cost_usd".into(),
                },
            ],
        );
        let mut row = EntityRow::new();
        row.insert("availability_1h", Reading::Known(0.98));
        row.insert("cost_rate", Reading::Unknown);
        let row = calc.apply(row);
        approx(row.get("burn_rate_1h"), 20.0);
        assert_eq!(row.get("hourly_cost_usd"), Reading::Unknown);
        assert!(row.contains("hourly_cost_usd"));
    }
}
