//! Query and series types shared by the fetcher and the engine.
//!
//! A `Series` is produced once by the fetcher and read-only afterwards.
//! Sample values are `Reading`s so a missing or non-numeric sample stays
//! distinguishable from zero all the way into the report.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Serialize, Serializer};

/// A numeric value that may be unknown.
///
/// The backend may return `NaN`, `+Inf`, a non-numeric string, or no
/// sample at all. All of these are `Unknown`; none of them become zero.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Reading {
    Known(f64),
    #[default]
    Unknown,
}

impl Reading {
    /// Wrap a float, mapping non-finite values to `Unknown`.
    pub fn from_f64(value: f64) -> Self {
        if value.is_finite() {
            Reading::Known(value)
        } else {
            Reading::Unknown
        }
    }

    /// Parse a backend sample string ("0.25", "NaN", "+Inf").
    pub fn parse(raw: &str) -> Self {
        raw.trim()
            .parse::<f64>()
            .map(Reading::from_f64)
            .unwrap_or(Reading::Unknown)
    }

    pub fn value(self) -> Option<f64> {
        match self {
            Reading::Known(v) => Some(v),
            Reading::Unknown => None,
        }
    }

    pub fn is_known(self) -> bool {
        matches!(self, Reading::Known(_))
    }

    /// Apply `f` to a known value. The result is re-checked for finiteness.
    pub fn map(self, f: impl FnOnce(f64) -> f64) -> Self {
        match self {
            Reading::Known(v) => Reading::from_f64(f(v)),
            Reading::Unknown => Reading::Unknown,
        }
    }

    /// Sum two readings. Unknown on either side makes the sum unknown.
    pub fn add(self, other: Reading) -> Self {
        match (self, other) {
            (Reading::Known(a), Reading::Known(b)) => Reading::from_f64(a + b),
            _ => Reading::Unknown,
        }
    }

    /// Round to a fixed number of decimal places.
    pub fn rounded(self, places: i32) -> Self {
        let scale = 10f64.powi(places);
        self.map(|v| {
            let r = (v * scale).round() / scale;
            // Normalise -0.0 so serialized output is stable.
            if r == 0.0 { 0.0 } else { r }
        })
    }
}

impl From<Option<f64>> for Reading {
    fn from(value: Option<f64>) -> Self {
        value.map(Reading::from_f64).unwrap_or(Reading::Unknown)
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reading::Known(v) => write!(f, "{v}"),
            Reading::Unknown => f.write_str("unknown"),
        }
    }
}

impl Serialize for Reading {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Reading::Known(v) => serializer.serialize_f64(*v),
            Reading::Unknown => serializer.serialize_str("unknown"),
        }
    }
}

// ── Queries ────────────────────────────────────────────────────────

/// How a query is executed against the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryMode {
    /// Single value per series at evaluation time.
    Instant,
    /// Samples over `window` ending now, one every `step`.
    Range { window: Duration, step: Duration },
}

/// One query to run against the metrics backend.
///
/// `name` identifies the query in logs and in the report's error list;
/// the backend only sees `query` and `mode`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySpec {
    pub name: String,
    pub query: String,
    pub mode: QueryMode,
}

impl QuerySpec {
    pub fn instant(name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
            mode: QueryMode::Instant,
        }
    }

    pub fn range(
        name: impl Into<String>,
        query: impl Into<String>,
        window: Duration,
        step: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            query: query.into(),
            mode: QueryMode::Range { window, step },
        }
    }

    pub fn is_range(&self) -> bool {
        matches!(self.mode, QueryMode::Range { .. })
    }
}

// ── Series ─────────────────────────────────────────────────────────

/// A (timestamp, value) pair. Timestamps are Unix seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SeriesPoint {
    pub timestamp: f64,
    pub value: Reading,
}

/// The samples carried by a series.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Samples {
    Instant(SeriesPoint),
    /// Ordered by timestamp, oldest first.
    Range(Vec<SeriesPoint>),
}

/// One labeled metric stream returned by the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Series {
    pub labels: BTreeMap<String, String>,
    pub samples: Samples,
}

impl Series {
    pub fn instant(labels: BTreeMap<String, String>, point: SeriesPoint) -> Self {
        Self {
            labels,
            samples: Samples::Instant(point),
        }
    }

    pub fn range(labels: BTreeMap<String, String>, points: Vec<SeriesPoint>) -> Self {
        Self {
            labels,
            samples: Samples::Range(points),
        }
    }

    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }

    /// The most recent point, if any.
    pub fn latest(&self) -> Option<SeriesPoint> {
        match &self.samples {
            Samples::Instant(p) => Some(*p),
            Samples::Range(points) => points.last().copied(),
        }
    }

    pub fn points(&self) -> &[SeriesPoint] {
        match &self.samples {
            Samples::Instant(p) => std::slice::from_ref(p),
            Samples::Range(points) => points,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_numeric_samples() {
        assert_eq!(Reading::parse("0.25"), Reading::Known(0.25));
        assert_eq!(Reading::parse(" 12 "), Reading::Known(12.0));
    }

    #[test]
    fn parse_non_numeric_is_unknown() {
        assert_eq!(Reading::parse("NaN"), Reading::Unknown);
        assert_eq!(Reading::parse("+Inf"), Reading::Unknown);
        assert_eq!(Reading::parse("-Inf"), Reading::Unknown);
        assert_eq!(Reading::parse(""), Reading::Unknown);
        assert_eq!(Reading::parse("abc"), Reading::Unknown);
    }

    #[test]
    fn unknown_propagates_through_add() {
        assert_eq!(Reading::Known(1.0).add(Reading::Known(2.0)), Reading::Known(3.0));
        assert_eq!(Reading::Known(1.0).add(Reading::Unknown), Reading::Unknown);
        assert_eq!(Reading::Unknown.add(Reading::Known(1.0)), Reading::Unknown);
    }

    #[test]
    fn map_rejects_infinite_results() {
        assert_eq!(Reading::Known(1.0).map(|v| v / 0.0), Reading::Unknown);
    }

    #[test]
    fn rounding_is_stable() {
        assert_eq!(Reading::Known(1.23456).rounded(4), Reading::Known(1.2346));
        assert_eq!(Reading::Known(-0.00001).rounded(4), Reading::Known(0.0));
        assert_eq!(Reading::Unknown.rounded(4), Reading::Unknown);
    }

    #[test]
    fn reading_serializes_unknown_as_string() {
        let json = serde_json::to_string(&vec![Reading::Known(1.5), Reading::Unknown]).unwrap();
        assert_eq!(json, r#"[1.5,"unknown"]"#);
    }

    #[test]
    fn latest_point_of_range_series() {
        let series = Series::range(
            BTreeMap::new(),
            vec![
                SeriesPoint { timestamp: 1.0, value: Reading::Known(1.0) },
                SeriesPoint { timestamp: 2.0, value: Reading::Known(2.0) },
            ],
        );
        assert_eq!(series.latest().unwrap().value, Reading::Known(2.0));
        assert_eq!(series.points().len(), 2);
    }
}
