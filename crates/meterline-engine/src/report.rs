//! Report assembly: ordering, summary counts, and the serialized shape.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use meterline_core::{Reading, Severity};
use meterline_fetch::FetchError;

use crate::classify::Finding;

/// Decimal places kept for every numeric field.
pub const FIELD_PRECISION: i32 = 4;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub critical: usize,
    pub warning: usize,
    pub ok: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityReport {
    pub key: String,
    pub severity: Severity,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_severity: Option<Severity>,
    pub flags: Vec<String>,
    pub reasons: Vec<String>,
    pub fields: BTreeMap<String, Reading>,
}

/// A query that failed while others succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryErrorReport {
    pub query: String,
    pub kind: String,
    /// The backend's own text for rejected queries.
    pub message: String,
}

impl QueryErrorReport {
    pub fn new(query: &str, err: &FetchError) -> Self {
        Self {
            query: query.to_string(),
            kind: err.kind().to_string(),
            message: err.message(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub timestamp: String,
    pub analysis: String,
    /// Some queries failed; their fields are unknown.
    pub partial: bool,
    pub summary: Summary,
    pub entities: Vec<EntityReport>,
    pub query_errors: Vec<QueryErrorReport>,
    pub skipped_series: usize,
}

impl Report {
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn entity(&self, key: &str) -> Option<&EntityReport> {
        self.entities.iter().find(|e| e.key == key)
    }
}

/// Turns findings into a `Report`. Total over any input, including none.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportAssembler;

impl ReportAssembler {
    pub fn assemble(
        &self,
        analysis: &str,
        generated_at: DateTime<Utc>,
        mut findings: Vec<Finding>,
        query_errors: Vec<QueryErrorReport>,
        skipped_series: usize,
    ) -> Report {
        // Most severe first, then by key.
        findings.sort_by(|a, b| b.severity.cmp(&a.severity).then_with(|| a.key.cmp(&b.key)));

        let mut summary = Summary {
            total: findings.len(),
            ..Summary::default()
        };
        for f in &findings {
            match f.severity {
                Severity::Critical => summary.critical += 1,
                Severity::Warning => summary.warning += 1,
                Severity::Ok => summary.ok += 1,
            }
        }

        let entities = findings
            .into_iter()
            .map(|f| EntityReport {
                key: f.key.to_string(),
                severity: f.severity,
                raw_severity: f.raw_severity,
                flags: f.flags,
                reasons: f.reasons,
                fields: f
                    .row
                    .fields()
                    .iter()
                    .map(|(k, v)| (k.clone(), v.rounded(FIELD_PRECISION)))
                    .collect(),
            })
            .collect();

        Report {
            timestamp: generated_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            analysis: analysis.to_string(),
            partial: !query_errors.is_empty(),
            summary,
            entities,
            query_errors,
            skipped_series,
        }
    }
}
