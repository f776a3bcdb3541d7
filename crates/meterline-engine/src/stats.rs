//! Engine self-metrics and their Prometheus text exposition.

use std::sync::atomic::{AtomicU64, Ordering};

use meterline_core::Severity;
use meterline_fetch::FetchStats;

use crate::analysis::AnalysisKind;
use crate::report::Report;

#[derive(Debug, Default)]
struct AnalysisCounters {
    runs: AtomicU64,
    failures: AtomicU64,
    partial: AtomicU64,
}

/// Counters per analysis kind plus findings per reported severity.
#[derive(Debug, Default)]
pub struct EngineStats {
    per_analysis: [AnalysisCounters; 5],
    /// Indexed by `Severity as usize`.
    findings: [AtomicU64; 3],
}

fn slot(kind: AnalysisKind) -> usize {
    match kind {
        AnalysisKind::SloStatus => 0,
        AnalysisKind::Traffic => 1,
        AnalysisKind::CostReport => 2,
        AnalysisKind::AgentCost => 3,
        AnalysisKind::BackendStatus => 4,
    }
}

impl EngineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_report(&self, kind: AnalysisKind, report: &Report) {
        let counters = &self.per_analysis[slot(kind)];
        counters.runs.fetch_add(1, Ordering::Relaxed);
        if report.partial {
            counters.partial.fetch_add(1, Ordering::Relaxed);
        }
        for entity in &report.entities {
            self.findings[entity.severity as usize].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_failure(&self, kind: AnalysisKind) {
        let counters = &self.per_analysis[slot(kind)];
        counters.runs.fetch_add(1, Ordering::Relaxed);
        counters.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn runs(&self, kind: AnalysisKind) -> u64 {
        self.per_analysis[slot(kind)].runs.load(Ordering::Relaxed)
    }

    pub fn failures(&self, kind: AnalysisKind) -> u64 {
        self.per_analysis[slot(kind)].failures.load(Ordering::Relaxed)
    }

    pub fn findings(&self, severity: Severity) -> u64 {
        self.findings[severity as usize].load(Ordering::Relaxed)
    }

    /// Render engine and fetcher counters in Prometheus text format.
    pub fn render_prometheus(&self, fetch: &FetchStats) -> String {
        let mut out = String::new();

        out.push_str("# HELP meterline_analyses_total Analyses run, by kind.\n");
        out.push_str("# TYPE meterline_analyses_total counter\n");
        for kind in AnalysisKind::ALL {
            out.push_str(&format!(
                "meterline_analyses_total{{analysis=\"{kind}\"}} {}\n",
                self.runs(kind)
            ));
        }

        out.push_str("# HELP meterline_analysis_failures_total Analyses that ended in a request-level error.\n");
        out.push_str("# TYPE meterline_analysis_failures_total counter\n");
        for kind in AnalysisKind::ALL {
            out.push_str(&format!(
                "meterline_analysis_failures_total{{analysis=\"{kind}\"}} {}\n",
                self.failures(kind)
            ));
        }

        out.push_str("# HELP meterline_partial_reports_total Reports produced with some queries failed.\n");
        out.push_str("# TYPE meterline_partial_reports_total counter\n");
        for kind in AnalysisKind::ALL {
            out.push_str(&format!(
                "meterline_partial_reports_total{{analysis=\"{kind}\"}} {}\n",
                self.per_analysis[slot(kind)].partial.load(Ordering::Relaxed)
            ));
        }

        out.push_str("# HELP meterline_findings_total Reported findings, by severity.\n");
        out.push_str("# TYPE meterline_findings_total counter\n");
        for severity in [Severity::Critical, Severity::Warning, Severity::Ok] {
            out.push_str(&format!(
                "meterline_findings_total{{severity=\"{severity}\"}} {}\n",
                self.findings(severity)
            ));
        }

        out.push_str(&fetch.render_prometheus());
        out
    }
}
