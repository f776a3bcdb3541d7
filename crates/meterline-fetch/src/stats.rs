//! Fetcher self-metrics.
//!
//! Lock-free counters shared by every fetch, rendered in the Prometheus
//! text exposition format by the `/metrics` endpoint.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::FetchError;

#[derive(Debug, Default)]
pub struct FetchStats {
    queries_total: AtomicU64,
    retries_total: AtomicU64,
    backend_unavailable: AtomicU64,
    query_timeout: AtomicU64,
    query_rejected: AtomicU64,
    malformed_response: AtomicU64,
}

/// Point-in-time copy of the counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FetchStatsSnapshot {
    pub queries_total: u64,
    pub retries_total: u64,
    pub backend_unavailable: u64,
    pub query_timeout: u64,
    pub query_rejected: u64,
    pub malformed_response: u64,
}

impl FetchStatsSnapshot {
    pub fn failures_total(&self) -> u64 {
        self.backend_unavailable + self.query_timeout + self.query_rejected + self.malformed_response
    }
}

impl FetchStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_query(&self) {
        self.queries_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_retry(&self) {
        self.retries_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a final (post-retry) failure by kind.
    pub fn record_failure(&self, err: &FetchError) {
        let counter = match err {
            FetchError::BackendUnavailable { .. } => &self.backend_unavailable,
            FetchError::QueryTimeout { .. } => &self.query_timeout,
            FetchError::QueryRejected { .. } => &self.query_rejected,
            FetchError::MalformedResponse(_) => &self.malformed_response,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> FetchStatsSnapshot {
        FetchStatsSnapshot {
            queries_total: self.queries_total.load(Ordering::Relaxed),
            retries_total: self.retries_total.load(Ordering::Relaxed),
            backend_unavailable: self.backend_unavailable.load(Ordering::Relaxed),
            query_timeout: self.query_timeout.load(Ordering::Relaxed),
            query_rejected: self.query_rejected.load(Ordering::Relaxed),
            malformed_response: self.malformed_response.load(Ordering::Relaxed),
        }
    }

    /// Render the counters in Prometheus text format.
    pub fn render_prometheus(&self) -> String {
        let s = self.snapshot();
        let mut out = String::new();

        out.push_str("# HELP meterline_backend_queries_total Queries sent to the metrics backend.\n");
        out.push_str("# TYPE meterline_backend_queries_total counter\n");
        out.push_str(&format!("meterline_backend_queries_total {}\n", s.queries_total));

        out.push_str("# HELP meterline_backend_retries_total Queries retried after a transient failure.\n");
        out.push_str("# TYPE meterline_backend_retries_total counter\n");
        out.push_str(&format!("meterline_backend_retries_total {}\n", s.retries_total));

        out.push_str("# HELP meterline_backend_query_failures_total Queries that failed after retry, by kind.\n");
        out.push_str("# TYPE meterline_backend_query_failures_total counter\n");
        for (kind, value) in [
            ("BackendUnavailable", s.backend_unavailable),
            ("QueryTimeout", s.query_timeout),
            ("QueryRejected", s.query_rejected),
            ("MalformedResponse", s.malformed_response),
        ] {
            out.push_str(&format!(
                "meterline_backend_query_failures_total{{kind=\"{kind}\"}} {value}\n"
            ));
        }

        out
    }
}
