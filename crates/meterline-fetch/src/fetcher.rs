//! Concurrent query execution with per-query timeouts and a single retry.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tracing::{debug, warn};

use meterline_core::config::BackendConfig;
use meterline_core::{QuerySpec, Series};

use crate::backend::MetricsBackend;
use crate::error::{FetchError, FetchResult};
use crate::stats::FetchStats;

/// The result for one query of a batch.
pub type QueryOutcome = FetchResult<Vec<Series>>;

/// Timeouts applied to each query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchPolicy {
    pub instant_timeout: Duration,
    pub range_timeout: Duration,
    /// Timeout of the one retry attempt after a transient failure.
    pub retry_timeout: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            instant_timeout: Duration::from_secs(15),
            range_timeout: Duration::from_secs(30),
            retry_timeout: Duration::from_secs(5),
        }
    }
}

impl FetchPolicy {
    pub fn from_config(config: &BackendConfig) -> Self {
        Self {
            instant_timeout: config.instant_timeout(),
            range_timeout: config.range_timeout(),
            retry_timeout: config.retry_timeout(),
        }
    }

    pub fn timeout_for(&self, spec: &QuerySpec) -> Duration {
        if spec.is_range() {
            self.range_timeout
        } else {
            self.instant_timeout
        }
    }
}

/// Runs batches of queries against one backend.
#[derive(Clone)]
pub struct Fetcher {
    backend: Arc<dyn MetricsBackend>,
    policy: FetchPolicy,
    stats: Arc<FetchStats>,
}

impl Fetcher {
    pub fn new(backend: Arc<dyn MetricsBackend>, policy: FetchPolicy) -> Self {
        Self {
            backend,
            policy,
            stats: Arc::new(FetchStats::new()),
        }
    }

    pub fn policy(&self) -> FetchPolicy {
        self.policy
    }

    pub fn stats(&self) -> Arc<FetchStats> {
        Arc::clone(&self.stats)
    }

    /// Run every query concurrently. The output has exactly one outcome
    /// per input query, in input order.
    pub async fn fetch_all(&self, specs: &[QuerySpec]) -> Vec<QueryOutcome> {
        debug!(queries = specs.len(), "fetching batch");
        join_all(specs.iter().map(|spec| self.fetch_one(spec))).await
    }

    /// Run one query. Transient failures are retried once.
    pub async fn fetch_one(&self, spec: &QuerySpec) -> QueryOutcome {
        self.stats.record_query();

        let first = self.attempt(spec, self.policy.timeout_for(spec)).await;
        let result = match first {
            Err(err) if err.is_retryable() => {
                warn!(query = %spec.name, error = %err, "transient query failure, retrying once");
                self.stats.record_retry();
                self.attempt(spec, self.policy.retry_timeout).await
            }
            other => other,
        };

        match &result {
            Ok(series) => debug!(query = %spec.name, series = series.len(), "query succeeded"),
            Err(err) => {
                warn!(query = %spec.name, kind = err.kind(), error = %err, "query failed");
                self.stats.record_failure(err);
            }
        }
        result
    }

    async fn attempt(&self, spec: &QuerySpec, timeout: Duration) -> QueryOutcome {
        match tokio::time::timeout(timeout, self.backend.query(spec, timeout)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::QueryTimeout {
                detail: format!("no response within {}ms", timeout.as_millis()),
            }),
        }
    }
}
