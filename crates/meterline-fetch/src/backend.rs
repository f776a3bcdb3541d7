//! Metrics backend abstraction and the Prometheus HTTP client.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tracing::debug;

use meterline_core::config::BackendConfig;
use meterline_core::duration::promql_duration;
use meterline_core::{QueryMode, QuerySpec, Series};

use crate::error::{FetchError, FetchResult};
use crate::prometheus::decode_response;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Something that can answer a single query.
///
/// Implementations should honour `timeout`, but the fetcher enforces it
/// independently, so a backend that ignores it still cannot stall a batch.
pub trait MetricsBackend: Send + Sync {
    fn query<'a>(
        &'a self,
        spec: &'a QuerySpec,
        timeout: Duration,
    ) -> BoxFuture<'a, FetchResult<Vec<Series>>>;
}

/// Prometheus HTTP API client (`/api/v1/query`, `/api/v1/query_range`).
///
/// Uses a pooled hyper client, so repeated queries reuse connections.
pub struct PrometheusBackend {
    base_url: String,
    client: Client<HttpConnector, Empty<Bytes>>,
}

impl PrometheusBackend {
    pub fn new(base_url: &str) -> Self {
        let client = Client::builder(TokioExecutor::new()).build_http();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    pub fn from_config(config: &BackendConfig) -> Self {
        Self::new(&config.url)
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Build the GET URI for a query evaluated at `now` (Unix seconds).
    ///
    /// The backend's own evaluation timeout is set to ours so it stops
    /// work nobody is waiting for.
    pub fn request_uri(&self, spec: &QuerySpec, timeout: Duration, now: f64) -> String {
        let query = urlencoding::encode(&spec.query);
        let timeout = promql_duration(timeout);
        match spec.mode {
            QueryMode::Instant => format!(
                "{}/api/v1/query?query={query}&time={now:.3}&timeout={timeout}",
                self.base_url
            ),
            QueryMode::Range { window, step } => {
                let start = now - window.as_secs_f64();
                let step = step.as_secs().max(1);
                format!(
                    "{}/api/v1/query_range?query={query}&start={start:.3}&end={now:.3}&step={step}&timeout={timeout}",
                    self.base_url
                )
            }
        }
    }

    async fn execute(&self, uri: &str) -> FetchResult<Vec<Series>> {
        let uri: http::Uri = uri.parse().map_err(|e| FetchError::BackendUnavailable {
            reason: format!("invalid backend url: {e}"),
            status: None,
        })?;

        let req = http::Request::builder()
            .method("GET")
            .uri(uri)
            .header("accept", "application/json")
            .header("user-agent", concat!("meterline/", env!("CARGO_PKG_VERSION")))
            .body(Empty::<Bytes>::new())
            .map_err(|e| FetchError::BackendUnavailable {
                reason: format!("building request: {e}"),
                status: None,
            })?;

        let resp = self.client.request(req).await.map_err(|e| {
            let reason = describe_error(&e);
            debug!(error = %reason, "backend request failed");
            FetchError::BackendUnavailable {
                reason,
                status: None,
            }
        })?;

        let status = resp.status().as_u16();
        let body = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| FetchError::BackendUnavailable {
                reason: format!("reading response body: {e}"),
                status: Some(status),
            })?
            .to_bytes();

        decode_response(status, &body)
    }
}

impl MetricsBackend for PrometheusBackend {
    fn query<'a>(
        &'a self,
        spec: &'a QuerySpec,
        timeout: Duration,
    ) -> BoxFuture<'a, FetchResult<Vec<Series>>> {
        Box::pin(async move {
            let uri = self.request_uri(spec, timeout, epoch_secs_f64());
            debug!(query = %spec.name, %uri, "querying backend");
            match tokio::time::timeout(timeout, self.execute(&uri)).await {
                Ok(result) => result,
                Err(_) => Err(FetchError::QueryTimeout {
                    detail: format!("no response within {}", promql_duration(timeout)),
                }),
            }
        })
    }
}

/// Flatten an error and its sources into one line.
fn describe_error(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(s) = source {
        out.push_str(": ");
        out.push_str(&s.to_string());
        source = s.source();
    }
    out
}

fn epoch_secs_f64() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}
