//! Observability stack health checks.
//!
//! Each configured component (Prometheus, Grafana, Loki, Tempo, the OTel
//! collector, Alertmanager) gets one GET against its health path. The
//! requests run concurrently and share a single timeout.

use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::future::join_all;
use serde::Serialize;
use tracing::debug;

use meterline_core::config::StackConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    /// Answered with a status below 400.
    Healthy,
    /// Answered with 400 or above.
    Degraded,
    /// Connection or handshake failed.
    Unreachable,
    /// No answer within the stack timeout.
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComponentHealth {
    pub service: String,
    pub url: String,
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StackHealth {
    pub timestamp: String,
    /// "healthy" when every checked component is healthy, else "degraded".
    pub overall: String,
    pub healthy_count: usize,
    pub degraded_count: usize,
    pub components: Vec<ComponentHealth>,
    pub recommendations: Vec<String>,
}

/// Check every configured component concurrently.
pub async fn check_stack(config: &StackConfig) -> StackHealth {
    let timeout = config.timeout();
    let checks = config
        .endpoints()
        .into_iter()
        .map(|(name, url, path)| check_component(name, url, path, timeout));
    let components = join_all(checks).await;

    let healthy_count = components
        .iter()
        .filter(|c| c.status == ComponentStatus::Healthy)
        .count();
    let degraded: Vec<&str> = components
        .iter()
        .filter(|c| c.status != ComponentStatus::Healthy)
        .map(|c| c.service.as_str())
        .collect();

    let mut recommendations = Vec::new();
    if !degraded.is_empty() {
        recommendations.push(format!("Investigate: {}", degraded.join(", ")));
    }

    StackHealth {
        timestamp: Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
        overall: if degraded.is_empty() { "healthy" } else { "degraded" }.to_string(),
        healthy_count,
        degraded_count: degraded.len(),
        components,
        recommendations,
    }
}

async fn check_component(
    name: &str,
    base_url: String,
    path: &str,
    timeout: Duration,
) -> ComponentHealth {
    let mut health = ComponentHealth {
        service: name.to_string(),
        url: base_url.clone(),
        status: ComponentStatus::Unreachable,
        http_status: None,
        latency_ms: None,
        error: None,
    };

    let started = Instant::now();
    match tokio::time::timeout(timeout, http_get_status(&base_url, path)).await {
        Ok(Ok(code)) => {
            health.status = if code < 400 {
                ComponentStatus::Healthy
            } else {
                ComponentStatus::Degraded
            };
            health.http_status = Some(code);
            health.latency_ms = Some(started.elapsed().as_millis() as u64);
        }
        Ok(Err(e)) => {
            debug!(service = name, error = %e, "stack health check failed");
            health.error = Some(e);
        }
        Err(_) => {
            debug!(service = name, "stack health check timed out");
            health.status = ComponentStatus::Timeout;
            health.error = Some(format!("timed out after {}ms", timeout.as_millis()));
        }
    }
    health
}

/// One plain-HTTP GET over a fresh connection; returns the status code.
async fn http_get_status(base_url: &str, path: &str) -> Result<u16, String> {
    let base: http::Uri = base_url
        .parse()
        .map_err(|e| format!("invalid url {base_url:?}: {e}"))?;
    let authority = base
        .authority()
        .ok_or_else(|| format!("url {base_url:?} has no host"))?;
    let host = authority.host().to_string();
    let port = authority.port_u16().unwrap_or(80);
    let prefix = base.path().trim_end_matches('/');
    let uri = format!("http://{authority}{prefix}{path}");

    let stream = tokio::net::TcpStream::connect((host.as_str(), port))
        .await
        .map_err(|e| format!("connection failed: {e}"))?;

    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(|e| format!("handshake failed: {e}"))?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let req = http::Request::builder()
        .method("GET")
        .uri(&uri)
        .header("host", authority.as_str())
        .header("user-agent", concat!("meterline/", env!("CARGO_PKG_VERSION")))
        .body(http_body_util::Empty::<bytes::Bytes>::new())
        .map_err(|e| format!("building request: {e}"))?;

    let resp = sender
        .send_request(req)
        .await
        .map_err(|e| format!("request failed: {e}"))?;
    Ok(resp.status().as_u16())
}
