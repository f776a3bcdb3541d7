//! Prometheus HTTP API response decoding.
//!
//! Turns a `/api/v1/query` or `/api/v1/query_range` response into
//! `Series`, and maps error envelopes and status codes onto `FetchError`.
//!
//! ```text
//! {"status":"success","data":{"resultType":"vector","result":[{"metric":{..},"value":[ts,"v"]}]}}
//! {"status":"success","data":{"resultType":"matrix","result":[{"metric":{..},"values":[[ts,"v"],..]}]}}
//! {"status":"error","errorType":"bad_data","error":"parse error ..."}
//! ```

use std::collections::BTreeMap;

use serde::Deserialize;

use meterline_core::{Reading, Series, SeriesPoint};

use crate::error::{FetchError, FetchResult};

#[derive(Debug, Deserialize)]
struct Envelope {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default, rename = "errorType")]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
enum QueryData {
    Vector(Vec<VectorItem>),
    Matrix(Vec<MatrixItem>),
    Scalar(RawSample),
    String(RawSample),
}

#[derive(Debug, Deserialize)]
struct VectorItem {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    /// Absent or null when the backend has no sample for this series.
    #[serde(default)]
    value: Option<RawSample>,
}

#[derive(Debug, Deserialize)]
struct MatrixItem {
    #[serde(default)]
    metric: BTreeMap<String, String>,
    #[serde(default)]
    values: Vec<RawSample>,
}

/// `[<unix seconds>, "<value>"]`. A null value reads as unknown.
#[derive(Debug, Deserialize)]
struct RawSample(f64, Option<String>);

impl RawSample {
    fn point(&self) -> SeriesPoint {
        SeriesPoint {
            timestamp: self.0,
            value: self.1.as_deref().map_or(Reading::Unknown, Reading::parse),
        }
    }
}

fn missing_point() -> SeriesPoint {
    SeriesPoint {
        timestamp: 0.0,
        value: Reading::Unknown,
    }
}

/// Decode a backend response given its HTTP status and body.
pub fn decode_response(status: u16, body: &[u8]) -> FetchResult<Vec<Series>> {
    let envelope: Envelope = match serde_json::from_slice(body) {
        Ok(e) => e,
        Err(e) => return Err(undecodable(status, body, &e.to_string())),
    };

    if envelope.status == "success" && (200..300).contains(&status) {
        return match envelope.data {
            Some(data) => Ok(into_series(data)),
            None => Err(FetchError::MalformedResponse(
                "success response without data".to_string(),
            )),
        };
    }

    let message = envelope
        .error
        .unwrap_or_else(|| format!("backend returned HTTP {status}"));
    Err(classify_error(status, envelope.error_type.as_deref(), message))
}

fn into_series(data: QueryData) -> Vec<Series> {
    match data {
        QueryData::Vector(items) => items
            .into_iter()
            .map(|item| {
                let point = item.value.as_ref().map_or_else(missing_point, RawSample::point);
                Series::instant(item.metric, point)
            })
            .collect(),
        QueryData::Matrix(items) => items
            .into_iter()
            .map(|item| {
                let points = item.values.iter().map(RawSample::point).collect();
                Series::range(item.metric, points)
            })
            .collect(),
        QueryData::Scalar(sample) => vec![Series::instant(BTreeMap::new(), sample.point())],
        // A string result has no numeric value.
        QueryData::String(sample) => vec![Series::instant(
            BTreeMap::new(),
            SeriesPoint {
                timestamp: sample.0,
                value: Reading::Unknown,
            },
        )],
    }
}

fn classify_error(status: u16, error_type: Option<&str>, message: String) -> FetchError {
    match error_type {
        Some("bad_data") => FetchError::QueryRejected { message },
        Some("timeout") | Some("canceled") => FetchError::QueryTimeout { detail: message },
        _ => match status {
            400 | 422 => FetchError::QueryRejected { message },
            503 | 504 if message.contains("timeout") => FetchError::QueryTimeout { detail: message },
            s => FetchError::BackendUnavailable {
                reason: message,
                status: Some(s),
            },
        },
    }
}

/// A body that is not a Prometheus envelope: proxies and load balancers
/// answer 502/503 with HTML, which still means "backend unavailable".
fn undecodable(status: u16, body: &[u8], parse_error: &str) -> FetchError {
    if !(200..300).contains(&status) {
        let snippet: String = String::from_utf8_lossy(body).chars().take(200).collect();
        return FetchError::BackendUnavailable {
            reason: format!("HTTP {status}: {snippet}"),
            status: Some(status),
        };
    }
    FetchError::MalformedResponse(parse_error.to_string())
}
