//! Request-level engine errors.

use std::time::Duration;

use thiserror::Error;

use meterline_fetch::FetchError;

/// Failures that abort a whole analysis.
///
/// A single failed query is not one of these: it is absorbed into the
/// report as unknown fields plus a `query_errors` entry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Every query of the plan failed. Holds (query name, error) per query.
    #[error("all {} queries failed; first error: {}", .0.len(), first_error(.0))]
    AllQueriesFailed(Vec<(String, FetchError)>),

    #[error("invalid entity filter {filter:?}: {reason}")]
    InvalidFilter { filter: String, reason: String },

    #[error("SLO target must be strictly between 0 and 1, got {0}")]
    InvalidSloTarget(f64),

    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: String, reason: String },

    #[error("analysis plan has no queries")]
    NoQueries,

    #[error("fetch phase exceeded the request deadline of {}ms", .0.as_millis())]
    DeadlineExceeded(Duration),

    #[error("unknown analysis: {0}")]
    UnknownAnalysis(String),
}

fn first_error(errors: &[(String, FetchError)]) -> String {
    errors
        .first()
        .map(|(name, err)| format!("{name}: {}", err.message()))
        .unwrap_or_default()
}

impl EngineError {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::AllQueriesFailed(_) => "AllQueriesFailed",
            EngineError::InvalidFilter { .. } => "InvalidFilter",
            EngineError::InvalidSloTarget(_) => "InvalidSloTarget",
            EngineError::InvalidParameter { .. } => "InvalidParameter",
            EngineError::NoQueries => "NoQueries",
            EngineError::DeadlineExceeded(_) => "DeadlineExceeded",
            EngineError::UnknownAnalysis(_) => "UnknownAnalysis",
        }
    }

    /// True when every query failed because the backend refused it, which
    /// points at the request (or a template) rather than the backend.
    pub fn all_rejected(&self) -> bool {
        match self {
            EngineError::AllQueriesFailed(errors) => {
                !errors.is_empty()
                    && errors
                        .iter()
                        .all(|(_, e)| matches!(e, FetchError::QueryRejected { .. }))
            }
            _ => false,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
