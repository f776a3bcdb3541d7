//! Per-query fetch errors.

use thiserror::Error;

pub type FetchResult<T> = Result<T, FetchError>;

/// Why a single query produced no series.
///
/// These are always reported per query. The fetcher never turns one of
/// them into a batch-level failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Connection-level failure, or the backend answered with a 5xx.
    #[error("backend unavailable: {reason}")]
    BackendUnavailable { reason: String, status: Option<u16> },

    /// No answer within the query's timeout, or the backend gave up evaluating it.
    #[error("query timed out: {detail}")]
    QueryTimeout { detail: String },

    /// The backend refused the query. `message` is the backend's own text.
    #[error("query rejected by backend: {message}")]
    QueryRejected { message: String },

    /// The backend answered 2xx but the body was not a usable query result.
    #[error("malformed backend response: {0}")]
    MalformedResponse(String),
}

impl FetchError {
    /// Stable name of the error kind, used in reports and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::BackendUnavailable { .. } => "BackendUnavailable",
            FetchError::QueryTimeout { .. } => "QueryTimeout",
            FetchError::QueryRejected { .. } => "QueryRejected",
            FetchError::MalformedResponse(_) => "MalformedResponse",
        }
    }

    /// Timeouts and 5xx answers may be retried once. A refused connection
    /// means the backend is down; a rejected query is a caller bug.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::QueryTimeout { .. } => true,
            FetchError::BackendUnavailable { status, .. } => status.is_some_and(|s| s >= 500),
            FetchError::QueryRejected { .. } | FetchError::MalformedResponse(_) => false,
        }
    }

    /// The message surfaced to callers for this query.
    pub fn message(&self) -> String {
        match self {
            FetchError::QueryRejected { message } => message.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_policy_by_kind() {
        assert!(FetchError::QueryTimeout { detail: "15s".into() }.is_retryable());
        assert!(
            FetchError::BackendUnavailable { reason: "503".into(), status: Some(503) }.is_retryable()
        );
        assert!(
            !FetchError::BackendUnavailable { reason: "refused".into(), status: None }.is_retryable()
        );
        assert!(!FetchError::QueryRejected { message: "parse error".into() }.is_retryable());
        assert!(!FetchError::MalformedResponse("eof".into()).is_retryable());
    }

    #[test]
    fn rejected_message_is_verbatim() {
        let err = FetchError::QueryRejected {
            message: "1:5: parse error: unexpected \"}\"".into(),
        };
        assert_eq!(err.message(), "1:5: parse error: unexpected \"}\"");
        assert_eq!(err.kind(), "QueryRejected");
    }
}
