//! Adapter error types and their mapping onto the failure taxonomy.

use reel_models::{Failure, FailureKind};
use thiserror::Error;

/// Result type for adapter calls.
pub type AdapterResult<T> = Result<T, AdapterError>;

/// Longest response body excerpt kept in an error message.
const MAX_BODY_EXCERPT: usize = 500;

/// Body markers for a billing-period quota (as opposed to a rate limit).
const QUOTA_MARKERS: &[&str] = &[
    "quota_exceeded",
    "quotaexceeded",
    "insufficient_quota",
    "uploadlimitexceeded",
    "dailylimitexceeded",
];

/// Body markers for a content-policy refusal.
const CONTENT_POLICY_MARKERS: &[&str] = &["content_policy", "content_filter", "safety_system"];

/// Prefix of a [`AdapterError::LengthOutOfRange`] message for short output.
pub const TOO_SHORT: &str = "too short";

/// Prefix of a [`AdapterError::LengthOutOfRange`] message for long output.
pub const TOO_LONG: &str = "too long";

/// Errors returned by external service adapters.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Missing credential: {0}")]
    MissingCredential(String),

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Quota exhausted: {0}")]
    QuotaExhausted(String),

    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after_ms: Option<u64>,
    },

    #[error("Server error {0}: {1}")]
    ServerError(u16, String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Request rejected ({0}): {1}")]
    InvalidRequest(u16, String),

    #[error("Content policy rejection: {0}")]
    ContentPolicy(String),

    #[error("Output {direction}: {actual} words (expected {min}-{max})")]
    LengthOutOfRange {
        direction: &'static str,
        actual: usize,
        min: u32,
        max: u32,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Empty result: {0}")]
    EmptyResult(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AdapterError {
    pub fn invalid_response(msg: impl Into<String>) -> Self {
        Self::InvalidResponse(msg.into())
    }

    pub fn missing_credential(name: impl Into<String>) -> Self {
        Self::MissingCredential(name.into())
    }

    /// Classify a non-success HTTP response.
    pub fn from_http_status(status: u16, body: impl Into<String>) -> Self {
        let body = excerpt(body.into());
        let lower = body.to_lowercase();

        if QUOTA_MARKERS.iter().any(|m| lower.contains(m)) {
            return Self::QuotaExhausted(body);
        }

        match status {
            401 | 403 => Self::InvalidCredential(body),
            408 => Self::Timeout(body),
            429 => Self::RateLimited {
                message: body,
                retry_after_ms: None,
            },
            400 | 422 if CONTENT_POLICY_MARKERS.iter().any(|m| lower.contains(m)) => {
                Self::ContentPolicy(body)
            }
            500..=599 => Self::ServerError(status, body),
            _ => Self::InvalidRequest(status, body),
        }
    }

    /// Attach a Retry-After hint to a rate-limit error.
    pub fn with_retry_after(self, retry_after_ms: Option<u64>) -> Self {
        match self {
            Self::RateLimited { message, .. } => Self::RateLimited {
                message,
                retry_after_ms,
            },
            other => other,
        }
    }

    pub fn retry_after_ms(&self) -> Option<u64> {
        match self {
            Self::RateLimited { retry_after_ms, .. } => *retry_after_ms,
            _ => None,
        }
    }

    /// Failure kind for this error.
    pub fn kind(&self) -> FailureKind {
        match self {
            AdapterError::MissingCredential(_) | AdapterError::InvalidCredential(_) => {
                FailureKind::InvalidCredential
            }
            AdapterError::QuotaExhausted(_) => FailureKind::QuotaExhausted,
            AdapterError::RateLimited { .. }
            | AdapterError::ServerError(..)
            | AdapterError::Timeout(_) => FailureKind::Transient,
            AdapterError::Network(e) if e.is_decode() => FailureKind::MalformedResponse,
            AdapterError::Network(_) => FailureKind::Transient,
            AdapterError::InvalidRequest(..) => FailureKind::InvalidRequest,
            AdapterError::ContentPolicy(_) => FailureKind::ContentPolicyRejection,
            AdapterError::LengthOutOfRange { .. } => FailureKind::LengthOutOfRange,
            AdapterError::InvalidResponse(_)
            | AdapterError::EmptyResult(_)
            | AdapterError::Json(_) => FailureKind::MalformedResponse,
            AdapterError::Io(_) => FailureKind::Internal,
        }
    }

    /// Check if error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}

impl From<AdapterError> for Failure {
    fn from(err: AdapterError) -> Self {
        let retry_after_ms = err.retry_after_ms();
        Failure::new(err.kind(), err.to_string()).with_retry_after(retry_after_ms)
    }
}

fn excerpt(mut body: String) -> String {
    if body.len() > MAX_BODY_EXCERPT {
        let mut cut = MAX_BODY_EXCERPT;
        while !body.is_char_boundary(cut) {
            cut -= 1;
        }
        body.truncate(cut);
        body.push_str("...");
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_from_http_status_429() {
        let err = AdapterError::from_http_status(429, "slow down");
        assert!(matches!(err, AdapterError::RateLimited { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_error_from_http_status_5xx() {
        for status in [500, 502, 503] {
            let err = AdapterError::from_http_status(status, "unavailable");
            assert!(matches!(err, AdapterError::ServerError(s, _) if s == status));
            assert_eq!(err.kind(), FailureKind::Transient);
        }
    }

    #[test]
    fn test_error_from_http_status_auth() {
        let err = AdapterError::from_http_status(401, "invalid api key");
        assert_eq!(err.kind(), FailureKind::InvalidCredential);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_quota_markers_win_over_status() {
        let err = AdapterError::from_http_status(
            401,
            r#"{"detail":{"status":"quota_exceeded","message":"This request exceeds your quota"}}"#,
        );
        assert_eq!(err.kind(), FailureKind::QuotaExhausted);

        let err = AdapterError::from_http_status(403, r#"{"error":{"errors":[{"reason":"quotaExceeded"}]}}"#);
        assert_eq!(err.kind(), FailureKind::QuotaExhausted);

        let err = AdapterError::from_http_status(429, r#"{"error":{"code":"insufficient_quota"}}"#);
        assert_eq!(err.kind(), FailureKind::QuotaExhausted);
    }

    #[test]
    fn test_content_policy_detected() {
        let err = AdapterError::from_http_status(400, r#"{"error":{"code":"content_policy_violation"}}"#);
        assert_eq!(err.kind(), FailureKind::ContentPolicyRejection);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_bad_request_is_not_retryable() {
        let err = AdapterError::from_http_status(404, "voice_not_found");
        assert_eq!(err.kind(), FailureKind::InvalidRequest);
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_retry_after_only_on_rate_limit() {
        let err = AdapterError::from_http_status(429, "").with_retry_after(Some(2000));
        assert_eq!(err.retry_after_ms(), Some(2000));
        let err = AdapterError::from_http_status(500, "").with_retry_after(Some(2000));
        assert_eq!(err.retry_after_ms(), None);
    }

    #[test]
    fn test_into_failure_keeps_kind_and_message() {
        let failure: Failure = AdapterError::LengthOutOfRange {
            direction: TOO_SHORT,
            actual: 300,
            min: 1500,
            max: 2500,
        }
        .into();
        assert_eq!(failure.kind, FailureKind::LengthOutOfRange);
        assert!(failure.retryable);
        assert!(failure.message.contains("too short"));
    }

    #[test]
    fn test_into_failure_carries_retry_after() {
        let failure: Failure = AdapterError::from_http_status(429, "slow down")
            .with_retry_after(Some(7000))
            .into();
        assert_eq!(failure.kind, FailureKind::Transient);
        assert_eq!(failure.retry_after_ms, Some(7000));

        let failure: Failure = AdapterError::from_http_status(503, "").into();
        assert_eq!(failure.retry_after_ms, None);
    }

    #[test]
    fn test_long_bodies_are_truncated() {
        let err = AdapterError::from_http_status(500, "x".repeat(2000));
        assert!(err.to_string().len() < 600);
    }
}
