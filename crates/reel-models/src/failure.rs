//! Failure taxonomy shared by every stage of a run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::StageName;

/// Classification of a failed adapter call or local step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network error, timeout, HTTP 429 or 5xx
    Transient,
    /// Quota exhausted for the billing period; retried on a later trigger only
    QuotaExhausted,
    /// Missing, invalid or expired credential; operator action needed
    InvalidCredential,
    /// The service rejected the request itself (HTTP 400/404/422)
    InvalidRequest,
    /// The service answered with data that failed local validation
    MalformedResponse,
    /// Content-policy refusal; retried once with adjusted input
    ContentPolicyRejection,
    /// Generated text far outside the requested length; retried with adjusted input
    LengthOutOfRange,
    /// Local I/O or compositor failure
    Internal,
    /// Interrupted run discarded by the resume policy
    Abandoned,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Transient => "transient",
            FailureKind::QuotaExhausted => "quota_exhausted",
            FailureKind::InvalidCredential => "invalid_credential",
            FailureKind::InvalidRequest => "invalid_request",
            FailureKind::MalformedResponse => "malformed_response",
            FailureKind::ContentPolicyRejection => "content_policy_rejection",
            FailureKind::LengthOutOfRange => "length_out_of_range",
            FailureKind::Internal => "internal",
            FailureKind::Abandoned => "abandoned",
        }
    }

    /// Whether a stage may re-invoke the adapter after this kind of failure.
    ///
    /// `ContentPolicyRejection` is only retryable once per stage; the stage
    /// wrapper enforces that limit.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::Transient
                | FailureKind::ContentPolicyRejection
                | FailureKind::LengthOutOfRange
        )
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single failed outcome: kind, message and whether it may be retried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    pub retryable: bool,
    /// Server-requested wait before the next attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

impl Failure {
    /// Create a failure whose retryability follows its kind.
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable: kind.is_retryable(),
            retry_after_ms: None,
        }
    }

    pub fn with_retry_after(mut self, retry_after_ms: Option<u64>) -> Self {
        self.retry_after_ms = retry_after_ms;
        self
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transient, message)
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(FailureKind::MalformedResponse, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Internal, message)
    }

    /// Convert into a non-retryable failure, keeping kind and message.
    pub fn into_fatal(mut self) -> Self {
        self.retryable = false;
        self
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Failure {}

/// Terminal failure context persisted with a failed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailureReason {
    pub stage: StageName,
    pub kind: FailureKind,
    /// Attempt number (1-based) that produced the fatal outcome
    pub attempt: u32,
    /// Raw adapter or local error message
    pub message: String,
    pub failed_at: DateTime<Utc>,
}

impl FailureReason {
    pub fn new(stage: StageName, failure: &Failure, attempt: u32) -> Self {
        Self {
            stage,
            kind: failure.kind,
            attempt,
            message: failure.message.clone(),
            failed_at: Utc::now(),
        }
    }

    /// Machine-readable reason: `<stage>:<kind>`.
    pub fn code(&self) -> String {
        format!("{}:{}", self.stage, self.kind)
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code(), self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(FailureKind::Transient.is_retryable());
        assert!(FailureKind::LengthOutOfRange.is_retryable());
        assert!(FailureKind::ContentPolicyRejection.is_retryable());
        assert!(!FailureKind::QuotaExhausted.is_retryable());
        assert!(!FailureKind::InvalidCredential.is_retryable());
        assert!(!FailureKind::MalformedResponse.is_retryable());
    }

    #[test]
    fn test_reason_code() {
        let failure = Failure::new(FailureKind::QuotaExhausted, "character quota used up");
        let reason = FailureReason::new(StageName::Narrate, &failure, 1);
        assert_eq!(reason.code(), "narrate:quota_exhausted");
        assert_eq!(
            reason.to_string(),
            "narrate:quota_exhausted: character quota used up"
        );
    }

    #[test]
    fn test_into_fatal() {
        let failure = Failure::transient("timeout").into_fatal();
        assert_eq!(failure.kind, FailureKind::Transient);
        assert!(!failure.retryable);
    }
}
