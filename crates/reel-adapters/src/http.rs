//! Shared HTTP plumbing for adapters.

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Client, Response};
use std::time::Duration;
use tracing::debug;

use crate::error::{AdapterError, AdapterResult};

/// Default per-request timeout for JSON API calls.
pub const DEFAULT_TIMEOUT_SECS: u64 = 120;

/// Build the HTTP client every adapter uses.
pub fn build_client(timeout: Duration) -> AdapterResult<Client> {
    Ok(Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .redirect(reqwest::redirect::Policy::none())
        .user_agent(concat!("reelsmith/", env!("CARGO_PKG_VERSION")))
        .build()?)
}

/// Pass a successful response through, or classify the failure.
pub async fn check_response(adapter: &'static str, response: Response) -> AdapterResult<Response> {
    let status = response.status();
    metrics::counter!(
        "reel_adapter_requests_total",
        "adapter" => adapter,
        "status" => status.as_u16().to_string()
    )
    .increment(1);

    if status.is_success() {
        return Ok(response);
    }

    let retry_after_ms = parse_retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    debug!(adapter, status = status.as_u16(), "Request failed: {}", body);
    Err(AdapterError::from_http_status(status.as_u16(), body).with_retry_after(retry_after_ms))
}

/// Retry-After in milliseconds. Only the delta-seconds form is honoured.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(|secs| secs.saturating_mul(1000))
}

/// Read an environment variable, treating empty values as unset.
pub(crate) fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Read a required credential from the environment.
pub(crate) fn require_env(key: &str) -> AdapterResult<String> {
    env_var(key).ok_or_else(|| AdapterError::missing_credential(key))
}
