//! Retry policy and error classification for catalog and download requests.

use reqwest::{Response, StatusCode};
use std::time::Duration;
use thiserror::Error;

/// Maximum number of attempts for network operations.
pub const MAX_RETRIES: usize = 3;

/// Delay between retry attempts in milliseconds.
pub const RETRY_DELAY_MS: u64 = 1000;

/// Header in which GitHub reports the requests left in the current window.
const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";

/// How often, and how patiently, a request is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: MAX_RETRIES,
            delay: Duration::from_millis(RETRY_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// A single attempt, for callers that handle failure themselves.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

/// Errors that a retry will not fix.
#[derive(Debug, Error)]
pub enum NonRetryableError {
    #[error("Rate limit exceeded: {0}. Try again later or set GITHUB_TOKEN.")]
    RateLimitExceeded(String),
    #[error("Authentication failed: {0}. Check your GITHUB_TOKEN.")]
    AuthenticationFailed(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Access forbidden: {0}")]
    Forbidden(String),
    #[error("Request error: {0}")]
    ClientError(String),
}

/// Classifies a failed response. 4xx responses are final; server errors,
/// timeouts and connection failures may be retried.
pub fn classify_error(error: &reqwest::Error) -> Result<(), NonRetryableError> {
    let Some(status) = error.status() else {
        return Ok(());
    };
    let url = error
        .url()
        .map(|u| u.to_string())
        .unwrap_or_else(|| "request".to_string());

    match status {
        StatusCode::UNAUTHORIZED => Err(NonRetryableError::AuthenticationFailed(url)),
        StatusCode::FORBIDDEN => Err(NonRetryableError::Forbidden(url)),
        StatusCode::TOO_MANY_REQUESTS => Err(NonRetryableError::RateLimitExceeded(url)),
        StatusCode::NOT_FOUND => Err(NonRetryableError::NotFound(url)),
        s if s.is_client_error() => Err(NonRetryableError::ClientError(format!(
            "HTTP {} from {}",
            s.as_u16(),
            url
        ))),
        _ => Ok(()),
    }
}

/// Accepts a successful response. A 403 with an exhausted rate limit is
/// reported as [`NonRetryableError::RateLimitExceeded`]; other failures go
/// through [`check_retryable`].
pub fn check_response(response: Response) -> anyhow::Result<Response> {
    if is_rate_limited(&response) {
        return Err(NonRetryableError::RateLimitExceeded(response.url().to_string()).into());
    }
    response.error_for_status().map_err(check_retryable)
}

fn is_rate_limited(response: &Response) -> bool {
    response.status() == StatusCode::FORBIDDEN
        && response
            .headers()
            .get(RATE_LIMIT_REMAINING)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|remaining| remaining.trim() == "0")
}

/// Wraps an `error_for_status()` failure, tagging final errors as
/// [`NonRetryableError`].
pub fn check_retryable(error: reqwest::Error) -> anyhow::Error {
    match classify_error(&error) {
        Ok(()) => anyhow::Error::from(error),
        Err(non_retryable) => anyhow::Error::from(non_retryable),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn status_error(status: usize) -> reqwest::Error {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("GET", "/")
            .with_status(status)
            .create_async()
            .await;

        let response = reqwest::Client::new()
            .get(server.url())
            .send()
            .await
            .unwrap();
        response.error_for_status().unwrap_err()
    }

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts, MAX_RETRIES);
        assert_eq!(policy.delay, Duration::from_millis(RETRY_DELAY_MS));
        assert_eq!(RetryPolicy::none().attempts, 1);
    }

    #[test]
    fn test_non_retryable_error_display() {
        let err = NonRetryableError::RateLimitExceeded("x".to_string());
        assert!(err.to_string().contains("GITHUB_TOKEN"));

        let err = NonRetryableError::NotFound("https://example.com/a".to_string());
        assert_eq!(err.to_string(), "Not found: https://example.com/a");
    }

    #[tokio::test]
    async fn test_classify_client_errors() {
        assert!(matches!(
            classify_error(&status_error(401).await),
            Err(NonRetryableError::AuthenticationFailed(_))
        ));
        assert!(matches!(
            classify_error(&status_error(403).await),
            Err(NonRetryableError::Forbidden(_))
        ));
        assert!(matches!(
            classify_error(&status_error(429).await),
            Err(NonRetryableError::RateLimitExceeded(_))
        ));
        assert!(matches!(
            classify_error(&status_error(404).await),
            Err(NonRetryableError::NotFound(_))
        ));
        assert!(matches!(
            classify_error(&status_error(400).await),
            Err(NonRetryableError::ClientError(_))
        ));
    }

    async fn forbidden_response(remaining: Option<&str>) -> Response {
        let mut server = mockito::Server::new_async().await;
        let mut mock = server.mock("GET", "/").with_status(403);
        if let Some(remaining) = remaining {
            mock = mock.with_header(RATE_LIMIT_REMAINING, remaining);
        }
        let _m = mock.create_async().await;

        reqwest::Client::new()
            .get(server.url())
            .send()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_check_response_detects_exhausted_rate_limit() {
        let err = check_response(forbidden_response(Some("0")).await).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<NonRetryableError>(),
            Some(NonRetryableError::RateLimitExceeded(_))
        ));

        let err = check_response(forbidden_response(Some("42")).await).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<NonRetryableError>(),
            Some(NonRetryableError::Forbidden(_))
        ));

        let err = check_response(forbidden_response(None).await).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<NonRetryableError>(),
            Some(NonRetryableError::Forbidden(_))
        ));
    }

    #[tokio::test]
    async fn test_server_errors_are_retryable() {
        assert!(classify_error(&status_error(500).await).is_ok());

        let err = check_retryable(status_error(503).await);
        assert!(err.downcast_ref::<NonRetryableError>().is_none());

        let err = check_retryable(status_error(404).await);
        assert!(err.downcast_ref::<NonRetryableError>().is_some());
    }
}
