use std::time::Duration;

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Response, StatusCode};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::configs::{RetryConfig, DEFAULT_RATE_LIMIT_WAIT};
use crate::errors::ClientError;

/// A request whose body is buffered so that every attempt gets a fresh copy
#[derive(Debug, Clone)]
pub struct PreparedRequest {
    pub url: String,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl PreparedRequest {
    fn build(&self, http: &reqwest::Client) -> reqwest::RequestBuilder {
        http.post(&self.url)
            .headers(self.headers.clone())
            .body(self.body.clone())
    }
}

/// Interpret a `Retry-After` value: delay-seconds first, then an HTTP-date, then the default wait
pub fn parse_retry_after(value: &str) -> Duration {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Duration::from_secs(seconds);
    }

    if let Ok(date) = DateTime::parse_from_rfc2822(value) {
        let wait = date.with_timezone(&Utc) - Utc::now();
        return wait.to_std().unwrap_or(Duration::ZERO);
    }

    DEFAULT_RATE_LIMIT_WAIT
}

/// The wait before retrying a 429: the larger of the server hint and the current backoff, capped.
/// Without a `Retry-After` header the backoff alone decides.
pub fn rate_limit_wait(headers: &HeaderMap, delay: Duration, config: &RetryConfig) -> Duration {
    let hint = match headers.get(RETRY_AFTER) {
        None => delay,
        Some(value) => value
            .to_str()
            .map(parse_retry_after)
            .unwrap_or(DEFAULT_RATE_LIMIT_WAIT),
    };
    hint.max(delay).min(config.max_delay)
}

/// Sleep for `duration` unless `cancel` fires first
pub async fn sleep_or_cancel(
    duration: Duration,
    cancel: &CancellationToken,
) -> Result<(), ClientError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ClientError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Send `request`, retrying transport failures and 429s according to `config`.
///
/// Any response other than a 429 is returned as-is, success or not; the caller decides
/// what a non-200 status means. With retries disabled a 429 is returned as-is too.
pub async fn do_request_with_retry(
    http: &reqwest::Client,
    request: &PreparedRequest,
    config: &RetryConfig,
    cancel: &CancellationToken,
) -> Result<Response, ClientError> {
    let max_retries = config.effective_retries();
    let mut delay = config.initial_delay;
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
            result = request.build(http).send() => result,
        };

        match result {
            Err(err) => {
                if cancel.is_cancelled() {
                    return Err(ClientError::Cancelled);
                }
                if attempt >= max_retries {
                    return Err(ClientError::MaxRetriesExceeded(Box::new(ClientError::Http(
                        err,
                    ))));
                }
                warn!(attempt, ?delay, error = %err, "request failed, retrying");
                sleep_or_cancel(delay, cancel).await?;
                delay = config.next_delay(delay);
            }
            Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS && config.enabled => {
                let wait = rate_limit_wait(response.headers(), delay, config);
                // The body is drained so the connection can be reused
                let body = response.text().await.unwrap_or_default();
                let limited = ClientError::RateLimited {
                    status: StatusCode::TOO_MANY_REQUESTS.as_u16(),
                    retry_after: wait,
                    body,
                };
                if attempt >= max_retries {
                    return Err(ClientError::MaxRetriesExceeded(Box::new(limited)));
                }
                warn!(attempt, ?wait, "{}", limited);
                sleep_or_cancel(wait, cancel).await?;
                delay = config.next_delay(delay);
            }
            Ok(response) => return Ok(response),
        }

        attempt += 1;
    }
}
