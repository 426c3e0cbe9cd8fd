//! HTTP retry with exponential backoff for knowledge-graph calls.
//!
//! # Retry Policy
//!
//! - Max attempts: 3 (initial request included)
//! - Delay: `initial_delay * 2^attempt`, capped at `max_delay`, down-jittered
//! - Retryable: connection and timeout errors, HTTP 429
//! - Everything else fails on the first attempt
//!
//! Exhaustion reports the last error seen. Calls outside the knowledge
//! graph use [`send_once`] instead and fail on the first error.

use rand::Rng;
use reqwest::header::HeaderMap;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use treeqa_core::RetrievalError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts, initial request included.
    pub max_attempts: u32,
    #[serde(with = "millis")]
    pub initial_delay: Duration,
    #[serde(with = "millis")]
    pub max_delay: Duration,
    /// Down-jitter fraction (0.25 = up to 25% shorter).
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
            jitter_factor: 0.25,
        }
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

/// `Retry-After` in seconds, accepted only when `0 < delay < 60s`.
#[must_use]
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    let secs = headers
        .get("retry-after")?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()?;
    let delay = Duration::from_secs(secs);
    (delay > Duration::ZERO && delay < Duration::from_secs(60)).then_some(delay)
}

/// Backoff before retry number `step + 1`.
#[must_use]
pub fn calculate_retry_delay(step: u32, config: &RetryConfig, headers: Option<&HeaderMap>) -> Duration {
    if let Some(delay) = headers.and_then(parse_retry_after) {
        return delay.min(config.max_delay);
    }

    let base = config.initial_delay.as_secs_f64() * 2.0_f64.powi(step as i32);
    let capped = base.min(config.max_delay.as_secs_f64());
    let jitter = 1.0 - rand::thread_rng().gen::<f64>() * config.jitter_factor;
    Duration::from_secs_f64(capped * jitter)
}

/// Connection-level failures worth another attempt.
pub fn is_transient(err: &reqwest::Error) -> bool {
    err.is_connect() || err.is_timeout()
}

/// Send a request exactly once.
///
/// HTTP 429 maps to [`RetrievalError::RateLimited`], other non-2xx statuses
/// to [`RetrievalError::Http`], transport failures to
/// [`RetrievalError::Network`].
pub async fn send_once(request: RequestBuilder) -> Result<Response, RetrievalError> {
    let response = request
        .send()
        .await
        .map_err(|e| RetrievalError::Network(e.to_string()))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    if status == StatusCode::TOO_MANY_REQUESTS {
        return Err(RetrievalError::RateLimited);
    }
    let body = response.text().await.unwrap_or_default();
    Err(RetrievalError::Http {
        status: status.as_u16(),
        body,
    })
}

/// Send a request, retrying transient failures.
///
/// `build_request` is called once per attempt.
pub async fn send_with_retry<F>(build_request: F, config: &RetryConfig) -> Result<Response, RetrievalError>
where
    F: Fn() -> RequestBuilder,
{
    let attempts = config.max_attempts.max(1);
    let mut last = String::new();

    for attempt in 0..attempts {
        let is_last = attempt + 1 == attempts;

        match build_request().send().await {
            Ok(response) if response.status().is_success() => return Ok(response),
            Ok(response) if response.status() == StatusCode::TOO_MANY_REQUESTS => {
                last = "HTTP 429 Too Many Requests".to_string();
                if is_last {
                    break;
                }
                let delay = calculate_retry_delay(attempt, config, Some(response.headers()));
                tracing::debug!(attempt = attempt + 1, delay_ms = delay.as_millis() as u64, "rate limited, retrying");
                tokio::time::sleep(delay).await;
            }
            Ok(response) => {
                let status = response.status().as_u16();
                let body = response.text().await.unwrap_or_default();
                return Err(RetrievalError::Http { status, body });
            }
            Err(e) if is_transient(&e) => {
                last = e.to_string();
                if is_last {
                    break;
                }
                let delay = calculate_retry_delay(attempt, config, None);
                tracing::debug!(
                    attempt = attempt + 1,
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "connection error, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(RetrievalError::Network(e.to_string())),
        }
    }

    tracing::warn!(attempts, last = %last, "giving up");
    Err(RetrievalError::Exhausted { attempts, last })
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn fast() -> RetryConfig {
        RetryConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            ..RetryConfig::default()
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let config = RetryConfig {
            jitter_factor: 0.0,
            ..RetryConfig::default()
        };
        assert_eq!(calculate_retry_delay(0, &config, None), Duration::from_secs(1));
        assert_eq!(calculate_retry_delay(1, &config, None), Duration::from_secs(2));
        assert_eq!(calculate_retry_delay(5, &config, None), Duration::from_secs(8));
    }

    #[test]
    fn test_jitter_only_shortens() {
        let config = RetryConfig::default();
        for _ in 0..50 {
            let d = calculate_retry_delay(0, &config, None);
            assert!(d <= Duration::from_secs(1));
            assert!(d >= Duration::from_millis(750));
        }
    }

    #[test]
    fn test_parse_retry_after_range() {
        let mut headers = HeaderMap::new();
        headers.insert("retry-after", HeaderValue::from_static("3"));
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(3)));
        headers.insert("retry-after", HeaderValue::from_static("120"));
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[tokio::test]
    async fn test_retries_rate_limit_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = server.uri();
        let response = send_with_retry(|| client.get(&url), &fast()).await.unwrap();
        assert_eq!(response.text().await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_rate_limit_exhaustion_reports_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .expect(3)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = server.uri();
        let err = send_with_retry(|| client.get(&url), &fast()).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Exhausted { attempts: 3, .. }));
    }

    #[tokio::test]
    async fn test_server_error_is_not_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("down"))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let url = server.uri();
        let err = send_with_retry(|| client.get(&url), &fast()).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Http { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_send_once_does_not_retry_rate_limit() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .expect(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let err = send_once(client.get(server.uri())).await.unwrap_err();
        assert!(matches!(err, RetrievalError::RateLimited));
    }

    #[tokio::test]
    async fn test_send_once_maps_status_and_transport_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404).set_body_string("gone"))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let err = send_once(client.get(server.uri())).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Http { status: 404, ref body } if body == "gone"));

        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = send_once(client.get(format!("http://127.0.0.1:{port}/")))
            .await
            .unwrap_err();
        assert!(matches!(err, RetrievalError::Network(_)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_retried() {
        // Bind then drop to get a port with nothing listening.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = reqwest::Client::new();
        let url = format!("http://127.0.0.1:{port}/");
        let err = send_with_retry(|| client.get(&url), &fast()).await.unwrap_err();
        assert!(matches!(err, RetrievalError::Exhausted { attempts: 3, .. }));
    }
}
