//! HTTP execution with bounded, status-driven retry and single-shot reauthentication.

use std::time::Duration;

use bytes::Bytes;
use rand::Rng;
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use serde_json::Value as JsonValue;

use phdi_core::{DeliveryError, RETRYABLE_STATUSES, Result};

use crate::auth::CredentialProvider;

/// Which attempts get another try, and how long to wait before it.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries beyond the initial attempt
    pub retry_count: u32,
    pub retryable_statuses: Vec<u16>,
    /// Only these methods are ever retried
    pub allowed_methods: Vec<Method>,
    /// Delay before the first retry; doubles for each further retry
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Jitter percentage (0.0 to 1.0)
    pub jitter_factor: f64,
}

impl RetryPolicy {
    pub fn new(retry_count: u32, allowed_methods: Vec<Method>) -> Self {
        Self {
            retry_count,
            retryable_statuses: RETRYABLE_STATUSES.to_vec(),
            allowed_methods,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
            jitter_factor: 0.25,
        }
    }

    /// Same attempt bounds, no waiting between attempts
    pub fn without_backoff(self) -> Self {
        Self {
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_factor: 0.0,
            ..self
        }
    }

    pub fn should_retry(&self, method: &Method, outcome: &Outcome) -> bool {
        if !self.allowed_methods.contains(method) {
            return false;
        }
        match outcome {
            Outcome::TransportFailure { .. } => true,
            Outcome::Response(response) => self.retryable_statuses.contains(&response.status),
        }
    }

    /// Wait before retry number `retry` (1-based)
    pub fn delay_for(&self, retry: u32) -> Duration {
        if self.base_delay.is_zero() {
            return Duration::ZERO;
        }
        let exponent = retry.saturating_sub(1).min(20);
        let delay = std::cmp::min(
            self.base_delay * 2_u32.saturating_pow(exponent),
            self.max_delay,
        );
        std::cmp::min(apply_jitter(delay, self.jitter_factor), self.max_delay)
    }
}

fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }
    let range = duration.as_secs_f64() * jitter_factor.clamp(0.0, 1.0);
    let offset = rand::rng().random_range(-range..=range);
    Duration::from_secs_f64((duration.as_secs_f64() + offset).max(0.0))
}

/// One outgoing request, replayable across attempts
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl HttpRequest {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn post(url: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self::new(Method::POST, url).with_body(body)
    }

    pub fn with_header(mut self, name: reqwest::header::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Whether the request authenticates with a bearer token
    pub fn has_bearer_auth(&self) -> bool {
        self.headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.starts_with("Bearer "))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Bytes,
}

impl HttpResponse {
    pub fn json(&self) -> Option<JsonValue> {
        serde_json::from_slice(&self.body).ok()
    }

    /// Body as JSON, falling back to a JSON string of the raw text
    pub fn json_or_text(&self) -> JsonValue {
        self.json()
            .unwrap_or_else(|| JsonValue::String(String::from_utf8_lossy(&self.body).into_owned()))
    }
}

/// What the final attempt produced
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// No response was obtained
    TransportFailure { message: String },
    Response(HttpResponse),
}

impl Outcome {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::TransportFailure { .. } => None,
            Self::Response(response) => Some(response.status),
        }
    }

    /// Convert to an error unless the response status is 2xx
    pub fn into_success(self) -> Result<HttpResponse> {
        match self {
            Self::TransportFailure { message } => Err(DeliveryError::transport(message)),
            Self::Response(response) if (200..300).contains(&response.status) => Ok(response),
            Self::Response(response) => Err(DeliveryError::http(
                response.status,
                String::from_utf8_lossy(&response.body),
            )),
        }
    }
}

/// HTTP client shared by every component that talks to a cloud API
#[derive(Debug, Clone, Default)]
pub struct HttpClient {
    http: reqwest::Client,
}

impl HttpClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Run `request`, retrying per `policy`.
    ///
    /// Performs at most `policy.retry_count + 1` attempts and returns the
    /// outcome of the last one.
    pub async fn execute(&self, request: &HttpRequest, policy: &RetryPolicy) -> Outcome {
        let mut retries = 0;
        loop {
            let outcome = self.attempt(request).await;

            if retries >= policy.retry_count || !policy.should_retry(&request.method, &outcome) {
                if retries > 0 && policy.should_retry(&request.method, &outcome) {
                    tracing::warn!(
                        method = %request.method,
                        url = %request.url,
                        attempts = retries + 1,
                        status = ?outcome.status(),
                        "Retries exhausted"
                    );
                }
                return outcome;
            }

            retries += 1;
            let delay = policy.delay_for(retries);
            tracing::debug!(
                method = %request.method,
                url = %request.url,
                status = ?outcome.status(),
                retry = retries,
                delay_ms = delay.as_millis() as u64,
                "Retrying request"
            );
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    /// [`execute`](Self::execute), plus one retry with a fresh token on 401.
    ///
    /// The retry only happens when the request carried a bearer token, and
    /// never more than once per call.
    pub async fn execute_with_reauth(
        &self,
        credentials: &CredentialProvider,
        request: &HttpRequest,
        policy: &RetryPolicy,
    ) -> Result<Outcome> {
        let outcome = self.execute(request, policy).await;
        if outcome.status() != Some(401) || !request.has_bearer_auth() {
            return Ok(outcome);
        }

        tracing::info!(url = %request.url, "Token rejected, reauthenticating");
        let token = credentials.force_refresh().await?;
        let header = HeaderValue::from_str(&token.bearer())
            .map_err(|e| DeliveryError::auth(format!("token is not a valid header value: {e}")))?;

        let mut reauthenticated = request.clone();
        reauthenticated.headers.insert(AUTHORIZATION, header);
        Ok(self.execute(&reauthenticated, policy).await)
    }

    async fn attempt(&self, request: &HttpRequest) -> Outcome {
        let mut builder = self
            .http
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone());
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }

        let outcome = match builder.send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                match response.bytes().await {
                    Ok(body) => Outcome::Response(HttpResponse { status, body }),
                    Err(e) => Outcome::TransportFailure {
                        message: format!("failed to read response body: {e}"),
                    },
                }
            }
            Err(e) => Outcome::TransportFailure {
                message: e.to_string(),
            },
        };

        let label = match outcome.status() {
            Some(status) => status.to_string(),
            None => "transport_error".to_string(),
        };
        metrics::counter!("http_request_attempts_total", "status" => label).increment(1);

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: u16) -> Outcome {
        Outcome::Response(HttpResponse {
            status,
            body: Bytes::new(),
        })
    }

    #[test]
    fn only_allowed_methods_are_retried() {
        let policy = RetryPolicy::new(3, vec![Method::POST]);
        assert!(policy.should_retry(&Method::POST, &response(503)));
        assert!(!policy.should_retry(&Method::GET, &response(503)));
    }

    #[test]
    fn only_retryable_statuses_are_retried() {
        let policy = RetryPolicy::new(3, vec![Method::POST]);
        for status in [429, 500, 502, 503, 504] {
            assert!(policy.should_retry(&Method::POST, &response(status)), "{status}");
        }
        for status in [200, 400, 401, 404, 501] {
            assert!(!policy.should_retry(&Method::POST, &response(status)), "{status}");
        }
        let lost = Outcome::TransportFailure {
            message: "connection refused".to_string(),
        };
        assert!(policy.should_retry(&Method::POST, &lost));
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy {
            jitter_factor: 0.0,
            ..RetryPolicy::new(5, vec![Method::POST])
        };
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(2), Duration::from_secs(1));
        assert_eq!(policy.delay_for(3), Duration::from_secs(2));
        assert_eq!(policy.delay_for(10), Duration::from_secs(8));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(3, vec![Method::POST]);
        for _ in 0..50 {
            let delay = policy.delay_for(1);
            assert!(delay >= Duration::from_millis(375) && delay <= Duration::from_millis(625));
        }
        assert_eq!(policy.without_backoff().delay_for(3), Duration::ZERO);
    }

    #[test]
    fn bearer_detection() {
        let bearer = HttpRequest::post("http://x", "{}")
            .with_header(AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        let basic = HttpRequest::post("http://x", "{}")
            .with_header(AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(bearer.has_bearer_auth());
        assert!(!basic.has_bearer_auth());
        assert!(!HttpRequest::post("http://x", "{}").has_bearer_auth());
    }

    #[test]
    fn non_json_bodies_become_strings() {
        let response = HttpResponse {
            status: 502,
            body: Bytes::from_static(b"Bad Gateway"),
        };
        assert_eq!(response.json_or_text(), JsonValue::String("Bad Gateway".into()));
    }
}
