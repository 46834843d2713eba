//! Retry and reauthentication behaviour of the HTTP client against a mock server.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use phdi_core::Result;
use phdi_delivery::{
    AccessToken, CredentialProvider, HttpClient, HttpRequest, IdentitySource, IssuedCredential,
    Outcome, RetryPolicy,
};
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, HeaderValue};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Issues `token-1`, `token-2`, ... on each fetch
#[derive(Default)]
struct SequentialIdentity {
    calls: AtomicUsize,
}

#[async_trait]
impl IdentitySource for SequentialIdentity {
    async fn default_credentials(&self, _scopes: &[String]) -> Result<IssuedCredential> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(IssuedCredential {
            token: AccessToken::new(format!("token-{n}")),
            identity_id: "phdi".to_string(),
            expires_at: Some(Utc::now() + Duration::hours(1)),
        })
    }
}

fn policy(retry_count: u32) -> RetryPolicy {
    RetryPolicy::new(retry_count, vec![Method::POST]).without_backoff()
}

fn bearer(token: &str) -> HeaderValue {
    HeaderValue::from_str(&format!("Bearer {token}")).unwrap()
}

#[tokio::test]
async fn retryable_statuses_exhaust_exactly_retry_count_plus_one_attempts() {
    for status in [429u16, 500, 502, 503, 504] {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/fhir"))
            .respond_with(ResponseTemplate::new(status))
            .expect(4)
            .mount(&server)
            .await;

        let client = HttpClient::default();
        let request = HttpRequest::post(format!("{}/fhir", server.uri()), "{}");
        let outcome = client.execute(&request, &policy(3)).await;

        assert_eq!(outcome.status(), Some(status));
        server.verify().await;
    }
}

#[tokio::test]
async fn success_after_transient_failure_stops_retrying() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
        .mount(&server)
        .await;

    let request = HttpRequest::post(format!("{}/fhir", server.uri()), "{}");
    let outcome = HttpClient::default().execute(&request, &policy(3)).await;

    assert_eq!(outcome.status(), Some(200));
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn non_retryable_status_is_returned_after_one_attempt() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(400))
        .expect(1)
        .mount(&server)
        .await;

    let request = HttpRequest::post(server.uri(), "{}");
    let outcome = HttpClient::default().execute(&request, &policy(3)).await;

    assert_eq!(outcome.status(), Some(400));
}

#[tokio::test]
async fn methods_outside_the_allowed_set_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(1)
        .mount(&server)
        .await;

    let request = HttpRequest::new(Method::GET, server.uri());
    let outcome = HttpClient::default().execute(&request, &policy(3)).await;

    assert_eq!(outcome.status(), Some(503));
}

#[tokio::test]
async fn unreachable_host_is_a_transport_failure() {
    // Nothing listens on the discard port
    let request = HttpRequest::post("http://127.0.0.1:9/fhir", "{}");
    let outcome = HttpClient::default().execute(&request, &policy(1)).await;

    assert!(matches!(outcome, Outcome::TransportFailure { .. }));
}

#[tokio::test]
async fn unauthorized_bearer_request_is_reauthenticated_once() {
    let server = MockServer::start().await;
    Mock::given(header("Authorization", "Bearer token-1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(header("Authorization", "Bearer token-2"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let credentials = CredentialProvider::new(Arc::new(SequentialIdentity::default()));
    let token = credentials.get_token().await.unwrap();
    let request = HttpRequest::post(server.uri(), "{}").with_header(AUTHORIZATION, bearer(token.as_str()));

    let outcome = HttpClient::default()
        .execute_with_reauth(&credentials, &request, &policy(3))
        .await
        .unwrap();

    assert_eq!(outcome.status(), Some(200));
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn reauthentication_happens_at_most_once() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let credentials = CredentialProvider::new(Arc::new(SequentialIdentity::default()));
    let request = HttpRequest::post(server.uri(), "{}").with_header(AUTHORIZATION, bearer("stale"));

    let outcome = HttpClient::default()
        .execute_with_reauth(&credentials, &request, &policy(3))
        .await
        .unwrap();

    assert_eq!(outcome.status(), Some(401));
}

#[tokio::test]
async fn unauthorized_without_bearer_is_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(401))
        .expect(1)
        .mount(&server)
        .await;

    let credentials = CredentialProvider::new(Arc::new(SequentialIdentity::default()));
    let request = HttpRequest::post(server.uri(), "{}")
        .with_header(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));

    let outcome = HttpClient::default()
        .execute_with_reauth(&credentials, &request, &policy(3))
        .await
        .unwrap();

    assert_eq!(outcome.status(), Some(401));
}

#[tokio::test]
async fn any_other_initial_outcome_issues_a_single_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;

    let credentials = CredentialProvider::new(Arc::new(SequentialIdentity::default()));
    let request = HttpRequest::post(server.uri(), "{}").with_header(AUTHORIZATION, bearer("fresh"));

    let outcome = HttpClient::default()
        .execute_with_reauth(&credentials, &request, &policy(3))
        .await
        .unwrap();

    assert_eq!(outcome.status(), Some(201));
}
