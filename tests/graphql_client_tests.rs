//! Wire-level tests for the GraphQL client retry/backoff policy.

use std::time::Duration;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

use soda_fountain::github::{GitHubError, GraphQlClient, RetryConfig};

fn client(server: &MockServer) -> GraphQlClient {
    GraphQlClient::with_endpoint(
        "test-token".to_string(),
        format!("{}/graphql", server.uri()),
        RetryConfig {
            max_retries: 3,
            base_delay: Duration::from_millis(10),
        },
    )
    .unwrap()
}

/// Fails `failures` times with the given template, then succeeds.
struct FailThenSucceed {
    failures: std::sync::atomic::AtomicU32,
    template: ResponseTemplate,
    success: serde_json::Value,
}

impl Respond for FailThenSucceed {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        use std::sync::atomic::Ordering;
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            self.template.clone()
        } else {
            ResponseTemplate::new(200).set_body_json(&self.success)
        }
    }
}

fn fail_then_succeed(failures: u32, template: ResponseTemplate) -> FailThenSucceed {
    FailThenSucceed {
        failures: std::sync::atomic::AtomicU32::new(failures),
        template,
        success: json!({ "data": { "ok": true } }),
    }
}

#[tokio::test]
async fn server_errors_are_retried_until_success() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(fail_then_succeed(2, ResponseTemplate::new(502)))
        .expect(3)
        .mount(&server)
        .await;

    let data = client(&server).execute("query { ok }", json!({})).await.unwrap();
    assert_eq!(data["ok"], true);
}

#[tokio::test]
async fn retries_exhaust_after_persistent_server_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(500))
        .expect(4) // initial attempt + 3 retries
        .mount(&server)
        .await;

    let err = client(&server)
        .execute("query { ok }", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        GitHubError::RetriesExhausted { attempts: 4, .. }
    ));
}

#[tokio::test]
async fn client_errors_fail_fast() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad credentials"))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server)
        .execute("query { ok }", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, GitHubError::Api { status: 401, .. }));
}

#[tokio::test]
async fn rate_limit_sleeps_until_reset_then_retries() {
    let server = MockServer::start().await;
    let reset_epoch = chrono::Utc::now().timestamp(); // already passed
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(fail_then_succeed(
            1,
            ResponseTemplate::new(429)
                .insert_header("x-ratelimit-remaining", "0")
                .insert_header("x-ratelimit-reset", reset_epoch.to_string().as_str()),
        ))
        .expect(2)
        .mount(&server)
        .await;

    let started = std::time::Instant::now();
    let data = client(&server).execute("query { ok }", json!({})).await.unwrap();
    assert_eq!(data["ok"], true);
    // Reset + 1s margin.
    assert!(started.elapsed() >= Duration::from_millis(900));
}

#[tokio::test]
async fn zero_remaining_header_counts_as_rate_limited() {
    let server = MockServer::start().await;
    let reset_epoch = chrono::Utc::now().timestamp();
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(fail_then_succeed(
            1,
            ResponseTemplate::new(200)
                .insert_header("x-ratelimit-remaining", "0")
                .insert_header("x-ratelimit-reset", reset_epoch.to_string().as_str())
                .set_body_json(json!({ "data": {} })),
        ))
        .expect(2)
        .mount(&server)
        .await;

    let data = client(&server).execute("query { ok }", json!({})).await.unwrap();
    assert_eq!(data["ok"], true);
}

#[tokio::test]
async fn graphql_errors_concatenate_and_fail_fast() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": null,
            "errors": [
                { "message": "Field 'foo' doesn't exist" },
                { "message": "Variable $bar is never used" }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let err = client(&server)
        .execute("query { foo }", json!({}))
        .await
        .unwrap_err();
    match err {
        GitHubError::GraphQl(message) => {
            assert!(message.contains("Field 'foo' doesn't exist"));
            assert!(message.contains("Variable $bar is never used"));
        }
        other => panic!("expected GraphQl error, got {other:?}"),
    }
}

#[tokio::test]
async fn open_issue_count_reads_total_count() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": { "repository": { "issues": { "totalCount": 17 } } }
        })))
        .mount(&server)
        .await;

    let count = client(&server)
        .get_open_issue_count("acme", "widgets")
        .await
        .unwrap();
    assert_eq!(count, 17);
}

#[tokio::test]
async fn claim_issue_folds_failures_to_false() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": null,
            "errors": [{ "message": "item not found" }]
        })))
        .mount(&server)
        .await;

    let claimed = client(&server)
        .claim_issue("PVT_1", "ITEM_1", "FIELD_1", "agent-1")
        .await;
    assert!(!claimed);
}
