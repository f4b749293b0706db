//! Integration tests for the HTTP collaborator client

use serde_json::json;
use std::collections::HashMap;
use std::time::Duration;
use wiremock::{
    matchers::{body_partial_json, method, path},
    Mock, MockServer, ResponseTemplate,
};

use keel_engine::pipeline::{Collaborator, CollaboratorError, HttpCollaborator};
use keel_engine::retry::{RetryPolicy, Retryable};
use sdk::types::CollaboratorRole;

fn client(server: &MockServer, role: CollaboratorRole, timeout: Duration) -> HttpCollaborator {
    let mut endpoints = HashMap::new();
    endpoints.insert(role, format!("{}/mcp/", server.uri()));
    HttpCollaborator::new(endpoints, timeout)
}

#[tokio::test]
async fn test_envelope_result_returned() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/mcp/tools/call"))
        .and(body_partial_json(json!({
            "tool_name": "propose_architecture",
            "arguments": {"spec": "todo app"}
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "result": {"backend": {"modules": ["todos"]}}
        })))
        .expect(1)
        .mount(&server)
        .await;

    let collaborator = client(&server, CollaboratorRole::Architect, Duration::from_secs(5));
    let result = collaborator
        .call(CollaboratorRole::Architect, json!({"spec": "todo app"}))
        .await
        .unwrap();

    assert_eq!(result["backend"]["modules"][0], "todos");
}

#[tokio::test]
async fn test_error_envelope_is_remote_failure() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/mcp/tools/call"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"error": "spec is empty"})),
        )
        .mount(&server)
        .await;

    let err = client(&server, CollaboratorRole::Coder, Duration::from_secs(5))
        .call(CollaboratorRole::Coder, json!({}))
        .await
        .unwrap_err();

    assert!(matches!(&err, CollaboratorError::Remote(msg) if msg == "spec is empty"));
    assert!(!err.is_transient());
}

#[tokio::test]
async fn test_plain_text_body_is_result() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/mcp/tools/call"))
        .respond_with(ResponseTemplate::new(200).set_body_string("no structured output"))
        .mount(&server)
        .await;

    let result = client(&server, CollaboratorRole::Designer, Duration::from_secs(5))
        .call(CollaboratorRole::Designer, json!({}))
        .await
        .unwrap();

    assert_eq!(result, json!("no structured output"));
}

#[tokio::test]
async fn test_bad_status_retried_by_policy() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/mcp/tools/call"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .expect(3)
        .mount(&server)
        .await;

    let collaborator = client(&server, CollaboratorRole::Auditor, Duration::from_secs(5));
    let err = RetryPolicy::new(3, Duration::ZERO)
        .run("auditor", |_| collaborator.call(CollaboratorRole::Auditor, json!({})))
        .await
        .unwrap_err();

    assert!(matches!(err, CollaboratorError::Status { status: 502, .. }));
}

#[tokio::test]
async fn test_slow_collaborator_times_out() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/mcp/tools/call"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"result": {}}))
                .set_delay(Duration::from_secs(2)),
        )
        .mount(&server)
        .await;

    let err = client(&server, CollaboratorRole::Coder, Duration::from_millis(200))
        .call(CollaboratorRole::Coder, json!({}))
        .await
        .unwrap_err();

    assert!(matches!(err, CollaboratorError::Timeout(_)));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_unconfigured_role() {
    let server = MockServer::start().await;
    let err = client(&server, CollaboratorRole::Coder, Duration::from_secs(5))
        .call(CollaboratorRole::Architect, json!({}))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CollaboratorError::NoEndpoint(CollaboratorRole::Architect)
    ));
}
