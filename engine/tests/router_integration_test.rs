//! Integration tests for the task router
//!
//! Validates retry, fallback and exhaustion against mock OpenRouter servers

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wiremock::{
    matchers::{header, method, path},
    Mock, MockServer, ResponseTemplate,
};

use keel_engine::config::BackendConfig;
use keel_engine::llm::openrouter::OpenRouterBackend;
use keel_engine::llm::router::{Route, RouterError, RoutingTable, TaskRouter};
use keel_engine::llm::{CallOptions, LLMBackend, Message, TaskCategory};
use keel_engine::retry::RetryPolicy;

fn backend(name: &str, server: &MockServer) -> Arc<dyn LLMBackend> {
    Arc::new(OpenRouterBackend::new(
        name,
        BackendConfig {
            model: format!("test/{}", name),
            temperature: 0.2,
            max_tokens: 256,
            reasoning: false,
        },
        server.uri(),
        Some("test-key".to_string()),
        Duration::from_secs(5),
    ))
}

fn router(primary: &MockServer, backup: &MockServer, attempts: u32) -> TaskRouter {
    let table = TaskCategory::ALL
        .iter()
        .fold(RoutingTable::new(), |table, category| {
            table.with_route(*category, Route::new("primary", &["backup"]))
        });

    TaskRouter::new(
        vec![backend("primary", primary), backend("backup", backup)],
        table,
        RetryPolicy::new(attempts, Duration::ZERO),
        1000,
    )
    .unwrap()
}

fn completion(text: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "choices": [{"message": {"role": "assistant", "content": text}}]
    }))
}

#[tokio::test]
async fn test_fallback_after_primary_retries() {
    let primary = MockServer::start().await;
    let backup = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&primary)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .and(header("Authorization", "Bearer test-key"))
        .respond_with(completion("Hello from the backup"))
        .expect(1)
        .mount(&backup)
        .await;

    let router = router(&primary, &backup, 3);
    let answer = router
        .call(
            TaskCategory::Code,
            &[Message::user("Hello")],
            &CallOptions::default(),
        )
        .await
        .unwrap();

    assert_eq!(answer, "Hello from the backup");
    let stats = router.stats();
    assert_eq!(stats.call_counts["backup"], 1);
    assert_eq!(stats.call_counts["primary"], 0);
    assert_eq!(stats.total_calls, 1);
}

#[tokio::test]
async fn test_auth_failure_not_retried() {
    let primary = MockServer::start().await;
    let backup = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
        .expect(1)
        .mount(&primary)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(completion("ok"))
        .expect(1)
        .mount(&backup)
        .await;

    let answer = router(&primary, &backup, 3)
        .call(
            TaskCategory::Critique,
            &[Message::user("Review this")],
            &CallOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(answer, "ok");
}

#[tokio::test]
async fn test_exhaustion_names_category() {
    let primary = MockServer::start().await;
    let backup = MockServer::start().await;

    for server in [&primary, &backup] {
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(500))
            .expect(2)
            .mount(server)
            .await;
    }

    let err = router(&primary, &backup, 2)
        .call(
            TaskCategory::Orchestration,
            &[Message::user("Plan")],
            &CallOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        RouterError::AllBackendsExhausted {
            category: TaskCategory::Orchestration,
            last_error: Some(_),
        }
    ));
    assert_eq!(
        err.to_string(),
        "All backends exhausted for category orchestration"
    );
}

#[tokio::test]
async fn test_missing_content_falls_back() {
    let primary = MockServer::start().await;
    let backup = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"choices": []})))
        .expect(1)
        .mount(&primary)
        .await;

    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(completion("{\"ok\": true}"))
        .mount(&backup)
        .await;

    let answer = router(&primary, &backup, 3)
        .route_with_context(TaskCategory::Memory, "Summarize", None, &CallOptions::default())
        .await
        .unwrap();
    assert_eq!(answer, "{\"ok\": true}");
}
