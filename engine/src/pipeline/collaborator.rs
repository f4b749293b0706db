//! Collaborator client
//!
//! Each pipeline stage calls one collaborator service through the shared
//! `/tools/call` envelope. A single attempt is made per call; retries are the
//! caller's [`RetryPolicy`](crate::retry::RetryPolicy).

use crate::config::CollaboratorsConfig;
use crate::retry::Retryable;
use async_trait::async_trait;
use sdk::types::{normalize_result, CollaboratorRole, ToolCallRequest, ToolCallResponse};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::time::Duration;

/// Collaborator call failures
#[derive(Debug, thiserror::Error)]
pub enum CollaboratorError {
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Collaborator error: {0}")]
    Remote(String),

    #[error("No endpoint configured for {0}")]
    NoEndpoint(CollaboratorRole),
}

impl Retryable for CollaboratorError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            CollaboratorError::Status { .. }
                | CollaboratorError::Timeout(_)
                | CollaboratorError::Connect(_)
        )
    }

    fn timed_out(after: Duration) -> Self {
        CollaboratorError::Timeout(after)
    }
}

/// A service answering the five pipeline roles
#[async_trait]
pub trait Collaborator: Send + Sync {
    /// Invoke a named tool on `role`'s service once and return the raw
    /// `result` value
    async fn call_tool(
        &self,
        role: CollaboratorRole,
        tool_name: &str,
        arguments: Value,
    ) -> Result<Value, CollaboratorError>;

    /// Invoke `role`'s pipeline tool once
    async fn call(&self, role: CollaboratorRole, arguments: Value) -> Result<Value, CollaboratorError> {
        self.call_tool(role, role.tool_name(), arguments).await
    }
}

/// Normalize a collaborator result into the object the next stage expects
///
/// A degenerate answer (plain text, a number, nothing) becomes the role's
/// default object, keeping the raw text under `content`.
pub fn normalize_for_role(role: CollaboratorRole, result: Value) -> Map<String, Value> {
    let normalized = normalize_result(result);

    let degenerate = normalized.len() == 1
        && normalized
            .get("content")
            .is_some_and(|content| !content.is_object());
    if !degenerate {
        return normalized;
    }

    tracing::warn!("{} returned no structured output; using defaults", role);
    let mut fallback = match role.default_object() {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    fallback.extend(normalized);
    fallback
}

/// HTTP client for collaborators addressed by per-role endpoints
pub struct HttpCollaborator {
    client: reqwest::Client,
    endpoints: HashMap<CollaboratorRole, String>,
    timeout: Duration,
}

impl HttpCollaborator {
    pub fn new(endpoints: HashMap<CollaboratorRole, String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        let endpoints = endpoints
            .into_iter()
            .map(|(role, url)| (role, url.trim_end_matches('/').to_string()))
            .collect();

        Self {
            client,
            endpoints,
            timeout,
        }
    }

    pub fn from_config(config: &CollaboratorsConfig) -> Self {
        let endpoints = CollaboratorRole::ALL
            .iter()
            .map(|role| (*role, config.endpoint(*role).to_string()))
            .collect();
        Self::new(endpoints, config.timeout())
    }

    pub fn endpoint(&self, role: CollaboratorRole) -> Option<&str> {
        self.endpoints.get(&role).map(String::as_str)
    }
}

#[async_trait]
impl Collaborator for HttpCollaborator {
    async fn call_tool(
        &self,
        role: CollaboratorRole,
        tool_name: &str,
        arguments: Value,
    ) -> Result<Value, CollaboratorError> {
        let endpoint = self
            .endpoint(role)
            .ok_or(CollaboratorError::NoEndpoint(role))?;
        let url = format!("{}/tools/call", endpoint);
        let request = ToolCallRequest::new(tool_name, arguments);

        tracing::info!("Calling {} -> {}", url, request.tool_name);

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CollaboratorError::Timeout(self.timeout)
                } else {
                    CollaboratorError::Connect(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| CollaboratorError::Connect(e.to_string()))?;

        if !status.is_success() {
            return Err(CollaboratorError::Status {
                status: status.as_u16(),
                body,
            });
        }

        // A body that is not an envelope is treated as the result itself
        let envelope = match serde_json::from_str::<Value>(&body) {
            Ok(Value::Object(map)) if map.contains_key("result") || map.contains_key("error") => {
                serde_json::from_value::<ToolCallResponse>(Value::Object(map))
                    .unwrap_or_else(|e| ToolCallResponse::failure(e.to_string()))
            }
            Ok(other) => ToolCallResponse::success(other),
            Err(_) => ToolCallResponse::success(Value::String(body)),
        };

        if let Some(error) = envelope.error {
            return Err(CollaboratorError::Remote(error));
        }

        Ok(envelope.result.unwrap_or_else(|| Value::Object(Map::new())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_error_classification() {
        assert!(CollaboratorError::Status {
            status: 503,
            body: String::new()
        }
        .is_transient());
        assert!(CollaboratorError::Timeout(Duration::from_secs(120)).is_transient());
        assert!(CollaboratorError::Connect("refused".into()).is_transient());
        assert!(!CollaboratorError::Remote("bad input".into()).is_transient());
        assert!(!CollaboratorError::NoEndpoint(CollaboratorRole::Coder).is_transient());
    }

    #[test]
    fn test_structured_result_passes_through() {
        let map = normalize_for_role(
            CollaboratorRole::Auditor,
            json!({"content": {"issues": [], "metrics": {"score": 9}}}),
        );
        assert_eq!(map["metrics"]["score"], 9);
        assert!(map.get("content").is_none());
    }

    #[test]
    fn test_degenerate_result_uses_role_default() {
        let map = normalize_for_role(CollaboratorRole::Coder, json!("sorry, no code today"));
        assert_eq!(map["backend"]["files"], json!([]));
        assert_eq!(map["tests"], json!([]));
        assert_eq!(map["content"], "sorry, no code today");

        let map = normalize_for_role(CollaboratorRole::StackResearch, Value::Null);
        assert_eq!(map["total_libraries"], 0);
    }

    #[test]
    fn test_endpoints_from_config() {
        let collaborator = HttpCollaborator::from_config(&CollaboratorsConfig::default());
        assert_eq!(
            collaborator.endpoint(CollaboratorRole::Architect),
            Some("http://localhost:8081/mcp")
        );
        assert_eq!(
            collaborator.endpoint(CollaboratorRole::Auditor),
            Some("http://localhost:8085/mcp")
        );
    }
}
