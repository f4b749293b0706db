//! Model Backend Abstraction Layer
//!
//! This module provides a common interface for chat-completion backends. The
//! `LLMBackend` trait defines the contract every backend implements so that the
//! task router can move between them transparently when one fails.

use crate::retry::Retryable;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

pub mod codegen;
pub mod context;
pub mod openrouter;
pub mod router;

#[cfg(test)]
pub(crate) mod testing;

/// Result type for LLM operations
pub type Result<T> = std::result::Result<T, LLMError>;

/// Errors that can occur during backend calls
#[derive(Debug, thiserror::Error)]
pub enum LLMError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Bad status {status}: {body}")]
    BadStatus { status: u16, body: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Parse error: {0}")]
    ParseError(String),
}

impl LLMError {
    /// Transport-class failures; everything else is returned without retry
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            LLMError::RateLimitExceeded
                | LLMError::BadStatus { .. }
                | LLMError::NetworkError(_)
                | LLMError::Timeout(_)
        )
    }
}

impl Retryable for LLMError {
    fn is_transient(&self) -> bool {
        LLMError::is_transient(self)
    }

    fn timed_out(after: Duration) -> Self {
        LLMError::Timeout(after)
    }
}

/// Message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    /// Role of the message sender (system, user, assistant)
    pub role: MessageRole,

    /// Content of the message
    pub content: String,
}

impl Message {
    /// Create a new user message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    /// Create a new assistant message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }

    /// Create a new system message
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }
}

/// Role of a message sender
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// System message
    System,

    /// User message
    User,

    /// Assistant message
    Assistant,
}

impl fmt::Display for MessageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageRole::System => write!(f, "system"),
            MessageRole::User => write!(f, "user"),
            MessageRole::Assistant => write!(f, "assistant"),
        }
    }
}

/// Task category deciding which backends serve a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskCategory {
    /// Planning and coordination
    Orchestration,
    /// Heavy code generation and structuring
    Code,
    /// Review and second opinions
    Critique,
    /// Lesson synthesis over stored experiences
    Memory,
}

impl TaskCategory {
    pub const ALL: [TaskCategory; 4] = [
        Self::Orchestration,
        Self::Code,
        Self::Critique,
        Self::Memory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Orchestration => "orchestration",
            Self::Code => "code",
            Self::Critique => "critique",
            Self::Memory => "memory",
        }
    }
}

impl fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskCategory {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "orchestration" => Ok(Self::Orchestration),
            "code" => Ok(Self::Code),
            "critique" => Ok(Self::Critique),
            "memory" => Ok(Self::Memory),
            other => Err(format!(
                "unknown task category '{}'. Must be one of: orchestration, code, critique, memory",
                other
            )),
        }
    }
}

/// Per-call sampling overrides
///
/// Unset fields fall back to the backend's configured defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallOptions {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Extra top-level fields merged into the request body
    pub extra: Option<serde_json::Map<String, serde_json::Value>>,
}

impl CallOptions {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Chat-completion backend that every router entry implements
#[async_trait]
pub trait LLMBackend: Send + Sync {
    /// Identifier used in the routing table (e.g., "qwen3_235b")
    fn name(&self) -> &str;

    /// Send the conversation and return the assistant text
    ///
    /// # Returns
    /// * `Ok(String)` - The completion text
    /// * `Err(LLMError)` - Classified failure; see [`LLMError::is_transient`]
    async fn complete(&self, messages: &[Message], options: &CallOptions) -> Result<String>;

    /// Whether the backend has what it needs (credentials) to be tried
    fn is_configured(&self) -> bool {
        true
    }
}

/// Pull the first JSON object out of model output.
///
/// Handles multiple output formats:
/// 1. Raw JSON
/// 2. Fenced JSON (with or without trailing text): ` ```json\n{...}\n``` `
/// 3. An object embedded in prose
pub fn extract_json_object(content: &str) -> Option<serde_json::Value> {
    let trimmed = content.trim();

    if let Some(value) = parse_object(trimmed) {
        return Some(value);
    }

    if let Some(inner) = extract_fenced_json(trimmed) {
        if let Some(value) = parse_object(inner.trim()) {
            return Some(value);
        }
    }

    // Scan for the first balanced object that parses
    let mut offset = 0;
    while let Some(pos) = trimmed[offset..].find('{') {
        let start = offset + pos;
        if let Some(value) = extract_balanced_json(&trimmed[start..]).and_then(parse_object) {
            return Some(value);
        }
        offset = start + 1;
    }

    None
}

fn parse_object(s: &str) -> Option<serde_json::Value> {
    match serde_json::from_str::<serde_json::Value>(s) {
        Ok(value @ serde_json::Value::Object(_)) => Some(value),
        _ => None,
    }
}

/// Extract the body of the first markdown code fence in the text.
///
/// Works even when there is trailing prose after the closing ```.
/// Returns `None` if no fenced block is found.
fn extract_fenced_json(content: &str) -> Option<&str> {
    let fence_start = content.find("```")?;
    let after_opening = &content[fence_start + 3..];

    // Skip the language tag line (e.g. "json\n")
    let body_start_rel = after_opening.find('\n')? + 1;
    let body_start = fence_start + 3 + body_start_rel;

    let closing = content[body_start..].find("```")?;
    let body_end = body_start + closing;

    if body_start >= body_end {
        return None;
    }

    Some(&content[body_start..body_end])
}

/// Extract a balanced JSON object starting at position 0 of `s`.
///
/// Counts `{` / `}` depth, respecting string literals, to find the
/// matching close brace.
fn extract_balanced_json(s: &str) -> Option<&str> {
    if !s.starts_with('{') {
        return None;
    }
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, ch) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match ch {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let user_msg = Message::user("Hello");
        assert_eq!(user_msg.role, MessageRole::User);
        assert_eq!(user_msg.content, "Hello");

        let assistant_msg = Message::assistant("Hi there");
        assert_eq!(assistant_msg.role, MessageRole::Assistant);

        let system_msg = Message::system("You only produce valid JSON.");
        assert_eq!(system_msg.role, MessageRole::System);
    }

    #[test]
    fn test_message_serialization() {
        let msg = Message::system("test");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains(r#""role":"system""#));
        let deserialized: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, deserialized);
    }

    #[test]
    fn test_task_category_parse() {
        assert_eq!("code".parse::<TaskCategory>(), Ok(TaskCategory::Code));
        assert_eq!(" Memory ".parse::<TaskCategory>(), Ok(TaskCategory::Memory));
        assert!("poetry".parse::<TaskCategory>().is_err());
        for category in TaskCategory::ALL {
            assert_eq!(category.as_str().parse::<TaskCategory>(), Ok(category));
        }
    }

    #[test]
    fn test_error_classification() {
        assert!(LLMError::Timeout(Duration::from_secs(90)).is_transient());
        assert!(LLMError::RateLimitExceeded.is_transient());
        assert!(LLMError::BadStatus {
            status: 502,
            body: String::new()
        }
        .is_transient());
        assert!(!LLMError::AuthenticationFailed("no key".to_string()).is_transient());
        assert!(!LLMError::ParseError("bad body".to_string()).is_transient());
    }

    #[test]
    fn test_extract_raw_json() {
        let value = extract_json_object(r#"{"rule": "x"}"#).unwrap();
        assert_eq!(value["rule"], "x");
    }

    #[test]
    fn test_extract_fenced_json_with_trailing_text() {
        let content = "Here you go:\n```json\n{\"rule\": \"y\"}\n```\nHope it helps.";
        let value = extract_json_object(content).unwrap();
        assert_eq!(value["rule"], "y");
    }

    #[test]
    fn test_extract_json_in_prose() {
        let content = "Sure {not json} then {\"a\": {\"b\": \"}\"}} trailing";
        let value = extract_json_object(content).unwrap();
        assert_eq!(value["a"]["b"], "}");
    }

    #[test]
    fn test_extract_rejects_non_objects() {
        assert!(extract_json_object("[1, 2, 3]").is_none());
        assert!(extract_json_object("no json at all").is_none());
    }
}
