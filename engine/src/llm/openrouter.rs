use super::{CallOptions, LLMBackend, LLMError, Message};
use crate::config::{BackendConfig, LLMConfig};
use async_trait::async_trait;
use sdk::errors::EngineError;
use serde_json::{json, Value};
use std::time::Duration;

/// Backend speaking the OpenAI-compatible `chat/completions` protocol
pub struct OpenRouterBackend {
    name: String,
    config: BackendConfig,
    base_url: String,
    api_key: Option<String>,
    api_key_env: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl OpenRouterBackend {
    pub fn new(
        name: impl Into<String>,
        config: BackendConfig,
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        Self {
            name: name.into(),
            config,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            api_key_env: "OPENROUTER_API_KEY".to_string(),
            timeout,
            client,
        }
    }

    /// Build the named backend from `[llm]`, reading the key from `api_key_env`
    pub fn from_config(name: &str, llm: &LLMConfig) -> Result<Self, EngineError> {
        let backend = llm
            .backends
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::UnknownBackend(name.to_string()))?;

        let api_key = std::env::var(&llm.api_key_env).ok();
        let mut built = Self::new(name, backend, &llm.base_url, api_key, llm.timeout());
        built.api_key_env = llm.api_key_env.clone();
        Ok(built)
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    fn request_body(&self, messages: &[Message], options: &CallOptions) -> Value {
        let api_messages: Vec<Value> = messages
            .iter()
            .map(|msg| {
                json!({
                    "role": msg.role.to_string(),
                    "content": msg.content
                })
            })
            .collect();

        let mut payload = json!({
            "model": self.config.model,
            "messages": api_messages,
            "temperature": options.temperature.unwrap_or(self.config.temperature),
            "max_tokens": options.max_tokens.unwrap_or(self.config.max_tokens),
        });

        if let Some(body) = payload.as_object_mut() {
            if self.config.reasoning {
                body.insert("reasoning".to_string(), json!({ "enabled": true }));
            }
            if let Some(extra) = &options.extra {
                for (key, value) in extra {
                    body.insert(key.clone(), value.clone());
                }
            }
        }

        payload
    }
}

#[async_trait]
impl LLMBackend for OpenRouterBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_configured(&self) -> bool {
        self.has_api_key()
    }

    async fn complete(&self, messages: &[Message], options: &CallOptions) -> super::Result<String> {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            LLMError::AuthenticationFailed(format!("{} is not set", self.api_key_env))
        })?;

        let url = format!("{}/chat/completions", self.base_url);
        let payload = self.request_body(messages, options);

        tracing::info!(
            "Calling {} ({}) with {} messages",
            self.name,
            self.config.model,
            messages.len()
        );

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", api_key))
            .header("Content-Type", "application/json")
            .header("HTTP-Referer", "https://github.com/keel-build/keel")
            .header("X-Title", "Keel")
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LLMError::Timeout(self.timeout)
                } else {
                    LLMError::NetworkError(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();

            return Err(match status.as_u16() {
                401 | 403 => LLMError::AuthenticationFailed(text),
                429 => LLMError::RateLimitExceeded,
                code => LLMError::BadStatus { status: code, body: text },
            });
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| LLMError::ParseError(e.to_string()))?;

        let content = data
            .get("choices")
            .and_then(|c| c.as_array())
            .and_then(|c| c.first())
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|content| content.as_str())
            .ok_or_else(|| LLMError::ParseError("No message content in response".to_string()))?;

        tracing::info!("{} response: {} chars", self.name, content.len());
        Ok(content.to_string())
    }
}
