//! Task Router
//!
//! Maps each task category to a primary backend and an ordered list of
//! fallbacks. Every backend call goes through the retry policy; when a
//! backend's attempts are used up the next one in the category's chain is
//! tried. The chain is declared in configuration and never reordered at
//! runtime.

use super::context::ContextCompactor;
use super::openrouter::OpenRouterBackend;
use super::{CallOptions, LLMBackend, Message, TaskCategory};
use crate::config::{Config, LLMConfig};
use crate::retry::RetryPolicy;
use sdk::errors::EngineError;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Routing failures
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("All backends exhausted for category {category}")]
    AllBackendsExhausted {
        category: TaskCategory,
        last_error: Option<String>,
    },

    #[error("Routing for {category} names unknown backend '{backend}'")]
    UnknownBackend {
        category: TaskCategory,
        backend: String,
    },

    #[error("No route declared for category {0}")]
    MissingRoute(TaskCategory),
}

impl From<RouterError> for EngineError {
    fn from(err: RouterError) -> Self {
        match err {
            RouterError::AllBackendsExhausted { category, .. } => {
                EngineError::AllBackendsExhausted(category.to_string())
            }
            RouterError::UnknownBackend { backend, .. } => EngineError::UnknownBackend(backend),
            RouterError::MissingRoute(category) => {
                EngineError::Config(format!("no route declared for category {}", category))
            }
        }
    }
}

/// Primary backend plus ordered fallbacks
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    pub primary: String,
    pub fallbacks: Vec<String>,
}

impl Route {
    pub fn new(primary: impl Into<String>, fallbacks: &[&str]) -> Self {
        Self {
            primary: primary.into(),
            fallbacks: fallbacks.iter().map(|s| s.to_string()).collect(),
        }
    }

    /// Primary first, then fallbacks in declared order
    pub fn chain(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary.as_str()).chain(self.fallbacks.iter().map(String::as_str))
    }
}

/// Category to route table
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoutingTable {
    routes: BTreeMap<TaskCategory, Route>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_route(mut self, category: TaskCategory, route: Route) -> Self {
        self.routes.insert(category, route);
        self
    }

    pub fn get(&self, category: TaskCategory) -> Option<&Route> {
        self.routes.get(&category)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&TaskCategory, &Route)> {
        self.routes.iter()
    }

    /// Read `[llm.routing]`
    pub fn from_config(llm: &LLMConfig) -> Result<Self, EngineError> {
        let mut table = Self::new();
        for (name, route) in &llm.routing {
            let category = name
                .parse::<TaskCategory>()
                .map_err(|e| EngineError::Config(format!("llm.routing: {}", e)))?;
            table.routes.insert(
                category,
                Route {
                    primary: route.primary.clone(),
                    fallbacks: route.fallbacks.clone(),
                },
            );
        }
        Ok(table)
    }
}

/// Usage counters
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RouterStats {
    pub call_counts: BTreeMap<String, u64>,
    pub total_calls: u64,
    pub cache_size: usize,
}

/// Conversation handed to [`TaskRouter::route_with_context`]
#[derive(Debug, Clone)]
pub enum Prompt {
    Messages(Vec<Message>),
    Text(String),
}

impl From<Vec<Message>> for Prompt {
    fn from(messages: Vec<Message>) -> Self {
        Prompt::Messages(messages)
    }
}

impl From<String> for Prompt {
    fn from(text: String) -> Self {
        Prompt::Text(text)
    }
}

impl From<&str> for Prompt {
    fn from(text: &str) -> Self {
        Prompt::Text(text.to_string())
    }
}

impl Prompt {
    fn into_messages(self) -> Vec<Message> {
        match self {
            Prompt::Messages(messages) => messages,
            Prompt::Text(text) => vec![Message::user(text)],
        }
    }
}

/// Category router with retry, fallback and usage accounting
pub struct TaskRouter {
    backends: HashMap<String, Arc<dyn LLMBackend>>,
    table: RoutingTable,
    policy: RetryPolicy,
    compactor: ContextCompactor,
    usage: HashMap<String, AtomicU64>,
}

impl TaskRouter {
    /// Create a router
    ///
    /// Every category must have a route and every route may only name
    /// registered backends.
    pub fn new(
        backends: Vec<Arc<dyn LLMBackend>>,
        table: RoutingTable,
        policy: RetryPolicy,
        max_context_tokens: usize,
    ) -> Result<Self, RouterError> {
        let backends: HashMap<String, Arc<dyn LLMBackend>> = backends
            .into_iter()
            .map(|b| (b.name().to_string(), b))
            .collect();

        for category in TaskCategory::ALL {
            let route = table.get(category).ok_or(RouterError::MissingRoute(category))?;
            for name in route.chain() {
                if !backends.contains_key(name) {
                    return Err(RouterError::UnknownBackend {
                        category,
                        backend: name.to_string(),
                    });
                }
            }
        }

        let usage = backends
            .keys()
            .map(|name| (name.clone(), AtomicU64::new(0)))
            .collect();

        Ok(Self {
            backends,
            table,
            policy,
            compactor: ContextCompactor::new(max_context_tokens),
            usage,
        })
    }

    /// Build OpenRouter backends and the routing table from configuration
    pub fn from_config(config: &Config) -> Result<Self, EngineError> {
        let mut backends: Vec<Arc<dyn LLMBackend>> = Vec::new();
        for name in config.llm.backends.keys() {
            let backend = OpenRouterBackend::from_config(name, &config.llm)?;
            if !backend.has_api_key() {
                tracing::warn!(
                    "{} is not set; backend {} will fail",
                    config.llm.api_key_env,
                    name
                );
            }
            backends.push(Arc::new(backend));
        }

        let table = RoutingTable::from_config(&config.llm)?;
        let policy = config.retry.policy(config.llm.timeout());

        Ok(Self::new(
            backends,
            table,
            policy,
            config.llm.max_context_tokens,
        )?)
    }

    pub fn routing_table(&self) -> &RoutingTable {
        &self.table
    }

    /// Whether any backend on the category's chain is configured
    pub fn can_serve(&self, category: TaskCategory) -> bool {
        self.table.get(category).is_some_and(|route| {
            route
                .chain()
                .filter_map(|name| self.backends.get(name))
                .any(|backend| backend.is_configured())
        })
    }

    /// Call the category's primary backend, then each fallback, until one
    /// answers.
    pub async fn call(
        &self,
        category: TaskCategory,
        messages: &[Message],
        options: &CallOptions,
    ) -> Result<String, RouterError> {
        let route = self
            .table
            .get(category)
            .ok_or(RouterError::MissingRoute(category))?;

        let mut last_error = None;

        for (position, name) in route.chain().enumerate() {
            let Some(backend) = self.backends.get(name) else {
                continue;
            };

            if position == 0 {
                tracing::info!("Trying primary backend {} for {}", name, category);
            } else {
                tracing::info!("Trying fallback backend {} for {}", name, category);
            }

            let label = format!("{}/{}", category, name);
            let result = self
                .policy
                .run(&label, move |_| backend.complete(messages, options))
                .await;

            match result {
                Ok(text) => {
                    self.record_success(name);
                    tracing::info!("Backend {} succeeded for {}", name, category);
                    return Ok(text);
                }
                Err(e) => {
                    tracing::warn!("Backend {} failed for {}: {}", name, category, e);
                    last_error = Some(e.to_string());
                }
            }
        }

        tracing::error!("All backends exhausted for {}", category);
        Err(RouterError::AllBackendsExhausted {
            category,
            last_error,
        })
    }

    /// Prepend compacted context as a system message, then [`Self::call`]
    pub async fn route_with_context(
        &self,
        category: TaskCategory,
        prompt: impl Into<Prompt>,
        context: Option<&Map<String, Value>>,
        options: &CallOptions,
    ) -> Result<String, RouterError> {
        let mut messages = prompt.into().into_messages();

        if let Some(context) = context.filter(|c| !c.is_empty()) {
            let compacted = self.compactor.compact(category, context);
            messages.insert(
                0,
                Message::system(format!("Relevant context for this task:\n{}", compacted)),
            );
        }

        self.call(category, &messages, options).await
    }

    fn record_success(&self, name: &str) {
        if let Some(counter) = self.usage.get(name) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> RouterStats {
        let call_counts: BTreeMap<String, u64> = self
            .usage
            .iter()
            .map(|(name, count)| (name.clone(), count.load(Ordering::Relaxed)))
            .collect();
        let total_calls = call_counts.values().sum();

        RouterStats {
            call_counts,
            total_calls,
            cache_size: self.compactor.cache_size(),
        }
    }
}
