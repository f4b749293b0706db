//! Scripted backends for unit tests

use super::router::{Route, RoutingTable, TaskRouter};
use super::{CallOptions, LLMBackend, LLMError, Message, TaskCategory};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Reply = dyn Fn(&[Message]) -> Result<String, LLMError> + Send + Sync;

/// Backend whose answer is computed by a closure over the received messages
pub struct ScriptedBackend {
    reply: Box<Reply>,
    calls: AtomicU32,
    prompts: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedBackend {
    pub fn new<F>(reply: F) -> Arc<Self>
    where
        F: Fn(&[Message]) -> Result<String, LLMError> + Send + Sync + 'static,
    {
        Arc::new(Self {
            reply: Box::new(reply),
            calls: AtomicU32::new(0),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn answering(text: &'static str) -> Arc<Self> {
        Self::new(move |_| Ok(text.to_string()))
    }

    pub fn failing() -> Arc<Self> {
        Self::new(|_| Err(LLMError::NetworkError("connection refused".to_string())))
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// User message of every call so far
    pub fn user_prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|p| {
                p.iter()
                    .filter_map(|msgs| msgs.last().map(|m| m.content.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl LLMBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, messages: &[Message], _options: &CallOptions) -> super::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(messages.to_vec());
        }
        (self.reply)(messages)
    }
}

/// Router sending every category to `backend`, one attempt, no delay
pub fn router_with(backend: &Arc<ScriptedBackend>) -> Arc<TaskRouter> {
    let table = TaskCategory::ALL.iter().fold(RoutingTable::new(), |t, c| {
        t.with_route(*c, Route::new("scripted", &[]))
    });
    let backend: Arc<dyn LLMBackend> = Arc::clone(backend) as Arc<dyn LLMBackend>;
    match TaskRouter::new(vec![backend], table, RetryPolicy::new(1, Duration::ZERO), 8000) {
        Ok(router) => Arc::new(router),
        Err(e) => panic!("scripted router: {}", e),
    }
}
