//! Scripted providers for orchestrator tests.

use async_trait::async_trait;
use conclave_core::error::ProviderError;
use conclave_core::provider::{Completion, CompletionRequest, Provider, Usage};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Replies with queued results, then with `"<name> answer <n>"` once the
/// queue is empty. Every request is recorded.
pub struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<Result<String, ProviderError>>>,
    delay: Option<Duration>,
    calls: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedProvider {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            script: Mutex::new(VecDeque::new()),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn then(self, reply: Result<&str, ProviderError>) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(reply.map(str::to_string));
        self
    }

    /// Always fail with `error`.
    pub fn failing(name: &str, error: ProviderError) -> Self {
        let provider = Self::new(name);
        provider
            .script
            .lock()
            .unwrap()
            .extend(std::iter::repeat_n(Err(error), 64));
        provider
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<CompletionRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// The user prompt of every recorded call.
    pub fn user_prompts(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|r| r.messages.last().map(|m| m.content.clone()))
            .collect()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, request: CompletionRequest) -> Result<Completion, ProviderError> {
        let call_number = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(request.clone());
            calls.len()
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let next = self.script.lock().unwrap().pop_front();
        let text = match next {
            Some(reply) => reply?,
            None => format!("{} answer {call_number}", self.name),
        };

        Ok(Completion {
            text,
            usage: Some(Usage::new(10, 5)),
            model: request.model,
            finish_reason: Some("stop".into()),
        })
    }
}
