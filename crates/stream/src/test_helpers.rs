//! A provider whose streams follow a script, one entry per opened stream.

use async_trait::async_trait;
use conclave_core::error::ProviderError;
use conclave_core::provider::{
    Completion, CompletionRequest, EventStream, Provider, STREAM_BUFFER, StreamEvent, Usage,
};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::mpsc;

type Item = Result<StreamEvent, ProviderError>;

pub enum Attempt {
    /// Opening the stream fails
    Refuse(ProviderError),
    /// Deliver the items, then close the stream
    Deliver(Vec<Item>),
    /// Deliver the items, then stay silent with the stream open
    Stall(Vec<Item>),
    /// Never finish opening the stream
    Hang,
}

pub struct ScriptedStreamProvider {
    name: String,
    attempts: Mutex<VecDeque<Attempt>>,
    requests: Mutex<Vec<CompletionRequest>>,
    stalled: Mutex<Vec<mpsc::Sender<Item>>>,
}

impl ScriptedStreamProvider {
    pub fn new(name: &str, attempts: Vec<Attempt>) -> Self {
        Self {
            name: name.to_string(),
            attempts: Mutex::new(attempts.into()),
            requests: Mutex::new(Vec::new()),
            stalled: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

pub fn tokens(texts: &[&str]) -> Vec<Item> {
    texts
        .iter()
        .map(|t| Ok(StreamEvent::Token { text: t.to_string() }))
        .collect()
}

/// Tokens followed by usage and a `stop` finish.
pub fn complete(texts: &[&str], usage: Usage) -> Vec<Item> {
    let mut items = tokens(texts);
    items.push(Ok(StreamEvent::Usage { usage }));
    items.push(Ok(StreamEvent::Finished {
        reason: "stop".into(),
    }));
    items
}

#[async_trait]
impl Provider for ScriptedStreamProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _request: CompletionRequest) -> Result<Completion, ProviderError> {
        Err(ProviderError::InvalidRequest("stream-only test provider".into()))
    }

    async fn stream_execute(&self, request: CompletionRequest) -> Result<EventStream, ProviderError> {
        self.requests.lock().unwrap().push(request);
        let attempt = self
            .attempts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Attempt::Refuse(ProviderError::InvalidRequest("script exhausted".into())));

        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        match attempt {
            Attempt::Refuse(e) => return Err(e),
            Attempt::Hang => return std::future::pending().await,
            Attempt::Deliver(items) => {
                for item in items {
                    tx.try_send(item).unwrap();
                }
            }
            Attempt::Stall(items) => {
                for item in items {
                    tx.try_send(item).unwrap();
                }
                self.stalled.lock().unwrap().push(tx);
            }
        }
        Ok(rx)
    }
}
