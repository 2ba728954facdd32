//! Provider trait — the abstraction over model backends.
//!
//! A Provider knows how to send a conversation to a model and get a response
//! back, either as a complete text or as a stream of events.
//!
//! Implementations: OpenAI-compatible (OpenAI, OpenRouter), Anthropic, Google.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::ProviderError;
use crate::message::Message;

/// Configuration for a provider request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// The model to use. Short aliases are resolved by the adapter.
    pub model: String,

    /// The conversation messages
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 2.0 = most random)
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    /// Ask the backend to report token usage on streams
    #[serde(default = "default_include_usage")]
    pub include_usage: bool,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_include_usage() -> bool {
    true
}

impl CompletionRequest {
    /// A single-turn request: one system directive and one user prompt.
    pub fn single_turn(
        model: impl Into<String>,
        system_prompt: impl Into<String>,
        user_prompt: impl Into<String>,
    ) -> Self {
        Self {
            model: model.into(),
            messages: vec![Message::system(system_prompt), Message::user(user_prompt)],
            temperature: default_temperature(),
            max_tokens: None,
            include_usage: true,
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

/// A complete (non-streaming) response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    /// The generated text
    pub text: String,

    /// Token usage statistics
    pub usage: Option<Usage>,

    /// Which model actually responded (may differ from requested)
    pub model: String,

    /// Why generation stopped, as reported by the backend
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Sum usage across several stream attempts.
    pub fn add(&mut self, other: Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}

/// One normalized event from a provider stream.
///
/// Every backend's chunk framing is reduced to this vocabulary. Errors
/// travel as the `Err` side of the channel item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A text delta, relayed verbatim.
    Token { text: String },

    /// Token usage totals reported by the backend.
    Usage { usage: Usage },

    /// The backend finished generating. Always the last event on success.
    Finished { reason: String },
}

/// Receiving half of a provider stream.
pub type EventStream = mpsc::Receiver<std::result::Result<StreamEvent, ProviderError>>;

/// Channel capacity for provider streams.
pub const STREAM_BUFFER: usize = 64;

/// Replay a complete response as a stream: one token, usage, finish.
///
/// The producer stops as soon as the receiver is dropped.
pub fn replay_completion(completion: Completion) -> EventStream {
    let (tx, rx) = mpsc::channel(4);
    tokio::spawn(async move {
        if tx
            .send(Ok(StreamEvent::Token {
                text: completion.text,
            }))
            .await
            .is_err()
        {
            return;
        }
        if let Some(usage) = completion.usage {
            let _ = tx.send(Ok(StreamEvent::Usage { usage })).await;
        }
        let _ = tx
            .send(Ok(StreamEvent::Finished {
                reason: completion.finish_reason.unwrap_or_else(|| "stop".into()),
            }))
            .await;
    });
    rx
}

/// The core Provider trait.
///
/// Every model backend implements this trait. The orchestrator and the
/// streaming manager call `execute()` or `stream_execute()` without knowing
/// which backend is behind it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Provider key (e.g., "openai", "anthropic", "google", "openrouter").
    fn name(&self) -> &str;

    /// Whether a credential is present. Unconfigured providers answer with
    /// deterministic placeholder text instead of failing.
    fn is_configured(&self) -> bool {
        true
    }

    /// Send a request and get a complete response.
    async fn execute(&self, request: CompletionRequest) -> std::result::Result<Completion, ProviderError>;

    /// Send a request and get a stream of events.
    ///
    /// Default implementation calls `execute()` and replays the result
    /// through [`replay_completion`].
    async fn stream_execute(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<EventStream, ProviderError> {
        let completion = self.execute(request).await?;
        Ok(replay_completion(completion))
    }

    /// Health check — can we reach the provider with the configured key?
    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        Ok(true)
    }
}
