//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Streaming via typed SSE events (`content_block_delta`, `message_delta`)

use async_trait::async_trait;
use conclave_core::error::ProviderError;
use conclave_core::message::{Message, Role, split_system};
use conclave_core::provider::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::demo;
use crate::http;
use crate::models::resolve_model;
use crate::sse::{self, ChunkDecoder};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl AnthropicProvider {
    /// Create a new Anthropic provider.
    pub fn new(api_key: Option<String>) -> Result<Self, ProviderError> {
        Ok(Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
            client: http::build_client()?,
        })
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Convert messages to Anthropic API format.
    ///
    /// The API only knows user and assistant turns; tool output is relayed
    /// as user text.
    fn to_api_messages(messages: &[&Message]) -> Vec<AnthropicMessage> {
        messages
            .iter()
            .map(|msg| AnthropicMessage {
                role: match msg.role {
                    Role::Assistant => "assistant".into(),
                    _ => "user".into(),
                },
                content: msg.content.clone(),
            })
            .collect()
    }

    fn request_body(request: &CompletionRequest, stream: bool) -> serde_json::Value {
        let (system, messages) = split_system(&request.messages);

        let mut body = serde_json::json!({
            "model": resolve_model("anthropic", &request.model),
            "messages": Self::to_api_messages(&messages),
            "max_tokens": request.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "temperature": request.temperature,
        });

        if let Some(sys) = system {
            body["system"] = serde_json::json!(sys);
        }

        if stream {
            body["stream"] = serde_json::json!(true);
        }

        body
    }

    fn post(&self, api_key: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("Content-Type", "application/json")
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn execute(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<Completion, ProviderError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Ok(demo::placeholder_completion("Anthropic", &request));
        };

        let body = Self::request_body(&request, false);
        debug!(provider = "anthropic", model = %request.model, "Sending completion request");

        let response = http::send("anthropic", self.post(api_key).json(&body)).await?;
        let api_response: AnthropicResponse = response.json().await.map_err(http::parse_error)?;

        Ok(api_response.into_completion())
    }

    async fn stream_execute(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<EventStream, ProviderError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Ok(replay_completion(demo::placeholder_completion(
                "Anthropic",
                &request,
            )));
        };

        let body = Self::request_body(&request, true);
        debug!(provider = "anthropic", model = %request.model, "Sending streaming request");

        let response = http::send(
            "anthropic",
            self.post(api_key)
                .header("Accept", "text/event-stream")
                .json(&body),
        )
        .await?;

        Ok(sse::spawn_reader(
            "anthropic",
            response,
            AnthropicDecoder::default(),
        ))
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ProviderError::NotConfigured("anthropic".into()));
        };

        // Minimal request to verify the key
        let body = serde_json::json!({
            "model": resolve_model("anthropic", "claude-3-haiku"),
            "messages": [{"role": "user", "content": "hi"}],
            "max_tokens": 1,
        });

        let response = self
            .post(api_key)
            .json(&body)
            .send()
            .await
            .map_err(http::map_transport)?;

        // 401 = bad key; anything else means the API is reachable
        Ok(response.status().as_u16() != 401)
    }
}

/// Decodes the typed Messages streaming events.
///
/// `message_start` carries input tokens, `message_delta` carries the stop
/// reason and output tokens, `message_stop` ends the stream.
#[derive(Debug, Default)]
struct AnthropicDecoder {
    input_tokens: u32,
    output_tokens: u32,
    stop_reason: Option<String>,
    done: bool,
}

impl ChunkDecoder for AnthropicDecoder {
    fn decode(&mut self, data: &str) -> Result<Vec<StreamEvent>, ProviderError> {
        let event: serde_json::Value = match serde_json::from_str(data) {
            Ok(v) => v,
            Err(e) => {
                trace!(error = %e, data = %data, "Ignoring unparseable Anthropic SSE");
                return Ok(Vec::new());
            }
        };

        match event["type"].as_str().unwrap_or("") {
            "message_start" => {
                if let Some(input) = event["message"]["usage"]["input_tokens"].as_u64() {
                    self.input_tokens = input as u32;
                }
                Ok(Vec::new())
            }
            "content_block_delta" => {
                let delta = &event["delta"];
                match (delta["type"].as_str(), delta["text"].as_str()) {
                    (Some("text_delta"), Some(text)) if !text.is_empty() => {
                        Ok(vec![StreamEvent::Token {
                            text: text.to_string(),
                        }])
                    }
                    _ => Ok(Vec::new()),
                }
            }
            "message_delta" => {
                if let Some(reason) = event["delta"]["stop_reason"].as_str() {
                    self.stop_reason = Some(reason.to_string());
                }
                if let Some(output) = event["usage"]["output_tokens"].as_u64() {
                    self.output_tokens = output as u32;
                }
                if let Some(input) = event["usage"]["input_tokens"].as_u64() {
                    self.input_tokens = input as u32;
                }
                Ok(Vec::new())
            }
            "message_stop" => {
                self.done = true;
                Ok(vec![
                    StreamEvent::Usage {
                        usage: Usage::new(self.input_tokens, self.output_tokens),
                    },
                    StreamEvent::Finished {
                        reason: self.stop_reason.take().unwrap_or_else(|| "stop".into()),
                    },
                ])
            }
            "error" => {
                let kind = event["error"]["type"].as_str().unwrap_or("");
                let message = event["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown error")
                    .to_string();
                Err(match kind {
                    "overloaded_error" | "api_error" => ProviderError::ApiError {
                        status_code: 529,
                        message,
                    },
                    "rate_limit_error" => ProviderError::RateLimited {
                        retry_after_secs: 5,
                    },
                    "authentication_error" | "permission_error" => {
                        ProviderError::AuthenticationFailed(message)
                    }
                    "not_found_error" => ProviderError::ModelNotFound(message),
                    "invalid_request_error" => ProviderError::InvalidRequest(message),
                    _ => ProviderError::StreamInterrupted(message),
                })
            }
            // ping, content_block_start, content_block_stop
            _ => Ok(Vec::new()),
        }
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn finish(&mut self) -> Result<Vec<StreamEvent>, ProviderError> {
        Err(ProviderError::StreamInterrupted(
            "stream ended before message_stop".into(),
        ))
    }
}

// --- Anthropic API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct AnthropicMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct AnthropicResponse {
    model: String,
    content: Vec<ResponseContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    usage: Option<AnthropicUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct AnthropicUsage {
    input_tokens: u32,
    output_tokens: u32,
}

impl AnthropicResponse {
    fn into_completion(self) -> Completion {
        let text = self
            .content
            .into_iter()
            .filter_map(|block| match block {
                ResponseContentBlock::Text { text } => Some(text),
                ResponseContentBlock::Other => None,
            })
            .collect::<Vec<_>>()
            .join("");

        Completion {
            text,
            usage: self
                .usage
                .map(|u| Usage::new(u.input_tokens, u.output_tokens)),
            model: self.model,
            finish_reason: self.stop_reason,
        }
    }
}
