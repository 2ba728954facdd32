//! OpenAI-compatible provider implementation.
//!
//! Works with OpenAI and OpenRouter, which share the `/chat/completions`
//! wire format. OpenRouter additionally receives attribution headers.
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - Usage reporting on streams via `stream_options.include_usage`
//! - Health checks via the models listing

use async_trait::async_trait;
use conclave_core::error::ProviderError;
use conclave_core::message::Message;
use conclave_core::provider::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::demo;
use crate::http;
use crate::models::resolve_model;
use crate::sse::{self, ChunkDecoder};

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const OPENROUTER_REFERER: &str = "https://conclave.dev";
const OPENROUTER_TITLE: &str = "Conclave";

/// An OpenAI-compatible model provider.
pub struct OpenAiCompatProvider {
    name: String,
    display_name: String,
    base_url: String,
    api_key: Option<String>,
    /// Extra headers sent with every request
    extra_headers: Vec<(&'static str, String)>,
    client: reqwest::Client,
}

impl OpenAiCompatProvider {
    /// Create a new OpenAI-compatible provider.
    pub fn new(
        name: impl Into<String>,
        display_name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            name: name.into(),
            display_name: display_name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
            extra_headers: Vec::new(),
            client: http::build_client()?,
        })
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: Option<String>) -> Result<Self, ProviderError> {
        Self::new("openai", "OpenAI", OPENAI_BASE_URL, api_key)
    }

    /// Create an OpenRouter provider (convenience constructor).
    pub fn openrouter(api_key: Option<String>) -> Result<Self, ProviderError> {
        let mut provider = Self::new("openrouter", "OpenRouter", OPENROUTER_BASE_URL, api_key)?;
        provider.extra_headers = vec![
            ("HTTP-Referer", OPENROUTER_REFERER.to_string()),
            ("X-Title", OPENROUTER_TITLE.to_string()),
        ];
        Ok(provider)
    }

    /// Override the base URL (proxies, test servers).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Convert our Message types to OpenAI API format.
    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str().to_string(),
                content: Some(m.content.clone()),
            })
            .collect()
    }

    fn request_body(&self, request: &CompletionRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": resolve_model(&self.name, &request.model),
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });

        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if stream && request.include_usage {
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }

        body
    }

    fn post(&self, url: &str, api_key: &str) -> reqwest::RequestBuilder {
        let mut builder = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json");
        for (name, value) in &self.extra_headers {
            builder = builder.header(*name, value);
        }
        builder
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn execute(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<Completion, ProviderError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Ok(demo::placeholder_completion(&self.display_name, &request));
        };

        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(&request, false);

        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let response = http::send(&self.name, self.post(&url, api_key).json(&body)).await?;

        let api_response: ApiResponse = response.json().await.map_err(http::parse_error)?;

        let choice = api_response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ApiError {
                status_code: 200,
                message: "No choices in response".into(),
            })?;

        let usage = api_response
            .usage
            .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens));

        Ok(Completion {
            text: choice.message.content.unwrap_or_default(),
            usage,
            model: api_response.model,
            finish_reason: choice.finish_reason,
        })
    }

    async fn stream_execute(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<EventStream, ProviderError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Ok(replay_completion(demo::placeholder_completion(
                &self.display_name,
                &request,
            )));
        };

        let url = format!("{}/chat/completions", self.base_url);
        let body = self.request_body(&request, true);

        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = http::send(
            &self.name,
            self.post(&url, api_key)
                .header("Accept", "text/event-stream")
                .json(&body),
        )
        .await?;

        Ok(sse::spawn_reader(
            &self.name,
            response,
            OpenAiDecoder::default(),
        ))
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ProviderError::NotConfigured(self.name.clone()));
        };

        let url = format!("{}/models", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Authorization", format!("Bearer {api_key}"))
            .send()
            .await
            .map_err(http::map_transport)?;

        Ok(response.status().is_success())
    }
}

/// Decodes `chat.completion.chunk` payloads.
///
/// The finish reason arrives on a choice, usage in a trailing chunk with
/// no choices, and `[DONE]` ends the stream.
#[derive(Debug, Default)]
struct OpenAiDecoder {
    finish_reason: Option<String>,
    done: bool,
}

impl ChunkDecoder for OpenAiDecoder {
    fn decode(&mut self, data: &str) -> Result<Vec<StreamEvent>, ProviderError> {
        if data == "[DONE]" {
            self.done = true;
            return Ok(vec![StreamEvent::Finished {
                reason: self.finish_reason.take().unwrap_or_else(|| "stop".into()),
            }]);
        }

        let chunk: StreamResponse = match serde_json::from_str(data) {
            Ok(c) => c,
            Err(e) => {
                trace!(data = %data, error = %e, "Ignoring unparseable SSE chunk");
                return Ok(Vec::new());
            }
        };

        if let Some(error) = chunk.error {
            return Err(error.into_provider_error());
        }

        let mut events = Vec::new();
        if let Some(choice) = chunk.choices.into_iter().next() {
            if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                events.push(StreamEvent::Token { text: content });
            }
            if choice.finish_reason.is_some() {
                self.finish_reason = choice.finish_reason;
            }
        }

        if let Some(usage) = chunk.usage {
            events.push(StreamEvent::Usage {
                usage: Usage::new(usage.prompt_tokens, usage.completion_tokens),
            });
        }

        Ok(events)
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn finish(&mut self) -> Result<Vec<StreamEvent>, ProviderError> {
        // Some compatible servers close after the finish reason without [DONE]
        match self.finish_reason.take() {
            Some(reason) => {
                self.done = true;
                Ok(vec![StreamEvent::Finished { reason }])
            }
            None => Err(ProviderError::StreamInterrupted(
                "stream ended before completion".into(),
            )),
        }
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct ApiMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    model: String,
    choices: Vec<ApiChoice>,
    usage: Option<ApiUsage>,
}

#[derive(Debug, Deserialize)]
struct ApiChoice {
    message: ApiMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

// --- Streaming SSE types ---

/// A single SSE `data: {...}` chunk from a streaming response.
#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<ApiUsage>,
    /// OpenRouter reports mid-stream failures in-band
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    message: String,
    /// An HTTP status (OpenRouter) or a string code (OpenAI)
    #[serde(default)]
    code: Option<serde_json::Value>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

impl StreamError {
    /// Classify an in-band error; unrecognised ones count as interruptions.
    fn into_provider_error(self) -> ProviderError {
        let StreamError {
            message,
            code,
            kind,
        } = self;

        let status = code.as_ref().and_then(|c| {
            c.as_u64()
                .or_else(|| c.as_str().and_then(|s| s.parse().ok()))
        });
        if let Some(status) = status.and_then(|s| u16::try_from(s).ok())
            && status >= 400
        {
            return ProviderError::from_status(status, message);
        }

        let label = code
            .as_ref()
            .and_then(|c| c.as_str())
            .or(kind.as_deref())
            .unwrap_or("");
        match label {
            "rate_limit_exceeded" | "rate_limit_error" | "insufficient_quota" => {
                ProviderError::RateLimited {
                    retry_after_secs: 5,
                }
            }
            "invalid_api_key" | "authentication_error" | "permission_error" => {
                ProviderError::AuthenticationFailed(message)
            }
            "model_not_found" => ProviderError::ModelNotFound(message),
            "invalid_request_error"
            | "content_filter"
            | "content_policy_violation"
            | "context_length_exceeded" => ProviderError::InvalidRequest(message),
            "server_error" => ProviderError::ApiError {
                status_code: 500,
                message,
            },
            _ => ProviderError::StreamInterrupted(message),
        }
    }
}
