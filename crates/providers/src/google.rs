//! Google Gemini provider implementation.
//!
//! - API key passed as the `key` query parameter
//! - `generateContent` for complete responses,
//!   `streamGenerateContent?alt=sse` for streams
//! - No system role: the system prompt is folded into the first user part
//! - Streams have no end marker; the body simply ends after the chunk
//!   carrying `finishReason`

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

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini `generateContent` provider.
pub struct GoogleProvider {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl GoogleProvider {
    pub fn new(api_key: Option<String>) -> Result<Self, ProviderError> {
        Ok(Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.filter(|k| !k.is_empty()),
            client: http::build_client()?,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    /// Convert messages to `contents`, folding the system prompt into the
    /// first user turn.
    fn to_contents(messages: &[Message]) -> Vec<Content> {
        let (system, rest) = split_system(messages);
        let mut pending_system = system;

        rest.into_iter()
            .map(|msg| {
                let role = match msg.role {
                    Role::Assistant => "model",
                    _ => "user",
                };
                let text = match (role, pending_system.take()) {
                    ("user", Some(sys)) => format!("{sys}\n\n{}", msg.content),
                    (_, Some(sys)) => {
                        pending_system = Some(sys);
                        msg.content.clone()
                    }
                    (_, None) => msg.content.clone(),
                };
                Content {
                    role: role.into(),
                    parts: vec![Part { text }],
                }
            })
            .collect()
    }

    fn request_body(request: &CompletionRequest) -> serde_json::Value {
        let mut generation_config = serde_json::json!({
            "temperature": request.temperature,
        });
        if let Some(max_tokens) = request.max_tokens {
            generation_config["maxOutputTokens"] = serde_json::json!(max_tokens);
        }

        serde_json::json!({
            "contents": Self::to_contents(&request.messages),
            "generationConfig": generation_config,
        })
    }

    fn url(&self, model: &str, method: &str, api_key: &str) -> String {
        let model = resolve_model("google", model);
        let query = if method == "streamGenerateContent" {
            format!("alt=sse&key={api_key}")
        } else {
            format!("key={api_key}")
        };
        format!("{}/models/{model}:{method}?{query}", self.base_url)
    }
}

#[async_trait]
impl Provider for GoogleProvider {
    fn name(&self) -> &str {
        "google"
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn execute(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<Completion, ProviderError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Ok(demo::placeholder_completion("Google", &request));
        };

        let url = self.url(&request.model, "generateContent", api_key);
        debug!(provider = "google", model = %request.model, "Sending completion request");

        let response = http::send(
            "google",
            self.client.post(&url).json(&Self::request_body(&request)),
        )
        .await?;

        let api_response: GenerateResponse = response.json().await.map_err(http::parse_error)?;

        let candidate = api_response.candidates.into_iter().next();
        let finish_reason = candidate.as_ref().and_then(|c| c.finish_reason.clone());
        let text = candidate.map(Candidate::text).unwrap_or_default();

        Ok(Completion {
            text,
            usage: api_response.usage_metadata.map(UsageMetadata::into_usage),
            model: resolve_model("google", &request.model),
            finish_reason,
        })
    }

    async fn stream_execute(
        &self,
        request: CompletionRequest,
    ) -> std::result::Result<EventStream, ProviderError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Ok(replay_completion(demo::placeholder_completion(
                "Google", &request,
            )));
        };

        let url = self.url(&request.model, "streamGenerateContent", api_key);
        debug!(provider = "google", model = %request.model, "Sending streaming request");

        let response = http::send(
            "google",
            self.client.post(&url).json(&Self::request_body(&request)),
        )
        .await?;

        Ok(sse::spawn_reader(
            "google",
            response,
            GeminiDecoder::default(),
        ))
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(ProviderError::NotConfigured("google".into()));
        };

        let response = self
            .client
            .get(format!("{}/models?key={api_key}", self.base_url))
            .send()
            .await
            .map_err(http::map_transport)?;

        Ok(response.status().is_success())
    }
}

/// Each payload is a full `GenerateContentResponse` holding a text delta;
/// the last one carries `finishReason` and cumulative usage.
#[derive(Debug, Default)]
struct GeminiDecoder {
    usage: Option<Usage>,
    finish_reason: Option<String>,
}

impl ChunkDecoder for GeminiDecoder {
    fn decode(&mut self, data: &str) -> Result<Vec<StreamEvent>, ProviderError> {
        let chunk: GenerateResponse = match serde_json::from_str(data) {
            Ok(c) => c,
            Err(e) => {
                trace!(error = %e, data = %data, "Ignoring unparseable Gemini SSE");
                return Ok(Vec::new());
            }
        };

        if let Some(usage) = chunk.usage_metadata {
            self.usage = Some(usage.into_usage());
        }

        let mut events = Vec::new();
        if let Some(candidate) = chunk.candidates.into_iter().next() {
            if let Some(reason) = candidate.finish_reason.clone() {
                self.finish_reason = Some(reason);
            }
            let text = candidate.text();
            if !text.is_empty() {
                events.push(StreamEvent::Token { text });
            }
        }
        Ok(events)
    }

    fn is_done(&self) -> bool {
        false
    }

    fn finish(&mut self) -> Result<Vec<StreamEvent>, ProviderError> {
        let Some(reason) = self.finish_reason.take() else {
            return Err(ProviderError::StreamInterrupted(
                "stream ended without finishReason".into(),
            ));
        };

        let mut events = Vec::new();
        if let Some(usage) = self.usage.take() {
            events.push(StreamEvent::Usage { usage });
        }
        events.push(StreamEvent::Finished {
            reason: reason.to_lowercase(),
        });
        Ok(events)
    }
}

// --- Gemini API types (internal) ---

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(default)]
    role: String,
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
    #[serde(default)]
    finish_reason: Option<String>,
}

impl Candidate {
    fn text(self) -> String {
        self.content
            .map(|c| c.parts.into_iter().map(|p| p.text).collect::<String>())
            .unwrap_or_default()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

impl UsageMetadata {
    fn into_usage(self) -> Usage {
        Usage::new(self.prompt_token_count, self.candidates_token_count)
    }
}
