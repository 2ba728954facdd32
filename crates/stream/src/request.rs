use conclave_config::KNOWN_PROVIDERS;
use conclave_core::error::StreamError;
use conclave_core::message::Message;
use conclave_core::provider::CompletionRequest;
use serde::{Deserialize, Serialize};

const MAX_CONTENT_CHARS: usize = 100_000;
const MAX_MODEL_CHARS: usize = 100;
const MAX_TOKENS_LIMIT: u32 = 32_000;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamOptions {
    #[serde(default, alias = "include_usage")]
    pub include_usage: Option<bool>,
}

/// A client's request to stream one model response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamRequest {
    pub messages: Vec<Message>,
    pub provider: String,
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default, alias = "max_tokens")]
    pub max_tokens: Option<u32>,
    #[serde(default, alias = "stream_options")]
    pub stream_options: Option<StreamOptions>,
    #[serde(default, alias = "council_id")]
    pub council_id: Option<String>,
    #[serde(default, alias = "agent_id")]
    pub agent_id: Option<String>,
}

impl StreamRequest {
    /// Shape checks made before anything is counted or stored.
    pub fn validate(&self) -> Result<(), StreamError> {
        let invalid = |msg: String| Err(StreamError::Validation(msg));

        if self.messages.is_empty() {
            return invalid("messages must not be empty".into());
        }
        for (i, message) in self.messages.iter().enumerate() {
            let chars = message.content.chars().count();
            if chars == 0 || chars > MAX_CONTENT_CHARS {
                return invalid(format!(
                    "messages[{i}].content must be 1 to {MAX_CONTENT_CHARS} characters"
                ));
            }
        }

        let model_chars = self.model.chars().count();
        if model_chars == 0 || model_chars > MAX_MODEL_CHARS {
            return invalid(format!("model must be 1 to {MAX_MODEL_CHARS} characters"));
        }

        if let Some(t) = self.temperature
            && !(0.0..=2.0).contains(&t)
        {
            return invalid("temperature must be between 0 and 2".into());
        }

        if let Some(max) = self.max_tokens
            && !(1..=MAX_TOKENS_LIMIT).contains(&max)
        {
            return invalid(format!("maxTokens must be between 1 and {MAX_TOKENS_LIMIT}"));
        }

        if !KNOWN_PROVIDERS.contains(&self.provider.as_str()) {
            return Err(StreamError::UnknownProvider(self.provider.clone()));
        }
        Ok(())
    }

    /// The provider request for the first attempt.
    pub fn to_completion_request(&self) -> CompletionRequest {
        let mut request = CompletionRequest {
            model: self.model.clone(),
            messages: self.messages.clone(),
            temperature: 0.7,
            max_tokens: self.max_tokens,
            include_usage: self
                .stream_options
                .as_ref()
                .and_then(|o| o.include_usage)
                .unwrap_or(true),
        };
        if let Some(t) = self.temperature {
            request.temperature = t;
        }
        request
    }
}
