//! Frames relayed to streaming clients.
//!
//! Each frame is one JSON object on one SSE `data:` line, tagged by `type`:
//! - `token`     — a text delta with its position in the response
//! - `heartbeat` — keeps intermediaries from closing an idle connection
//! - `done`      — successful end, with usage totals
//! - `error`     — failed end, with a stable code and a retry hint
//!
//! A session emits exactly one `done` or one `error`, and nothing after it.
//! A cancelled session emits neither.

use conclave_core::error::ProviderError;
use conclave_core::provider::Usage;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamFrame {
    Token {
        token: String,
        index: u64,
    },

    Heartbeat {
        /// Unix seconds
        timestamp: i64,
    },

    Done {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        usage: Option<Usage>,
        finish_reason: String,
    },

    Error {
        error: String,
        code: String,
        retry: bool,
    },
}

impl StreamFrame {
    pub fn heartbeat() -> Self {
        Self::Heartbeat {
            timestamp: chrono::Utc::now().timestamp(),
        }
    }

    pub fn from_error(error: &ProviderError) -> Self {
        Self::Error {
            error: error.to_string(),
            code: error.code().to_string(),
            retry: error.is_retryable(),
        }
    }

    /// SSE event name for this frame.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Token { .. } => "token",
            Self::Heartbeat { .. } => "heartbeat",
            Self::Done { .. } => "done",
            Self::Error { .. } => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done { .. } | Self::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_frame_shape() {
        let frame = StreamFrame::Token {
            token: "Hel".into(),
            index: 0,
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json, serde_json::json!({"type": "token", "token": "Hel", "index": 0}));
    }

    #[test]
    fn error_frame_carries_code_and_hint() {
        let frame = StreamFrame::from_error(&ProviderError::RateLimited {
            retry_after_secs: 3,
        });
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["code"], "rate_limit");
        assert_eq!(json["retry"], true);
        assert!(frame.is_terminal());
    }

    #[test]
    fn done_frame_includes_usage() {
        let frame = StreamFrame::Done {
            usage: Some(Usage::new(3, 4)),
            finish_reason: "stop".into(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["usage"]["total_tokens"], 7);
        assert_eq!(json["finish_reason"], "stop");
        assert_eq!(frame.event_type(), "done");
    }
}
