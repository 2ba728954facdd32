//! Streaming session records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::Usage;

/// Persisted status of a streaming session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Streaming,
    Completed,
    Error,
    Cancelled,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Streaming => "streaming",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "streaming" => Some(Self::Streaming),
            "completed" => Some(Self::Completed),
            "error" => Some(Self::Error),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// One streamed model response. Created at stream start and finalized
/// exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamingSession {
    pub id: String,
    pub user_id: String,
    pub provider: String,
    pub model: String,
    pub status: SessionStatus,
    pub started_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub council_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl StreamingSession {
    pub fn start(
        user_id: impl Into<String>,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            provider: provider.into(),
            model: model.into(),
            status: SessionStatus::Streaming,
            started_at: Utc::now(),
            ended_at: None,
            error_code: None,
            error_message: None,
            council_id: None,
            agent_id: None,
            usage: None,
        }
    }
}

/// Terminal state written when a session ends.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOutcome {
    pub status: SessionStatus,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub usage: Option<Usage>,
}

impl SessionOutcome {
    pub fn completed(usage: Usage) -> Self {
        Self {
            status: SessionStatus::Completed,
            error_code: None,
            error_message: None,
            usage: Some(usage),
        }
    }

    pub fn failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: SessionStatus::Error,
            error_code: Some(code.into()),
            error_message: Some(message.into()),
            usage: None,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: SessionStatus::Cancelled,
            error_code: None,
            error_message: None,
            usage: None,
        }
    }
}
