//! Connection state machine for one streaming session.
//!
//! ```text
//! idle → connecting → connected → streaming ─┬→ disconnected
//!            ↑            │           │      └→ error
//!            └─ reconnecting ←────────┘
//! ```
//!
//! Every edge moves forward except `reconnecting → connecting`.
//! `disconnected` and `error` are terminal.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Streaming,
    Reconnecting,
    Disconnected,
    Error,
}

impl ConnectionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Error)
    }

    pub fn can_transition_to(&self, next: ConnectionState) -> bool {
        use ConnectionState::*;

        match (self, next) {
            (Idle, Connecting) => true,
            (Connecting, Connected | Reconnecting) => true,
            (Connected, Streaming | Reconnecting) => true,
            (Streaming, Reconnecting) => true,
            (Reconnecting, Connecting) => true,
            // Any live state may end
            (from, Disconnected | Error) => !from.is_terminal(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Streaming => "streaming",
            Self::Reconnecting => "reconnecting",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
