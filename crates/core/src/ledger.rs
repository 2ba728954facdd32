//! Rate-limit and credit ledger records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Request counter for one (identifier, endpoint) pair.
///
/// There is at most one record per pair. An expired window is reset in
/// place rather than a new record being added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRecord {
    pub identifier: String,
    pub endpoint: String,
    pub window_start: DateTime<Utc>,
    pub request_count: u32,
}

/// Outcome of one rate-limit hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateDecision {
    pub allowed: bool,
    /// Configured maximum for the window
    pub limit: u32,
    /// Requests left in the current window after this one
    pub remaining: u32,
    /// Seconds until the current window expires
    pub reset_after_secs: u64,
    /// Set on rejection
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl RateDecision {
    /// Build a decision from the record state after the hit.
    pub fn from_record(
        record: &RateLimitRecord,
        allowed: bool,
        window_secs: u64,
        max_requests: u32,
        now: DateTime<Utc>,
    ) -> Self {
        let elapsed = (now - record.window_start).num_seconds().max(0) as u64;
        let reset_after_secs = window_secs.saturating_sub(elapsed).clamp(1, window_secs.max(1));
        Self {
            allowed,
            limit: max_requests,
            remaining: max_requests.saturating_sub(record.request_count),
            reset_after_secs,
            retry_after_secs: (!allowed).then_some(reset_after_secs),
        }
    }
}

/// A user's spendable balance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditAccount {
    pub user_id: String,
    /// Never negative
    pub balance: i64,
    pub updated_at: DateTime<Utc>,
}

/// Why a balance changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Debit,
    Refund,
    Purchase,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debit => "debit",
            Self::Refund => "refund",
            Self::Purchase => "purchase",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "debit" => Some(Self::Debit),
            "refund" => Some(Self::Refund),
            "purchase" => Some(Self::Purchase),
            _ => None,
        }
    }
}

/// One append-only ledger entry. Debits carry a negative amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditTransaction {
    pub id: String,
    pub user_id: String,
    pub amount: i64,
    pub kind: TransactionKind,
    /// Task or session the change is attributed to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    pub description: String,
    pub created_at: DateTime<Utc>,
}

impl CreditTransaction {
    pub fn new(
        user_id: impl Into<String>,
        amount: i64,
        kind: TransactionKind,
        context_id: Option<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            amount,
            kind,
            context_id,
            description: description.into(),
            created_at: Utc::now(),
        }
    }
}

/// Outcome of an atomic balance check and debit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebitOutcome {
    Debited { new_balance: i64 },
    Insufficient { balance: i64, required: i64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn decision_reports_remaining_and_reset() {
        let now = Utc::now();
        let record = RateLimitRecord {
            identifier: "u1".into(),
            endpoint: "council".into(),
            window_start: now - Duration::seconds(20),
            request_count: 4,
        };
        let decision = RateDecision::from_record(&record, true, 60, 10, now);
        assert!(decision.allowed);
        assert_eq!(decision.remaining, 6);
        assert_eq!(decision.reset_after_secs, 40);
        assert!(decision.retry_after_secs.is_none());
    }

    #[test]
    fn rejected_decision_retry_after_is_within_window() {
        let now = Utc::now();
        let record = RateLimitRecord {
            identifier: "u1".into(),
            endpoint: "council".into(),
            window_start: now - Duration::seconds(60),
            request_count: 10,
        };
        let decision = RateDecision::from_record(&record, false, 60, 10, now);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.retry_after_secs, Some(1));
    }

    #[test]
    fn transaction_kind_round_trips() {
        for kind in [TransactionKind::Debit, TransactionKind::Refund, TransactionKind::Purchase] {
            assert_eq!(TransactionKind::parse(kind.as_str()), Some(kind));
        }
    }
}
