//! Storage traits — the persistent collaborator behind tasks, sessions and
//! ledgers.
//!
//! Every read-modify-write that is shared between concurrent callers
//! (rate-limit counters, balances, round appends) is a single atomic
//! operation on the trait, so correctness holds across multiple
//! orchestrator instances sharing one database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::council::{DiscussionRound, Task};
use crate::error::StoreError;
use crate::ledger::{CreditAccount, CreditTransaction, DebitOutcome, RateDecision};
use crate::session::{SessionOutcome, StreamingSession};

type StoreResult<T> = std::result::Result<T, StoreError>;

/// Deliberation task persistence.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn create_task(&self, task: &Task) -> StoreResult<()>;

    async fn get_task(&self, id: &str) -> StoreResult<Option<Task>>;

    /// Append `round` to a task, conditional on the stored task still being
    /// `processing` at `expected_round`.
    ///
    /// `updated` carries the post-round task state (status, counter,
    /// results, completion time). Fails with `StoreError::Conflict` when the
    /// condition does not hold.
    async fn save_round(
        &self,
        updated: &Task,
        round: &DiscussionRound,
        expected_round: u32,
    ) -> StoreResult<()>;

    /// Mark a task failed with a reason. Completed tasks are left untouched.
    async fn mark_failed(&self, id: &str, reason: &str) -> StoreResult<()>;

    /// Remove a task. Used to undo a half-created submission.
    async fn delete_task(&self, id: &str) -> StoreResult<bool>;
}

/// Sliding-window request counters.
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Count one request against (identifier, endpoint) atomically.
    ///
    /// Absent record: create with count 1 and allow. Window older than
    /// `window_secs`: reset in place to count 1 and allow. Count below
    /// `max_requests`: increment and allow. Otherwise reject without
    /// touching the record.
    async fn hit(
        &self,
        identifier: &str,
        endpoint: &str,
        window_secs: u64,
        max_requests: u32,
        now: DateTime<Utc>,
    ) -> StoreResult<RateDecision>;
}

/// Credit balances and their transaction log.
#[async_trait]
pub trait CreditStore: Send + Sync {
    async fn balance(&self, user_id: &str) -> StoreResult<i64>;

    async fn account(&self, user_id: &str) -> StoreResult<Option<CreditAccount>>;

    /// Debit `amount` if and only if the balance covers it, appending a
    /// debit transaction in the same atomic step.
    async fn debit(
        &self,
        user_id: &str,
        amount: i64,
        context_id: Option<&str>,
        description: &str,
    ) -> StoreResult<DebitOutcome>;

    /// Return credits from a debit whose work never happened.
    async fn refund(
        &self,
        user_id: &str,
        amount: i64,
        context_id: Option<&str>,
        description: &str,
    ) -> StoreResult<i64>;

    /// Add purchased credits, creating the account if needed.
    async fn grant(&self, user_id: &str, amount: i64, description: &str) -> StoreResult<i64>;

    /// Most recent first.
    async fn transactions(&self, user_id: &str, limit: usize)
    -> StoreResult<Vec<CreditTransaction>>;
}

/// Streaming session persistence.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_session(&self, session: &StreamingSession) -> StoreResult<()>;

    async fn get_session(&self, id: &str) -> StoreResult<Option<StreamingSession>>;

    /// Write the terminal state. Returns false if the session was already
    /// finalized, leaving the first outcome in place.
    async fn finalize_session(&self, id: &str, outcome: &SessionOutcome) -> StoreResult<bool>;

    /// Sessions of `user_id` still in `streaming` status.
    async fn count_active_sessions(&self, user_id: &str) -> StoreResult<u32>;
}

/// Everything the orchestrator and stream manager persist.
pub trait Store: TaskStore + RateLimitStore + CreditStore + SessionStore {}

impl<T> Store for T where T: TaskStore + RateLimitStore + CreditStore + SessionStore {}
