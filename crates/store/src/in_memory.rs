//! In-memory backend — useful for testing and single-process demos.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use conclave_core::council::{DiscussionRound, Task, TaskStatus};
use conclave_core::error::StoreError;
use conclave_core::ledger::{
    CreditAccount, CreditTransaction, DebitOutcome, RateDecision, RateLimitRecord, TransactionKind,
};
use conclave_core::session::{SessionOutcome, SessionStatus, StreamingSession};
use conclave_core::store::{CreditStore, RateLimitStore, SessionStore, TaskStore};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    tasks: HashMap<String, Task>,
    sessions: HashMap<String, StreamingSession>,
    rate_limits: HashMap<(String, String), RateLimitRecord>,
    accounts: HashMap<String, CreditAccount>,
    transactions: Vec<CreditTransaction>,
}

/// A process-local store. Every operation holds one write lock for its
/// whole read-modify-write, which gives the same atomicity as the SQL
/// conditional writes.
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<RwLock<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl State {
    fn credit(&mut self, entry: CreditTransaction) -> i64 {
        let account = self
            .accounts
            .entry(entry.user_id.clone())
            .or_insert_with(|| CreditAccount {
                user_id: entry.user_id.clone(),
                balance: 0,
                updated_at: Utc::now(),
            });
        account.balance += entry.amount;
        account.updated_at = Utc::now();
        let balance = account.balance;
        self.transactions.push(entry);
        balance
    }
}

#[async_trait]
impl TaskStore for InMemoryStore {
    async fn create_task(&self, task: &Task) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if state.tasks.contains_key(&task.id) {
            return Err(StoreError::Storage(format!("task {} already exists", task.id)));
        }
        state.tasks.insert(task.id.clone(), task.clone());
        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>, StoreError> {
        Ok(self.state.read().await.tasks.get(id).cloned())
    }

    async fn save_round(
        &self,
        updated: &Task,
        round: &DiscussionRound,
        expected_round: u32,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        let stored = state
            .tasks
            .get_mut(&updated.id)
            .ok_or_else(|| StoreError::NotFound(format!("task {}", updated.id)))?;

        if stored.status != TaskStatus::Processing || stored.current_round != expected_round {
            return Err(StoreError::Conflict(format!(
                "task {} round {expected_round}",
                updated.id
            )));
        }

        stored.discussion_rounds.push(round.clone());
        stored.status = updated.status;
        stored.current_round = updated.current_round;
        stored.results = updated.results.clone();
        stored.completed_at = updated.completed_at;
        Ok(())
    }

    async fn mark_failed(&self, id: &str, reason: &str) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        if let Some(task) = state.tasks.get_mut(id)
            && task.status != TaskStatus::Completed
        {
            task.status = TaskStatus::Failed;
            task.error = Some(reason.to_string());
        }
        Ok(())
    }

    async fn delete_task(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.state.write().await.tasks.remove(id).is_some())
    }
}

#[async_trait]
impl RateLimitStore for InMemoryStore {
    async fn hit(
        &self,
        identifier: &str,
        endpoint: &str,
        window_secs: u64,
        max_requests: u32,
        now: DateTime<Utc>,
    ) -> Result<RateDecision, StoreError> {
        let mut state = self.state.write().await;
        let cutoff = now - Duration::seconds(window_secs as i64);

        let record = state
            .rate_limits
            .entry((identifier.to_string(), endpoint.to_string()))
            .or_insert_with(|| RateLimitRecord {
                identifier: identifier.to_string(),
                endpoint: endpoint.to_string(),
                window_start: now,
                request_count: 0,
            });

        let allowed = if record.window_start < cutoff {
            record.window_start = now;
            record.request_count = 1;
            true
        } else if record.request_count < max_requests {
            record.request_count += 1;
            true
        } else {
            false
        };

        Ok(RateDecision::from_record(
            record,
            allowed,
            window_secs,
            max_requests,
            now,
        ))
    }
}

#[async_trait]
impl CreditStore for InMemoryStore {
    async fn balance(&self, user_id: &str) -> Result<i64, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .accounts
            .get(user_id)
            .map(|a| a.balance)
            .unwrap_or(0))
    }

    async fn account(&self, user_id: &str) -> Result<Option<CreditAccount>, StoreError> {
        Ok(self.state.read().await.accounts.get(user_id).cloned())
    }

    async fn debit(
        &self,
        user_id: &str,
        amount: i64,
        context_id: Option<&str>,
        description: &str,
    ) -> Result<DebitOutcome, StoreError> {
        let mut state = self.state.write().await;
        let balance = state.accounts.get(user_id).map(|a| a.balance).unwrap_or(0);
        if balance < amount {
            return Ok(DebitOutcome::Insufficient {
                balance,
                required: amount,
            });
        }

        let new_balance = state.credit(CreditTransaction::new(
            user_id,
            -amount,
            TransactionKind::Debit,
            context_id.map(str::to_string),
            description,
        ));
        Ok(DebitOutcome::Debited { new_balance })
    }

    async fn refund(
        &self,
        user_id: &str,
        amount: i64,
        context_id: Option<&str>,
        description: &str,
    ) -> Result<i64, StoreError> {
        Ok(self.state.write().await.credit(CreditTransaction::new(
            user_id,
            amount,
            TransactionKind::Refund,
            context_id.map(str::to_string),
            description,
        )))
    }

    async fn grant(&self, user_id: &str, amount: i64, description: &str) -> Result<i64, StoreError> {
        Ok(self.state.write().await.credit(CreditTransaction::new(
            user_id,
            amount,
            TransactionKind::Purchase,
            None,
            description,
        )))
    }

    async fn transactions(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<CreditTransaction>, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .transactions
            .iter()
            .rev()
            .filter(|t| t.user_id == user_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn create_session(&self, session: &StreamingSession) -> Result<(), StoreError> {
        self.state
            .write()
            .await
            .sessions
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<Option<StreamingSession>, StoreError> {
        Ok(self.state.read().await.sessions.get(id).cloned())
    }

    async fn finalize_session(
        &self,
        id: &str,
        outcome: &SessionOutcome,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.write().await;
        let Some(session) = state.sessions.get_mut(id) else {
            return Ok(false);
        };
        if session.status != SessionStatus::Streaming {
            return Ok(false);
        }

        session.status = outcome.status;
        session.ended_at = Some(Utc::now());
        session.error_code = outcome.error_code.clone();
        session.error_message = outcome.error_message.clone();
        session.usage = outcome.usage;
        Ok(true)
    }

    async fn count_active_sessions(&self, user_id: &str) -> Result<u32, StoreError> {
        Ok(self
            .state
            .read()
            .await
            .sessions
            .values()
            .filter(|s| s.user_id == user_id && s.status == SessionStatus::Streaming)
            .count() as u32)
    }
}
