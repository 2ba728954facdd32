//! SQLite backend for tasks, sessions, rate-limit counters and credits.
//!
//! Tables:
//! - `tasks` — one row per deliberation, rounds and roster as JSON columns
//! - `streaming_sessions` — one row per streamed response
//! - `rate_limits` — one row per (identifier, endpoint), reset in place
//! - `credit_accounts` / `credit_transactions` — balances and their log
//!
//! Every shared read-modify-write is a conditional single statement (or a
//! transaction opened by one), so several orchestrator processes can share
//! one database file.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use conclave_core::council::{DiscussionRound, Task, TaskStatus};
use conclave_core::error::StoreError;
use conclave_core::ledger::{
    CreditAccount, CreditTransaction, DebitOutcome, RateDecision, RateLimitRecord, TransactionKind,
};
use conclave_core::session::{SessionOutcome, SessionStatus, StreamingSession};
use conclave_core::store::{CreditStore, RateLimitStore, SessionStore, TaskStore};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

/// SQLite-backed implementation of every storage trait.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) a database and run migrations.
    ///
    /// Pass `":memory:"` for an ephemeral database (useful for tests).
    pub async fn new(path: &str) -> Result<Self, StoreError> {
        let in_memory = path == ":memory:";
        let url = if in_memory || path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite://{path}")
        };

        let options = SqliteConnectOptions::from_str(&url)
            .map_err(|e| StoreError::Storage(format!("Invalid SQLite path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        // Every connection to ":memory:" is a separate database
        let max_connections = if in_memory { 1 } else { 8 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Storage(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        info!("SQLite store initialized at {path}");
        Ok(store)
    }

    /// Create from an existing pool.
    pub async fn from_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create tables and indexes. Idempotent.
    pub async fn run_migrations(&self) -> Result<(), StoreError> {
        let statements: [(&str, &str); 7] = [
            (
                "tasks table",
                r#"
                CREATE TABLE IF NOT EXISTS tasks (
                    id                TEXT PRIMARY KEY,
                    prompt            TEXT NOT NULL,
                    status            TEXT NOT NULL,
                    current_round     INTEGER NOT NULL,
                    max_rounds        INTEGER NOT NULL,
                    discussion_rounds TEXT NOT NULL DEFAULT '[]',
                    results           TEXT NOT NULL DEFAULT '[]',
                    agents            TEXT NOT NULL,
                    user_id           TEXT,
                    credits_charged   INTEGER NOT NULL DEFAULT 0,
                    created_at        TEXT NOT NULL,
                    completed_at      TEXT,
                    error             TEXT
                )
                "#,
            ),
            (
                "streaming_sessions table",
                r#"
                CREATE TABLE IF NOT EXISTS streaming_sessions (
                    id            TEXT PRIMARY KEY,
                    user_id       TEXT NOT NULL,
                    provider      TEXT NOT NULL,
                    model         TEXT NOT NULL,
                    status        TEXT NOT NULL,
                    started_at    TEXT NOT NULL,
                    ended_at      TEXT,
                    error_code    TEXT,
                    error_message TEXT,
                    council_id    TEXT,
                    agent_id      TEXT,
                    usage         TEXT
                )
                "#,
            ),
            (
                "sessions index",
                "CREATE INDEX IF NOT EXISTS idx_sessions_user_status ON streaming_sessions(user_id, status)",
            ),
            (
                "rate_limits table",
                r#"
                CREATE TABLE IF NOT EXISTS rate_limits (
                    identifier      TEXT NOT NULL,
                    endpoint        TEXT NOT NULL,
                    window_start_ms INTEGER NOT NULL,
                    request_count   INTEGER NOT NULL,
                    PRIMARY KEY (identifier, endpoint)
                )
                "#,
            ),
            (
                "credit_accounts table",
                r#"
                CREATE TABLE IF NOT EXISTS credit_accounts (
                    user_id    TEXT PRIMARY KEY,
                    balance    INTEGER NOT NULL CHECK (balance >= 0),
                    updated_at TEXT NOT NULL
                )
                "#,
            ),
            (
                "credit_transactions table",
                r#"
                CREATE TABLE IF NOT EXISTS credit_transactions (
                    seq         INTEGER PRIMARY KEY AUTOINCREMENT,
                    id          TEXT UNIQUE NOT NULL,
                    user_id     TEXT NOT NULL,
                    amount      INTEGER NOT NULL,
                    kind        TEXT NOT NULL,
                    context_id  TEXT,
                    description TEXT NOT NULL,
                    created_at  TEXT NOT NULL
                )
                "#,
            ),
            (
                "transactions index",
                "CREATE INDEX IF NOT EXISTS idx_transactions_user ON credit_transactions(user_id, seq DESC)",
            ),
        ];

        for (what, sql) in statements {
            sqlx::query(sql)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::MigrationFailed(format!("{what}: {e}")))?;
        }

        debug!("SQLite migrations complete");
        Ok(())
    }

    fn row_to_task(row: &SqliteRow) -> Result<Task, StoreError> {
        let status: String = get(row, "status")?;
        let discussion_rounds: String = get(row, "discussion_rounds")?;
        let results: String = get(row, "results")?;
        let agents: String = get(row, "agents")?;
        let created_at: String = get(row, "created_at")?;
        let completed_at: Option<String> = get(row, "completed_at")?;
        let current_round: i64 = get(row, "current_round")?;
        let max_rounds: i64 = get(row, "max_rounds")?;

        Ok(Task {
            id: get(row, "id")?,
            prompt: get(row, "prompt")?,
            status: TaskStatus::parse(&status)
                .ok_or_else(|| StoreError::QueryFailed(format!("unknown task status {status}")))?,
            current_round: current_round as u32,
            max_rounds: max_rounds as u32,
            discussion_rounds: from_json(&discussion_rounds, "discussion_rounds")?,
            results: from_json(&results, "results")?,
            agents: from_json(&agents, "agents")?,
            user_id: get(row, "user_id")?,
            credits_charged: get(row, "credits_charged")?,
            created_at: parse_time(&created_at)?,
            completed_at: completed_at.as_deref().map(parse_time).transpose()?,
            error: get(row, "error")?,
        })
    }

    fn row_to_session(row: &SqliteRow) -> Result<StreamingSession, StoreError> {
        let status: String = get(row, "status")?;
        let started_at: String = get(row, "started_at")?;
        let ended_at: Option<String> = get(row, "ended_at")?;
        let usage: Option<String> = get(row, "usage")?;

        Ok(StreamingSession {
            id: get(row, "id")?,
            user_id: get(row, "user_id")?,
            provider: get(row, "provider")?,
            model: get(row, "model")?,
            status: SessionStatus::parse(&status).ok_or_else(|| {
                StoreError::QueryFailed(format!("unknown session status {status}"))
            })?,
            started_at: parse_time(&started_at)?,
            ended_at: ended_at.as_deref().map(parse_time).transpose()?,
            error_code: get(row, "error_code")?,
            error_message: get(row, "error_message")?,
            council_id: get(row, "council_id")?,
            agent_id: get(row, "agent_id")?,
            usage: usage.as_deref().map(|u| from_json(u, "usage")).transpose()?,
        })
    }

    async fn load_rate_record(
        &self,
        identifier: &str,
        endpoint: &str,
    ) -> Result<RateLimitRecord, StoreError> {
        let row = sqlx::query(
            "SELECT window_start_ms, request_count FROM rate_limits WHERE identifier = ?1 AND endpoint = ?2",
        )
        .bind(identifier)
        .bind(endpoint)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("rate limit lookup: {e}")))?;

        let window_start_ms: i64 = get(&row, "window_start_ms")?;
        let request_count: i64 = get(&row, "request_count")?;
        Ok(RateLimitRecord {
            identifier: identifier.to_string(),
            endpoint: endpoint.to_string(),
            window_start: from_millis(window_start_ms),
            request_count: request_count as u32,
        })
    }
}

fn get<'r, T>(row: &'r SqliteRow, column: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(column)
        .map_err(|e| StoreError::QueryFailed(format!("{column} column: {e}")))
}

fn to_json<T: serde::Serialize>(value: &T, what: &str) -> Result<String, StoreError> {
    serde_json::to_string(value)
        .map_err(|e| StoreError::Storage(format!("{what} serialization: {e}")))
}

fn from_json<T: serde::de::DeserializeOwned>(raw: &str, what: &str) -> Result<T, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::QueryFailed(format!("{what} column: {e}")))
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::QueryFailed(format!("timestamp {raw}: {e}")))
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn create_task(&self, task: &Task) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO tasks (id, prompt, status, current_round, max_rounds, discussion_rounds,
                               results, agents, user_id, credits_charged, created_at, completed_at, error)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(&task.id)
        .bind(&task.prompt)
        .bind(task.status.as_str())
        .bind(task.current_round as i64)
        .bind(task.max_rounds as i64)
        .bind(to_json(&task.discussion_rounds, "discussion_rounds")?)
        .bind(to_json(&task.results, "results")?)
        .bind(to_json(&task.agents, "agents")?)
        .bind(&task.user_id)
        .bind(task.credits_charged)
        .bind(task.created_at.to_rfc3339())
        .bind(task.completed_at.map(|t| t.to_rfc3339()))
        .bind(&task.error)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT task failed: {e}")))?;

        debug!(task_id = %task.id, "Created task");
        Ok(())
    }

    async fn get_task(&self, id: &str) -> Result<Option<Task>, StoreError> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("task lookup: {e}")))?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn save_round(
        &self,
        updated: &Task,
        round: &DiscussionRound,
        expected_round: u32,
    ) -> Result<(), StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tasks SET
                status = ?1,
                current_round = ?2,
                discussion_rounds = json_insert(discussion_rounds, '$[#]', json(?3)),
                results = ?4,
                completed_at = ?5
            WHERE id = ?6 AND status = 'processing' AND current_round = ?7
            "#,
        )
        .bind(updated.status.as_str())
        .bind(updated.current_round as i64)
        .bind(to_json(round, "round")?)
        .bind(to_json(&updated.results, "results")?)
        .bind(updated.completed_at.map(|t| t.to_rfc3339()))
        .bind(&updated.id)
        .bind(expected_round as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("UPDATE task failed: {e}")))?;

        if result.rows_affected() == 1 {
            debug!(task_id = %updated.id, round = round.round_number, "Saved round");
            return Ok(());
        }

        match self.get_task(&updated.id).await? {
            None => Err(StoreError::NotFound(format!("task {}", updated.id))),
            Some(_) => Err(StoreError::Conflict(format!(
                "task {} round {expected_round}",
                updated.id
            ))),
        }
    }

    async fn mark_failed(&self, id: &str, reason: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE tasks SET status = 'failed', error = ?1 WHERE id = ?2 AND status != 'completed'",
        )
        .bind(reason)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("mark failed: {e}")))?;
        Ok(())
    }

    async fn delete_task(&self, id: &str) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::Storage(format!("DELETE task failed: {e}")))?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl RateLimitStore for SqliteStore {
    async fn hit(
        &self,
        identifier: &str,
        endpoint: &str,
        window_secs: u64,
        max_requests: u32,
        now: DateTime<Utc>,
    ) -> Result<RateDecision, StoreError> {
        let now_ms = now.timestamp_millis();
        let cutoff_ms = (now - Duration::seconds(window_secs as i64)).timestamp_millis();
        let map_err = |e: sqlx::Error| StoreError::Storage(format!("rate limit update: {e}"));

        // Each step is one conditional write; only a write that matched its
        // condition admits the request.
        let inserted = sqlx::query(
            r#"
            INSERT INTO rate_limits (identifier, endpoint, window_start_ms, request_count)
            VALUES (?1, ?2, ?3, 1)
            ON CONFLICT(identifier, endpoint) DO NOTHING
            "#,
        )
        .bind(identifier)
        .bind(endpoint)
        .bind(now_ms)
        .execute(&self.pool)
        .await
        .map_err(map_err)?
        .rows_affected()
            == 1;

        let allowed = inserted
            || sqlx::query(
                r#"
                UPDATE rate_limits SET window_start_ms = ?3, request_count = 1
                WHERE identifier = ?1 AND endpoint = ?2 AND window_start_ms < ?4
                "#,
            )
            .bind(identifier)
            .bind(endpoint)
            .bind(now_ms)
            .bind(cutoff_ms)
            .execute(&self.pool)
            .await
            .map_err(map_err)?
            .rows_affected()
                == 1
            || sqlx::query(
                r#"
                UPDATE rate_limits SET request_count = request_count + 1
                WHERE identifier = ?1 AND endpoint = ?2
                  AND window_start_ms >= ?3 AND request_count < ?4
                "#,
            )
            .bind(identifier)
            .bind(endpoint)
            .bind(cutoff_ms)
            .bind(max_requests as i64)
            .execute(&self.pool)
            .await
            .map_err(map_err)?
            .rows_affected()
                == 1;

        let record = self.load_rate_record(identifier, endpoint).await?;
        Ok(RateDecision::from_record(
            &record,
            allowed,
            window_secs,
            max_requests,
            now,
        ))
    }
}

#[async_trait]
impl CreditStore for SqliteStore {
    async fn balance(&self, user_id: &str) -> Result<i64, StoreError> {
        Ok(self.account(user_id).await?.map(|a| a.balance).unwrap_or(0))
    }

    async fn account(&self, user_id: &str) -> Result<Option<CreditAccount>, StoreError> {
        let row = sqlx::query("SELECT * FROM credit_accounts WHERE user_id = ?1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("account lookup: {e}")))?;

        row.map(|row| -> Result<CreditAccount, StoreError> {
            let updated_at: String = get(&row, "updated_at")?;
            Ok(CreditAccount {
                user_id: get(&row, "user_id")?,
                balance: get(&row, "balance")?,
                updated_at: parse_time(&updated_at)?,
            })
        })
        .transpose()
    }

    async fn debit(
        &self,
        user_id: &str,
        amount: i64,
        context_id: Option<&str>,
        description: &str,
    ) -> Result<DebitOutcome, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("begin debit: {e}")))?;

        let row = sqlx::query(
            r#"
            UPDATE credit_accounts SET balance = balance - ?1, updated_at = ?2
            WHERE user_id = ?3 AND balance >= ?1
            RETURNING balance
            "#,
        )
        .bind(amount)
        .bind(Utc::now().to_rfc3339())
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StoreError::Storage(format!("debit: {e}")))?;

        let Some(row) = row else {
            tx.rollback()
                .await
                .map_err(|e| StoreError::Storage(format!("rollback debit: {e}")))?;
            let balance = self.balance(user_id).await?;
            return Ok(DebitOutcome::Insufficient {
                balance,
                required: amount,
            });
        };
        let new_balance: i64 = get(&row, "balance")?;

        let entry = CreditTransaction::new(
            user_id,
            -amount,
            TransactionKind::Debit,
            context_id.map(str::to_string),
            description,
        );
        insert_transaction(&mut tx, &entry).await?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("commit debit: {e}")))?;

        debug!(user_id, amount, new_balance, "Debited credits");
        Ok(DebitOutcome::Debited { new_balance })
    }

    async fn refund(
        &self,
        user_id: &str,
        amount: i64,
        context_id: Option<&str>,
        description: &str,
    ) -> Result<i64, StoreError> {
        let entry = CreditTransaction::new(
            user_id,
            amount,
            TransactionKind::Refund,
            context_id.map(str::to_string),
            description,
        );
        self.credit(entry).await
    }

    async fn grant(&self, user_id: &str, amount: i64, description: &str) -> Result<i64, StoreError> {
        let entry = CreditTransaction::new(
            user_id,
            amount,
            TransactionKind::Purchase,
            None,
            description,
        );
        self.credit(entry).await
    }

    async fn transactions(
        &self,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<CreditTransaction>, StoreError> {
        let rows = sqlx::query(
            "SELECT * FROM credit_transactions WHERE user_id = ?1 ORDER BY seq DESC LIMIT ?2",
        )
        .bind(user_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("transactions: {e}")))?;

        rows.iter()
            .map(|row| -> Result<CreditTransaction, StoreError> {
                let kind: String = get(row, "kind")?;
                let created_at: String = get(row, "created_at")?;
                Ok(CreditTransaction {
                    id: get(row, "id")?,
                    user_id: get(row, "user_id")?,
                    amount: get(row, "amount")?,
                    kind: TransactionKind::parse(&kind).ok_or_else(|| {
                        StoreError::QueryFailed(format!("unknown transaction kind {kind}"))
                    })?,
                    context_id: get(row, "context_id")?,
                    description: get(row, "description")?,
                    created_at: parse_time(&created_at)?,
                })
            })
            .collect()
    }
}

impl SqliteStore {
    /// Add a positive amount, creating the account if needed.
    async fn credit(&self, entry: CreditTransaction) -> Result<i64, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Storage(format!("begin credit: {e}")))?;

        let row = sqlx::query(
            r#"
            INSERT INTO credit_accounts (user_id, balance, updated_at) VALUES (?1, ?2, ?3)
            ON CONFLICT(user_id) DO UPDATE SET
                balance = balance + excluded.balance,
                updated_at = excluded.updated_at
            RETURNING balance
            "#,
        )
        .bind(&entry.user_id)
        .bind(entry.amount)
        .bind(Utc::now().to_rfc3339())
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| StoreError::Storage(format!("credit: {e}")))?;
        let new_balance: i64 = get(&row, "balance")?;

        insert_transaction(&mut tx, &entry).await?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Storage(format!("commit credit: {e}")))?;

        debug!(user_id = %entry.user_id, amount = entry.amount, kind = entry.kind.as_str(), new_balance, "Credited account");
        Ok(new_balance)
    }
}

async fn insert_transaction(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    entry: &CreditTransaction,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        INSERT INTO credit_transactions (id, user_id, amount, kind, context_id, description, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(&entry.id)
    .bind(&entry.user_id)
    .bind(entry.amount)
    .bind(entry.kind.as_str())
    .bind(&entry.context_id)
    .bind(&entry.description)
    .bind(entry.created_at.to_rfc3339())
    .execute(&mut **tx)
    .await
    .map_err(|e| StoreError::Storage(format!("INSERT transaction failed: {e}")))?;
    Ok(())
}

#[async_trait]
impl SessionStore for SqliteStore {
    async fn create_session(&self, session: &StreamingSession) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO streaming_sessions (id, user_id, provider, model, status, started_at,
                                            ended_at, error_code, error_message, council_id, agent_id, usage)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(&session.provider)
        .bind(&session.model)
        .bind(session.status.as_str())
        .bind(session.started_at.to_rfc3339())
        .bind(session.ended_at.map(|t| t.to_rfc3339()))
        .bind(&session.error_code)
        .bind(&session.error_message)
        .bind(&session.council_id)
        .bind(&session.agent_id)
        .bind(session.usage.as_ref().map(|u| to_json(u, "usage")).transpose()?)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("INSERT session failed: {e}")))?;
        Ok(())
    }

    async fn get_session(&self, id: &str) -> Result<Option<StreamingSession>, StoreError> {
        let row = sqlx::query("SELECT * FROM streaming_sessions WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::QueryFailed(format!("session lookup: {e}")))?;

        row.as_ref().map(Self::row_to_session).transpose()
    }

    async fn finalize_session(
        &self,
        id: &str,
        outcome: &SessionOutcome,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE streaming_sessions
            SET status = ?1, ended_at = ?2, error_code = ?3, error_message = ?4, usage = ?5
            WHERE id = ?6 AND status = 'streaming'
            "#,
        )
        .bind(outcome.status.as_str())
        .bind(Utc::now().to_rfc3339())
        .bind(&outcome.error_code)
        .bind(&outcome.error_message)
        .bind(outcome.usage.as_ref().map(|u| to_json(u, "usage")).transpose()?)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| StoreError::Storage(format!("finalize session: {e}")))?;

        Ok(result.rows_affected() == 1)
    }

    async fn count_active_sessions(&self, user_id: &str) -> Result<u32, StoreError> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS active FROM streaming_sessions WHERE user_id = ?1 AND status = 'streaming'",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| StoreError::QueryFailed(format!("active sessions: {e}")))?;

        let active: i64 = get(&row, "active")?;
        Ok(active as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::council::{AgentDescriptor, AgentResponse};
    use conclave_core::provider::Usage;

    async fn test_store() -> SqliteStore {
        SqliteStore::new(":memory:").await.unwrap()
    }

    fn agents(n: usize) -> Vec<AgentDescriptor> {
        (0..n)
            .map(|i| AgentDescriptor {
                id: format!("a{i}"),
                name: format!("Agent {i}"),
                specialty: "testing".into(),
                provider: "openai".into(),
                model: "gpt-4o".into(),
            })
            .collect()
    }

    fn round(n: u32) -> DiscussionRound {
        DiscussionRound {
            round_number: n,
            agent_responses: vec![AgentResponse {
                agent_id: "a0".into(),
                agent_name: "Agent 0".into(),
                response: format!("round {n} answer"),
                timestamp: Utc::now(),
            }],
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let store = test_store().await;
        store.run_migrations().await.unwrap();
    }

    #[tokio::test]
    async fn task_create_and_get() {
        let store = test_store().await;
        let task = Task::new("Should we?", agents(2), 3, Some("u1".into()), 2);
        store.create_task(&task).await.unwrap();

        let fetched = store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(fetched.prompt, "Should we?");
        assert_eq!(fetched.status, TaskStatus::Processing);
        assert_eq!(fetched.agents.len(), 2);
        assert_eq!(fetched.credits_charged, 2);
        assert!(store.get_task("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_round_appends_and_advances() {
        let store = test_store().await;
        let mut task = Task::new("q", agents(1), 2, None, 0);
        store.create_task(&task).await.unwrap();

        let r1 = round(1);
        task.record_round(r1.clone());
        store.save_round(&task, &r1, 1).await.unwrap();

        let r2 = round(2);
        task.record_round(r2.clone());
        store.save_round(&task, &r2, 2).await.unwrap();

        let fetched = store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, TaskStatus::Completed);
        assert_eq!(fetched.discussion_rounds.len(), 2);
        assert_eq!(fetched.discussion_rounds[1].round_number, 2);
        assert_eq!(fetched.results[0].response, "round 2 answer");
        assert!(fetched.completed_at.is_some());
        assert!(fetched.is_consistent());
    }

    #[tokio::test]
    async fn stale_round_save_conflicts() {
        let store = test_store().await;
        let task = Task::new("q", agents(1), 3, None, 0);
        store.create_task(&task).await.unwrap();

        let r1 = round(1);
        let mut first = task.clone();
        first.record_round(r1.clone());
        store.save_round(&first, &r1, 1).await.unwrap();

        // A second advance computed from the same starting state
        let mut second = task.clone();
        second.record_round(r1.clone());
        let err = store.save_round(&second, &r1, 1).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let fetched = store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(fetched.discussion_rounds.len(), 1);
    }

    #[tokio::test]
    async fn save_round_on_missing_task_is_not_found() {
        let store = test_store().await;
        let mut task = Task::new("q", agents(1), 3, None, 0);
        let r1 = round(1);
        task.record_round(r1.clone());
        assert!(matches!(
            store.save_round(&task, &r1, 1).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn mark_failed_and_delete() {
        let store = test_store().await;
        let task = Task::new("q", agents(1), 3, None, 0);
        store.create_task(&task).await.unwrap();

        store.mark_failed(&task.id, "store went away").await.unwrap();
        let fetched = store.get_task(&task.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, TaskStatus::Failed);
        assert_eq!(fetched.error.as_deref(), Some("store went away"));

        assert!(store.delete_task(&task.id).await.unwrap());
        assert!(!store.delete_task(&task.id).await.unwrap());
    }

    #[tokio::test]
    async fn rate_limit_window() {
        let store = test_store().await;
        let t0 = Utc::now();

        for i in 0..3 {
            let d = store.hit("ip", "council", 60, 3, t0).await.unwrap();
            assert!(d.allowed, "request {i} should pass");
            assert_eq!(d.remaining, 2 - i);
        }

        let rejected = store
            .hit("ip", "council", 60, 3, t0 + Duration::seconds(20))
            .await
            .unwrap();
        assert!(!rejected.allowed);
        assert_eq!(rejected.retry_after_secs, Some(40));

        // Other endpoints and identifiers are independent
        assert!(store.hit("ip", "stream", 60, 3, t0).await.unwrap().allowed);
        assert!(store.hit("ip2", "council", 60, 3, t0).await.unwrap().allowed);

        // Window expiry resets in place
        let later = store
            .hit("ip", "council", 60, 3, t0 + Duration::seconds(61))
            .await
            .unwrap();
        assert!(later.allowed);
        assert_eq!(later.remaining, 2);
    }

    #[tokio::test]
    async fn concurrent_hits_never_exceed_limit() {
        let store = std::sync::Arc::new(test_store().await);
        let now = Utc::now();

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.hit("u", "council", 60, 10, now).await.unwrap() })
            })
            .collect();

        let mut allowed = 0;
        for h in handles {
            if h.await.unwrap().allowed {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 10);
    }

    #[tokio::test]
    async fn concurrent_debits_never_overdraw() {
        let store = std::sync::Arc::new(test_store().await);
        store.grant("u1", 5, "starter pack").await.unwrap();

        let handles: Vec<_> = (0..12)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move { store.debit("u1", 1, None, "deliberation").await.unwrap() })
            })
            .collect();

        let mut debited = 0;
        for h in handles {
            if let DebitOutcome::Debited { new_balance } = h.await.unwrap() {
                assert!(new_balance >= 0);
                debited += 1;
            }
        }
        assert_eq!(debited, 5);
        assert_eq!(store.balance("u1").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn debit_is_conditional() {
        let store = test_store().await;
        assert_eq!(store.grant("u1", 2, "starter pack").await.unwrap(), 2);

        let outcome = store.debit("u1", 3, Some("task-1"), "deliberation").await.unwrap();
        assert_eq!(
            outcome,
            DebitOutcome::Insufficient {
                balance: 2,
                required: 3
            }
        );
        assert_eq!(store.balance("u1").await.unwrap(), 2);

        let outcome = store.debit("u1", 2, Some("task-2"), "deliberation").await.unwrap();
        assert_eq!(outcome, DebitOutcome::Debited { new_balance: 0 });
    }

    #[tokio::test]
    async fn debit_without_account_is_insufficient() {
        let store = test_store().await;
        let outcome = store.debit("nobody", 1, None, "x").await.unwrap();
        assert_eq!(
            outcome,
            DebitOutcome::Insufficient {
                balance: 0,
                required: 1
            }
        );
    }

    #[tokio::test]
    async fn ledger_records_every_change() {
        let store = test_store().await;
        store.grant("u1", 10, "purchase").await.unwrap();
        store.debit("u1", 3, Some("t1"), "deliberation").await.unwrap();
        assert_eq!(store.refund("u1", 3, Some("t1"), "rollback").await.unwrap(), 10);

        let log = store.transactions("u1", 10).await.unwrap();
        let kinds: Vec<(TransactionKind, i64)> = log.iter().map(|t| (t.kind, t.amount)).collect();
        assert_eq!(
            kinds,
            vec![
                (TransactionKind::Refund, 3),
                (TransactionKind::Debit, -3),
                (TransactionKind::Purchase, 10),
            ]
        );
        assert_eq!(log[1].context_id.as_deref(), Some("t1"));
    }

    #[tokio::test]
    async fn session_finalized_once() {
        let store = test_store().await;
        let session = StreamingSession::start("u1", "openai", "gpt-4o");
        store.create_session(&session).await.unwrap();
        assert_eq!(store.count_active_sessions("u1").await.unwrap(), 1);

        assert!(
            store
                .finalize_session(&session.id, &SessionOutcome::completed(Usage::new(4, 8)))
                .await
                .unwrap()
        );
        assert!(
            !store
                .finalize_session(&session.id, &SessionOutcome::failed("timeout", "late"))
                .await
                .unwrap()
        );

        let fetched = store.get_session(&session.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, SessionStatus::Completed);
        assert_eq!(fetched.usage, Some(Usage::new(4, 8)));
        assert!(fetched.error_code.is_none());
        assert!(fetched.ended_at.is_some());
        assert_eq!(store.count_active_sessions("u1").await.unwrap(), 0);
    }
}
