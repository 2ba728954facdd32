//! The round orchestrator.
//!
//! Submission gates on the rate limiter and the credit ledger before a task
//! exists. Each advance runs one round: agents are called one after another
//! in roster order, a failing agent contributes its error text instead of
//! aborting the round, and the finished round is persisted conditionally on
//! the task not having moved in the meantime.

use chrono::Utc;
use conclave_config::CouncilConfig;
use conclave_core::council::{AgentDescriptor, AgentResponse, DiscussionRound, Task, TaskStatus};
use conclave_core::error::{CouncilError, Error, ProviderError, Result, StoreError};
use conclave_core::provider::CompletionRequest;
use conclave_core::store::TaskStore;
use conclave_providers::ProviderRouter;
use conclave_providers::demo;
use conclave_quota::{BillingFormula, CreditLedger, RateLimiter, Workload};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::{context, prompts};

/// Rate-limit endpoint name for deliberation submissions.
pub const COUNCIL_ENDPOINT: &str = "council";

/// Who is asking. Credits are only charged to an identified user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: Option<String>,
    /// Rate-limit key
    pub rate_key: String,
}

impl Caller {
    pub fn user(user_id: impl Into<String>) -> Self {
        let user_id = user_id.into();
        Self {
            rate_key: user_id.clone(),
            user_id: Some(user_id),
        }
    }

    pub fn anonymous(rate_key: impl Into<String>) -> Self {
        Self {
            user_id: None,
            rate_key: rate_key.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    pub prompt: String,
    pub agents: Vec<AgentDescriptor>,
    #[serde(default)]
    pub max_rounds: Option<u32>,
    /// Run every round in the background after submission
    #[serde(default)]
    pub auto_advance: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceRequest {
    /// Overrides the stored prompt for this round
    #[serde(default)]
    pub prompt: Option<String>,
    /// Must match the stored roster when given
    #[serde(default)]
    pub agents: Option<Vec<AgentDescriptor>>,
}

/// Result of one advance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundOutcome {
    pub results: Vec<AgentResponse>,
    /// The round that was just run
    pub current_round: u32,
    pub should_continue: bool,
    pub discussion_rounds: Vec<DiscussionRound>,
}

/// Drives deliberation tasks. Cheap to clone; clones share every backend.
#[derive(Clone)]
pub struct Orchestrator {
    store: Arc<dyn TaskStore>,
    providers: ProviderRouter,
    limiter: RateLimiter,
    ledger: CreditLedger,
    billing: BillingFormula,
    config: CouncilConfig,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn TaskStore>,
        providers: ProviderRouter,
        limiter: RateLimiter,
        ledger: CreditLedger,
    ) -> Self {
        Self {
            store,
            providers,
            limiter,
            ledger,
            billing: BillingFormula::default(),
            config: CouncilConfig::default(),
        }
    }

    pub fn with_config(mut self, config: CouncilConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_billing(mut self, billing: BillingFormula) -> Self {
        self.billing = billing;
        self
    }

    /// Validate, rate-limit, charge and create a task in `processing` at
    /// round 1.
    ///
    /// Validation and quota failures leave nothing behind. If the task
    /// cannot be stored after the debit, the debit is refunded.
    pub async fn submit(&self, caller: &Caller, request: SubmitRequest) -> Result<Task> {
        let max_rounds = self.validate(&request)?;
        self.limiter
            .enforce(&caller.rate_key, COUNCIL_ENDPOINT)
            .await?;

        let agent_count = request.agents.len();
        let cost = self.billing.cost(&Workload::Deliberation {
            agents: agent_count,
        });
        let mut task = Task::new(
            request.prompt,
            request.agents,
            max_rounds,
            caller.user_id.clone(),
            0,
        );

        let charge = match &caller.user_id {
            Some(user_id) => Some(
                self.ledger
                    .check_and_debit(
                        user_id,
                        cost,
                        Some(&task.id),
                        &format!("Deliberation with {agent_count} agents"),
                    )
                    .await?,
            ),
            None => None,
        };
        task.credits_charged = charge.as_ref().map(|c| c.amount).unwrap_or(0);

        if let Err(e) = self.store.create_task(&task).await {
            error!(task_id = %task.id, error = %e, "Task creation failed");
            if let Some(charge) = &charge
                && let Err(refund_err) = self
                    .ledger
                    .refund(charge, Some(&task.id), "Task creation failed")
                    .await
            {
                error!(
                    task_id = %task.id,
                    user_id = %charge.user_id,
                    amount = charge.amount,
                    error = %refund_err,
                    "Refund after failed task creation failed"
                );
            }
            return Err(e.into());
        }

        info!(
            task_id = %task.id,
            agents = agent_count,
            max_rounds,
            credits = task.credits_charged,
            "Deliberation submitted"
        );

        if request.auto_advance {
            self.spawn_driver(task.id.clone());
        }
        Ok(task)
    }

    /// Run the task's current round and persist it.
    pub async fn advance(&self, task_id: &str, request: AdvanceRequest) -> Result<RoundOutcome> {
        let mut task = self.get_task(task_id).await?;
        match task.status {
            TaskStatus::Processing => {}
            TaskStatus::Completed => return Err(CouncilError::TaskCompleted(task.id).into()),
            other => {
                return Err(CouncilError::NotProcessing {
                    task_id: task.id,
                    status: other.to_string(),
                }
                .into());
            }
        }

        if let Some(agents) = &request.agents
            && !agents
                .iter()
                .map(|a| &a.id)
                .eq(task.agents.iter().map(|a| &a.id))
        {
            return Err(CouncilError::Validation(
                "agent roster does not match the task".into(),
            )
            .into());
        }

        let prompt = request
            .prompt
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| task.prompt.clone());
        let round_number = task.current_round;
        let previous = context::previous_rounds(&task.discussion_rounds);

        debug!(task_id, round = round_number, agents = task.agents.len(), "Starting round");

        let mut responses: Vec<AgentResponse> = Vec::with_capacity(task.agents.len());
        for agent in &task.agents {
            let system = prompts::system_prompt(agent, round_number, !previous.is_empty());
            let user = context::user_prompt(&prompt, &previous, &responses);

            let response = match self.ask(agent, system, user).await {
                Ok(text) => text,
                Err(e) => {
                    warn!(
                        task_id,
                        round = round_number,
                        agent = %agent.name,
                        provider = %agent.provider,
                        error = %e,
                        "Agent call failed"
                    );
                    format!("Error: Unable to get response from {}. {e}", agent.name)
                }
            };

            responses.push(AgentResponse {
                agent_id: agent.id.clone(),
                agent_name: agent.name.clone(),
                response,
                timestamp: Utc::now(),
            });
        }

        let round = DiscussionRound {
            round_number,
            agent_responses: responses,
            timestamp: Utc::now(),
        };
        let should_continue = task.record_round(round.clone());

        self.store
            .save_round(&task, &round, round_number)
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => Error::from(CouncilError::RoundConflict {
                    task_id: task.id.clone(),
                    round: round_number,
                }),
                other => {
                    error!(task_id = %task.id, round = round_number, error = %other, "Failed to persist round");
                    Error::from(other)
                }
            })?;

        info!(task_id, round = round_number, should_continue, "Round complete");

        Ok(RoundOutcome {
            results: task.results,
            current_round: round_number,
            should_continue,
            discussion_rounds: task.discussion_rounds,
        })
    }

    /// Advance until the task completes. An unrecoverable failure marks the
    /// task failed.
    pub async fn run_to_completion(&self, task_id: &str) -> Result<Task> {
        loop {
            match self.advance(task_id, AdvanceRequest::default()).await {
                Ok(outcome) if outcome.should_continue => continue,
                Ok(_) => break,
                Err(e) => {
                    error!(task_id, error = %e, "Deliberation failed");
                    // Another driver owns a task that moved underneath us
                    let superseded = matches!(
                        e,
                        Error::Council(
                            CouncilError::RoundConflict { .. } | CouncilError::TaskCompleted(_)
                        )
                    );
                    if !superseded
                        && let Err(mark_err) = self.store.mark_failed(task_id, &e.to_string()).await
                    {
                        error!(task_id, error = %mark_err, "Failed to mark task failed");
                    }
                    return Err(e);
                }
            }
        }
        self.get_task(task_id).await
    }

    /// Run the task to completion on a background task.
    pub fn spawn_driver(&self, task_id: String) -> JoinHandle<()> {
        let orchestrator = self.clone();
        tokio::spawn(async move {
            if let Ok(task) = orchestrator.run_to_completion(&task_id).await {
                info!(task_id, rounds = task.discussion_rounds.len(), "Deliberation completed");
            }
        })
    }

    pub async fn get_task(&self, task_id: &str) -> Result<Task> {
        self.store
            .get_task(task_id)
            .await?
            .ok_or_else(|| CouncilError::TaskNotFound(task_id.to_string()).into())
    }

    fn validate(&self, request: &SubmitRequest) -> Result<u32> {
        let invalid = |msg: String| Error::from(CouncilError::Validation(msg));

        if request.prompt.trim().is_empty() {
            return Err(invalid("prompt is required".into()));
        }
        if request.agents.is_empty() {
            return Err(invalid("at least one agent is required".into()));
        }

        let mut seen = HashSet::new();
        for agent in &request.agents {
            if agent.id.trim().is_empty()
                || agent.name.trim().is_empty()
                || agent.provider.trim().is_empty()
                || agent.model.trim().is_empty()
            {
                return Err(invalid(format!(
                    "agent '{}' needs an id, name, provider and model",
                    agent.name
                )));
            }
            if !seen.insert(agent.id.as_str()) {
                return Err(invalid(format!("duplicate agent id '{}'", agent.id)));
            }
        }

        let max_rounds = request.max_rounds.unwrap_or(self.config.default_max_rounds);
        if max_rounds == 0 || max_rounds > self.config.max_rounds_cap {
            return Err(invalid(format!(
                "maxRounds must be between 1 and {}",
                self.config.max_rounds_cap
            )));
        }
        Ok(max_rounds)
    }

    /// One agent call under the per-agent deadline.
    async fn ask(
        &self,
        agent: &AgentDescriptor,
        system: String,
        user: String,
    ) -> std::result::Result<String, ProviderError> {
        let Some(provider) = self.providers.get(&agent.provider) else {
            debug!(agent = %agent.name, provider = %agent.provider, "No adapter, simulating");
            return Ok(demo::simulated_agent_response(&agent.name, &agent.specialty));
        };

        let request = CompletionRequest::single_turn(&agent.model, system, user)
            .with_max_tokens(self.config.max_tokens)
            .with_temperature(self.config.temperature);

        let deadline = Duration::from_secs(self.config.agent_timeout_secs);
        match tokio::time::timeout(deadline, provider.execute(request)).await {
            Ok(result) => result.map(|completion| completion.text),
            Err(_) => Err(ProviderError::Timeout(format!(
                "no response within {}s",
                self.config.agent_timeout_secs
            ))),
        }
    }
}
