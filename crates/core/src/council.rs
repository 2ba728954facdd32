//! Deliberation domain types — tasks, rounds, agent responses.
//!
//! A `Task` is one multi-round deliberation. It is created on submission,
//! mutated only by the round orchestrator, and immutable once completed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a deliberation task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A configured persona bound to one model backend.
///
/// Supplied by the caller; the orchestrator never mutates it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentDescriptor {
    pub id: String,
    pub name: String,
    /// Domain of expertise, e.g. "security" or "distributed systems"
    pub specialty: String,
    /// Provider key: "openai", "anthropic", "google", "openrouter"
    pub provider: String,
    /// Model id or short alias
    pub model: String,
}

/// One agent's answer within one round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentResponse {
    pub agent_id: String,
    pub agent_name: String,
    pub response: String,
    pub timestamp: DateTime<Utc>,
}

/// One synchronous pass where every agent produced exactly one response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscussionRound {
    /// 1-based, gapless
    pub round_number: u32,
    pub agent_responses: Vec<AgentResponse>,
    pub timestamp: DateTime<Utc>,
}

/// A multi-round deliberation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub prompt: String,
    pub status: TaskStatus,

    /// The round that will run next while processing
    pub current_round: u32,
    pub max_rounds: u32,

    #[serde(default)]
    pub discussion_rounds: Vec<DiscussionRound>,

    /// Responses of the most recent round
    #[serde(default)]
    pub results: Vec<AgentResponse>,

    /// Roster fixed at submission
    pub agents: Vec<AgentDescriptor>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default)]
    pub credits_charged: i64,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    /// Failure reason when status is failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Task {
    /// A freshly submitted task, processing round 1.
    pub fn new(
        prompt: impl Into<String>,
        agents: Vec<AgentDescriptor>,
        max_rounds: u32,
        user_id: Option<String>,
        credits_charged: i64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            prompt: prompt.into(),
            status: TaskStatus::Processing,
            current_round: 1,
            max_rounds,
            discussion_rounds: Vec::new(),
            results: Vec::new(),
            agents,
            user_id,
            credits_charged,
            created_at: Utc::now(),
            completed_at: None,
            error: None,
        }
    }

    /// Append a finished round and move the task forward.
    ///
    /// Returns whether another round should run.
    pub fn record_round(&mut self, round: DiscussionRound) -> bool {
        self.results = round.agent_responses.clone();
        self.discussion_rounds.push(round);

        if self.current_round < self.max_rounds {
            self.current_round += 1;
            true
        } else {
            self.status = TaskStatus::Completed;
            self.completed_at = Some(Utc::now());
            false
        }
    }

    /// Rounds recorded must track the round counter.
    pub fn is_consistent(&self) -> bool {
        let recorded = self.discussion_rounds.len() as u32;
        match self.status {
            TaskStatus::Completed => recorded == self.max_rounds,
            TaskStatus::Processing | TaskStatus::Pending => recorded + 1 == self.current_round,
            TaskStatus::Failed => recorded <= self.max_rounds,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(id: &str) -> AgentDescriptor {
        AgentDescriptor {
            id: id.into(),
            name: format!("Agent {id}"),
            specialty: "testing".into(),
            provider: "openai".into(),
            model: "gpt-4o".into(),
        }
    }

    fn round(n: u32) -> DiscussionRound {
        DiscussionRound {
            round_number: n,
            agent_responses: vec![AgentResponse {
                agent_id: "a".into(),
                agent_name: "Agent a".into(),
                response: format!("answer {n}"),
                timestamp: Utc::now(),
            }],
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn new_task_is_processing_round_one() {
        let task = Task::new("why?", vec![agent("a")], 3, None, 1);
        assert_eq!(task.status, TaskStatus::Processing);
        assert_eq!(task.current_round, 1);
        assert!(task.is_consistent());
    }

    #[test]
    fn recording_rounds_completes_at_max() {
        let mut task = Task::new("why?", vec![agent("a")], 2, None, 1);

        assert!(task.record_round(round(1)));
        assert_eq!(task.current_round, 2);
        assert!(task.is_consistent());

        assert!(!task.record_round(round(2)));
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.current_round, 2);
        assert!(task.completed_at.is_some());
        assert_eq!(task.results[0].response, "answer 2");
        assert!(task.is_consistent());
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Processing,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("paused"), None);
    }
}
