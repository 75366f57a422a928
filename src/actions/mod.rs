//! Remediation actions: the confidence gate, the sinks actions are sent to,
//! payload rendering and the concurrent executor.

pub mod executor;
pub mod gate;
pub mod render;
pub mod sinks;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

pub use self::executor::{ActionExecutor, ExecutorSettings};
pub use self::gate::ActionPlan;
pub use self::sinks::{ActionSinks, ChatSink, DryRunSink, Receipt, ReviewSink, TicketSink, WebhookSink};

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("{sink} rejected the request: {reason}")]
    Rejected { sink: String, reason: String },

    #[error("unexpected response from {sink}: {reason}")]
    BadResponse { sink: String, reason: String },

    #[error("{kind} did not complete within {secs}s")]
    Timeout { kind: ActionKind, secs: u64 },

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    TicketCreate,
    CommentOnReview,
    ChatNotify,
    CodeIssueCreate,
    RollbackSuggest,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::TicketCreate => "ticket_create",
            ActionKind::CommentOnReview => "comment_on_review",
            ActionKind::ChatNotify => "chat_notify",
            ActionKind::CodeIssueCreate => "code_issue_create",
            ActionKind::RollbackSuggest => "rollback_suggest",
        }
    }

    fn id_prefix(&self) -> &'static str {
        match self {
            ActionKind::TicketCreate => "ticket",
            ActionKind::CommentOnReview => "review-comment",
            ActionKind::ChatNotify => "chat",
            ActionKind::CodeIssueCreate => "code-issue",
            ActionKind::RollbackSuggest => "rollback",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ActionKind::TicketCreate => "Create ticket for incident",
            ActionKind::CommentOnReview => "Comment on related code reviews",
            ActionKind::ChatNotify => "Send chat notification",
            ActionKind::CodeIssueCreate => "Create code issue",
            ActionKind::RollbackSuggest => "Suggest deployment rollback",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionStatus {
    Pending,
    Completed,
    Failed,
    Skipped,
}

impl ActionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ActionStatus::Pending)
    }
}

/// One remediation attempt.
///
/// Created `Pending` and moved to exactly one terminal status by consuming
/// it; a terminal action is never modified again.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub id: String,
    pub kind: ActionKind,
    pub description: String,
    pub status: ActionStatus,
    /// Sink-specific details, or `error` / `reason` for failed and skipped actions.
    pub result: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl Action {
    pub fn pending(kind: ActionKind, incident_id: &str, now: DateTime<Utc>) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self {
            id: format!("{}-{}-{}", kind.id_prefix(), incident_id, &suffix[..8]),
            kind,
            description: kind.description().to_string(),
            status: ActionStatus::Pending,
            result: Map::new(),
            timestamp: now,
        }
    }

    pub fn complete(mut self, result: Map<String, Value>) -> Self {
        self.status = ActionStatus::Completed;
        self.result = result;
        self
    }

    pub fn fail(mut self, error: impl std::fmt::Display) -> Self {
        self.status = ActionStatus::Failed;
        self.result = Map::new();
        self.result.insert("error".into(), Value::String(error.to_string()));
        self
    }

    pub fn skip(mut self, reason: impl Into<String>) -> Self {
        self.status = ActionStatus::Skipped;
        self.result = Map::new();
        self.result.insert("reason".into(), Value::String(reason.into()));
        self
    }
}
