use super::gate;
use super::render;
use super::sinks::ActionSinks;
use super::{Action, ActionError, ActionKind};
use crate::analysis::Analysis;
use crate::incident::Incident;
use chrono::Utc;
use futures::future::join_all;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Routing and rendering settings for dispatched actions.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub chat_channel: String,
    pub rollback_channel: String,
    pub ticket_project: String,
    pub dashboard_url: String,
    /// Upper bound for one action, including every sink call it makes.
    pub sink_timeout: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            chat_channel: "#alerts".into(),
            rollback_channel: "#deployments".into(),
            ticket_project: "OBS".into(),
            dashboard_url: "http://localhost:8080".into(),
            sink_timeout: Duration::from_secs(10),
        }
    }
}

enum Outcome {
    Done(Map<String, Value>),
    Skipped(&'static str),
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

/// Fans out the gated actions for one incident and joins them.
pub struct ActionExecutor {
    sinks: ActionSinks,
    settings: Arc<ExecutorSettings>,
}

impl ActionExecutor {
    pub fn new(sinks: ActionSinks, settings: ExecutorSettings) -> Self {
        Self {
            sinks,
            settings: Arc::new(settings),
        }
    }

    /// Run every action the gate enables for `incident`.
    ///
    /// Each action runs in its own task; a failure, timeout or panic in one
    /// is recorded as a `Failed` action and never affects its siblings. The
    /// returned list holds one terminal action per enabled flag, in no
    /// particular completion order. An incident without analysis yields
    /// nothing.
    pub async fn execute(&self, incident: &Incident) -> Vec<Action> {
        let Some(analysis) = incident.analysis.clone() else {
            return Vec::new();
        };
        let kinds = gate::plan(incident, &analysis).kinds();
        if kinds.is_empty() {
            return Vec::new();
        }

        let incident = Arc::new(incident.clone());
        let analysis = Arc::new(analysis);
        debug!(incident_id = %incident.id, actions = kinds.len(), "dispatching actions");

        let handles = kinds.iter().map(|&kind| {
            let incident = Arc::clone(&incident);
            let analysis = Arc::clone(&analysis);
            let sinks = self.sinks.clone();
            let settings = Arc::clone(&self.settings);
            tokio::spawn(async move { dispatch(kind, &incident, &analysis, &sinks, &settings).await })
        });
        let joined = join_all(handles).await;

        kinds
            .into_iter()
            .zip(joined)
            .map(|(kind, result)| match result {
                Ok(action) => action,
                Err(e) => {
                    error!(incident_id = %incident.id, %kind, error = %e, "action task aborted");
                    Action::pending(kind, &incident.id, Utc::now()).fail(format!("action task aborted: {}", e))
                }
            })
            .collect()
    }
}

async fn dispatch(
    kind: ActionKind,
    incident: &Incident,
    analysis: &Analysis,
    sinks: &ActionSinks,
    settings: &ExecutorSettings,
) -> Action {
    let action = Action::pending(kind, &incident.id, Utc::now());
    let outcome = tokio::time::timeout(settings.sink_timeout, perform(kind, incident, analysis, sinks, settings)).await;

    match outcome {
        Ok(Ok(Outcome::Done(result))) => {
            info!(incident_id = %incident.id, action_id = %action.id, %kind, "action completed");
            action.complete(result)
        }
        Ok(Ok(Outcome::Skipped(reason))) => {
            debug!(incident_id = %incident.id, %kind, reason, "action skipped");
            action.skip(reason)
        }
        Ok(Err(e)) => {
            error!(incident_id = %incident.id, action_id = %action.id, %kind, error = %e, "action failed");
            action.fail(e)
        }
        Err(_) => {
            let e = ActionError::Timeout {
                kind,
                secs: settings.sink_timeout.as_secs(),
            };
            error!(incident_id = %incident.id, action_id = %action.id, %kind, error = %e, "action timed out");
            action.fail(e)
        }
    }
}

async fn perform(
    kind: ActionKind,
    incident: &Incident,
    analysis: &Analysis,
    sinks: &ActionSinks,
    settings: &ExecutorSettings,
) -> Result<Outcome, ActionError> {
    match kind {
        ActionKind::TicketCreate => {
            let payload = render::ticket_payload(incident, analysis, &settings.ticket_project);
            let receipt = sinks.tickets.create_ticket(&payload).await?;
            Ok(Outcome::Done(object(json!({
                "ticket_id": receipt.id,
                "ticket_url": receipt.url,
            }))))
        }
        ActionKind::CommentOnReview => {
            if !analysis.has_related_commits() {
                return Ok(Outcome::Skipped("No related commits found"));
            }
            let reviews = sinks.reviews.reviews_for_commits(&analysis.related_commits).await?;
            let body = render::review_comment(incident, analysis, &settings.dashboard_url);
            let mut comments = Vec::with_capacity(reviews.len());
            for review in &reviews {
                let receipt = sinks.reviews.post_comment(review, &body).await?;
                comments.push(json!({"review": review, "comment_id": receipt.id, "comment_url": receipt.url}));
            }
            Ok(Outcome::Done(object(json!({ "comments": comments }))))
        }
        ActionKind::ChatNotify => {
            let message = render::chat_alert(incident, analysis);
            let receipt = sinks.chat.notify(&settings.chat_channel, &message).await?;
            Ok(Outcome::Done(object(json!({
                "message_id": receipt.id,
                "channel": settings.chat_channel,
            }))))
        }
        ActionKind::CodeIssueCreate => {
            let payload = render::code_issue_payload(incident, analysis, &settings.dashboard_url);
            let receipt = sinks.code_issues.create_ticket(&payload).await?;
            Ok(Outcome::Done(object(json!({
                "issue_id": receipt.id,
                "issue_url": receipt.url,
            }))))
        }
        ActionKind::RollbackSuggest => {
            if !analysis.has_related_deployments() {
                return Ok(Outcome::Skipped("No related deployments found"));
            }
            let message = render::rollback_message(incident, analysis, &settings.dashboard_url);
            let receipt = sinks.chat.notify(&settings.rollback_channel, &message).await?;
            Ok(Outcome::Done(object(json!({
                "message_id": receipt.id,
                "deployments": analysis.related_deployments,
            }))))
        }
    }
}
