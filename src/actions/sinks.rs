//! External action sinks: ticketing, code review and chat.

use super::ActionError;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// What a sink reports back for an accepted request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Receipt {
    pub id: String,
    pub url: Option<String>,
}

/// Creates tickets or issues from a rendered payload.
#[async_trait::async_trait]
pub trait TicketSink: Send + Sync {
    async fn create_ticket(&self, payload: &Value) -> Result<Receipt, ActionError>;
}

/// Code-review host: finds reviews for commits and comments on them.
#[async_trait::async_trait]
pub trait ReviewSink: Send + Sync {
    async fn reviews_for_commits(&self, commits: &[String]) -> Result<Vec<String>, ActionError>;
    async fn post_comment(&self, target_id: &str, body: &str) -> Result<Receipt, ActionError>;
}

#[async_trait::async_trait]
pub trait ChatSink: Send + Sync {
    async fn notify(&self, channel: &str, payload: &Value) -> Result<Receipt, ActionError>;
}

/// The set of sinks the executor dispatches to.
#[derive(Clone)]
pub struct ActionSinks {
    pub tickets: Arc<dyn TicketSink>,
    pub code_issues: Arc<dyn TicketSink>,
    pub reviews: Arc<dyn ReviewSink>,
    pub chat: Arc<dyn ChatSink>,
}

impl ActionSinks {
    /// Every sink logs instead of calling out.
    pub fn dry_run() -> Self {
        Self {
            tickets: Arc::new(DryRunSink::new("tickets")),
            code_issues: Arc::new(DryRunSink::new("code-issues")),
            reviews: Arc::new(DryRunSink::new("reviews")),
            chat: Arc::new(DryRunSink::new("chat")),
        }
    }
}

/// Logs each request and returns a generated receipt.
pub struct DryRunSink {
    label: String,
    counter: AtomicU64,
}

impl DryRunSink {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            counter: AtomicU64::new(0),
        }
    }

    fn receipt(&self) -> Receipt {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        Receipt {
            id: format!("dry-run-{}-{}", self.label, n),
            url: None,
        }
    }
}

#[async_trait::async_trait]
impl TicketSink for DryRunSink {
    async fn create_ticket(&self, payload: &Value) -> Result<Receipt, ActionError> {
        let receipt = self.receipt();
        info!(sink = %self.label, receipt = %receipt.id, summary = %payload["summary"].as_str().or(payload["title"].as_str()).unwrap_or_default(), "dry run: ticket");
        Ok(receipt)
    }
}

#[async_trait::async_trait]
impl ReviewSink for DryRunSink {
    async fn reviews_for_commits(&self, commits: &[String]) -> Result<Vec<String>, ActionError> {
        // One review per commit stands in for the real lookup.
        Ok(commits.iter().map(|sha| format!("review-{}", sha)).collect())
    }

    async fn post_comment(&self, target_id: &str, body: &str) -> Result<Receipt, ActionError> {
        let receipt = self.receipt();
        info!(sink = %self.label, receipt = %receipt.id, target = %target_id, bytes = body.len(), "dry run: review comment");
        Ok(receipt)
    }
}

#[async_trait::async_trait]
impl ChatSink for DryRunSink {
    async fn notify(&self, channel: &str, payload: &Value) -> Result<Receipt, ActionError> {
        let receipt = self.receipt();
        info!(sink = %self.label, receipt = %receipt.id, %channel, payload = %payload, "dry run: chat message");
        Ok(receipt)
    }
}

/// POSTs JSON to a single webhook URL.
///
/// Review operations are distinguished by an `op` field. The response must
/// carry an identifier under `id`, `key`, `number` or `ts`.
pub struct WebhookSink {
    client: Client,
    url: String,
    label: String,
}

impl WebhookSink {
    pub fn new(label: impl Into<String>, url: impl Into<String>, timeout: Duration) -> Result<Self, ActionError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            label: label.into(),
        })
    }

    async fn post(&self, body: &Value) -> Result<Value, ActionError> {
        let resp = self.client.post(&self.url).json(body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(ActionError::Rejected {
                sink: self.label.clone(),
                reason: format!("HTTP {}: {}", status.as_u16(), text),
            });
        }
        Ok(resp.json().await?)
    }

    fn receipt_from(&self, body: &Value) -> Result<Receipt, ActionError> {
        let id = ["id", "key", "number", "ts"]
            .iter()
            .find_map(|k| match &body[*k] {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .ok_or_else(|| ActionError::BadResponse {
                sink: self.label.clone(),
                reason: "response carries no identifier".into(),
            })?;
        let url = ["url", "html_url"]
            .iter()
            .find_map(|k| body[*k].as_str().map(str::to_string));
        Ok(Receipt { id, url })
    }
}

#[async_trait::async_trait]
impl TicketSink for WebhookSink {
    async fn create_ticket(&self, payload: &Value) -> Result<Receipt, ActionError> {
        let body = self.post(payload).await?;
        self.receipt_from(&body)
    }
}

#[async_trait::async_trait]
impl ReviewSink for WebhookSink {
    async fn reviews_for_commits(&self, commits: &[String]) -> Result<Vec<String>, ActionError> {
        let body = self.post(&json!({"op": "find_reviews", "commits": commits})).await?;
        let list = match &body {
            Value::Array(items) => items,
            other => other["reviews"].as_array().ok_or_else(|| ActionError::BadResponse {
                sink: self.label.clone(),
                reason: "expected a list of reviews".into(),
            })?,
        };
        Ok(list
            .iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .collect())
    }

    async fn post_comment(&self, target_id: &str, body: &str) -> Result<Receipt, ActionError> {
        let resp = self
            .post(&json!({"op": "comment", "target": target_id, "body": body}))
            .await?;
        self.receipt_from(&resp)
    }
}

#[async_trait::async_trait]
impl ChatSink for WebhookSink {
    async fn notify(&self, channel: &str, payload: &Value) -> Result<Receipt, ActionError> {
        let resp = self.post(&json!({"channel": channel, "message": payload})).await?;
        self.receipt_from(&resp)
    }
}
