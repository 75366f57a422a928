//! Raw record feeds backing the signal adapters.

use super::SourceError;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;

/// A source of raw JSON records newer than a watermark.
#[async_trait::async_trait]
pub trait RecordFeed: Send + Sync {
    /// Short label used in logs and errors.
    fn label(&self) -> &str;

    /// Fetch raw records created at or after `since`.
    async fn fetch(&self, since: DateTime<Utc>) -> Result<Vec<Value>, SourceError>;
}

/// JSON-over-HTTP feed: `GET <url>?since=<rfc3339>`.
///
/// Accepts either a bare JSON array or an object carrying a `records` array.
pub struct HttpFeed {
    client: Client,
    url: String,
    token: Option<String>,
}

impl HttpFeed {
    pub fn new(url: impl Into<String>, token: Option<String>, timeout: Duration) -> Result<Self, SourceError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
            token,
        })
    }
}

#[async_trait::async_trait]
impl RecordFeed for HttpFeed {
    fn label(&self) -> &str {
        &self.url
    }

    async fn fetch(&self, since: DateTime<Utc>) -> Result<Vec<Value>, SourceError> {
        let mut req = self
            .client
            .get(&self.url)
            .query(&[("since", since.to_rfc3339())]);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(SourceError::Unavailable {
                feed: self.url.clone(),
                reason: format!("HTTP {}", status.as_u16()),
            });
        }

        let body: Value = resp.json().await?;
        records_from_body(body).ok_or_else(|| SourceError::BadPayload {
            feed: self.url.clone(),
            reason: "expected a JSON array or an object with a `records` array".to_string(),
        })
    }
}

pub(crate) fn records_from_body(body: Value) -> Option<Vec<Value>> {
    match body {
        Value::Array(items) => Some(items),
        Value::Object(mut obj) => match obj.remove("records") {
            Some(Value::Array(items)) => Some(items),
            _ => None,
        },
        _ => None,
    }
}

/// A fixed set of records. Used by demo mode and tests.
pub struct StaticFeed {
    label: String,
    records: Vec<Value>,
}

impl StaticFeed {
    pub fn new(label: impl Into<String>, records: Vec<Value>) -> Self {
        Self {
            label: label.into(),
            records,
        }
    }
}

#[async_trait::async_trait]
impl RecordFeed for StaticFeed {
    fn label(&self) -> &str {
        &self.label
    }

    async fn fetch(&self, _since: DateTime<Utc>) -> Result<Vec<Value>, SourceError> {
        // Watermark filtering happens on the normalized signals.
        Ok(self.records.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_body_shapes() {
        assert_eq!(records_from_body(json!([{"id": 1}])).unwrap().len(), 1);
        assert_eq!(
            records_from_body(json!({"records": [{"id": 1}, {"id": 2}]}))
                .unwrap()
                .len(),
            2
        );
        assert!(records_from_body(json!({"items": []})).is_none());
        assert!(records_from_body(json!("nope")).is_none());
    }

    #[tokio::test]
    async fn test_static_feed_returns_all_records() {
        let feed = StaticFeed::new("fixture", vec![json!({"id": "a"}), json!({"id": "b"})]);
        let records = feed.fetch(Utc::now()).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(feed.label(), "fixture");
    }
}
