use super::feed::RecordFeed;
use super::normalize::RecordKind;
use super::Signal;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, error, warn};

/// Trait for all signal source adapters.
///
/// Implementations never fail: an unreachable backend is logged and reported
/// as "no data", so one broken source cannot stall the others. Fetching twice
/// with the same watermark must return a superset, never contradicting data.
#[async_trait::async_trait]
pub trait SignalSource: Send + Sync {
    /// Unique adapter name; stamped on every signal it emits.
    fn name(&self) -> &str;

    /// Signals observed at or after `since`.
    async fn fetch_since(&self, since: DateTime<Utc>) -> Vec<Signal>;

    /// Whether the condition behind `signal` has cleared.
    async fn check_resolved(&self, signal: &Signal) -> bool;
}

/// Adapter combining a raw [`RecordFeed`] with a [`RecordKind`] normalizer.
pub struct FeedAdapter {
    name: String,
    kind: RecordKind,
    feed: Box<dyn RecordFeed>,
}

impl FeedAdapter {
    pub fn new(name: impl Into<String>, kind: RecordKind, feed: impl RecordFeed + 'static) -> Self {
        Self {
            name: name.into(),
            kind,
            feed: Box::new(feed),
        }
    }

    pub fn kind(&self) -> RecordKind {
        self.kind
    }

    fn normalize_all(&self, records: &[Value]) -> Vec<Signal> {
        records
            .iter()
            .filter_map(|r| self.kind.normalize(r, &self.name))
            .collect()
    }
}

#[async_trait::async_trait]
impl SignalSource for FeedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch_since(&self, since: DateTime<Utc>) -> Vec<Signal> {
        match self.feed.fetch(since).await {
            Ok(records) => {
                let fetched = records.len();
                let signals: Vec<Signal> = self
                    .normalize_all(&records)
                    .into_iter()
                    .filter(|s| s.timestamp >= since)
                    .collect();
                debug!(adapter = %self.name, fetched, signals = signals.len(), "feed fetched");
                signals
            }
            Err(e) => {
                error!(adapter = %self.name, feed = %self.feed.label(), error = %e, "source unavailable, reporting no signals");
                Vec::new()
            }
        }
    }

    /// Cleared once no other record for the same kind and component shows up
    /// at or after the original signal.
    async fn check_resolved(&self, signal: &Signal) -> bool {
        match self.feed.fetch(signal.timestamp).await {
            Ok(records) => !self.normalize_all(&records).iter().any(|s| {
                s.id != signal.id
                    && s.kind == signal.kind
                    && s.component == signal.component
                    && s.timestamp >= signal.timestamp
            }),
            Err(e) => {
                warn!(adapter = %self.name, signal_id = %signal.id, error = %e, "resolution check failed, treating as unresolved");
                false
            }
        }
    }
}
