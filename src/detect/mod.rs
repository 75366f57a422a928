//! Signal detection -- normalized anomaly records and the adapters that produce them.

pub mod detector;
pub mod feed;
pub mod normalize;
pub mod source;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::detector::SignalDetector;
pub use self::feed::{HttpFeed, RecordFeed, StaticFeed};
pub use self::normalize::RecordKind;
pub use self::source::{FeedAdapter, SignalSource};

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("feed {feed} unavailable: {reason}")]
    Unavailable { feed: String, reason: String },

    #[error("unexpected payload from {feed}: {reason}")]
    BadPayload { feed: String, reason: String },

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Severity levels shared by signals and incidents, ordered low to critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of anomaly a signal reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Error,
    Performance,
    Deployment,
    TestFailure,
    LogAnomaly,
    MonitoringAlert,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Error => write!(f, "error"),
            SignalKind::Performance => write!(f, "performance"),
            SignalKind::Deployment => write!(f, "deployment"),
            SignalKind::TestFailure => write!(f, "test_failure"),
            SignalKind::LogAnomaly => write!(f, "log_anomaly"),
            SignalKind::MonitoringAlert => write!(f, "monitoring_alert"),
        }
    }
}

/// A single normalized anomaly observation.
///
/// Built once by an adapter and never mutated afterwards. Timestamps are
/// always UTC; adapters normalize naive source timestamps before building one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: String,
    pub kind: SignalKind,
    /// Origin system name, e.g. `salesforce` or `monitoring`.
    pub source: String,
    /// Name of the adapter that produced this signal; resolution checks route back to it.
    #[serde(default)]
    pub adapter: String,
    /// Logical subsystem (class, flow, pipeline) used as a correlation key.
    pub component: Option<String>,
    pub description: String,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    /// Original payload, kept for audit.
    pub raw: Option<String>,
}

impl Signal {
    pub fn new(
        id: impl Into<String>,
        kind: SignalKind,
        source: impl Into<String>,
        description: impl Into<String>,
        severity: Severity,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            source: source.into(),
            adapter: String::new(),
            component: None,
            description: description.into(),
            severity,
            timestamp,
            metadata: serde_json::Map::new(),
            raw: None,
        }
    }

    pub fn with_component(mut self, component: impl Into<String>) -> Self {
        self.component = Some(component.into());
        self
    }

    pub fn with_adapter(mut self, adapter: impl Into<String>) -> Self {
        self.adapter = adapter.into();
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw = Some(raw.into());
        self
    }
}
