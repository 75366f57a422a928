//! Incidents -- correlated groups of signals and their remediation state.

pub mod store;

use crate::actions::Action;
use crate::analysis::Analysis;
use crate::detect::{Severity, Signal};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub use self::store::IncidentStore;

#[derive(Debug, Error, PartialEq)]
pub enum IncidentError {
    #[error("incident {0} not found")]
    NotFound(String),

    #[error("incident {id}: illegal transition {from} -> {to}")]
    IllegalTransition {
        id: String,
        from: IncidentStatus,
        to: IncidentStatus,
    },

    #[error("incident {0} is closed")]
    Closed(String),
}

/// Lifecycle of an incident.
///
/// ```text
/// Detected ──► Investigating ◄──► Resolving ──► Resolved
///     └──────────────────────────►┘                │
///  (any non-closed state) ──────────────────────► Closed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    Detected,
    Investigating,
    Resolving,
    Resolved,
    Closed,
}

impl IncidentStatus {
    /// Open incidents can still absorb new signals.
    pub fn is_open(&self) -> bool {
        !matches!(self, IncidentStatus::Resolved | IncidentStatus::Closed)
    }

    pub fn can_transition_to(&self, next: IncidentStatus) -> bool {
        use IncidentStatus::*;
        match (self, next) {
            (Closed, _) => false,
            (_, Closed) => true,
            (Resolved, _) => false,
            // Re-analysis may land on the same state again.
            (Investigating, Investigating) | (Resolving, Resolving) => true,
            (Detected, Investigating) | (Detected, Resolving) => true,
            (Investigating, Resolving) | (Resolving, Investigating) => true,
            (Resolving, Resolved) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            IncidentStatus::Detected => "detected",
            IncidentStatus::Investigating => "investigating",
            IncidentStatus::Resolving => "resolving",
            IncidentStatus::Resolved => "resolved",
            IncidentStatus::Closed => "closed",
        }
    }
}

impl std::fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The unit of correlation and remediation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Incident {
    pub id: String,
    pub title: String,
    pub description: String,
    /// Always the maximum severity of the attached signals.
    pub severity: Severity,
    pub status: IncidentStatus,
    /// Append-only, in detection order.
    pub signals: Vec<Signal>,
    pub analysis: Option<Analysis>,
    /// Append-only.
    pub actions: Vec<Action>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set exactly when `status == Resolved`.
    pub resolved_at: Option<DateTime<Utc>>,
    pub assignee: Option<String>,
    pub tags: Vec<String>,
}

impl Incident {
    /// Open a new incident seeded by `signal`.
    pub fn open(signal: Signal, now: DateTime<Utc>) -> Self {
        Self {
            id: new_incident_id(now),
            title: format!("{}: {}", signal.kind, signal.description),
            description: signal.description.clone(),
            severity: signal.severity,
            status: IncidentStatus::Detected,
            signals: vec![signal],
            analysis: None,
            actions: Vec::new(),
            created_at: now,
            updated_at: now,
            resolved_at: None,
            assignee: None,
            tags: Vec::new(),
        }
    }

    /// Append a correlated signal, raising severity if needed.
    pub fn attach(&mut self, signal: Signal, now: DateTime<Utc>) {
        self.severity = self.severity.max(signal.severity);
        self.signals.push(signal);
        self.updated_at = now;
    }

    /// Replace the analysis; only the newest one is kept.
    pub fn set_analysis(&mut self, analysis: Analysis, now: DateTime<Utc>) {
        self.analysis = Some(analysis);
        self.updated_at = now;
    }

    pub fn record_actions(&mut self, actions: Vec<Action>, now: DateTime<Utc>) {
        if actions.is_empty() {
            return;
        }
        self.actions.extend(actions);
        self.updated_at = now;
    }

    /// Move to `next`, keeping `resolved_at` consistent with the status.
    pub fn transition(&mut self, next: IncidentStatus, now: DateTime<Utc>) -> Result<(), IncidentError> {
        if !self.status.can_transition_to(next) {
            return Err(IncidentError::IllegalTransition {
                id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.resolved_at = (next == IncidentStatus::Resolved).then_some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn confidence(&self) -> f64 {
        self.analysis.as_ref().map(|a| a.confidence).unwrap_or(0.0)
    }

    pub fn has_signal(&self, signal_id: &str) -> bool {
        self.signals.iter().any(|s| s.id == signal_id)
    }
}

/// Time-derived id; the random suffix keeps ids unique within one second.
pub fn new_incident_id(now: DateTime<Utc>) -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!("INC-{}-{}", now.format("%Y%m%d-%H%M%S"), &suffix[..8])
}
