//! Root-cause analysis: context gathering, rule engine and delegated reasoning.

pub mod analyzer;
pub mod context;
pub mod prompt;
pub mod reasoning;
pub mod rules;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use self::analyzer::RootCauseAnalyzer;
pub use self::context::{
    AnalysisContext, Commit, ContextProvider, Deployment, HttpContextProvider, RelevantCommit, StaticContext,
};
pub use self::reasoning::{OpenAiCompatClient, ReasoningService};

/// Root cause reported when analysis could not run at all.
pub const ANALYSIS_FAILED: &str = "analysis failed";

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("incident {0} has no signals to analyze")]
    EmptyIncident(String),

    #[error("reasoning service error: {0}")]
    Reasoning(String),

    #[error("reasoning service timed out after {0}s")]
    Timeout(u64),

    #[error("unparseable reasoning response: {0}")]
    Unparseable(String),

    #[error("context provider error: {0}")]
    Context(String),

    #[error("http transport error: {0}")]
    Http(#[from] reqwest::Error),
}

/// A file worth inspecting, with how likely it is to be involved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeChange {
    pub file: String,
    #[serde(default, alias = "changeType")]
    pub change_type: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub likelihood: f64,
}

/// Structured explanation attached to an incident.
///
/// Replaced wholesale by each re-analysis; never edited in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub root_cause: String,
    /// Always within `[0.0, 1.0]`.
    pub confidence: f64,
    pub related_deployments: Vec<String>,
    pub related_commits: Vec<String>,
    pub suggested_actions: Vec<String>,
    pub code_changes: Vec<CodeChange>,
    pub impact_assessment: Option<String>,
    pub analyzed_at: DateTime<Utc>,
}

impl Analysis {
    /// Zero-confidence result for an analysis that could not be performed.
    pub fn failed(now: DateTime<Utc>) -> Self {
        Self {
            root_cause: ANALYSIS_FAILED.to_string(),
            confidence: 0.0,
            related_deployments: Vec::new(),
            related_commits: Vec::new(),
            suggested_actions: Vec::new(),
            code_changes: Vec::new(),
            impact_assessment: None,
            analyzed_at: now,
        }
    }

    pub fn has_related_commits(&self) -> bool {
        !self.related_commits.is_empty()
    }

    pub fn has_related_deployments(&self) -> bool {
        !self.related_deployments.is_empty()
    }
}
