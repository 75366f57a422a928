//! External context for analysis: recent deployments, commits and their
//! relevance to an incident's signals.

use super::AnalysisError;
use crate::detect::feed::records_from_body;
use crate::detect::{Signal, SignalKind};
use crate::incident::Incident;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Commits scoring above this are treated as related to a signal.
pub const RELEVANCE_THRESHOLD: f64 = 0.3;

const FIX_KEYWORDS: [&str; 5] = ["fix", "bug", "error", "issue", "problem"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    #[serde(alias = "Id")]
    pub id: String,
    #[serde(alias = "createdAt", alias = "CreatedDate")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: String,
    pub message: String,
    #[serde(default)]
    pub author: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, alias = "filesChanged", alias = "files")]
    pub files_changed: Vec<String>,
}

/// A commit that scored above [`RELEVANCE_THRESHOLD`] for one signal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelevantCommit {
    pub signal_id: String,
    pub commit: Commit,
    /// Additive, not normalized; may exceed 1.0.
    pub relevance: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AnalysisContext {
    pub recent_deployments: Vec<Deployment>,
    pub recent_commits: Vec<Commit>,
    pub related_code_changes: Vec<RelevantCommit>,
    /// Historical matching is not implemented; always empty when gathered.
    pub similar_incidents: Vec<String>,
}

/// Deployment and commit history the analyzer correlates against.
#[async_trait::async_trait]
pub trait ContextProvider: Send + Sync {
    async fn recent_deployments(&self, window: Duration) -> Result<Vec<Deployment>, AnalysisError>;
    async fn recent_commits(&self, window: Duration) -> Result<Vec<Commit>, AnalysisError>;
}

/// Score how likely `commit` is to be behind `signal`.
///
/// +0.4 when the component name appears in the message, +0.3 for a fix
/// keyword in the message, +0.5 per changed file whose path contains the
/// component name. Matching is case-insensitive.
pub fn relevance_score(signal: &Signal, commit: &Commit) -> f64 {
    let message = commit.message.to_lowercase();
    let component = signal.component.as_deref().map(str::to_lowercase);
    let mut score = 0.0;

    if let Some(component) = &component {
        if message.contains(component.as_str()) {
            score += 0.4;
        }
    }
    if FIX_KEYWORDS.iter().any(|k| message.contains(k)) {
        score += 0.3;
    }
    if let Some(component) = &component {
        for file in &commit.files_changed {
            if file.to_lowercase().contains(component.as_str()) {
                score += 0.5;
            }
        }
    }
    score
}

/// Commits relevant to any Error or TestFailure signal of `incident`.
pub fn relevant_commits(incident: &Incident, commits: &[Commit]) -> Vec<RelevantCommit> {
    let mut out = Vec::new();
    for signal in &incident.signals {
        if !matches!(signal.kind, SignalKind::Error | SignalKind::TestFailure) {
            continue;
        }
        for commit in commits {
            let relevance = relevance_score(signal, commit);
            if relevance > RELEVANCE_THRESHOLD {
                out.push(RelevantCommit {
                    signal_id: signal.id.clone(),
                    commit: commit.clone(),
                    relevance,
                });
            }
        }
    }
    out
}

/// Collect the context for `incident` from `provider`.
///
/// A failing provider degrades to empty lists; gathering never fails.
pub async fn gather(
    provider: &dyn ContextProvider,
    incident: &Incident,
    window: Duration,
    now: DateTime<Utc>,
) -> AnalysisContext {
    let cutoff = now - window;

    let recent_deployments: Vec<Deployment> = match provider.recent_deployments(window).await {
        Ok(list) => list.into_iter().filter(|d| d.created_at >= cutoff).collect(),
        Err(e) => {
            warn!(incident_id = %incident.id, error = %e, "deployment history unavailable");
            Vec::new()
        }
    };
    let recent_commits: Vec<Commit> = match provider.recent_commits(window).await {
        Ok(list) => list.into_iter().filter(|c| c.timestamp >= cutoff).collect(),
        Err(e) => {
            warn!(incident_id = %incident.id, error = %e, "commit history unavailable");
            Vec::new()
        }
    };

    let related_code_changes = relevant_commits(incident, &recent_commits);
    debug!(
        incident_id = %incident.id,
        deployments = recent_deployments.len(),
        commits = recent_commits.len(),
        relevant = related_code_changes.len(),
        "analysis context gathered"
    );

    AnalysisContext {
        recent_deployments,
        recent_commits,
        related_code_changes,
        similar_incidents: Vec::new(),
    }
}

/// Fixed deployment and commit lists. Used by demo mode and tests.
#[derive(Debug, Clone, Default)]
pub struct StaticContext {
    pub deployments: Vec<Deployment>,
    pub commits: Vec<Commit>,
}

impl StaticContext {
    pub fn new(deployments: Vec<Deployment>, commits: Vec<Commit>) -> Self {
        Self { deployments, commits }
    }
}

#[async_trait::async_trait]
impl ContextProvider for StaticContext {
    async fn recent_deployments(&self, _window: Duration) -> Result<Vec<Deployment>, AnalysisError> {
        Ok(self.deployments.clone())
    }

    async fn recent_commits(&self, _window: Duration) -> Result<Vec<Commit>, AnalysisError> {
        Ok(self.commits.clone())
    }
}

/// JSON-over-HTTP history: `GET <url>?since=<rfc3339>` on each endpoint.
///
/// An unset endpoint reports an empty history.
pub struct HttpContextProvider {
    client: Client,
    deployments_url: Option<String>,
    commits_url: Option<String>,
    token: Option<String>,
}

impl HttpContextProvider {
    pub fn new(
        deployments_url: Option<String>,
        commits_url: Option<String>,
        token: Option<String>,
        timeout: std::time::Duration,
    ) -> Result<Self, AnalysisError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            deployments_url,
            commits_url,
            token,
        })
    }

    async fn fetch<T: DeserializeOwned>(&self, url: &str, window: Duration) -> Result<Vec<T>, AnalysisError> {
        let since = Utc::now() - window;
        let mut req = self.client.get(url).query(&[("since", since.to_rfc3339())]);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }

        let resp = req.send().await?;
        if !resp.status().is_success() {
            return Err(AnalysisError::Context(format!("{} returned HTTP {}", url, resp.status().as_u16())));
        }
        let body: serde_json::Value = resp.json().await?;
        let records = records_from_body(body)
            .ok_or_else(|| AnalysisError::Context(format!("{} returned an unexpected payload", url)))?;

        // Skip malformed entries rather than failing the whole history.
        Ok(records
            .into_iter()
            .filter_map(|r| serde_json::from_value(r).ok())
            .collect())
    }
}

#[async_trait::async_trait]
impl ContextProvider for HttpContextProvider {
    async fn recent_deployments(&self, window: Duration) -> Result<Vec<Deployment>, AnalysisError> {
        match &self.deployments_url {
            Some(url) => self.fetch(url, window).await,
            None => Ok(Vec::new()),
        }
    }

    async fn recent_commits(&self, window: Duration) -> Result<Vec<Commit>, AnalysisError> {
        match &self.commits_url {
            Some(url) => self.fetch(url, window).await,
            None => Ok(Vec::new()),
        }
    }
}
