//! Canned demo wiring: fixed feeds, fixed history and dry-run sinks.
//!
//! Timestamps are relative to the moment the demo is built so the records
//! always fall inside the detector's lookback and the analysis window.

use crate::actions::{ActionExecutor, ActionSinks, ExecutorSettings};
use crate::agent::ObservabilityAgent;
use crate::analysis::{Commit, Deployment, RootCauseAnalyzer, StaticContext};
use crate::detect::{FeedAdapter, RecordKind, SignalDetector, SignalSource, StaticFeed};
use chrono::{DateTime, Duration, Utc};
use serde_json::{json, Value};
use std::sync::Arc;

pub const DEMO_DEPLOYMENT_ID: &str = "0Af5g00000DEMO1";
pub const DEMO_COMMIT_SHA: &str = "abc123def456";

fn ago(now: DateTime<Utc>, minutes: i64) -> String {
    (now - Duration::minutes(minutes)).to_rfc3339()
}

/// Two null-pointer failures in the same Apex class a few minutes apart.
pub fn apex_records(now: DateTime<Utc>) -> Vec<Value> {
    vec![
        json!({
            "Id": "07L5g00000DEMO1",
            "Message": "System.NullPointerException: Attempt to de-reference a null object",
            "StackTrace": "Class.AccountTriggerHandler.updateAccountStatus: line 42, column 1",
            "ApexClass": { "Name": "AccountTriggerHandler" },
            "MethodName": "updateAccountStatus",
            "Line": 42,
            "CreatedDate": ago(now, 5)
        }),
        json!({
            "Id": "07L5g00000DEMO2",
            "Message": "System.NullPointerException: Attempt to de-reference a null object",
            "StackTrace": "Class.AccountTriggerHandler.updateAccountStatus: line 42, column 1",
            "ApexClass": { "Name": "AccountTriggerHandler" },
            "MethodName": "updateAccountStatus",
            "Line": 42,
            "CreatedDate": ago(now, 3)
        }),
    ]
}

/// One succeeded deployment, which is not a signal, and no failures.
pub fn deployment_records(now: DateTime<Utc>) -> Vec<Value> {
    vec![json!({
        "Id": DEMO_DEPLOYMENT_ID,
        "Status": "Succeeded",
        "CreatedDate": ago(now, 15),
        "CreatedBy": { "Name": "Release Bot" }
    })]
}

/// A latency warning on an unrelated service.
pub fn alert_records(now: DateTime<Utc>) -> Vec<Value> {
    vec![json!({
        "id": "lat-7781",
        "message": "checkout-api p95 latency above 1500ms",
        "severity": "warning",
        "component": "checkout-api",
        "timestamp": ago(now, 4)
    })]
}

/// History the analyzer correlates against: the deployment landed ten
/// minutes before the first error and touched the failing class.
pub fn demo_context(now: DateTime<Utc>) -> StaticContext {
    let deployments = vec![Deployment {
        id: DEMO_DEPLOYMENT_ID.to_string(),
        created_at: now - Duration::minutes(15),
    }];
    let commits = vec![
        Commit {
            sha: DEMO_COMMIT_SHA.to_string(),
            message: "Fix account trigger validation logic".to_string(),
            author: Some("John Developer".to_string()),
            timestamp: now - Duration::minutes(35),
            files_changed: vec![
                "force-app/main/default/triggers/AccountTrigger.trigger".to_string(),
                "force-app/main/default/classes/AccountTriggerHandler.cls".to_string(),
            ],
        },
        Commit {
            sha: "def456ghi789".to_string(),
            message: "Update opportunity validation rules".to_string(),
            author: Some("Jane Developer".to_string()),
            timestamp: now - Duration::hours(2),
            files_changed: vec!["force-app/main/default/classes/OpportunityService.cls".to_string()],
        },
    ];
    StaticContext::new(deployments, commits)
}

pub fn demo_sources(now: DateTime<Utc>) -> Vec<Arc<dyn SignalSource>> {
    vec![
        Arc::new(FeedAdapter::new(
            "apex-errors",
            RecordKind::ApexError,
            StaticFeed::new("demo-apex", apex_records(now)),
        )),
        Arc::new(FeedAdapter::new(
            "deployments",
            RecordKind::Deployment,
            StaticFeed::new("demo-deployments", deployment_records(now)),
        )),
        Arc::new(FeedAdapter::new(
            "alerts",
            RecordKind::MonitoringAlert,
            StaticFeed::new("demo-alerts", alert_records(now)),
        )),
    ]
}

/// Build an agent over the demo feeds. Nothing leaves the process.
pub fn demo_agent(now: DateTime<Utc>) -> ObservabilityAgent {
    let detector = SignalDetector::new(
        demo_sources(now),
        now - Duration::hours(1),
        std::time::Duration::from_secs(5),
    );
    let analyzer = RootCauseAnalyzer::new(Arc::new(demo_context(now)), Duration::hours(24));
    let executor = ActionExecutor::new(ActionSinks::dry_run(), ExecutorSettings::default());
    ObservabilityAgent::new(detector, analyzer, executor, std::time::Duration::from_secs(30))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{ActionKind, ActionStatus};
    use crate::incident::IncidentStatus;

    #[tokio::test]
    async fn test_demo_cycle_remediates_apex_incident() {
        let agent = demo_agent(Utc::now());
        let report = agent.run_cycle().await;
        assert_eq!(report.signals_seen, 3);
        assert_eq!(report.incidents_created, 2);
        assert_eq!(report.incidents_updated, 1);

        let incidents = agent.incidents().await;
        let apex = incidents
            .iter()
            .find(|i| i.signals.iter().any(|s| s.source == "salesforce"))
            .unwrap();
        assert_eq!(apex.signals.len(), 2);
        assert_eq!(apex.status, IncidentStatus::Resolving);
        assert_eq!(apex.confidence(), 1.0);

        let analysis = apex.analysis.as_ref().unwrap();
        assert_eq!(analysis.related_deployments, vec![DEMO_DEPLOYMENT_ID.to_string()]);
        assert!(analysis.root_cause.contains(DEMO_COMMIT_SHA));

        let kinds: Vec<ActionKind> = apex.actions.iter().map(|a| a.kind).collect();
        assert!(kinds.contains(&ActionKind::RollbackSuggest));
        assert!(apex.actions.iter().all(|a| a.status == ActionStatus::Completed));
    }

    #[tokio::test]
    async fn test_demo_alert_stays_under_investigation() {
        let agent = demo_agent(Utc::now());
        agent.run_cycle().await;

        let incidents = agent.incidents().await;
        let alert = incidents
            .iter()
            .find(|i| i.signals.iter().any(|s| s.source == "monitoring"))
            .unwrap();
        assert_eq!(alert.status, IncidentStatus::Investigating);
        assert!(alert.actions.is_empty());
    }
}
