//! End-to-end pipeline tests: detection through correlation, analysis, gating
//! and remediation, wired the way the daemon wires them.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use signalwatch::actions::{gate, ActionError, ActionExecutor, ActionKind, ActionSinks, ActionStatus, ExecutorSettings, Receipt, TicketSink};
use signalwatch::agent::ObservabilityAgent;
use signalwatch::analysis::context::{gather, AnalysisContext, RelevantCommit};
use signalwatch::analysis::{rules, AnalysisError, Commit, Deployment, ReasoningService, RootCauseAnalyzer, StaticContext};
use signalwatch::correlate::IncidentCorrelator;
use signalwatch::detect::{Severity, Signal, SignalDetector, SignalKind, SignalSource};
use signalwatch::incident::{Incident, IncidentStatus, IncidentStore};

/// Hands out its queued signals on the first fetch, then nothing.
struct QueuedSource {
    queue: Mutex<Vec<Signal>>,
}

impl QueuedSource {
    fn new(signals: Vec<Signal>) -> Self {
        Self {
            queue: Mutex::new(signals),
        }
    }
}

#[async_trait::async_trait]
impl SignalSource for QueuedSource {
    fn name(&self) -> &str {
        "queued"
    }

    async fn fetch_since(&self, _since: DateTime<Utc>) -> Vec<Signal> {
        std::mem::take(&mut *self.queue.lock().unwrap())
    }

    async fn check_resolved(&self, _signal: &Signal) -> bool {
        false
    }
}

fn apex_error(id: &str, component: &str, at: DateTime<Utc>) -> Signal {
    Signal::new(
        id,
        SignalKind::Error,
        "salesforce",
        "Apex error: System.NullPointerException",
        Severity::High,
        at,
    )
    .with_component(component)
    .with_adapter("queued")
}

fn agent_over(signals: Vec<Signal>, history: StaticContext, sinks: ActionSinks) -> ObservabilityAgent {
    let source: Arc<dyn SignalSource> = Arc::new(QueuedSource::new(signals));
    let detector = SignalDetector::new(vec![source], Utc::now() - chrono::Duration::hours(1), Duration::from_secs(1));
    let analyzer = RootCauseAnalyzer::new(Arc::new(history), chrono::Duration::hours(24));
    let executor = ActionExecutor::new(sinks, ExecutorSettings::default());
    ObservabilityAgent::new(detector, analyzer, executor, Duration::from_secs(60))
}

/// A deployment ten minutes before `at` and a fix commit naming the component.
fn deployment_history(at: DateTime<Utc>) -> StaticContext {
    StaticContext::new(
        vec![Deployment {
            id: "deploy-001".into(),
            created_at: at - chrono::Duration::minutes(10),
        }],
        vec![Commit {
            sha: "abc123def456".into(),
            message: "fix AccountTriggerHandler null check".into(),
            author: Some("dev".into()),
            timestamp: at - chrono::Duration::minutes(20),
            files_changed: vec!["classes/AccountTriggerHandler.cls".into()],
        }],
    )
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_first_signal_opens_detected_incident() {
    let store = Arc::new(IncidentStore::new());
    let correlator = IncidentCorrelator::new(Arc::clone(&store));

    let correlation = correlator
        .correlate(apex_error("sf-apex-1", "AccountTriggerHandler", Utc::now()))
        .await
        .unwrap()
        .unwrap();

    assert!(correlation.created);
    assert_eq!(correlation.incident.status, IncidentStatus::Detected);
    assert_eq!(correlation.incident.severity, Severity::High);
    assert_eq!(store.len().await, 1);
}

#[tokio::test]
async fn test_deployment_and_fix_commit_reach_ticket_threshold() {
    let now = Utc::now();
    let signal_at = now - chrono::Duration::minutes(2);
    let incident = Incident::open(apex_error("sf-apex-1", "AccountTriggerHandler", signal_at), now);

    let history = deployment_history(signal_at);
    let ctx = gather(&history, &incident, chrono::Duration::hours(24), now).await;
    let analysis = rules::analyze(&incident, &ctx, now);

    assert_eq!(analysis.confidence, 0.7);
    assert!(analysis.root_cause.contains("Correlated with deployment: deploy-001"));
    assert!(analysis.root_cause.contains("Related to code changes: abc123def456"));

    let plan = gate::plan(&incident, &analysis);
    assert!(plan.create_ticket);
    assert!(plan.comment_on_review);
    assert!(plan.create_code_issue);
    // The chat threshold is strict and 0.4 + 0.3 lands exactly on it.
    assert!(!plan.notify_chat);
    assert!(!plan.suggest_rollback);
}

#[tokio::test]
async fn test_clustered_deployment_incident_notifies_chat() {
    let now = Utc::now();
    let first_at = now - chrono::Duration::minutes(3);
    let mut incident = Incident::open(apex_error("sf-apex-1", "AccountTriggerHandler", first_at), now);
    incident.attach(apex_error("sf-apex-2", "AccountTriggerHandler", now - chrono::Duration::minutes(2)), now);

    let history = deployment_history(first_at);
    let ctx = gather(&history, &incident, chrono::Duration::hours(24), now).await;
    let analysis = rules::analyze(&incident, &ctx, now);

    assert_eq!(analysis.confidence, 1.0);
    let plan = gate::plan(&incident, &analysis);
    assert!(plan.notify_chat);
    assert!(plan.create_ticket);
    assert!(plan.suggest_rollback);
}

struct NoConfidenceReasoning;

#[async_trait::async_trait]
impl ReasoningService for NoConfidenceReasoning {
    fn name(&self) -> &str {
        "no-confidence"
    }

    async fn complete(&self, _system: &str, _prompt: &str) -> Result<String, AnalysisError> {
        Ok(r#"{"root_cause": "cosmic rays", "suggested_actions": ["reboot"]}"#.to_string())
    }
}

#[tokio::test]
async fn test_reply_without_confidence_falls_back_to_rules() {
    let now = Utc::now();
    let mut incident = Incident::open(apex_error("s1", "AccountTriggerHandler", now), now);
    incident.attach(apex_error("s2", "AccountTriggerHandler", now), now);

    let analyzer = RootCauseAnalyzer::new(Arc::new(StaticContext::default()), chrono::Duration::hours(24))
        .with_reasoning(Arc::new(NoConfidenceReasoning), Duration::from_secs(1));
    let ctx = AnalysisContext::default();
    let analysis = analyzer.analyze(&incident, &ctx).await;
    let expected = rules::analyze(&incident, &ctx, now);

    assert_ne!(analysis.root_cause, "cosmic rays");
    assert_eq!(analysis.root_cause, expected.root_cause);
    assert_eq!(analysis.confidence, expected.confidence);
}

#[tokio::test]
async fn test_pattern_only_incident_stays_under_investigation() {
    let now = Utc::now();
    let signals = vec![
        apex_error("sf-apex-1", "AccountTriggerHandler", now - chrono::Duration::seconds(250)),
        apex_error("sf-apex-2", "AccountTriggerHandler", now - chrono::Duration::seconds(50)),
    ];
    let agent = agent_over(signals, StaticContext::default(), ActionSinks::dry_run());

    let report = agent.run_cycle().await;
    assert_eq!(report.incidents_created, 1);
    assert_eq!(report.incidents_updated, 1);
    assert_eq!(report.actions_dispatched, 0);

    let incidents = agent.incidents().await;
    assert_eq!(incidents.len(), 1);
    let incident = &incidents[0];
    assert_eq!(incident.status, IncidentStatus::Investigating);
    assert!((incident.confidence() - 0.45).abs() < 1e-9);
    assert!(incident.actions.is_empty());
}

#[tokio::test]
async fn test_confident_incident_is_remediated_and_resolving() {
    let now = Utc::now();
    let first_at = now - chrono::Duration::minutes(3);
    let signals = vec![
        apex_error("sf-apex-1", "AccountTriggerHandler", first_at),
        apex_error("sf-apex-2", "AccountTriggerHandler", now - chrono::Duration::minutes(2)),
    ];
    let agent = agent_over(signals, deployment_history(first_at), ActionSinks::dry_run());

    let report = agent.run_cycle().await;
    assert_eq!(report.actions_dispatched, 5);
    assert_eq!(report.actions_failed, 0);

    let incident = agent.incidents().await.remove(0);
    assert_eq!(incident.status, IncidentStatus::Resolving);
    assert_eq!(incident.actions.len(), 5);
}

// ---------------------------------------------------------------------------
// Properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_same_component_signals_share_an_open_incident() {
    let store = Arc::new(IncidentStore::new());
    let correlator = IncidentCorrelator::new(Arc::clone(&store));
    let now = Utc::now();

    for component in ["AccountTriggerHandler", "OpportunityService", "LeadFlow"] {
        // Distinct sources per component, so only the component can link them.
        let apex = Signal::new(
            format!("{}-1", component),
            SignalKind::Error,
            format!("apex-{}", component),
            "Apex error",
            Severity::High,
            now,
        )
        .with_component(component);
        let alert = Signal::new(
            format!("{}-2", component),
            SignalKind::MonitoringAlert,
            format!("alerts-{}", component),
            "latency",
            Severity::Low,
            now,
        )
        .with_component(component);

        let first = correlator.correlate(apex).await.unwrap().unwrap();
        let second = correlator.correlate(alert).await.unwrap().unwrap();

        assert!(!second.created);
        assert_eq!(second.incident.id, first.incident.id);
    }
    assert_eq!(store.len().await, 3);
}

#[tokio::test]
async fn test_severity_never_drops_below_any_signal() {
    let now = Utc::now();
    let severities = [Severity::Medium, Severity::Critical, Severity::Low, Severity::High];
    let mut incident = Incident::open(
        Signal::new("s0", SignalKind::Error, "salesforce", "x", Severity::Low, now).with_component("A"),
        now,
    );

    for (i, severity) in severities.into_iter().enumerate() {
        let signal = Signal::new(format!("s{}", i + 1), SignalKind::Error, "salesforce", "x", severity, now).with_component("A");
        incident.attach(signal, now);
        let max = incident.signals.iter().map(|s| s.severity).max().unwrap();
        assert!(incident.severity >= max);
    }
    assert_eq!(incident.severity, Severity::Critical);
}

#[test]
fn test_confidence_clamped_with_every_factor() {
    let now = Utc::now();
    let mut incident = Incident::open(apex_error("s1", "AccountTriggerHandler", now), now);
    incident.attach(apex_error("s2", "AccountTriggerHandler", now), now);

    let commit = Commit {
        sha: "abc".into(),
        message: "fix AccountTriggerHandler".into(),
        author: None,
        timestamp: now,
        files_changed: vec![],
    };
    let ctx = AnalysisContext {
        recent_deployments: vec![Deployment {
            id: "d1".into(),
            created_at: now - chrono::Duration::minutes(5),
        }],
        recent_commits: vec![commit.clone()],
        related_code_changes: vec![RelevantCommit {
            signal_id: "s1".into(),
            commit,
            relevance: 0.7,
        }],
        similar_incidents: vec!["INC-old".into()],
    };

    let analysis = rules::analyze(&incident, &ctx, now);
    assert!((0.0..=1.0).contains(&analysis.confidence));
    assert_eq!(analysis.confidence, 1.0);
}

#[tokio::test]
async fn test_gate_is_pure() {
    let now = Utc::now();
    let incident = Incident::open(apex_error("s1", "AccountTriggerHandler", now), now);
    let history = deployment_history(now);
    let ctx = gather(&history, &incident, chrono::Duration::hours(24), now).await;
    let analysis = rules::analyze(&incident, &ctx, now);

    let first = gate::plan(&incident, &analysis);
    let second = gate::plan(&incident, &analysis);
    assert_eq!(first, second);
}

struct DownTickets;

#[async_trait::async_trait]
impl TicketSink for DownTickets {
    async fn create_ticket(&self, _payload: &Value) -> Result<Receipt, ActionError> {
        Err(ActionError::Rejected {
            sink: "tickets".into(),
            reason: "service unavailable".into(),
        })
    }
}

#[tokio::test]
async fn test_failed_action_does_not_block_siblings() {
    let now = Utc::now();
    let first_at = now - chrono::Duration::minutes(3);
    let signals = vec![
        apex_error("sf-apex-1", "AccountTriggerHandler", first_at),
        apex_error("sf-apex-2", "AccountTriggerHandler", now - chrono::Duration::minutes(2)),
    ];
    let mut sinks = ActionSinks::dry_run();
    sinks.tickets = Arc::new(DownTickets);
    let agent = agent_over(signals, deployment_history(first_at), sinks);

    let report = agent.run_cycle().await;
    assert_eq!(report.actions_failed, 1);

    let incident = agent.incidents().await.remove(0);
    let ticket = incident.actions.iter().find(|a| a.kind == ActionKind::TicketCreate).unwrap();
    assert_eq!(ticket.status, ActionStatus::Failed);
    assert!(ticket.result["error"].as_str().unwrap().contains("service unavailable"));
    assert!(incident
        .actions
        .iter()
        .filter(|a| a.kind != ActionKind::TicketCreate)
        .all(|a| a.status == ActionStatus::Completed));
}
