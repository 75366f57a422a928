//! The observability agent: owns the poll loop and the incident store and
//! wires detection, correlation, analysis and remediation together.

use crate::actions::{ActionExecutor, ActionStatus};
use crate::analysis::RootCauseAnalyzer;
use crate::correlate::IncidentCorrelator;
use crate::detect::{Signal, SignalDetector};
use crate::incident::{Incident, IncidentError, IncidentStatus, IncidentStore};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Incidents analyzed above this confidence get automated actions.
pub const ACTION_THRESHOLD: f64 = 0.7;

/// What one poll cycle did.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub signals_seen: usize,
    pub duplicate_signals: usize,
    pub incidents_created: usize,
    pub incidents_updated: usize,
    pub actions_dispatched: usize,
    pub actions_failed: usize,
    pub incidents_resolved: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentSummary {
    pub id: String,
    pub title: String,
    pub status: IncidentStatus,
    pub severity: crate::detect::Severity,
    pub created_at: DateTime<Utc>,
    pub confidence: f64,
}

impl From<&Incident> for IncidentSummary {
    fn from(i: &Incident) -> Self {
        Self {
            id: i.id.clone(),
            title: i.title.clone(),
            status: i.status,
            severity: i.severity,
            created_at: i.created_at,
            confidence: i.confidence(),
        }
    }
}

/// Point-in-time view for external consumers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub is_running: bool,
    pub incident_count: usize,
    pub incidents: Vec<IncidentSummary>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Metrics {
    pub total_incidents: usize,
    pub resolved_incidents: usize,
    pub closed_incidents: usize,
    pub active_incidents: usize,
    /// Percentage of all incidents currently `Resolved`.
    pub resolution_rate: f64,
    pub severity_distribution: BTreeMap<String, usize>,
    pub average_resolution_time_seconds: f64,
    pub recent_incidents_24h: usize,
    pub timestamp: DateTime<Utc>,
}

/// A signal tagged with the incident that owns it.
#[derive(Debug, Clone, Serialize)]
pub struct SignalView {
    pub incident_id: String,
    #[serde(flatten)]
    pub signal: Signal,
}

pub struct ObservabilityAgent {
    detector: SignalDetector,
    correlator: IncidentCorrelator,
    analyzer: RootCauseAnalyzer,
    executor: ActionExecutor,
    store: Arc<IncidentStore>,
    running: AtomicBool,
    shutdown: CancellationToken,
    poll_interval: Duration,
}

impl std::fmt::Debug for ObservabilityAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservabilityAgent")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl ObservabilityAgent {
    pub fn new(
        detector: SignalDetector,
        analyzer: RootCauseAnalyzer,
        executor: ActionExecutor,
        poll_interval: Duration,
    ) -> Self {
        let store = Arc::new(IncidentStore::new());
        Self {
            detector,
            correlator: IncidentCorrelator::new(Arc::clone(&store)),
            analyzer,
            executor,
            store,
            running: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            poll_interval,
        }
    }

    pub fn store(&self) -> &Arc<IncidentStore> {
        &self.store
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run poll cycles until [`stop`](Self::stop) is called.
    ///
    /// Each cycle runs in its own task, so a panicking cycle is logged and the
    /// loop carries on at the next interval. Stopping interrupts the sleep
    /// between cycles but lets an in-flight cycle finish.
    pub async fn run(self: Arc<Self>) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.running.store(true, Ordering::SeqCst);
        info!(
            interval_secs = self.poll_interval.as_secs(),
            sources = ?self.detector.source_names(),
            delegated_analysis = self.analyzer.is_delegated(),
            "agent started"
        );

        while self.is_running() {
            let agent = Arc::clone(&self);
            match tokio::spawn(async move { agent.run_cycle().await }).await {
                Ok(report) if report.signals_seen > 0 || report.incidents_resolved > 0 => {
                    info!(
                        signals = report.signals_seen,
                        created = report.incidents_created,
                        updated = report.incidents_updated,
                        actions = report.actions_dispatched,
                        resolved = report.incidents_resolved,
                        "poll cycle complete"
                    );
                }
                Ok(_) => debug!("poll cycle complete, nothing new"),
                Err(e) => error!(error = %e, "poll cycle aborted, continuing on next interval"),
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("agent stopped");
    }

    /// Request shutdown. Returns immediately; `run` exits once the current
    /// cycle, if any, has finished.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.shutdown.cancel();
    }

    /// One detection, correlation, analysis and remediation pass.
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        // Incidents reaching Resolving in this cycle get their first
        // resolution check on the next one.
        let awaiting: HashSet<String> = self
            .store
            .with_status(IncidentStatus::Resolving)
            .await
            .iter()
            .map(|i| i.id.clone())
            .collect();

        let signals = self.detector.detect_signals().await;
        report.signals_seen = signals.len();
        for signal in signals {
            self.process_signal(signal, &mut report).await;
        }

        report.incidents_resolved = self.resolution_pass(&awaiting).await;
        report
    }

    async fn process_signal(&self, signal: Signal, report: &mut CycleReport) {
        let signal_id = signal.id.clone();
        let correlation = match self.correlator.correlate(signal).await {
            Ok(Some(c)) => c,
            Ok(None) => {
                report.duplicate_signals += 1;
                return;
            }
            Err(e) => {
                error!(signal_id = %signal_id, error = %e, "correlation failed, dropping signal");
                return;
            }
        };
        if correlation.created {
            report.incidents_created += 1;
        } else {
            report.incidents_updated += 1;
        }

        let mut incident = correlation.incident;
        let analysis = self.analyzer.analyze_incident(&incident).await;
        let confident = analysis.confidence > ACTION_THRESHOLD;
        incident.set_analysis(analysis, Utc::now());
        if let Err(e) = self.store.publish(incident.clone()).await {
            warn!(incident_id = %incident.id, error = %e, "incident changed during analysis, skipping");
            return;
        }

        let (actions, next) = if confident {
            let actions = self.executor.execute(&incident).await;
            report.actions_dispatched += actions.len();
            report.actions_failed += actions.iter().filter(|a| a.status == ActionStatus::Failed).count();
            (actions, IncidentStatus::Resolving)
        } else {
            (Vec::new(), IncidentStatus::Investigating)
        };
        incident.record_actions(actions.clone(), Utc::now());

        if let Err(e) = incident.transition(next, Utc::now()) {
            warn!(incident_id = %incident.id, error = %e, "status transition rejected");
        }
        match self.store.publish(incident).await {
            Ok(stored) => debug!(
                incident_id = %stored.id,
                status = %stored.status,
                confidence = stored.confidence(),
                "incident processed"
            ),
            // Closed while the sinks ran: keep the dispatched actions, leave the status alone.
            Err(IncidentError::Closed(id)) => {
                let recorded = self
                    .store
                    .update(&id, |i| {
                        i.record_actions(actions, Utc::now());
                        Ok(())
                    })
                    .await;
                match recorded {
                    Ok(stored) => info!(
                        incident_id = %stored.id,
                        actions = stored.actions.len(),
                        "incident closed during remediation, actions recorded"
                    ),
                    Err(e) => warn!(incident_id = %id, error = %e, "failed to record actions on closed incident"),
                }
            }
            Err(e) => warn!(error = %e, "incident changed during remediation, result dropped"),
        }
    }

    /// Move `Resolving` incidents whose signals have all cleared to `Resolved`.
    async fn resolution_pass(&self, candidates: &HashSet<String>) -> usize {
        let mut resolved = 0;
        for incident in self.store.with_status(IncidentStatus::Resolving).await {
            if !candidates.contains(&incident.id) {
                continue;
            }

            let mut cleared = true;
            for signal in &incident.signals {
                if !self.detector.check_resolved(signal).await {
                    cleared = false;
                    break;
                }
            }
            if !cleared {
                continue;
            }

            match self
                .store
                .update(&incident.id, |i| i.transition(IncidentStatus::Resolved, Utc::now()))
                .await
            {
                Ok(_) => {
                    info!(incident_id = %incident.id, "incident resolved");
                    resolved += 1;
                }
                Err(e) => warn!(incident_id = %incident.id, error = %e, "could not mark incident resolved"),
            }
        }
        resolved
    }

    /// Manually close an incident from any non-closed status.
    pub async fn close_incident(&self, id: &str) -> Result<Arc<Incident>, IncidentError> {
        let closed = self
            .store
            .update(id, |i| {
                if i.status == IncidentStatus::Closed {
                    return Err(IncidentError::Closed(i.id.clone()));
                }
                i.transition(IncidentStatus::Closed, Utc::now())
            })
            .await?;
        info!(incident_id = %id, "incident closed");
        Ok(closed)
    }

    pub async fn status(&self) -> StatusSnapshot {
        let incidents = self.store.snapshot().await;
        StatusSnapshot {
            is_running: self.is_running(),
            incident_count: incidents.len(),
            incidents: incidents.iter().map(|i| IncidentSummary::from(i.as_ref())).collect(),
            timestamp: Utc::now(),
        }
    }

    pub async fn incidents(&self) -> Vec<Arc<Incident>> {
        self.store.snapshot().await
    }

    pub async fn incident(&self, id: &str) -> Option<Arc<Incident>> {
        self.store.get(id).await
    }

    /// Most recent signals across all incidents, newest first.
    pub async fn recent_signals(&self, limit: usize) -> Vec<SignalView> {
        let mut views: Vec<SignalView> = self
            .store
            .snapshot()
            .await
            .iter()
            .flat_map(|i| {
                i.signals.iter().map(|s| SignalView {
                    incident_id: i.id.clone(),
                    signal: s.clone(),
                })
            })
            .collect();
        views.sort_by(|a, b| b.signal.timestamp.cmp(&a.signal.timestamp));
        views.truncate(limit);
        views
    }

    pub async fn metrics(&self) -> Metrics {
        let now = Utc::now();
        let incidents = self.store.snapshot().await;
        let total = incidents.len();

        let resolved = incidents.iter().filter(|i| i.status == IncidentStatus::Resolved).count();
        let closed = incidents.iter().filter(|i| i.status == IncidentStatus::Closed).count();
        let active = incidents.iter().filter(|i| i.status.is_open()).count();

        let mut severity_distribution = BTreeMap::new();
        for i in &incidents {
            *severity_distribution.entry(i.severity.as_str().to_string()).or_insert(0) += 1;
        }

        let durations: Vec<f64> = incidents
            .iter()
            .filter_map(|i| i.resolved_at.map(|r| (r - i.created_at).num_milliseconds() as f64 / 1000.0))
            .collect();
        let average_resolution_time_seconds = if durations.is_empty() {
            0.0
        } else {
            durations.iter().sum::<f64>() / durations.len() as f64
        };

        let cutoff = now - ChronoDuration::hours(24);
        Metrics {
            total_incidents: total,
            resolved_incidents: resolved,
            closed_incidents: closed,
            active_incidents: active,
            resolution_rate: if total == 0 { 0.0 } else { resolved as f64 / total as f64 * 100.0 },
            severity_distribution,
            average_resolution_time_seconds,
            recent_incidents_24h: incidents.iter().filter(|i| i.created_at >= cutoff).count(),
            timestamp: now,
        }
    }
}
