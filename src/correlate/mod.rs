//! Incident correlation -- deciding whether a signal joins an open incident.
//!
//! Two signals are related when they share a `source` or both name the same
//! `component`. The predicate is deliberately loose: it can merge unrelated
//! issues or split one issue apart. The first related open incident in store
//! order wins; when several are eligible the choice is not meaningful and
//! callers must not depend on which one is picked.

use crate::detect::Signal;
use crate::incident::{Incident, IncidentError, IncidentStore};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

/// Result of correlating one signal.
#[derive(Debug, Clone)]
pub struct Correlation {
    /// Working copy of the incident, already published to the store.
    pub incident: Incident,
    /// True when the signal opened a new incident.
    pub created: bool,
}

/// Two signals are related if they share a source or a named component.
pub fn signals_related(a: &Signal, b: &Signal) -> bool {
    if a.source == b.source {
        return true;
    }
    matches!((&a.component, &b.component), (Some(x), Some(y)) if x == y)
}

/// Whether `signal` relates to any signal already attached to `incident`.
pub fn relates_to(incident: &Incident, signal: &Signal) -> bool {
    incident.signals.iter().any(|existing| signals_related(signal, existing))
}

pub struct IncidentCorrelator {
    store: Arc<IncidentStore>,
}

impl IncidentCorrelator {
    pub fn new(store: Arc<IncidentStore>) -> Self {
        Self { store }
    }

    /// Attach `signal` to the first related open incident, or open a new one.
    ///
    /// Returns `Ok(None)` when the signal is already owned by an incident;
    /// a redelivered signal is never attached twice.
    pub async fn correlate(&self, signal: Signal) -> Result<Option<Correlation>, IncidentError> {
        if self.store.contains_signal(&signal.id).await {
            debug!(signal_id = %signal.id, "signal already correlated, skipping");
            return Ok(None);
        }

        let now = Utc::now();
        let target = self
            .store
            .open_incidents()
            .await
            .into_iter()
            .find(|incident| relates_to(incident, &signal));

        let (incident, created) = match target {
            Some(existing) => {
                let mut incident = (*existing).clone();
                debug!(incident_id = %incident.id, signal_id = %signal.id, "signal attached to open incident");
                incident.attach(signal, now);
                (incident, false)
            }
            None => {
                let incident = Incident::open(signal, now);
                info!(incident_id = %incident.id, severity = %incident.severity, title = %incident.title, "new incident opened");
                (incident, true)
            }
        };

        self.store.publish(incident.clone()).await?;
        Ok(Some(Correlation { incident, created }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Severity, SignalKind};
    use crate::incident::IncidentStatus;

    fn signal(id: &str, source: &str, component: Option<&str>) -> Signal {
        let s = Signal::new(id, SignalKind::Error, source, format!("error {}", id), Severity::Medium, Utc::now());
        match component {
            Some(c) => s.with_component(c),
            None => s,
        }
    }

    #[test]
    fn test_relation_predicate() {
        let a = signal("1", "salesforce", Some("AccountTriggerHandler"));
        assert!(signals_related(&a, &signal("2", "salesforce", Some("Other"))));
        assert!(signals_related(&a, &signal("3", "github", Some("AccountTriggerHandler"))));
        assert!(!signals_related(&a, &signal("4", "github", Some("Other"))));
        // Missing components never match each other.
        assert!(!signals_related(
            &signal("5", "logs", None),
            &signal("6", "monitoring", None)
        ));
    }

    #[tokio::test]
    async fn test_new_signal_opens_incident() {
        let store = Arc::new(IncidentStore::new());
        let correlator = IncidentCorrelator::new(store.clone());

        let c = correlator
            .correlate(signal("1", "salesforce", Some("AccountTriggerHandler")))
            .await
            .unwrap()
            .unwrap();
        assert!(c.created);
        assert_eq!(c.incident.status, IncidentStatus::Detected);
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_same_component_attaches() {
        let store = Arc::new(IncidentStore::new());
        let correlator = IncidentCorrelator::new(store.clone());

        let first = correlator
            .correlate(signal("1", "salesforce", Some("AccountTriggerHandler")))
            .await
            .unwrap()
            .unwrap();
        let second = correlator
            .correlate(signal("2", "monitoring", Some("AccountTriggerHandler")))
            .await
            .unwrap()
            .unwrap();

        assert!(!second.created);
        assert_eq!(second.incident.id, first.incident.id);
        assert_eq!(second.incident.signals.len(), 2);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.get(&first.incident.id).await.unwrap().signals.len(), 2);
    }

    #[tokio::test]
    async fn test_unrelated_signal_opens_second_incident() {
        let store = Arc::new(IncidentStore::new());
        let correlator = IncidentCorrelator::new(store.clone());

        correlator.correlate(signal("1", "salesforce", Some("A"))).await.unwrap();
        let c = correlator
            .correlate(signal("2", "github", Some("B")))
            .await
            .unwrap()
            .unwrap();
        assert!(c.created);
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_resolved_incident_does_not_absorb_signals() {
        let store = Arc::new(IncidentStore::new());
        let correlator = IncidentCorrelator::new(store.clone());

        let first = correlator
            .correlate(signal("1", "salesforce", Some("A")))
            .await
            .unwrap()
            .unwrap();
        store
            .update(&first.incident.id, |i| {
                i.transition(IncidentStatus::Resolving, Utc::now())?;
                i.transition(IncidentStatus::Resolved, Utc::now())
            })
            .await
            .unwrap();

        let c = correlator
            .correlate(signal("2", "salesforce", Some("A")))
            .await
            .unwrap()
            .unwrap();
        assert!(c.created);
        assert_ne!(c.incident.id, first.incident.id);
    }

    #[tokio::test]
    async fn test_redelivered_signal_is_skipped() {
        let store = Arc::new(IncidentStore::new());
        let correlator = IncidentCorrelator::new(store.clone());

        correlator.correlate(signal("1", "salesforce", Some("A"))).await.unwrap();
        let again = correlator.correlate(signal("1", "salesforce", Some("A"))).await.unwrap();
        assert!(again.is_none());
        assert_eq!(store.snapshot().await[0].signals.len(), 1);
    }
}
