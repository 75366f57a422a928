//! In-memory incident store.
//!
//! The poll loop is the only regular writer. Each incident is held behind an
//! `Arc` and replaced wholesale on every write, so readers always observe a
//! complete incident; they may see one whose analysis or actions lag the
//! in-flight cycle. Iteration order is creation order.
//!
//! Nothing is ever evicted. Resolved and closed incidents stay until restart.

use super::{Incident, IncidentError, IncidentStatus};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
pub struct IncidentStore {
    incidents: RwLock<Vec<Arc<Incident>>>,
}

impl IncidentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new incident or replace the stored copy with the same id.
    ///
    /// A closed incident is never overwritten by the pipeline.
    pub async fn publish(&self, incident: Incident) -> Result<Arc<Incident>, IncidentError> {
        let mut incidents = self.incidents.write().await;
        let incident = Arc::new(incident);

        match incidents.iter_mut().find(|i| i.id == incident.id) {
            Some(slot) => {
                if slot.status == IncidentStatus::Closed && incident.status != IncidentStatus::Closed {
                    return Err(IncidentError::Closed(incident.id.clone()));
                }
                *slot = Arc::clone(&incident);
            }
            None => incidents.push(Arc::clone(&incident)),
        }
        Ok(incident)
    }

    /// Copy-on-write update of a single incident under the write lock.
    pub async fn update<F>(&self, id: &str, f: F) -> Result<Arc<Incident>, IncidentError>
    where
        F: FnOnce(&mut Incident) -> Result<(), IncidentError>,
    {
        let mut incidents = self.incidents.write().await;
        let slot = incidents
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or_else(|| IncidentError::NotFound(id.to_string()))?;

        let mut working = (**slot).clone();
        f(&mut working)?;
        *slot = Arc::new(working);
        Ok(Arc::clone(slot))
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Incident>> {
        self.incidents.read().await.iter().find(|i| i.id == id).cloned()
    }

    /// Point-in-time view of every incident, in creation order.
    pub async fn snapshot(&self) -> Vec<Arc<Incident>> {
        self.incidents.read().await.clone()
    }

    /// Incidents that can still absorb new signals, in creation order.
    pub async fn open_incidents(&self) -> Vec<Arc<Incident>> {
        self.incidents
            .read()
            .await
            .iter()
            .filter(|i| i.status.is_open())
            .cloned()
            .collect()
    }

    pub async fn with_status(&self, status: IncidentStatus) -> Vec<Arc<Incident>> {
        self.incidents
            .read()
            .await
            .iter()
            .filter(|i| i.status == status)
            .cloned()
            .collect()
    }

    /// Whether any incident already owns a signal with this id.
    pub async fn contains_signal(&self, signal_id: &str) -> bool {
        self.incidents.read().await.iter().any(|i| i.has_signal(signal_id))
    }

    pub async fn len(&self) -> usize {
        self.incidents.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.incidents.read().await.is_empty()
    }
}
