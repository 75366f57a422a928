use crate::agent::ObservabilityAgent;
use std::sync::Arc;

/// Handlers read through the injected agent; they never write incidents
/// except for the explicit close operation.
#[derive(Clone)]
pub struct AppState {
    pub agent: Arc<ObservabilityAgent>,
}

impl AppState {
    pub fn new(agent: Arc<ObservabilityAgent>) -> Self {
        Self { agent }
    }
}
