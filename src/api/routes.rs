//! API route definitions.

use super::state::AppState;
use crate::detect::Severity;
use crate::incident::{Incident, IncidentError, IncidentStatus};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const DEFAULT_INCIDENT_LIMIT: usize = 50;
const DEFAULT_SIGNAL_LIMIT: usize = 100;

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/status", get(status))
        .route("/incidents", get(list_incidents))
        .route("/incidents/{id}", get(get_incident))
        .route("/incidents/{id}/close", post(close_incident))
        .route("/metrics", get(metrics))
        .route("/signals", get(recent_signals))
}

fn meta() -> Value {
    json!({
        "timestamp": Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    })
}

/// Error body in the same envelope as successful responses.
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": { "code": self.status.as_u16(), "message": self.message },
            "meta": meta()
        }));
        (self.status, body).into_response()
    }
}

impl From<IncidentError> for ApiError {
    fn from(e: IncidentError) -> Self {
        let status = match e {
            IncidentError::NotFound(_) => StatusCode::NOT_FOUND,
            IncidentError::Closed(_) | IncidentError::IllegalTransition { .. } => StatusCode::CONFLICT,
        };
        Self {
            status,
            message: e.to_string(),
        }
    }
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION"),
            "agent_running": state.agent.is_running()
        },
        "meta": meta()
    }))
}

async fn status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "data": state.agent.status().await, "meta": meta() }))
}

#[derive(Debug, Deserialize)]
pub struct IncidentQuery {
    pub status: Option<IncidentStatus>,
    pub severity: Option<Severity>,
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
struct IncidentListItem {
    id: String,
    title: String,
    description: String,
    severity: Severity,
    status: IncidentStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
    signals_count: usize,
    actions_count: usize,
    confidence: f64,
}

impl From<&Incident> for IncidentListItem {
    fn from(i: &Incident) -> Self {
        Self {
            id: i.id.clone(),
            title: i.title.clone(),
            description: i.description.clone(),
            severity: i.severity,
            status: i.status,
            created_at: i.created_at,
            updated_at: i.updated_at,
            resolved_at: i.resolved_at,
            signals_count: i.signals.len(),
            actions_count: i.actions.len(),
            confidence: i.confidence(),
        }
    }
}

/// Newest first, optionally filtered by status and severity.
async fn list_incidents(State(state): State<AppState>, Query(q): Query<IncidentQuery>) -> Json<Value> {
    let mut incidents = state.agent.incidents().await;
    incidents.retain(|i| q.status.map_or(true, |s| i.status == s) && q.severity.map_or(true, |s| i.severity == s));
    incidents.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    incidents.truncate(q.limit.unwrap_or(DEFAULT_INCIDENT_LIMIT));

    let items: Vec<IncidentListItem> = incidents.iter().map(|i| IncidentListItem::from(i.as_ref())).collect();
    let total = items.len();
    Json(json!({ "data": items, "meta": { "total": total, "timestamp": Utc::now().to_rfc3339() } }))
}

async fn get_incident(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    let incident = state
        .agent
        .incident(&id)
        .await
        .ok_or_else(|| ApiError::from(IncidentError::NotFound(id)))?;
    Ok(Json(json!({ "data": incident.as_ref(), "meta": meta() })))
}

async fn close_incident(State(state): State<AppState>, Path(id): Path<String>) -> Result<Json<Value>, ApiError> {
    let incident = state.agent.close_incident(&id).await?;
    Ok(Json(json!({ "data": incident.as_ref(), "meta": meta() })))
}

async fn metrics(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "data": state.agent.metrics().await, "meta": meta() }))
}

#[derive(Debug, Deserialize)]
pub struct SignalQuery {
    pub limit: Option<usize>,
}

async fn recent_signals(State(state): State<AppState>, Query(q): Query<SignalQuery>) -> Json<Value> {
    let signals = state.agent.recent_signals(q.limit.unwrap_or(DEFAULT_SIGNAL_LIMIT)).await;
    let total = signals.len();
    Json(json!({ "data": signals, "meta": { "total": total, "timestamp": Utc::now().to_rfc3339() } }))
}
