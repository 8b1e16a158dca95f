//! HTTP surface of the gateway.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::agents::Capability;
use crate::error::RcaError;
use crate::gateway::{Alert, Gateway, Health};
use crate::state_machine::{Filters, Job, JobStatus, JobSummary};

#[derive(Clone)]
pub struct AppState {
    pub gateway: Gateway,
    /// Capabilities with a configured collaborator.
    pub registered: Arc<Vec<Capability>>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ask", post(ask))
        .route("/alert", post(alert))
        .route("/result/{job_id}", get(result))
        .route("/results", get(results))
        .route("/health", get(health))
        .route("/agents", get(agents))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
}

impl IntoResponse for RcaError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            RcaError::InvalidInput(_) => (StatusCode::BAD_REQUEST, "INVALID_INPUT"),
            RcaError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            RcaError::QueueUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "QUEUE_UNAVAILABLE"),
            RcaError::StoreUnavailable(_) | RcaError::Sqlite(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE")
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
        };
        if status.is_server_error() {
            error!(error = %self, "request failed");
        }

        let body = Json(ErrorBody {
            error: self.to_string(),
            code,
        });
        (status, body).into_response()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AskRequest {
    #[serde(default)]
    query: String,
    #[serde(flatten)]
    filters: Filters,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Accepted {
    job_id: String,
    query: String,
    status: JobStatus,
}

impl From<Job> for Accepted {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            query: job.query,
            status: job.status,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct JobView {
    job_id: String,
    #[serde(flatten)]
    job: Job,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResultsView {
    total_queries: usize,
    queries: Vec<JobSummary>,
}

#[derive(Serialize)]
struct AgentView {
    name: &'static str,
    label: &'static str,
    description: &'static str,
    registered: bool,
}

async fn index() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "status": "running",
    }))
}

async fn ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<(StatusCode, Json<Accepted>), RcaError> {
    let job = state.gateway.submit(&req.query, req.filters).await?;
    Ok((StatusCode::ACCEPTED, Json(job.into())))
}

async fn alert(
    State(state): State<AppState>,
    Json(alert): Json<Alert>,
) -> Result<(StatusCode, Json<Accepted>), RcaError> {
    let job = state.gateway.submit_alert(&alert).await?;
    Ok((StatusCode::ACCEPTED, Json(job.into())))
}

async fn result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobView>, RcaError> {
    let job = state.gateway.lookup(&job_id).await?;
    Ok(Json(JobView {
        job_id: job.id.clone(),
        job,
    }))
}

async fn results(State(state): State<AppState>) -> Result<Json<ResultsView>, RcaError> {
    let queries = state.gateway.list_all().await?;
    Ok(Json(ResultsView {
        total_queries: queries.len(),
        queries,
    }))
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    Json(state.gateway.health().await)
}

async fn agents(State(state): State<AppState>) -> Json<serde_json::Value> {
    let agents: Vec<AgentView> = Capability::ALL
        .into_iter()
        .map(|c| AgentView {
            name: c.name(),
            label: c.label(),
            description: c.description(),
            registered: state.registered.contains(&c),
        })
        .collect();
    Json(serde_json::json!({ "agents": agents }))
}
