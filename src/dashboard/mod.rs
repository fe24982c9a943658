use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

use crate::error::MasterError;
use crate::master::Scheduler;
use crate::scheduler::job::{Job, JobSpec};

#[derive(Clone)]
pub struct DashboardState {
    pub scheduler: Arc<Scheduler>,
}

#[derive(Serialize)]
struct JobResponse {
    id: String,
    image: String,
    status: String,
    agent_id: Option<String>,
    restart_count: u32,
    created_at: String,
}

impl From<Job> for JobResponse {
    fn from(job: Job) -> Self {
        Self {
            id: job.id.to_string(),
            image: job.spec.image,
            status: job.status.to_string(),
            agent_id: job.agent_id.map(|id| id.to_string()),
            restart_count: job.restart_count,
            created_at: job.created_at.to_rfc3339(),
        }
    }
}

#[derive(Serialize)]
struct AgentResponse {
    id: String,
    url: String,
    status: String,
    cpu: u32,
    memory: f64,
    cpu_usage: f64,
    memory_usage: f64,
    jobs: Vec<String>,
}

#[derive(Serialize)]
struct SubmitJobResponse {
    success: bool,
    job_id: Option<String>,
    status: Option<String>,
    error: Option<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    kind: &'static str,
    error: String,
}

fn error_response(err: MasterError) -> (StatusCode, Json<ErrorResponse>) {
    let code = match &err {
        MasterError::JobNotFound(_) | MasterError::AgentNotFound(_) => StatusCode::NOT_FOUND,
        MasterError::InvalidJobDescriptor(_) | MasterError::InvalidAgentDescriptor(_) => {
            StatusCode::BAD_REQUEST
        }
        MasterError::JobNotPlaced(_) => StatusCode::CONFLICT,
        MasterError::AgentUnreachable(_) => StatusCode::BAD_GATEWAY,
        MasterError::RegistryFull => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        code,
        Json(ErrorResponse {
            kind: err.kind(),
            error: err.to_string(),
        }),
    )
}

/// Read-mostly HTTP view over the scheduler.
pub fn router(state: DashboardState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/healthz", get(health_handler))
        .route("/api/jobs", get(list_jobs_handler).post(submit_job_handler))
        .route("/api/jobs/:id", get(job_handler))
        .route("/api/jobs/:id/kill", post(kill_job_handler))
        .route("/api/agents", get(list_agents_handler))
        .layer(cors)
        .with_state(state)
}

pub async fn run_dashboard(addr: SocketAddr, state: DashboardState, shutdown: CancellationToken) {
    let app = router(state);

    tracing::info!(addr = %addr, "Starting dashboard server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %addr, error = %e, "Failed to bind dashboard server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
    {
        tracing::error!(error = %e, "Dashboard server failed");
    }
}

async fn health_handler() -> &'static str {
    "ok"
}

async fn list_jobs_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    let jobs: Vec<JobResponse> = state
        .scheduler
        .jobs()
        .all_jobs()
        .await
        .into_iter()
        .map(JobResponse::from)
        .collect();

    Json(jobs)
}

async fn job_handler(
    State(state): State<DashboardState>,
    Path(id): Path<Uuid>,
) -> Result<Json<JobResponse>, (StatusCode, Json<ErrorResponse>)> {
    let job = state.scheduler.get_job(&id).await.map_err(error_response)?;
    Ok(Json(job.into()))
}

async fn list_agents_handler(State(state): State<DashboardState>) -> impl IntoResponse {
    let mut agents = Vec::new();
    for agent in state.scheduler.list_agents().await {
        let jobs = state
            .scheduler
            .jobs()
            .jobs_for_agent(&agent.id)
            .await
            .into_iter()
            .filter(|job| !job.status.is_terminal())
            .map(|job| job.id.to_string())
            .collect();

        agents.push(AgentResponse {
            id: agent.id.to_string(),
            url: agent.url,
            status: agent.status.to_string(),
            cpu: agent.capacity.cpu,
            memory: agent.capacity.memory,
            cpu_usage: agent.cpu_usage,
            memory_usage: agent.memory_usage,
            jobs,
        });
    }

    Json(agents)
}

async fn submit_job_handler(
    State(state): State<DashboardState>,
    Json(spec): Json<JobSpec>,
) -> impl IntoResponse {
    let scheduler = &state.scheduler;
    match scheduler.submit_job(spec).await {
        Ok(job_id) => {
            let status = scheduler.get_status(&job_id).await.ok();
            (
                StatusCode::OK,
                Json(SubmitJobResponse {
                    success: true,
                    job_id: Some(job_id.to_string()),
                    status: status.map(|s| s.to_string()),
                    error: None,
                }),
            )
        }
        Err(e) => {
            let (code, Json(body)) = error_response(e);
            (
                code,
                Json(SubmitJobResponse {
                    success: false,
                    job_id: None,
                    status: None,
                    error: Some(body.error),
                }),
            )
        }
    }
}

async fn kill_job_handler(
    State(state): State<DashboardState>,
    Path(id): Path<Uuid>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<ErrorResponse>)> {
    let killed = state.scheduler.kill_job(&id).await.map_err(error_response)?;
    Ok(Json(serde_json::json!({ "killed": killed })))
}
