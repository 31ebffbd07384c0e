//! HTTP control surface using Axum

use axum::{
    extract::{Path, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{error, info, Level};

use crate::metrics::Metrics;
use crate::models::{ApprovalDecision, DecisionRequest, Instrument, Session, SessionState, Setup};
use crate::workflow::{ApprovalError, WorkflowEngine, WorkflowError};

#[derive(Clone)]
pub struct AppState {
    pub health: Arc<RwLock<HealthStatus>>,
    pub metrics: Arc<Metrics>,
    pub start_time: Arc<Instant>,
    pub engine: WorkflowEngine,
}

impl AppState {
    pub fn new(engine: WorkflowEngine, metrics: Arc<Metrics>) -> Self {
        Self {
            health: Arc::new(RwLock::new(HealthStatus::default())),
            metrics,
            start_time: Arc::new(Instant::now()),
            engine,
        }
    }
}

#[derive(Clone, Debug)]
pub struct HealthStatus {
    pub status: String,
}

impl Default for HealthStatus {
    fn default() -> Self {
        Self {
            status: "healthy".to_string(),
        }
    }
}

type ApiError = (StatusCode, Json<Value>);

fn api_error(e: WorkflowError) -> ApiError {
    let status = match &e {
        WorkflowError::EmptyInstrumentSet => StatusCode::UNPROCESSABLE_ENTITY,
        WorkflowError::SessionNotFound(_) => StatusCode::NOT_FOUND,
        WorkflowError::AlreadyTerminal(_)
        | WorkflowError::WrongState { .. }
        | WorkflowError::NothingToRedeliver(_) => StatusCode::CONFLICT,
        WorkflowError::Approval(ApprovalError::InvalidDecision(_)) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        WorkflowError::Approval(_) => StatusCode::CONFLICT,
        WorkflowError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        WorkflowError::IllegalTransition { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        error!(error = %e, "Request failed");
    }
    (status, Json(json!({ "error": e.to_string() })))
}

pub async fn health_check(State(state): State<AppState>) -> Result<Json<Value>, StatusCode> {
    let health = state.health.read().await;
    let uptime_seconds = state.start_time.elapsed().as_secs();
    let active_sessions = state.engine.active_sessions().await.len();
    Ok(Json(json!({
        "status": health.status,
        "uptime_seconds": uptime_seconds,
        "active_sessions": active_sessions,
        "service": "setupflow"
    })))
}

pub async fn metrics_handler(State(state): State<AppState>) -> Result<String, StatusCode> {
    state
        .metrics
        .export()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

/// Middleware to track HTTP request metrics
async fn metrics_middleware(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();

    state.metrics.http_requests_in_flight.inc();
    let response = next.run(request).await;
    let status = response.status();
    let duration = start.elapsed();
    state.metrics.http_requests_in_flight.dec();

    state.metrics.http_requests_total.inc();
    state
        .metrics
        .http_request_duration_seconds
        .observe(duration.as_secs_f64());

    if status.is_server_error() {
        error!(
            method = %method,
            path = %path,
            status = %status,
            duration_ms = duration.as_millis(),
            "HTTP request error"
        );
    }

    response
}

#[derive(Debug, Deserialize)]
struct ScanRequest {
    symbols: Vec<String>,
}

#[derive(Debug, Serialize)]
struct SessionSummary {
    id: String,
    state: SessionState,
    symbols: Vec<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    pending: usize,
}

impl From<&Session> for SessionSummary {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            state: session.state,
            symbols: session.instruments.iter().map(|i| i.symbol.clone()).collect(),
            created_at: session.created_at,
            updated_at: session.updated_at,
            pending: session.pending.len(),
        }
    }
}

#[derive(Debug, Serialize)]
struct SessionView {
    #[serde(flatten)]
    summary: SessionSummary,
    revision: u64,
    pending_setups: Vec<Setup>,
    #[serde(skip_serializing_if = "Option::is_none")]
    approval_deadline: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    delivery_failure: Option<String>,
    instruments_failed: usize,
    setups: usize,
    discarded: usize,
    approved: usize,
    delivered: usize,
    rejected: usize,
}

impl From<Session> for SessionView {
    fn from(session: Session) -> Self {
        let delivered = session.deliveries.iter().filter(|d| d.delivered).count();
        let pending_setups = if session.state == SessionState::PendingApproval {
            session.pending.clone()
        } else {
            Vec::new()
        };

        Self {
            summary: SessionSummary::from(&session),
            revision: session.revision,
            pending_setups,
            approval_deadline: session.approval_deadline,
            instruments_failed: session.failed_instruments(),
            setups: session.setups.len(),
            discarded: session.discarded.len(),
            approved: session.approved.len(),
            delivered,
            rejected: session.rejected_alerts(),
            reason: session.reason,
            delivery_failure: session.delivery_failure,
        }
    }
}

/// Start a scan session over the given symbols
async fn start_scan(
    State(state): State<AppState>,
    Json(request): Json<ScanRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let instruments: Vec<Instrument> = request
        .symbols
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(Instrument::new)
        .collect();

    let session_id = state
        .engine
        .start_scan(instruments)
        .await
        .map_err(api_error)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "session_id": session_id, "state": SessionState::Scanning })),
    ))
}

async fn list_sessions(State(state): State<AppState>) -> Json<Value> {
    let sessions: Vec<SessionSummary> = state
        .engine
        .active_sessions()
        .await
        .iter()
        .map(SessionSummary::from)
        .collect();
    Json(json!(sessions))
}

async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionView>, ApiError> {
    let session = state.engine.session(&id).await.map_err(api_error)?;
    Ok(Json(session.into()))
}

/// Full audit trail of a session
async fn get_session_audit(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    state.engine.session(&id).await.map(Json).map_err(api_error)
}

async fn cancel_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    state.engine.cancel(&id).await.map_err(api_error)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "session_id": id, "cancelling": true })),
    ))
}

async fn submit_decision(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<DecisionRequest>,
) -> Result<Json<ApprovalDecision>, ApiError> {
    state
        .engine
        .submit_decision(&id, request)
        .await
        .map(Json)
        .map_err(api_error)
}

async fn redeliver(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    state.engine.redeliver(&id).await.map_err(api_error)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "session_id": id, "redelivering": true })),
    ))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics_handler))
        .route("/api/scans", post(start_scan))
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/{id}", get(get_session).delete(cancel_session))
        .route("/api/sessions/{id}/audit", get(get_session_audit))
        .route("/api/sessions/{id}/decision", post(submit_decision))
        .route("/api/sessions/{id}/redeliver", post(redeliver))
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::DEBUG))
                        .on_request(DefaultOnRequest::new().level(Level::DEBUG))
                        .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
                )
                .layer(axum::middleware::from_fn_with_state(
                    state.clone(),
                    metrics_middleware,
                ))
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

pub async fn start_server(port: u16, state: AppState) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!(port = port, "HTTP server listening on port {}", port);
    info!("Metrics endpoint available at http://0.0.0.0:{}/metrics", port);
    axum::serve(listener, app).await?;

    Ok(())
}
