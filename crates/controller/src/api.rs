//! HTTP API for health checks, Prometheus metrics and node status

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use healer_lib::{
    evaluator::{NodeEvaluator, SchedulerHandle},
    health::HealthRegistry,
    observability::HealerMetrics,
    HealerError, StatusBoard,
};
use prometheus::{Encoder, TextEncoder};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: HealerMetrics,
    pub board: Arc<StatusBoard>,
    pub evaluator: Arc<NodeEvaluator>,
    pub scheduler: SchedulerHandle,
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// 200 while operational (degraded included), 503 otherwise
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = if health.status.is_operational() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    state
        .metrics
        .set_drains_in_progress(state.evaluator.drain_gate().in_flight());

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string());
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
        .into_response()
}

async fn list_nodes(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.board.list())
}

async fn get_node(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> Response {
    match state.board.get(&name) {
        Some(report) => Json(report).into_response(),
        None => error_response(
            StatusCode::NOT_FOUND,
            format!("node {name} has not been evaluated"),
        ),
    }
}

/// Clear a failed or halted record and evaluate the node again
async fn reset_node(State(state): State<Arc<AppState>>, Path(name): Path<String>) -> Response {
    match state.evaluator.reset(&name).await {
        Ok(Some(record)) => {
            state.board.apply_record(&record);
            if !state.scheduler.trigger(name.clone()).await {
                error!(node = %name, "Scheduler stopped, reset node not requeued");
            }
            Json(record).into_response()
        }
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            format!("no remediation record for node {name}"),
        ),
        Err(e @ HealerError::InvalidTransition { .. }) => {
            error_response(StatusCode::CONFLICT, e.to_string())
        }
        Err(e) => {
            error!(node = %name, error = %e, "Reset failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .route("/api/v1/nodes", get(list_nodes))
        .route("/api/v1/nodes/:name", get(get_node))
        .route("/api/v1/nodes/:name/reset", post(reset_node))
        .with_state(state)
}

pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
