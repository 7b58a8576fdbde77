//! HTTP API for the control service.
//!
//! Provides endpoints for:
//! - Analysis deployment, teardown, stop and logs under `/api/analyses`
//! - Per-deployment queries and maintenance under `/api/deployments`
//! - Health and readiness checks
//! - Prometheus metrics

mod analyses;
mod deployments;

use std::fmt::Write as _;
use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderValue, Method, StatusCode},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::warn;

use crate::deployment::DeploymentManager;
use crate::error::{ControlError, ControlResult, ErrorKind};
use crate::store::{DeploymentFilter, DeploymentStore};
use crate::types::DeploymentStatus;

pub use deployments::LogsQuery;

/// Shared application state for the control service.
#[derive(Clone)]
pub struct AppState {
    /// Deployment manager for orchestrating deployments.
    pub manager: Arc<DeploymentManager>,
    /// Deployment store for direct queries.
    pub store: Arc<dyn DeploymentStore>,
}

impl AppState {
    /// Build state around a manager, sharing its store.
    #[must_use]
    pub fn new(manager: Arc<DeploymentManager>) -> Self {
        let store = Arc::clone(manager.store());
        Self { manager, store }
    }
}

/// Creates the API router.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/analyses",
            post(analyses::deploy).get(analyses::list_analyses),
        )
        .route(
            "/analyses/{analysis_id}",
            get(analyses::get_analysis).delete(analyses::teardown_analysis),
        )
        .route("/analyses/{analysis_id}/stop", post(analyses::stop_analysis))
        .route("/analyses/{analysis_id}/logs", get(analyses::analysis_logs))
        .route("/deployments", get(deployments::list_deployments))
        .route(
            "/deployments/{name}",
            get(deployments::get_deployment).delete(deployments::teardown_deployment),
        )
        .route("/deployments/{name}/logs", get(deployments::deployment_logs))
        .route(
            "/deployments/{name}/logs/snapshot",
            post(deployments::snapshot_logs),
        )
        .route("/deployments/{name}/refresh", post(deployments::refresh_pods));

    Router::new()
        // Health endpoints
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        // Metrics
        .route("/metrics", get(metrics))
        .nest("/api", api)
        .with_state(state)
}

/// Build a CORS layer for the given origins.
///
/// Browsers send origins without a trailing slash, so one is stripped from
/// each configured entry.
pub fn cors_layer(origins: &[String]) -> ControlResult<CorsLayer> {
    let origins = origins
        .iter()
        .map(|origin| {
            HeaderValue::from_str(origin.trim_end_matches('/'))
                .map_err(|e| ControlError::Config(format!("invalid CORS origin {origin:?}: {e}")))
        })
        .collect::<ControlResult<Vec<_>>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([axum::http::header::CONTENT_TYPE]))
}

/// Error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error message.
    pub error: String,
    /// Error classification.
    pub kind: String,
}

pub(crate) type ApiResult<T> = Result<T, (StatusCode, Json<ErrorResponse>)>;

pub(crate) fn error_response(error: &ControlError) -> (StatusCode, Json<ErrorResponse>) {
    let status = error_to_status(error);
    if status.is_server_error() {
        warn!(error = %error, status = status.as_u16(), "request failed");
    }
    (
        status,
        Json(ErrorResponse {
            error: error.to_string(),
            kind: format!("{:?}", error.kind()),
        }),
    )
}

fn error_to_status(error: &ControlError) -> StatusCode {
    match error.kind() {
        ErrorKind::DuplicateDeployment | ErrorKind::WorkloadAlreadyExists => StatusCode::CONFLICT,
        ErrorKind::WorkloadNotFound | ErrorKind::AnalysisNotFound => StatusCode::NOT_FOUND,
        ErrorKind::InvalidRequest => StatusCode::BAD_REQUEST,
        ErrorKind::ClusterUnreachable | ErrorKind::StoreUnavailable => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ErrorKind::Config | ErrorKind::Serialisation | ErrorKind::Internal => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Health check endpoint.
async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse { status: "healthy" })
}

/// Readiness check endpoint.
async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<ReadyResponse>) {
    match state.store.list(&DeploymentFilter::new()).await {
        Ok(records) => (
            StatusCode::OK,
            Json(ReadyResponse {
                ready: true,
                tracked_deployments: records.len(),
            }),
        ),
        Err(e) => {
            warn!(error = %e, "store not ready");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ReadyResponse {
                    ready: false,
                    tracked_deployments: 0,
                }),
            )
        }
    }
}

/// Metrics endpoint.
async fn metrics(State(state): State<AppState>) -> String {
    let mut output = String::new();

    output.push_str("# HELP po_control_deployments_total Number of tracked deployments by status\n");
    output.push_str("# TYPE po_control_deployments_total gauge\n");

    for status in DeploymentStatus::ALL {
        let filter = DeploymentFilter::new().with_status(status);
        let count = state
            .store
            .list(&filter)
            .await
            .map(|d| d.len())
            .unwrap_or(0);
        let _ = writeln!(
            output,
            "po_control_deployments_total{{status=\"{status}\"}} {count}"
        );
    }

    output
}

/// Health response.
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

/// Readiness response.
#[derive(Serialize)]
struct ReadyResponse {
    ready: bool,
    tracked_deployments: usize,
}
