//! Deployment endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use tracing::info;

use crate::deployment::{LogScope, TeardownReport, TeardownTarget};
use crate::types::{AnalysisDeployment, DeploymentName, PodLog};

use super::{error_response, ApiResult, AppState, ErrorResponse};

/// Query parameters for reading logs.
#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    /// `all` (default) or `tracked`.
    #[serde(default)]
    pub scope: LogScope,
}

/// List tracked deployment names.
pub async fn list_deployments(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<DeploymentName>>> {
    state
        .manager
        .list_deployment_names()
        .await
        .map(Json)
        .map_err(|e| error_response(&e))
}

/// Get a deployment record.
pub async fn get_deployment(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<AnalysisDeployment>> {
    match state.manager.get(&DeploymentName::new(&name)).await {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("deployment not found: {name}"),
                kind: "WorkloadNotFound".to_owned(),
            }),
        )),
        Err(e) => Err(error_response(&e)),
    }
}

/// Tear down a single deployment.
pub async fn teardown_deployment(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<TeardownReport>> {
    info!(deployment = %name, "tearing down deployment via API");

    state
        .manager
        .teardown(TeardownTarget::Deployment(DeploymentName::new(name)))
        .await
        .map(Json)
        .map_err(|e| error_response(&e))
}

/// Live logs of a deployment.
pub async fn deployment_logs(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Query(query): Query<LogsQuery>,
) -> ApiResult<Json<Vec<PodLog>>> {
    state
        .manager
        .fetch_logs(&DeploymentName::new(name), query.scope)
        .await
        .map(Json)
        .map_err(|e| error_response(&e))
}

/// Store a snapshot of a deployment's logs on its record.
pub async fn snapshot_logs(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<AnalysisDeployment>> {
    state
        .manager
        .snapshot_logs(&DeploymentName::new(name))
        .await
        .map(Json)
        .map_err(|e| error_response(&e))
}

/// Refresh the recorded pods of a deployment.
pub async fn refresh_pods(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Json<AnalysisDeployment>> {
    state
        .manager
        .refresh_pods(&DeploymentName::new(name))
        .await
        .map(Json)
        .map_err(|e| error_response(&e))
}
