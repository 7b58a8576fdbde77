//! Analysis endpoints.

use std::collections::BTreeMap;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use tracing::info;

use crate::deployment::{DeployRequest, TeardownReport, TeardownTarget};
use crate::types::{AnalysisDeployment, AnalysisId, DeploymentName, PodLog};

use super::{error_response, ApiResult, AppState};

/// Deploy a workload for an analysis.
pub async fn deploy(
    State(state): State<AppState>,
    Json(request): Json<DeployRequest>,
) -> ApiResult<(StatusCode, Json<AnalysisDeployment>)> {
    info!(
        analysis_id = %request.analysis_id,
        deployment = %request.deployment_name,
        "deploying via API"
    );

    state
        .manager
        .deploy(request)
        .await
        .map(|record| (StatusCode::CREATED, Json(record)))
        .map_err(|e| error_response(&e))
}

/// List analyses with at least one deployment.
pub async fn list_analyses(State(state): State<AppState>) -> ApiResult<Json<Vec<AnalysisId>>> {
    state
        .manager
        .list_analysis_ids()
        .await
        .map(Json)
        .map_err(|e| error_response(&e))
}

/// Deployments of an analysis.
pub async fn get_analysis(
    State(state): State<AppState>,
    Path(analysis_id): Path<String>,
) -> ApiResult<Json<Vec<AnalysisDeployment>>> {
    state
        .manager
        .list(&AnalysisId::new(analysis_id))
        .await
        .map(Json)
        .map_err(|e| error_response(&e))
}

/// Tear down every deployment of an analysis.
pub async fn teardown_analysis(
    State(state): State<AppState>,
    Path(analysis_id): Path<String>,
) -> ApiResult<Json<TeardownReport>> {
    info!(analysis_id = %analysis_id, "tearing down analysis via API");

    state
        .manager
        .teardown(TeardownTarget::Analysis(AnalysisId::new(analysis_id)))
        .await
        .map(Json)
        .map_err(|e| error_response(&e))
}

/// Mark every deployment of an analysis as stopped.
pub async fn stop_analysis(
    State(state): State<AppState>,
    Path(analysis_id): Path<String>,
) -> ApiResult<Json<Vec<AnalysisDeployment>>> {
    info!(analysis_id = %analysis_id, "stopping analysis via API");

    state
        .manager
        .stop(&AnalysisId::new(analysis_id))
        .await
        .map(Json)
        .map_err(|e| error_response(&e))
}

/// Live logs of every deployment of an analysis.
pub async fn analysis_logs(
    State(state): State<AppState>,
    Path(analysis_id): Path<String>,
) -> ApiResult<Json<BTreeMap<DeploymentName, Vec<PodLog>>>> {
    state
        .manager
        .fetch_analysis_logs(&AnalysisId::new(analysis_id))
        .await
        .map(Json)
        .map_err(|e| error_response(&e))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use super::super::test_support::{make_app_state, send};
    use crate::error::ErrorKind;

    fn deploy_body(analysis: &str, name: &str) -> serde_json::Value {
        json!({
            "analysis_id": analysis,
            "deployment_name": name,
            "image_registry_address": "img:latest",
            "project_id": "p1",
            "ports": [80, 443],
        })
    }

    #[tokio::test]
    async fn deploy_then_query() {
        let (state, _) = make_app_state();

        let (status, body) =
            send(&state, "POST", "/api/analyses", Some(deploy_body("a1", "svc-1"))).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "created");
        assert_eq!(body["ports"], json!([80, 443]));

        let (status, body) = send(&state, "GET", "/api/analyses", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!(["a1"]));

        let (status, body) = send(&state, "GET", "/api/analyses/a1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["deployment_name"], "svc-1");
    }

    #[tokio::test]
    async fn duplicate_deploy_is_conflict() {
        let (state, _) = make_app_state();
        send(&state, "POST", "/api/analyses", Some(deploy_body("a1", "svc-1"))).await;

        let (status, body) =
            send(&state, "POST", "/api/analyses", Some(deploy_body("a2", "svc-1"))).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["kind"], "DuplicateDeployment");
    }

    #[tokio::test]
    async fn invalid_name_is_bad_request() {
        let (state, _) = make_app_state();
        let (status, _) =
            send(&state, "POST", "/api/analyses", Some(deploy_body("a1", "Not_Valid"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unreachable_cluster_is_service_unavailable() {
        let (state, cluster) = make_app_state();
        cluster.fail_next(ErrorKind::ClusterUnreachable).unwrap();

        let (status, _) =
            send(&state, "POST", "/api/analyses", Some(deploy_body("a1", "svc-1"))).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn stop_and_teardown() {
        let (state, cluster) = make_app_state();
        send(&state, "POST", "/api/analyses", Some(deploy_body("a1", "svc-1"))).await;

        let (status, body) = send(&state, "POST", "/api/analyses/a1/stop", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body[0]["status"], "stopped");

        let (status, body) = send(&state, "DELETE", "/api/analyses/a1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["removed"], json!(["svc-1"]));

        let (status, body) = send(&state, "DELETE", "/api/analyses/a1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["removed"], json!([]));

        assert_eq!(cluster.calls().unwrap().delete, 1);
    }

    #[tokio::test]
    async fn logs_of_unknown_analysis_are_not_found() {
        let (state, _) = make_app_state();
        let (status, _) = send(&state, "GET", "/api/analyses/nope/logs", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn analysis_logs_keyed_by_deployment() {
        let (state, _) = make_app_state();
        send(&state, "POST", "/api/analyses", Some(deploy_body("a1", "svc-1"))).await;

        let (status, body) = send(&state, "GET", "/api/analyses/a1/logs", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["svc-1"][0]["pod_id"], "svc-1-pod-0");
    }
}
