//! Kubernetes cluster client.

use std::collections::BTreeMap;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, ContainerPort, Pod, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::api::{DeleteParams, ListParams, LogParams, Patch, PatchParams, PostParams};
use kube::config::KubeConfigOptions;
use kube::{Api, Client, ResourceExt};
use tracing::{debug, info};

use crate::config::{ClusterAuth, ClusterConfig};
use crate::error::{ControlError, ControlResult};
use crate::types::{DeploymentName, PodId, PodLog};

use super::{ClusterClient, WorkloadSpec};

/// Label linking pods to the workload that owns them.
pub const APP_LABEL: &str = "app";

/// Cluster client backed by the Kubernetes API.
#[derive(Clone)]
pub struct KubeClusterClient {
    client: Client,
    image_pull_policy: String,
}

impl KubeClusterClient {
    /// Build a client from the configured credentials.
    pub async fn connect(config: &ClusterConfig) -> ControlResult<Self> {
        let kube_config = match config.auth {
            ClusterAuth::Infer => kube::Config::infer()
                .await
                .map_err(|e| ControlError::Config(format!("failed to infer cluster config: {e}")))?,
            ClusterAuth::InCluster => kube::Config::incluster().map_err(|e| {
                ControlError::Config(format!("failed to load in-cluster config: {e}"))
            })?,
            ClusterAuth::Kubeconfig => {
                let options = KubeConfigOptions {
                    context: config.context.clone(),
                    ..KubeConfigOptions::default()
                };
                kube::Config::from_kubeconfig(&options)
                    .await
                    .map_err(|e| ControlError::Config(format!("failed to load kubeconfig: {e}")))?
            }
        };

        let client = Client::try_from(kube_config)
            .map_err(|e| ControlError::cluster(format!("failed to build cluster client: {e}")))?;

        info!(auth = ?config.auth, "cluster client configured");

        Ok(Self::from_client(client, config.image_pull_policy.clone()))
    }

    /// Wrap an existing Kubernetes client.
    #[must_use]
    pub fn from_client(client: Client, image_pull_policy: impl Into<String>) -> Self {
        Self {
            client,
            image_pull_policy: image_pull_policy.into(),
        }
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn pods(&self, namespace: &str) -> Api<Pod> {
        Api::namespaced(self.client.clone(), namespace)
    }

    async fn live_pods(&self, name: &DeploymentName, namespace: &str) -> ControlResult<Vec<Pod>> {
        let selector = format!("{APP_LABEL}={name}");
        let pod_list = self
            .pods(namespace)
            .list(&ListParams::default().labels(&selector))
            .await
            .map_err(|e| ControlError::from_kube(e, name.as_str(), namespace))?;

        Ok(pod_list.items)
    }
}

/// Build the `apps/v1` Deployment object for a workload.
///
/// The pod template and the selector both carry `app=<name>`, which is how
/// pods are later found for listing and log retrieval.
#[must_use]
pub fn build_deployment(spec: &WorkloadSpec, namespace: &str, image_pull_policy: &str) -> Deployment {
    let mut labels = spec.labels.clone();
    labels.insert(APP_LABEL.to_owned(), spec.name.to_string());

    let selector_labels = BTreeMap::from([(APP_LABEL.to_owned(), spec.name.to_string())]);

    let ports = spec
        .ports
        .iter()
        .map(|&port| ContainerPort {
            container_port: i32::from(port),
            ..ContainerPort::default()
        })
        .collect::<Vec<_>>();

    let container = Container {
        name: spec.name.to_string(),
        image: Some(spec.image.clone()),
        image_pull_policy: Some(image_pull_policy.to_owned()),
        ports: (!ports.is_empty()).then_some(ports),
        ..Container::default()
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(spec.name.to_string()),
            namespace: Some(namespace.to_owned()),
            ..ObjectMeta::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            selector: LabelSelector {
                match_labels: Some(selector_labels),
                ..LabelSelector::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    annotations: (!spec.annotations.is_empty()).then(|| spec.annotations.clone()),
                    ..ObjectMeta::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    ..PodSpec::default()
                }),
            },
            ..DeploymentSpec::default()
        }),
        ..Deployment::default()
    }
}

/// Whether a log read failed because the pod cannot serve logs right now.
///
/// 400 means the container has not started yet, 404 that the pod went away
/// after it was listed.
fn log_unavailable(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(status) if status.code == 400 || status.code == 404)
}

#[async_trait]
impl ClusterClient for KubeClusterClient {
    async fn create_workload(
        &self,
        spec: &WorkloadSpec,
        namespace: &str,
    ) -> ControlResult<Vec<PodId>> {
        let deployment = build_deployment(spec, namespace, &self.image_pull_policy);

        info!(name = %spec.name, namespace = %namespace, image = %spec.image, "creating workload");

        self.deployments(namespace)
            .create(&PostParams::default(), &deployment)
            .await
            .map_err(|e| ControlError::from_kube(e, spec.name.as_str(), namespace))?;

        self.list_pods(&spec.name, namespace).await
    }

    async fn delete_workload(&self, name: &DeploymentName, namespace: &str) -> ControlResult<()> {
        info!(name = %name, namespace = %namespace, "deleting workload");

        self.deployments(namespace)
            .delete(name.as_str(), &DeleteParams::default())
            .await
            .map_err(|e| ControlError::from_kube(e, name.as_str(), namespace))?;

        Ok(())
    }

    async fn list_pods(&self, name: &DeploymentName, namespace: &str) -> ControlResult<Vec<PodId>> {
        let pods = self.live_pods(name, namespace).await?;
        debug!(name = %name, count = pods.len(), "listed pods");

        Ok(pods.iter().map(|pod| PodId::new(pod.name_any())).collect())
    }

    async fn fetch_logs(
        &self,
        name: &DeploymentName,
        filter: Option<&[PodId]>,
        namespace: &str,
    ) -> ControlResult<Vec<PodLog>> {
        let pods_api = self.pods(namespace);
        let mut logs = Vec::new();

        for pod in self.live_pods(name, namespace).await? {
            let pod_id = PodId::new(pod.name_any());
            if filter.is_some_and(|wanted| !wanted.contains(&pod_id)) {
                continue;
            }

            match pods_api.logs(pod_id.as_str(), &LogParams::default()).await {
                Ok(text) => logs.push(PodLog { pod_id, text }),
                Err(e) if log_unavailable(&e) => {
                    debug!(name = %name, pod = %pod_id, error = %e, "pod log not readable, skipping");
                }
                Err(e) => {
                    return Err(ControlError::cluster(format!(
                        "failed to read log of pod {pod_id} in namespace {namespace}: {e}"
                    )));
                }
            }
        }

        debug!(name = %name, count = logs.len(), "fetched pod logs");

        Ok(logs)
    }

    async fn scale_workload(
        &self,
        name: &DeploymentName,
        replicas: i32,
        namespace: &str,
    ) -> ControlResult<()> {
        info!(name = %name, namespace = %namespace, replicas, "scaling workload");

        let patch = serde_json::json!({ "spec": { "replicas": replicas } });
        self.deployments(namespace)
            .patch(name.as_str(), &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| ControlError::from_kube(e, name.as_str(), namespace))?;

        Ok(())
    }
}

impl std::fmt::Debug for KubeClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClusterClient")
            .field("image_pull_policy", &self.image_pull_policy)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> WorkloadSpec {
        WorkloadSpec::new(DeploymentName::new("svc-1"), "img:latest", vec![80, 443])
            .with_label("project", "p1")
    }

    #[test]
    fn deployment_metadata_and_selector() {
        let deployment = build_deployment(&spec(), "analyses", "Never");

        assert_eq!(deployment.metadata.name.as_deref(), Some("svc-1"));
        assert_eq!(deployment.metadata.namespace.as_deref(), Some("analyses"));

        let spec = deployment.spec.unwrap();
        assert_eq!(spec.replicas, Some(1));

        let selector = spec.selector.match_labels.unwrap();
        assert_eq!(selector.len(), 1);
        assert_eq!(selector.get("app").map(String::as_str), Some("svc-1"));

        let template_labels = spec.template.metadata.unwrap().labels.unwrap();
        assert_eq!(template_labels.get("app").map(String::as_str), Some("svc-1"));
        assert_eq!(template_labels.get("project").map(String::as_str), Some("p1"));
    }

    #[test]
    fn deployment_container() {
        let deployment = build_deployment(&spec(), "default", "IfNotPresent");
        let pod_spec = deployment.spec.unwrap().template.spec.unwrap();

        assert_eq!(pod_spec.containers.len(), 1);
        let container = &pod_spec.containers[0];
        assert_eq!(container.name, "svc-1");
        assert_eq!(container.image.as_deref(), Some("img:latest"));
        assert_eq!(container.image_pull_policy.as_deref(), Some("IfNotPresent"));

        let ports: Vec<i32> = container
            .ports
            .as_ref()
            .unwrap()
            .iter()
            .map(|p| p.container_port)
            .collect();
        assert_eq!(ports, vec![80, 443]);
    }

    #[test]
    fn deployment_annotations_carry_free_form_values() {
        let spec = spec().with_annotation("po-control/analysis-id", "project-7/analysis 2024:run#1");
        let deployment = build_deployment(&spec, "default", "Never");
        let metadata = deployment.spec.unwrap().template.metadata.unwrap();

        let annotations = metadata.annotations.unwrap();
        assert_eq!(
            annotations.get("po-control/analysis-id").map(String::as_str),
            Some("project-7/analysis 2024:run#1")
        );
        assert!(!metadata.labels.unwrap().contains_key("po-control/analysis-id"));
    }

    #[test]
    fn deployment_without_annotations() {
        let deployment = build_deployment(&spec(), "default", "Never");
        let metadata = deployment.spec.unwrap().template.metadata.unwrap();
        assert!(metadata.annotations.is_none());
    }

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_owned(),
            message: format!("{reason} from server"),
            reason: reason.to_owned(),
            code,
        })
    }

    #[test]
    fn unreadable_pod_logs_are_skipped() {
        assert!(log_unavailable(&api_error(400, "BadRequest")));
        assert!(log_unavailable(&api_error(404, "NotFound")));
        assert!(!log_unavailable(&api_error(403, "Forbidden")));
        assert!(!log_unavailable(&api_error(500, "InternalError")));
    }

    #[test]
    fn deployment_without_ports() {
        let spec = WorkloadSpec::new(DeploymentName::new("batch"), "img", vec![]);
        let deployment = build_deployment(&spec, "default", "Never");
        let container = &deployment.spec.unwrap().template.spec.unwrap().containers[0];
        assert!(container.ports.is_none());
    }
}
