//! Core deployment orchestration logic.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::cluster::{ClusterClient, WorkloadSpec};
use crate::config::{DeploymentConfig, StopPolicy};
use crate::error::{ControlError, ControlResult};
use crate::store::DeploymentStore;
use crate::types::{
    AnalysisDeployment, AnalysisId, DeploymentName, DeploymentStatus, DeploymentUpdate, PodLog,
    ProjectId,
};

/// Pod annotation carrying the analysis id.
///
/// Analysis ids are opaque and may not be legal label values, so they are
/// never written as labels.
const ANALYSIS_ANNOTATION: &str = "po-control/analysis-id";

/// Request to deploy a workload for an analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployRequest {
    /// Analysis the workload belongs to.
    pub analysis_id: AnalysisId,
    /// Workload name, unique across all analyses.
    pub deployment_name: DeploymentName,
    /// Container image reference.
    pub image_registry_address: String,
    /// Owning project.
    pub project_id: ProjectId,
    /// Ports to expose.
    #[serde(default)]
    pub ports: Vec<u16>,
}

impl DeployRequest {
    /// Create a deploy request.
    #[must_use]
    pub fn new(
        analysis_id: impl Into<AnalysisId>,
        deployment_name: impl Into<DeploymentName>,
        image_registry_address: impl Into<String>,
        project_id: impl Into<ProjectId>,
        ports: Vec<u16>,
    ) -> Self {
        Self {
            analysis_id: analysis_id.into(),
            deployment_name: deployment_name.into(),
            image_registry_address: image_registry_address.into(),
            project_id: project_id.into(),
            ports,
        }
    }

    fn workload_spec(&self) -> WorkloadSpec {
        WorkloadSpec::new(
            self.deployment_name.clone(),
            self.image_registry_address.clone(),
            self.ports.clone(),
        )
        .with_annotation(ANALYSIS_ANNOTATION, self.analysis_id.as_str())
    }
}

/// What a teardown removes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownTarget {
    /// Every deployment of an analysis.
    Analysis(AnalysisId),
    /// A single deployment.
    Deployment(DeploymentName),
}

impl fmt::Display for TeardownTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Analysis(id) => write!(f, "analysis {id}"),
            Self::Deployment(name) => write!(f, "deployment {name}"),
        }
    }
}

/// Outcome of a teardown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TeardownReport {
    /// Deployments whose record was removed, including those already absent
    /// from the cluster.
    pub removed: Vec<DeploymentName>,
    /// Deployments whose workload was already gone from the cluster.
    pub already_absent: Vec<DeploymentName>,
}

impl TeardownReport {
    /// Whether nothing matched the target.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.removed.is_empty()
    }
}

/// Which pods to read logs from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogScope {
    /// Every live pod of the workload.
    #[default]
    #[serde(alias = "all")]
    AllPods,
    /// Only live pods whose name is recorded in the store.
    #[serde(alias = "tracked")]
    TrackedPods,
}

/// Orchestrates deployment lifecycle operations.
pub struct DeploymentManager {
    store: Arc<dyn DeploymentStore>,
    cluster: Arc<dyn ClusterClient>,
    namespace: String,
    config: DeploymentConfig,
}

impl fmt::Debug for DeploymentManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeploymentManager")
            .field("namespace", &self.namespace)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl DeploymentManager {
    /// Create a new deployment manager.
    pub fn new(
        store: Arc<dyn DeploymentStore>,
        cluster: Arc<dyn ClusterClient>,
        namespace: impl Into<String>,
        config: DeploymentConfig,
    ) -> Self {
        Self {
            store,
            cluster,
            namespace: namespace.into(),
            config,
        }
    }

    /// Namespace workloads are created in.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The lifecycle store backing this manager.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn DeploymentStore> {
        &self.store
    }

    /// Deploy a workload and record it.
    ///
    /// The name is checked against the store before the cluster is touched,
    /// so a duplicate never creates a second workload. A record is written
    /// only after the cluster accepted the workload.
    pub async fn deploy(&self, request: DeployRequest) -> ControlResult<AnalysisDeployment> {
        let name = request.deployment_name.clone();
        self.try_deploy(request)
            .await
            .map_err(|e| e.during("deploy", &name))
    }

    async fn try_deploy(&self, request: DeployRequest) -> ControlResult<AnalysisDeployment> {
        let spec = request.workload_spec();
        spec.validate()?;

        if self
            .store
            .get_by_deployment_name(&request.deployment_name)
            .await?
            .is_some()
        {
            return Err(ControlError::DuplicateDeployment(
                request.deployment_name.to_string(),
            ));
        }

        info!(
            analysis_id = %request.analysis_id,
            deployment = %request.deployment_name,
            image = %request.image_registry_address,
            namespace = %self.namespace,
            "creating workload"
        );

        let pod_ids = self
            .cluster
            .create_workload(&spec, &self.namespace)
            .await
            .inspect_err(|e| {
                error!(deployment = %request.deployment_name, error = %e, "workload creation failed");
            })?;

        let record = AnalysisDeployment::new(
            request.analysis_id,
            request.deployment_name,
            request.project_id,
            pod_ids,
            DeploymentStatus::Created,
            request.ports,
            request.image_registry_address,
        );

        if let Err(e) = self.store.insert(&record).await {
            warn!(
                deployment = %record.deployment_name,
                namespace = %self.namespace,
                error = %e,
                "workload created but record not stored, workload is orphaned"
            );
            return Err(e);
        }

        info!(
            analysis_id = %record.analysis_id,
            deployment = %record.deployment_name,
            pods = record.pod_ids.len(),
            "deployment recorded"
        );

        Ok(record)
    }

    /// Delete workloads and their records.
    ///
    /// A workload the cluster no longer knows is treated as already removed.
    /// Any other cluster failure stops the teardown and keeps the record of
    /// the deployment that failed. Unknown targets are a no-op.
    pub async fn teardown(&self, target: TeardownTarget) -> ControlResult<TeardownReport> {
        let label = target.to_string();
        self.try_teardown(target)
            .await
            .map_err(|e| e.during("teardown", label))
    }

    async fn try_teardown(&self, target: TeardownTarget) -> ControlResult<TeardownReport> {
        let records = match &target {
            TeardownTarget::Analysis(id) => self.store.get_by_analysis_id(id).await?,
            TeardownTarget::Deployment(name) => self
                .store
                .get_by_deployment_name(name)
                .await?
                .into_iter()
                .collect(),
        };

        let mut report = TeardownReport::default();

        if records.is_empty() {
            debug!(scope = %target, "nothing to tear down");
            return Ok(report);
        }

        for record in records {
            let name = record.deployment_name;

            match self.cluster.delete_workload(&name, &self.namespace).await {
                Ok(()) => {
                    info!(deployment = %name, "workload deleted");
                }
                Err(e) if e.is_workload_not_found() => {
                    warn!(deployment = %name, "workload already absent from cluster");
                    report.already_absent.push(name.clone());
                }
                Err(e) => {
                    error!(deployment = %name, error = %e, "workload deletion failed, keeping record");
                    return Err(e);
                }
            }

            self.store.delete_deployment(&name).await?;
            report.removed.push(name);
        }

        info!(
            scope = %target,
            removed = report.removed.len(),
            "teardown complete"
        );

        Ok(report)
    }

    /// Mark every deployment of an analysis as stopped.
    ///
    /// Workloads are never deleted. Under [`StopPolicy::ScaleToZero`] each
    /// workload is also scaled to zero replicas before the records change.
    pub async fn stop(&self, analysis_id: &AnalysisId) -> ControlResult<Vec<AnalysisDeployment>> {
        self.try_stop(analysis_id)
            .await
            .map_err(|e| e.during("stop", analysis_id))
    }

    async fn try_stop(&self, analysis_id: &AnalysisId) -> ControlResult<Vec<AnalysisDeployment>> {
        if self.config.stop_policy == StopPolicy::ScaleToZero {
            for name in self
                .store
                .get_by_analysis_id(analysis_id)
                .await?
                .into_iter()
                .map(|record| record.deployment_name)
            {
                self.cluster
                    .scale_workload(&name, 0, &self.namespace)
                    .await?;
                debug!(deployment = %name, "workload scaled to zero");
            }
        }

        let stopped = self.store.mark_stopped(analysis_id).await?;

        if stopped.is_empty() {
            debug!(analysis_id = %analysis_id, "no deployments to stop");
        } else {
            info!(
                analysis_id = %analysis_id,
                deployments = stopped.len(),
                policy = ?self.config.stop_policy,
                "analysis stopped"
            );
        }

        Ok(stopped)
    }

    /// Read live pod logs for a deployment.
    ///
    /// Nothing is persisted. A deployment without a record is reported as
    /// [`ControlError::WorkloadNotFound`].
    pub async fn fetch_logs(
        &self,
        name: &DeploymentName,
        scope: LogScope,
    ) -> ControlResult<Vec<PodLog>> {
        self.try_fetch_logs(name, scope)
            .await
            .map_err(|e| e.during("fetch logs", name))
    }

    async fn try_fetch_logs(
        &self,
        name: &DeploymentName,
        scope: LogScope,
    ) -> ControlResult<Vec<PodLog>> {
        let record = self.require(name).await?;

        let logs = match scope {
            LogScope::AllPods => {
                self.cluster
                    .fetch_logs(name, None, &self.namespace)
                    .await?
            }
            LogScope::TrackedPods => {
                self.cluster
                    .fetch_logs(name, Some(&record.pod_ids), &self.namespace)
                    .await?
            }
        };

        debug!(deployment = %name, pods = logs.len(), ?scope, "fetched logs");
        Ok(logs)
    }

    /// Read live pod logs for every deployment of an analysis.
    pub async fn fetch_analysis_logs(
        &self,
        analysis_id: &AnalysisId,
    ) -> ControlResult<BTreeMap<DeploymentName, Vec<PodLog>>> {
        self.try_fetch_analysis_logs(analysis_id)
            .await
            .map_err(|e| e.during("fetch logs", analysis_id))
    }

    async fn try_fetch_analysis_logs(
        &self,
        analysis_id: &AnalysisId,
    ) -> ControlResult<BTreeMap<DeploymentName, Vec<PodLog>>> {
        let records = self.store.get_by_analysis_id(analysis_id).await?;
        if records.is_empty() {
            return Err(ControlError::AnalysisNotFound(analysis_id.to_string()));
        }

        let mut logs = BTreeMap::new();
        for record in records {
            let pod_logs = self
                .cluster
                .fetch_logs(&record.deployment_name, None, &self.namespace)
                .await?;
            logs.insert(record.deployment_name, pod_logs);
        }

        Ok(logs)
    }

    /// Read all pod logs of a deployment and cache them on its record.
    pub async fn snapshot_logs(&self, name: &DeploymentName) -> ControlResult<AnalysisDeployment> {
        self.try_snapshot_logs(name)
            .await
            .map_err(|e| e.during("snapshot logs", name))
    }

    async fn try_snapshot_logs(&self, name: &DeploymentName) -> ControlResult<AnalysisDeployment> {
        self.require(name).await?;

        let text: String = self
            .cluster
            .fetch_logs(name, None, &self.namespace)
            .await?
            .into_iter()
            .map(|log| log.text)
            .collect();

        let updated = self
            .store
            .update_deployment(name, &DeploymentUpdate::new().with_log(text))
            .await?
            .ok_or_else(|| not_tracked(name, &self.namespace))?;

        debug!(deployment = %name, "log snapshot stored");
        Ok(updated)
    }

    /// Re-list live pods and store them on the record.
    ///
    /// A `created` deployment with at least one pod is promoted to `running`.
    pub async fn refresh_pods(&self, name: &DeploymentName) -> ControlResult<AnalysisDeployment> {
        self.try_refresh_pods(name)
            .await
            .map_err(|e| e.during("refresh pods", name))
    }

    async fn try_refresh_pods(&self, name: &DeploymentName) -> ControlResult<AnalysisDeployment> {
        let record = self.require(name).await?;
        let pods = self.cluster.list_pods(name, &self.namespace).await?;

        let mut update = DeploymentUpdate::new();
        if !pods.is_empty() && record.status.can_transition_to(DeploymentStatus::Running) {
            update = update.with_status(DeploymentStatus::Running);
            info!(deployment = %name, pods = pods.len(), "deployment running");
        }
        let update = update.with_pod_ids(pods);

        self.store
            .update_deployment(name, &update)
            .await?
            .ok_or_else(|| not_tracked(name, &self.namespace))
    }

    /// Records of an analysis, oldest first.
    pub async fn list(&self, analysis_id: &AnalysisId) -> ControlResult<Vec<AnalysisDeployment>> {
        self.store
            .get_by_analysis_id(analysis_id)
            .await
            .map_err(|e| e.during("list", analysis_id))
    }

    /// Record of a deployment.
    pub async fn get(&self, name: &DeploymentName) -> ControlResult<Option<AnalysisDeployment>> {
        self.store
            .get_by_deployment_name(name)
            .await
            .map_err(|e| e.during("get", name))
    }

    /// Every analysis with at least one record.
    pub async fn list_analysis_ids(&self) -> ControlResult<Vec<AnalysisId>> {
        self.store
            .list_analysis_ids()
            .await
            .map_err(|e| e.during("list", "analyses"))
    }

    /// Every tracked deployment name.
    pub async fn list_deployment_names(&self) -> ControlResult<Vec<DeploymentName>> {
        self.store
            .list_deployment_names()
            .await
            .map_err(|e| e.during("list", "deployments"))
    }

    async fn require(&self, name: &DeploymentName) -> ControlResult<AnalysisDeployment> {
        self.store
            .get_by_deployment_name(name)
            .await?
            .ok_or_else(|| not_tracked(name, &self.namespace))
    }
}

fn not_tracked(name: &DeploymentName, namespace: &str) -> ControlError {
    ControlError::WorkloadNotFound {
        name: name.to_string(),
        namespace: namespace.to_owned(),
    }
}
