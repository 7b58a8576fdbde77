//! Cluster client adapter for managing analysis workloads.
//!
//! This module abstracts the container cluster behind [`ClusterClient`]. The
//! adapter holds no state of its own: every call is a live request against
//! the cluster and nothing is cached. The primary implementation talks to the
//! Kubernetes API; an in-memory fake is provided for tests and local runs.

mod kubernetes;
mod mock;

pub use kubernetes::{build_deployment, KubeClusterClient, APP_LABEL};
pub use mock::{CallCounts, MockClusterClient};

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{ClusterBackend, ClusterConfig};
use crate::error::{ControlError, ControlResult};
use crate::types::{DeploymentName, PodId, PodLog};

/// Maximum length of a Kubernetes object name used as a label value.
const MAX_NAME_LEN: usize = 63;

/// Maximum length of a label value.
const MAX_LABEL_VALUE_LEN: usize = 63;

/// Desired shape of a workload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadSpec {
    /// Workload name, also used as the container name and `app` label.
    pub name: DeploymentName,
    /// Container image reference.
    pub image: String,
    /// Container ports to expose.
    pub ports: Vec<u16>,
    /// Extra labels applied to the pod template.
    pub labels: BTreeMap<String, String>,
    /// Annotations applied to the pod template. Values are free-form.
    pub annotations: BTreeMap<String, String>,
}

impl WorkloadSpec {
    /// Create a workload spec with no extra labels or annotations.
    #[must_use]
    pub fn new(name: DeploymentName, image: impl Into<String>, ports: Vec<u16>) -> Self {
        Self {
            name,
            image: image.into(),
            ports,
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
        }
    }

    /// Add a pod template label.
    #[must_use]
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// Add a pod template annotation.
    #[must_use]
    pub fn with_annotation(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.annotations.insert(key.into(), value.into());
        self
    }

    /// Check the spec against cluster naming, label and port rules.
    pub fn validate(&self) -> ControlResult<()> {
        validate_name(self.name.as_str())?;

        for (key, value) in &self.labels {
            validate_label_value(key, value)?;
        }

        if self.image.trim().is_empty() {
            return Err(ControlError::invalid("image reference must not be empty"));
        }

        if self.ports.contains(&0) {
            return Err(ControlError::invalid("port 0 is not a valid container port"));
        }

        Ok(())
    }
}

/// Check that `name` is a DNS-1123 label.
fn validate_name(name: &str) -> ControlResult<()> {
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(ControlError::invalid(format!(
            "workload name must be 1-{MAX_NAME_LEN} characters: {name:?}"
        )));
    }

    let valid_chars = name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-');
    let valid_edges = !name.starts_with('-') && !name.ends_with('-');

    if !(valid_chars && valid_edges) {
        return Err(ControlError::invalid(format!(
            "workload name must be lowercase alphanumeric or '-', and start and end alphanumeric: {name:?}"
        )));
    }

    Ok(())
}

/// Check that `value` is a legal label value. Empty values are allowed.
fn validate_label_value(key: &str, value: &str) -> ControlResult<()> {
    if value.is_empty() {
        return Ok(());
    }

    let valid_chars = value
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.'));
    let valid_edges = value.starts_with(|c: char| c.is_ascii_alphanumeric())
        && value.ends_with(|c: char| c.is_ascii_alphanumeric());

    if value.len() > MAX_LABEL_VALUE_LEN || !(valid_chars && valid_edges) {
        return Err(ControlError::invalid(format!(
            "label {key:?} has an invalid value {value:?}: at most {MAX_LABEL_VALUE_LEN} \
             alphanumeric, '-', '_' or '.' characters, starting and ending alphanumeric"
        )));
    }

    Ok(())
}

/// Operations the control plane needs from the container cluster.
///
/// Implementations report a missing workload as
/// [`ControlError::WorkloadNotFound`] and a name collision as
/// [`ControlError::WorkloadAlreadyExists`]. An object the cluster refuses is
/// [`ControlError::InvalidRequest`]. Any transport or authentication failure
/// is [`ControlError::ClusterUnreachable`]. Nothing is retried.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Submit a workload and return the pods currently backing it.
    ///
    /// The returned list may be empty while pods are still being scheduled.
    async fn create_workload(&self, spec: &WorkloadSpec, namespace: &str)
        -> ControlResult<Vec<PodId>>;

    /// Delete a workload.
    async fn delete_workload(&self, name: &DeploymentName, namespace: &str) -> ControlResult<()>;

    /// List the pods currently matching the workload's label selector.
    async fn list_pods(&self, name: &DeploymentName, namespace: &str) -> ControlResult<Vec<PodId>>;

    /// Read pod logs for a workload.
    ///
    /// With a filter, only live pods whose name appears in the filter are
    /// read. Filter entries that no longer match a live pod are ignored.
    /// Pods whose log cannot be read yet are skipped.
    async fn fetch_logs(
        &self,
        name: &DeploymentName,
        filter: Option<&[PodId]>,
        namespace: &str,
    ) -> ControlResult<Vec<PodLog>>;

    /// Set the replica count of a workload.
    async fn scale_workload(
        &self,
        name: &DeploymentName,
        replicas: i32,
        namespace: &str,
    ) -> ControlResult<()>;
}

/// Create a cluster client from configuration.
pub async fn create_cluster_client(config: &ClusterConfig) -> ControlResult<Arc<dyn ClusterClient>> {
    match config.backend {
        ClusterBackend::Kubernetes => {
            let client = KubeClusterClient::connect(config).await?;
            Ok(Arc::new(client))
        }
        ClusterBackend::Mock => Ok(Arc::new(MockClusterClient::default())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn spec(name: &str) -> WorkloadSpec {
        WorkloadSpec::new(DeploymentName::new(name), "img:latest", vec![80, 443])
    }

    #[test]
    fn valid_spec_passes() {
        assert!(spec("svc-1").validate().is_ok());
        assert!(spec("a").validate().is_ok());
    }

    #[test]
    fn rejects_bad_names() {
        let long = "x".repeat(64);
        for name in ["", "Svc", "svc_1", "-svc", "svc-", long.as_str()] {
            let err = spec(name).validate().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidRequest, "name {name:?}");
        }
    }

    #[test]
    fn rejects_empty_image_and_zero_port() {
        let mut s = spec("svc-1");
        s.image = "  ".to_owned();
        assert!(s.validate().is_err());

        let s = WorkloadSpec::new(DeploymentName::new("svc-1"), "img", vec![0]);
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_bad_label_values() {
        let long = "v".repeat(64);
        for value in [
            "project-7/analysis 2024:run#1",
            "-lead",
            "trail.",
            long.as_str(),
        ] {
            let err = spec("svc-1").with_label("analysis", value).validate().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidRequest, "value {value:?}");
        }
    }

    #[test]
    fn accepts_label_safe_values_and_free_form_annotations() {
        let s = spec("svc-1")
            .with_label("project", "p1.v2_x-y")
            .with_label("empty", "")
            .with_annotation("po-control/analysis-id", "project-7/analysis 2024:run#1");
        assert!(s.validate().is_ok());
    }

    #[tokio::test]
    async fn mock_backend_from_config() {
        let config = ClusterConfig {
            backend: ClusterBackend::Mock,
            ..ClusterConfig::default()
        };
        let client = create_cluster_client(&config).await.unwrap();
        let pods = client
            .list_pods(&DeploymentName::new("missing"), "default")
            .await
            .unwrap();
        assert!(pods.is_empty());
    }
}
