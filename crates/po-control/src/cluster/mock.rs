//! In-memory cluster client for tests and local runs.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{ControlError, ControlResult, ErrorKind};
use crate::types::{DeploymentName, PodId, PodLog};

use super::{ClusterClient, WorkloadSpec};

/// Number of times each cluster operation was invoked.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    /// `create_workload` calls.
    pub create: usize,
    /// `delete_workload` calls.
    pub delete: usize,
    /// `list_pods` calls.
    pub list: usize,
    /// `fetch_logs` calls.
    pub logs: usize,
    /// `scale_workload` calls.
    pub scale: usize,
}

#[derive(Debug)]
struct MockWorkload {
    spec: WorkloadSpec,
    pods: Vec<PodId>,
    replicas: i32,
}

#[derive(Debug, Default)]
struct MockState {
    workloads: HashMap<(String, String), MockWorkload>,
    logs: HashMap<String, String>,
    calls: CallCounts,
    fail_next: Option<ErrorKind>,
    next_pod: usize,
}

/// Fake cluster that keeps workloads in memory.
///
/// Each created workload gets `pods_per_workload` pods named
/// `<workload>-pod-<n>`. Logs default to a line naming the pod and can be
/// overridden per pod.
#[derive(Debug)]
pub struct MockClusterClient {
    state: Mutex<MockState>,
    pods_per_workload: usize,
}

impl Default for MockClusterClient {
    fn default() -> Self {
        Self::with_pods_per_workload(1)
    }
}

impl MockClusterClient {
    /// Create a fake cluster that schedules one pod per workload.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fake cluster that schedules `pods` pods per workload.
    #[must_use]
    pub fn with_pods_per_workload(pods: usize) -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            pods_per_workload: pods,
        }
    }

    /// Snapshot of the call counters.
    pub fn calls(&self) -> ControlResult<CallCounts> {
        Ok(self.lock()?.calls)
    }

    /// Make the next cluster call fail with the given kind.
    ///
    /// Only `ClusterUnreachable`, `WorkloadAlreadyExists` and
    /// `WorkloadNotFound` are meaningful here.
    pub fn fail_next(&self, kind: ErrorKind) -> ControlResult<()> {
        self.lock()?.fail_next = Some(kind);
        Ok(())
    }

    /// Override the log text of a pod.
    pub fn set_log(&self, pod: &PodId, text: impl Into<String>) -> ControlResult<()> {
        self.lock()?.logs.insert(pod.to_string(), text.into());
        Ok(())
    }

    /// Add a pod to an existing workload, as if the cluster scheduled it.
    pub fn add_pod(&self, name: &DeploymentName, namespace: &str, pod: PodId) -> ControlResult<()> {
        let mut state = self.lock()?;
        let workload = state
            .workloads
            .get_mut(&key(name, namespace))
            .ok_or_else(|| not_found(name.as_str(), namespace))?;
        workload.pods.push(pod);
        Ok(())
    }

    /// Remove a workload without going through the client, as if deleted out of band.
    pub fn remove_out_of_band(&self, name: &DeploymentName, namespace: &str) -> ControlResult<()> {
        self.lock()?.workloads.remove(&key(name, namespace));
        Ok(())
    }

    /// Whether the fake cluster currently runs a workload with this name.
    pub fn has_workload(&self, name: &DeploymentName, namespace: &str) -> ControlResult<bool> {
        Ok(self.lock()?.workloads.contains_key(&key(name, namespace)))
    }

    /// Spec and replica count of a running workload.
    pub fn workload(
        &self,
        name: &DeploymentName,
        namespace: &str,
    ) -> ControlResult<Option<(WorkloadSpec, i32)>> {
        Ok(self
            .lock()?
            .workloads
            .get(&key(name, namespace))
            .map(|w| (w.spec.clone(), w.replicas)))
    }

    fn lock(&self) -> ControlResult<std::sync::MutexGuard<'_, MockState>> {
        self.state
            .lock()
            .map_err(|_| ControlError::internal("lock poisoned"))
    }
}

fn key(name: &DeploymentName, namespace: &str) -> (String, String) {
    (namespace.to_owned(), name.to_string())
}

fn not_found(name: &str, namespace: &str) -> ControlError {
    ControlError::WorkloadNotFound {
        name: name.to_owned(),
        namespace: namespace.to_owned(),
    }
}

impl MockState {
    fn take_failure(&mut self, name: &str, namespace: &str) -> ControlResult<()> {
        match self.fail_next.take() {
            None => Ok(()),
            Some(ErrorKind::WorkloadNotFound) => Err(not_found(name, namespace)),
            Some(ErrorKind::WorkloadAlreadyExists) => Err(ControlError::WorkloadAlreadyExists {
                name: name.to_owned(),
                namespace: namespace.to_owned(),
            }),
            Some(_) => Err(ControlError::cluster("connection refused")),
        }
    }
}

#[async_trait]
impl ClusterClient for MockClusterClient {
    async fn create_workload(
        &self,
        spec: &WorkloadSpec,
        namespace: &str,
    ) -> ControlResult<Vec<PodId>> {
        let mut state = self.lock()?;
        state.calls.create += 1;
        state.take_failure(spec.name.as_str(), namespace)?;

        let workload_key = key(&spec.name, namespace);
        if state.workloads.contains_key(&workload_key) {
            return Err(ControlError::WorkloadAlreadyExists {
                name: spec.name.to_string(),
                namespace: namespace.to_owned(),
            });
        }

        let mut pods = Vec::with_capacity(self.pods_per_workload);
        for _ in 0..self.pods_per_workload {
            pods.push(PodId::new(format!("{}-pod-{}", spec.name, state.next_pod)));
            state.next_pod += 1;
        }

        state.workloads.insert(
            workload_key,
            MockWorkload {
                spec: spec.clone(),
                pods: pods.clone(),
                replicas: 1,
            },
        );

        Ok(pods)
    }

    async fn delete_workload(&self, name: &DeploymentName, namespace: &str) -> ControlResult<()> {
        let mut state = self.lock()?;
        state.calls.delete += 1;
        state.take_failure(name.as_str(), namespace)?;

        state
            .workloads
            .remove(&key(name, namespace))
            .map(|_| ())
            .ok_or_else(|| not_found(name.as_str(), namespace))
    }

    async fn list_pods(&self, name: &DeploymentName, namespace: &str) -> ControlResult<Vec<PodId>> {
        let mut state = self.lock()?;
        state.calls.list += 1;
        state.take_failure(name.as_str(), namespace)?;

        Ok(state
            .workloads
            .get(&key(name, namespace))
            .map(|w| w.pods.clone())
            .unwrap_or_default())
    }

    async fn fetch_logs(
        &self,
        name: &DeploymentName,
        filter: Option<&[PodId]>,
        namespace: &str,
    ) -> ControlResult<Vec<PodLog>> {
        let mut state = self.lock()?;
        state.calls.logs += 1;
        state.take_failure(name.as_str(), namespace)?;

        let pods = state
            .workloads
            .get(&key(name, namespace))
            .map(|w| w.pods.clone())
            .unwrap_or_default();

        Ok(pods
            .into_iter()
            .filter(|pod| filter.map_or(true, |wanted| wanted.contains(pod)))
            .map(|pod| {
                let text = state
                    .logs
                    .get(pod.as_str())
                    .cloned()
                    .unwrap_or_else(|| format!("log output from {pod}\n"));
                PodLog { pod_id: pod, text }
            })
            .collect())
    }

    async fn scale_workload(
        &self,
        name: &DeploymentName,
        replicas: i32,
        namespace: &str,
    ) -> ControlResult<()> {
        let mut state = self.lock()?;
        state.calls.scale += 1;
        state.take_failure(name.as_str(), namespace)?;

        let workload = state
            .workloads
            .get_mut(&key(name, namespace))
            .ok_or_else(|| not_found(name.as_str(), namespace))?;
        workload.replicas = replicas;
        if replicas == 0 {
            workload.pods.clear();
        }

        Ok(())
    }
}
