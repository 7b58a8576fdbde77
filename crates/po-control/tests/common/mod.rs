//! Common test utilities for po-control integration tests.

#![allow(dead_code)]

pub mod fixtures;

use std::sync::Arc;

use po_control::{
    api::{self, AppState},
    DeploymentConfig, DeploymentManager, DeploymentStore, MemoryStore, MockClusterClient,
    StopPolicy,
};

/// Namespace every test workload lands in.
pub const NAMESPACE: &str = "analyses";

/// Control plane wired against an in-memory store and a fake cluster.
pub struct TestControlPlane {
    pub cluster: Arc<MockClusterClient>,
    pub store: Arc<dyn DeploymentStore>,
    pub manager: Arc<DeploymentManager>,
}

impl TestControlPlane {
    /// One pod per workload, record-only stop.
    pub fn new() -> Self {
        Self::with(MockClusterClient::new(), DeploymentConfig::default())
    }

    /// Fake cluster scheduling `pods` pods per workload.
    pub fn with_pods(pods: usize) -> Self {
        Self::with(
            MockClusterClient::with_pods_per_workload(pods),
            DeploymentConfig::default(),
        )
    }

    /// Stop scales workloads to zero.
    pub fn scaling_to_zero() -> Self {
        Self::with(
            MockClusterClient::new(),
            DeploymentConfig {
                stop_policy: StopPolicy::ScaleToZero,
            },
        )
    }

    fn with(cluster: MockClusterClient, config: DeploymentConfig) -> Self {
        let cluster = Arc::new(cluster);
        let store: Arc<dyn DeploymentStore> = Arc::new(MemoryStore::new());
        let manager = Arc::new(DeploymentManager::new(
            Arc::clone(&store),
            cluster.clone(),
            NAMESPACE,
            config,
        ));

        Self {
            cluster,
            store,
            manager,
        }
    }

    /// HTTP router over this control plane.
    pub fn router(&self) -> axum::Router {
        api::router(AppState::new(Arc::clone(&self.manager)))
    }
}

impl Default for TestControlPlane {
    fn default() -> Self {
        Self::new()
    }
}
