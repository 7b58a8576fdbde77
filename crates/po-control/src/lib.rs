//! po-control: control plane for per-analysis workloads.
//!
//! Launches, tracks and tears down analysis workloads on a Kubernetes
//! cluster and keeps their lifecycle state in PostgreSQL.
//!
//! # Architecture
//!
//! - [`cluster`]: stateless adapter over the cluster API. Every call is a
//!   live request.
//! - [`store`]: durable record of each analysis-to-deployment mapping, its
//!   pods, ports, status and cached log output.
//! - [`deployment`]: the [`DeploymentManager`], which keeps the two in step.
//! - [`api`]: thin HTTP surface over the manager.
//!
//! # Lifecycle
//!
//! ```text
//! (none) ──deploy──▶ Created ──refresh sees pods──▶ Running
//!                       │                              │
//!                       └────────────stop──────────────┴──▶ Stopped
//!
//! any ──teardown──▶ (none)
//! ```
//!
//! A record is written only after the cluster accepted the workload, and a
//! teardown only removes a record once the cluster confirmed the workload is
//! gone.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use po_control::{
//!     DeployRequest, DeploymentConfig, DeploymentManager, MemoryStore, MockClusterClient,
//!     TeardownTarget,
//! };
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> po_control::ControlResult<()> {
//! let manager = DeploymentManager::new(
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(MockClusterClient::new()),
//!     "default",
//!     DeploymentConfig::default(),
//! );
//!
//! let record = manager
//!     .deploy(DeployRequest::new("a1", "svc-1", "img:latest", "p1", vec![80, 443]))
//!     .await?;
//! assert_eq!(record.pod_ids.len(), 1);
//!
//! manager
//!     .teardown(TeardownTarget::Analysis(record.analysis_id))
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]

pub mod api;
pub mod cluster;
pub mod config;
pub mod deployment;
pub mod error;
pub mod service;
pub mod store;
pub mod types;

// Re-export commonly used types at the crate root
pub use cluster::{ClusterClient, KubeClusterClient, MockClusterClient, WorkloadSpec};
pub use config::{ControlConfig, DeploymentConfig, StopPolicy};
pub use deployment::{DeployRequest, DeploymentManager, LogScope, TeardownReport, TeardownTarget};
pub use error::{ControlError, ControlResult, ErrorKind};
pub use service::ControlService;
pub use store::{DeploymentFilter, DeploymentStore, MemoryStore, PostgresStore};
pub use types::{
    AnalysisDeployment, AnalysisId, DeploymentName, DeploymentStatus, DeploymentUpdate, PodId,
    PodLog, ProjectId,
};
