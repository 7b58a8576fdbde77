//! Deployment orchestration and lifecycle management.
//!
//! This module pairs the cluster client with the lifecycle store: workloads
//! are created and deleted on the cluster while their records are kept in
//! step in the store.

mod manager;

pub use manager::{DeployRequest, DeploymentManager, LogScope, TeardownReport, TeardownTarget};
