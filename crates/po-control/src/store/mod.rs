//! Lifecycle store backends.
//!
//! This module provides the trait and implementations for persisting
//! analysis deployment records. The primary implementation uses PostgreSQL,
//! but an in-memory implementation is provided for testing.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use async_trait::async_trait;

use crate::error::ControlResult;
use crate::types::{
    AnalysisDeployment, AnalysisId, DeploymentName, DeploymentStatus, DeploymentUpdate, PodId,
    ProjectId,
};

/// Filter criteria for listing deployment records.
#[derive(Debug, Clone, Default)]
pub struct DeploymentFilter {
    /// Filter by analysis.
    pub analysis_id: Option<AnalysisId>,
    /// Filter by project.
    pub project_id: Option<ProjectId>,
    /// Filter by status.
    pub status: Option<DeploymentStatus>,
    /// Maximum number of results.
    pub limit: Option<u32>,
    /// Offset for pagination.
    pub offset: Option<u32>,
}

impl DeploymentFilter {
    /// Create a new empty filter.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            analysis_id: None,
            project_id: None,
            status: None,
            limit: None,
            offset: None,
        }
    }

    /// Filter by analysis.
    #[must_use]
    pub fn with_analysis(mut self, analysis_id: AnalysisId) -> Self {
        self.analysis_id = Some(analysis_id);
        self
    }

    /// Filter by project.
    #[must_use]
    pub fn with_project(mut self, project_id: ProjectId) -> Self {
        self.project_id = Some(project_id);
        self
    }

    /// Filter by status.
    #[must_use]
    pub const fn with_status(mut self, status: DeploymentStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set maximum results.
    #[must_use]
    pub const fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set pagination offset.
    #[must_use]
    pub const fn with_offset(mut self, offset: u32) -> Self {
        self.offset = Some(offset);
        self
    }

    /// Whether a record satisfies the filter's predicates.
    #[must_use]
    pub fn matches(&self, record: &AnalysisDeployment) -> bool {
        self.analysis_id
            .as_ref()
            .map_or(true, |id| &record.analysis_id == id)
            && self
                .project_id
                .as_ref()
                .map_or(true, |id| &record.project_id == id)
            && self.status.map_or(true, |status| record.status == status)
    }
}

/// Backend for storing analysis deployment records.
///
/// The store owns the uniqueness of deployment names. Multi-record updates
/// and deletes commit each record independently: a failure partway through
/// leaves earlier records changed.
#[async_trait]
pub trait DeploymentStore: Send + Sync {
    /// Insert a new record.
    ///
    /// Returns [`crate::ControlError::DuplicateDeployment`] if a record with
    /// the same deployment name exists.
    async fn insert(&self, record: &AnalysisDeployment) -> ControlResult<()>;

    /// Get a record by deployment name.
    async fn get_by_deployment_name(
        &self,
        name: &DeploymentName,
    ) -> ControlResult<Option<AnalysisDeployment>>;

    /// Get every record of an analysis, oldest first.
    async fn get_by_analysis_id(
        &self,
        analysis_id: &AnalysisId,
    ) -> ControlResult<Vec<AnalysisDeployment>>;

    /// Apply the same changes to every record of an analysis.
    ///
    /// Returns the updated records, or an empty list if the analysis has none.
    async fn update_analysis(
        &self,
        analysis_id: &AnalysisId,
        update: &DeploymentUpdate,
    ) -> ControlResult<Vec<AnalysisDeployment>>;

    /// Apply changes to a single record.
    ///
    /// Returns `None` if no record has this name.
    async fn update_deployment(
        &self,
        name: &DeploymentName,
        update: &DeploymentUpdate,
    ) -> ControlResult<Option<AnalysisDeployment>>;

    /// Delete every record of an analysis. Returns the number removed.
    async fn delete_by_analysis_id(&self, analysis_id: &AnalysisId) -> ControlResult<u64>;

    /// Delete a single record. Returns whether it existed.
    async fn delete_deployment(&self, name: &DeploymentName) -> ControlResult<bool>;

    /// Distinct analysis identifiers, sorted.
    async fn list_analysis_ids(&self) -> ControlResult<Vec<AnalysisId>>;

    /// All deployment names, sorted.
    async fn list_deployment_names(&self) -> ControlResult<Vec<DeploymentName>>;

    /// List records matching the filter, oldest first.
    async fn list(&self, filter: &DeploymentFilter) -> ControlResult<Vec<AnalysisDeployment>>;

    /// Drop all records and recreate the schema.
    async fn reset(&self) -> ControlResult<()>;

    /// Mark every record of an analysis as stopped.
    async fn mark_stopped(&self, analysis_id: &AnalysisId) -> ControlResult<Vec<AnalysisDeployment>> {
        self.update_analysis(
            analysis_id,
            &DeploymentUpdate::new().with_status(DeploymentStatus::Stopped),
        )
        .await
    }

    /// Pod identifiers recorded for a deployment.
    async fn pod_ids_for_deployment(
        &self,
        name: &DeploymentName,
    ) -> ControlResult<Option<Vec<PodId>>> {
        Ok(self
            .get_by_deployment_name(name)
            .await?
            .map(|record| record.pod_ids))
    }

    /// Pod identifiers recorded for each deployment of an analysis.
    async fn pod_ids_for_analysis(
        &self,
        analysis_id: &AnalysisId,
    ) -> ControlResult<Vec<(DeploymentName, Vec<PodId>)>> {
        Ok(self
            .get_by_analysis_id(analysis_id)
            .await?
            .into_iter()
            .map(|record| (record.deployment_name, record.pod_ids))
            .collect())
    }
}
