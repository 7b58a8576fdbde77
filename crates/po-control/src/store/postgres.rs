//! PostgreSQL lifecycle store implementation.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};

use crate::config::DatabaseConfig;
use crate::error::{ControlError, ControlResult};
use crate::types::{
    AnalysisDeployment, AnalysisId, DeploymentName, DeploymentStatus, DeploymentUpdate, PodId,
    ProjectId,
};

use super::{DeploymentFilter, DeploymentStore};

const COLUMNS: &str = "deployment_name, analysis_id, project_id, pod_ids, ports, \
                       image_registry_address, status, log, created_at, updated_at";

/// PostgreSQL-backed lifecycle store.
///
/// Every operation checks a connection out of the pool for its own duration
/// only. No session outlives a call.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect to PostgreSQL and create a new store.
    ///
    /// The required table is created if it doesn't exist.
    pub async fn new(url: &str) -> ControlResult<Self> {
        Self::connect(&DatabaseConfig {
            url: url.to_owned(),
            ..DatabaseConfig::default()
        })
        .await
    }

    /// Connect using pool settings from configuration.
    pub async fn connect(config: &DatabaseConfig) -> ControlResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await?;

        Self::from_pool(pool).await
    }

    /// Create a store from an existing connection pool.
    pub async fn from_pool(pool: PgPool) -> ControlResult<Self> {
        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Ensure the required table exists.
    async fn ensure_schema(&self) -> ControlResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS analysis_deployments (
                deployment_name TEXT PRIMARY KEY,
                analysis_id TEXT NOT NULL,
                project_id TEXT NOT NULL,
                pod_ids TEXT[] NOT NULL DEFAULT '{}',
                ports INTEGER[] NOT NULL DEFAULT '{}',
                image_registry_address TEXT NOT NULL,
                status TEXT NOT NULL
                    CHECK (status IN ('created', 'running', 'stopped', 'failed', 'deleted')),
                log TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_analysis_deployments_analysis
            ON analysis_deployments (analysis_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Parse a row into a record.
    fn row_to_record(row: &PgRow) -> ControlResult<AnalysisDeployment> {
        let pod_ids: Vec<String> = row.try_get("pod_ids")?;
        let ports: Vec<i32> = row.try_get("ports")?;
        let status_str: String = row.try_get("status")?;

        let ports = ports
            .into_iter()
            .map(|p| {
                u16::try_from(p)
                    .map_err(|_| ControlError::Serialisation(format!("port out of range: {p}")))
            })
            .collect::<ControlResult<Vec<_>>>()?;

        let status: DeploymentStatus = status_str.parse().map_err(|e| {
            ControlError::Serialisation(format!("failed to parse status '{status_str}': {e}"))
        })?;

        Ok(AnalysisDeployment {
            analysis_id: AnalysisId::new(row.try_get::<String, _>("analysis_id")?),
            deployment_name: DeploymentName::new(row.try_get::<String, _>("deployment_name")?),
            project_id: ProjectId::new(row.try_get::<String, _>("project_id")?),
            pod_ids: pod_ids.into_iter().map(PodId::new).collect(),
            ports,
            image_registry_address: row.try_get("image_registry_address")?,
            status,
            log: row.try_get("log")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }
}

fn pod_strings(pods: &[PodId]) -> Vec<String> {
    pods.iter().map(ToString::to_string).collect()
}

fn port_ints(ports: &[u16]) -> Vec<i32> {
    ports.iter().copied().map(i32::from).collect()
}

#[async_trait]
impl DeploymentStore for PostgresStore {
    async fn insert(&self, record: &AnalysisDeployment) -> ControlResult<()> {
        sqlx::query(
            r#"
            INSERT INTO analysis_deployments (
                deployment_name, analysis_id, project_id, pod_ids, ports,
                image_registry_address, status, log, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.deployment_name.as_str())
        .bind(record.analysis_id.as_str())
        .bind(record.project_id.as_str())
        .bind(pod_strings(&record.pod_ids))
        .bind(port_ints(&record.ports))
        .bind(&record.image_registry_address)
        .bind(record.status.as_str())
        .bind(&record.log)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                ControlError::DuplicateDeployment(record.deployment_name.to_string())
            }
            other => other.into(),
        })?;

        debug!(deployment = %record.deployment_name, "record inserted");
        Ok(())
    }

    async fn get_by_deployment_name(
        &self,
        name: &DeploymentName,
    ) -> ControlResult<Option<AnalysisDeployment>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM analysis_deployments WHERE deployment_name = $1"
        ))
        .bind(name.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn get_by_analysis_id(
        &self,
        analysis_id: &AnalysisId,
    ) -> ControlResult<Vec<AnalysisDeployment>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM analysis_deployments WHERE analysis_id = $1 \
             ORDER BY created_at, deployment_name"
        ))
        .bind(analysis_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn update_analysis(
        &self,
        analysis_id: &AnalysisId,
        update: &DeploymentUpdate,
    ) -> ControlResult<Vec<AnalysisDeployment>> {
        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT deployment_name FROM analysis_deployments
            WHERE analysis_id = $1
            ORDER BY created_at, deployment_name
            "#,
        )
        .bind(analysis_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        // One statement per record: each commits on its own.
        let mut updated = Vec::with_capacity(names.len());
        for name in names {
            if let Some(record) = self
                .update_deployment(&DeploymentName::new(name), update)
                .await?
            {
                updated.push(record);
            }
        }

        Ok(updated)
    }

    async fn update_deployment(
        &self,
        name: &DeploymentName,
        update: &DeploymentUpdate,
    ) -> ControlResult<Option<AnalysisDeployment>> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE analysis_deployments
            SET status = COALESCE($2, status),
                pod_ids = COALESCE($3, pod_ids),
                ports = COALESCE($4, ports),
                image_registry_address = COALESCE($5, image_registry_address),
                log = CASE WHEN $6 THEN $7 ELSE log END,
                updated_at = NOW()
            WHERE deployment_name = $1
            RETURNING {COLUMNS}
            "#
        ))
        .bind(name.as_str())
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.pod_ids.as_deref().map(pod_strings))
        .bind(update.ports.as_deref().map(port_ints))
        .bind(update.image_registry_address.as_deref())
        .bind(update.log.is_some())
        .bind(update.log.clone().flatten())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn delete_by_analysis_id(&self, analysis_id: &AnalysisId) -> ControlResult<u64> {
        let result = sqlx::query("DELETE FROM analysis_deployments WHERE analysis_id = $1")
            .bind(analysis_id.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn delete_deployment(&self, name: &DeploymentName) -> ControlResult<bool> {
        let result = sqlx::query("DELETE FROM analysis_deployments WHERE deployment_name = $1")
            .bind(name.as_str())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_analysis_ids(&self) -> ControlResult<Vec<AnalysisId>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT analysis_id FROM analysis_deployments ORDER BY analysis_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(ids.into_iter().map(AnalysisId::new).collect())
    }

    async fn list_deployment_names(&self) -> ControlResult<Vec<DeploymentName>> {
        let names: Vec<String> = sqlx::query_scalar(
            "SELECT deployment_name FROM analysis_deployments ORDER BY deployment_name",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(names.into_iter().map(DeploymentName::new).collect())
    }

    async fn list(&self, filter: &DeploymentFilter) -> ControlResult<Vec<AnalysisDeployment>> {
        let mut query = format!("SELECT {COLUMNS} FROM analysis_deployments WHERE 1=1");
        let mut params: Vec<String> = Vec::new();

        if let Some(ref analysis_id) = filter.analysis_id {
            params.push(analysis_id.to_string());
            query.push_str(&format!(" AND analysis_id = ${}", params.len()));
        }

        if let Some(ref project_id) = filter.project_id {
            params.push(project_id.to_string());
            query.push_str(&format!(" AND project_id = ${}", params.len()));
        }

        if let Some(status) = filter.status {
            params.push(status.as_str().to_owned());
            query.push_str(&format!(" AND status = ${}", params.len()));
        }

        query.push_str(" ORDER BY created_at, deployment_name");

        if let Some(limit) = filter.limit {
            query.push_str(&format!(" LIMIT {limit}"));
        }

        if let Some(offset) = filter.offset {
            query.push_str(&format!(" OFFSET {offset}"));
        }

        let mut sqlx_query = sqlx::query(&query);
        for param in &params {
            sqlx_query = sqlx_query.bind(param);
        }

        let rows = sqlx_query.fetch_all(&self.pool).await?;

        rows.iter().map(Self::row_to_record).collect()
    }

    async fn reset(&self) -> ControlResult<()> {
        sqlx::query("DROP TABLE IF EXISTS analysis_deployments")
            .execute(&self.pool)
            .await?;
        self.ensure_schema().await?;

        info!("lifecycle store reset");
        Ok(())
    }
}

impl std::fmt::Debug for PostgresStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresStore").finish_non_exhaustive()
    }
}
