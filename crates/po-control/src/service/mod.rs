//! Service lifecycle management.
//!
//! Provides the main service runner with signal handling and graceful shutdown.

use std::sync::Arc;

use tokio::signal;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::api;
use crate::cluster::{create_cluster_client, ClusterClient};
use crate::config::{ControlConfig, StoreBackend};
use crate::deployment::DeploymentManager;
use crate::error::{ControlError, ControlResult};
use crate::store::{DeploymentStore, MemoryStore, PostgresStore};

/// The control service.
///
/// Wires the lifecycle store, the cluster client and the deployment manager
/// behind the HTTP API, and runs until a shutdown signal arrives.
pub struct ControlService {
    config: ControlConfig,
    cancel: CancellationToken,
}

impl ControlService {
    /// Create a new control service with the given configuration.
    #[must_use]
    pub fn new(config: ControlConfig) -> Self {
        Self {
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Run the control service.
    ///
    /// Fails fast if the store or the cluster cannot be reached at startup.
    pub async fn run(&self) -> ControlResult<()> {
        let store = self.create_store().await?;
        let cluster = self.create_cluster().await?;

        let manager = Arc::new(DeploymentManager::new(
            store,
            cluster,
            self.config.cluster.namespace.clone(),
            self.config.deployment.clone(),
        ));
        info!(
            namespace = %self.config.cluster.namespace,
            stop_policy = ?self.config.deployment.stop_policy,
            "deployment manager initialised"
        );

        let app = self.build_router(manager)?;

        let listener = tokio::net::TcpListener::bind(self.config.server.listen_addr)
            .await
            .map_err(|e| ControlError::Config(format!("failed to bind TCP: {e}")))?;

        info!(listen_addr = %self.config.server.listen_addr, "control service listening");

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(self.cancel.clone()))
            .await
            .map_err(|e| ControlError::internal(format!("server error: {e}")))?;

        info!("control service shutdown complete");
        Ok(())
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    fn build_router(&self, manager: Arc<DeploymentManager>) -> ControlResult<axum::Router> {
        let cors = api::cors_layer(&self.config.server.allowed_origins)?;
        Ok(api::router(api::AppState::new(manager))
            .layer(cors)
            .layer(TraceLayer::new_for_http()))
    }

    async fn create_store(&self) -> ControlResult<Arc<dyn DeploymentStore>> {
        match self.config.database.backend {
            StoreBackend::Postgres => {
                let store = PostgresStore::connect(&self.config.database)
                    .await
                    .inspect_err(|e| error!(error = %e, "failed to connect to PostgreSQL"))?;
                info!("connected to PostgreSQL");
                Ok(Arc::new(store))
            }
            StoreBackend::Memory => {
                info!("using in-memory store, records are lost on exit");
                Ok(Arc::new(MemoryStore::new()))
            }
        }
    }

    async fn create_cluster(&self) -> ControlResult<Arc<dyn ClusterClient>> {
        let cluster = create_cluster_client(&self.config.cluster)
            .await
            .inspect_err(|e| error!(error = %e, "failed to create cluster client"))?;
        info!(
            backend = ?self.config.cluster.backend,
            auth = ?self.config.cluster.auth,
            "cluster client configured"
        );
        Ok(cluster)
    }
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            info!("received SIGTERM, initiating shutdown");
        }
        () = cancel.cancelled() => {
            info!("shutdown requested");
        }
    }
}
