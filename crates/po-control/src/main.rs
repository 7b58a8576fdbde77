//! po-control service binary.
//!
//! Runs the control plane for analysis workloads.

use tracing::info;
use tracing_subscriber::EnvFilter;

use po_control::{ControlConfig, ControlService};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("po_control=info".parse()?))
        .init();

    info!("po-control service starting");

    let config = ControlConfig::load()?;

    info!(
        listen_addr = %config.server.listen_addr,
        store = ?config.database.backend,
        cluster = ?config.cluster.backend,
        namespace = %config.cluster.namespace,
        "configuration loaded"
    );

    ControlService::new(config).run().await?;

    Ok(())
}
