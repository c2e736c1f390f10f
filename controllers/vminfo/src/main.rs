//! VMInfo Controller
//!
//! Keeps `VMInfo` resources in sync with the virtual machines of a vSphere
//! endpoint: each resource names a VM, and the controller writes the VM's
//! CPU, memory, power state, guest and path into the resource status.

mod backoff;
mod config;
mod controller;
mod error;
mod matcher;
mod reconciler;
mod store;
#[cfg(test)]
mod test_utils;
mod watcher;

use crate::config::ControllerConfig;
use crate::error::ControllerError;
use controller::Controller;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), ControllerError> {
    // Configure rustls crypto provider before any TLS client is built
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_existing| ControllerError::InvalidConfig("failed to install rustls crypto provider".to_string()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vminfo_controller=info,vsphere_client=info".into()),
        )
        .init();

    info!("Starting VMInfo Controller");

    let config = ControllerConfig::from_env()?;

    info!("Configuration:");
    info!("  vSphere endpoint: {}", config.credentials.endpoint);
    info!("  vSphere user: {}", config.credentials.username);
    info!("  Namespace: {}", config.namespace.as_deref().unwrap_or("all namespaces"));
    info!("  Resync interval: {:?}", config.resync_interval);

    let controller = Controller::new(config).await?;
    controller.run().await?;

    Ok(())
}
