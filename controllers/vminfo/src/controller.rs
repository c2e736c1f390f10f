//! Main controller implementation.
//!
//! This module contains the `Controller` struct that wires the Kubernetes
//! client, the vSphere session cache and the VMInfo watcher together, and
//! owns process shutdown.

use crate::backoff::FibonacciBackoff;
use crate::config::ControllerConfig;
use crate::error::ControllerError;
use crate::reconciler::Reconciler;
use crate::store::KubeVmInfoStore;
use crate::watcher::{watch_vm_infos, Context, WatchSettings};
use crds::VMInfo;
use kube::{Api, Client};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use vsphere_client::{SessionProvider, VSphereClient};

type VmInfoContext = Context<VSphereClient, KubeVmInfoStore>;

/// Main controller for VMInfo resources.
#[derive(Debug)]
pub struct Controller {
    context: Arc<VmInfoContext>,
    shutdown: CancellationToken,
    watcher: JoinHandle<Result<(), ControllerError>>,
}

impl Controller {
    /// Creates a new controller instance and starts watching.
    ///
    /// Fails if the startup login to vSphere is rejected.
    pub async fn new(config: ControllerConfig) -> Result<Self, ControllerError> {
        info!("Initializing VMInfo Controller");

        let kube_client = Client::try_default().await?;

        let vsphere_client = VSphereClient::new(config.client_options())
            .map_err(|e| ControllerError::InvalidConfig(format!("failed to build vSphere client: {e}")))?;
        let sessions = Arc::new(SessionProvider::new(vsphere_client));

        // Validate credentials and connectivity before proceeding
        let shutdown = CancellationToken::new();
        info!("Logging in to {} as {}...", config.credentials.endpoint, config.credentials.username);
        sessions
            .get_session(&config.credentials, &shutdown)
            .await
            .map_err(|e| {
                error!("Startup login to {} failed: {}", config.credentials.endpoint, e);
                error!("Please ensure GOVMOMI_URL, GOVMOMI_USERNAME and GOVMOMI_PASSWORD are set correctly");
                ControllerError::from(e)
            })?;
        info!("vSphere session established");

        let store = KubeVmInfoStore::new(kube_client.clone());
        let reconciler = Reconciler::new(Arc::clone(&sessions), store, config.credentials.clone());
        let settings = WatchSettings {
            reconcile_timeout: config.reconcile_timeout,
            resync_interval: config.resync_interval,
            concurrency: config.concurrency,
            backoff: FibonacciBackoff::new(config.backoff_min_secs, config.backoff_max_secs),
        };
        let context = Arc::new(Context::new(reconciler, shutdown.clone(), settings));

        let api: Api<VMInfo> = match config.namespace.as_deref() {
            Some(ns) => Api::namespaced(kube_client, ns),
            None => Api::all(kube_client),
        };

        let watcher = {
            let context = Arc::clone(&context);
            tokio::spawn(async move { watch_vm_infos(api, context).await })
        };

        Ok(Self {
            context,
            shutdown,
            watcher,
        })
    }

    /// Runs until the watcher stops or a shutdown signal arrives, then logs
    /// out of vSphere.
    pub async fn run(self) -> Result<(), ControllerError> {
        info!("VMInfo Controller running");

        let mut watcher = self.watcher;
        let finished = tokio::select! {
            result = &mut watcher => Some(result),
            () = shutdown_signal() => None,
        };
        let result = match finished {
            Some(result) => Self::watcher_result(result),
            None => {
                info!("Shutdown signal received, cancelling in-flight reconciles");
                self.shutdown.cancel();
                Self::watcher_result(watcher.await)
            }
        };

        self.shutdown.cancel();
        self.context.reconciler().sessions().logout_all().await;
        info!("VMInfo Controller stopped");
        result
    }

    fn watcher_result(
        result: Result<Result<(), ControllerError>, tokio::task::JoinError>,
    ) -> Result<(), ControllerError> {
        result.map_err(|e| ControllerError::Watch(format!("VMInfo watcher panicked: {e}")))?
    }
}

/// Resolves on SIGINT, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for SIGINT: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
