//! Reconciliation logic for VMInfo resources.
//!
//! One reconcile: load the resource, get a session, list the inventory, match
//! by node name and write the status. The reconciler keeps no per-resource
//! state; everything it needs is re-read on each invocation.

use crate::error::ControllerError;
use crate::matcher::{sync, SyncOutcome};
use crate::store::{ResourceKey, VmInfoStore};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vsphere_client::{list_virtual_machine_summaries, Credentials, SessionProvider, VSphereClientTrait};

/// What a successful reconcile did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The resource no longer exists; nothing to do
    Deleted,
    /// No VM carries the node name; status left untouched
    NoMatch,
    /// Status written from the matched VM
    Updated,
}

/// Reconciles VMInfo resources against one vSphere endpoint.
pub struct Reconciler<C, S> {
    sessions: Arc<SessionProvider<C>>,
    store: S,
    credentials: Credentials,
}

impl<C, S> std::fmt::Debug for Reconciler<C, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl<C, S> Reconciler<C, S>
where
    C: VSphereClientTrait,
    S: VmInfoStore,
{
    /// Create a reconciler sharing `sessions` with the rest of the process
    pub fn new(sessions: Arc<SessionProvider<C>>, store: S, credentials: Credentials) -> Self {
        Self {
            sessions,
            store,
            credentials,
        }
    }

    /// Session provider used by this reconciler
    pub fn sessions(&self) -> &Arc<SessionProvider<C>> {
        &self.sessions
    }

    /// Reconcile the resource identified by `key`.
    ///
    /// A missing resource is a success ([`ReconcileOutcome::Deleted`]). Every
    /// error is retryable. Once `cancel` fires no status is written.
    pub async fn reconcile(
        &self,
        key: &ResourceKey,
        cancel: &CancellationToken,
    ) -> Result<ReconcileOutcome, ControllerError> {
        let load = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(ControllerError::Cancelled),
            result = self.store.get(key) => result,
        };
        let Some(resource) = load.map_err(ControllerError::Load)? else {
            debug!("VMInfo {} is gone, nothing to reconcile", key);
            return Ok(ReconcileOutcome::Deleted);
        };

        let client = self.sessions.client();
        let snapshot = self
            .sessions
            .with_session(&self.credentials, cancel, |session| async move {
                list_virtual_machine_summaries(client, &session, cancel).await
            })
            .await?;
        debug!("Fetched {} virtual machines for {}", snapshot.len(), key);

        match sync(&resource, &snapshot) {
            SyncOutcome::NoMatch => {
                info!(
                    "No virtual machine named {} found for {}",
                    resource.spec.node_name, key
                );
                Ok(ReconcileOutcome::NoMatch)
            }
            SyncOutcome::Updated { status, candidates } => {
                if candidates > 1 {
                    warn!(
                        "{} virtual machines are named {}; using the last one for {}",
                        candidates, resource.spec.node_name, key
                    );
                }

                // No write once cancelled
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(ControllerError::Cancelled),
                    result = self.store.update_status(&resource, &status) => result?,
                }
                info!("Updated status of {} from virtual machine {}", key, resource.spec.node_name);
                Ok(ReconcileOutcome::Updated)
            }
        }
    }
}
