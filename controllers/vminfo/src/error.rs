//! Controller-specific error types.
//!
//! Every reconcile failure is retryable: the dispatcher's error policy owns
//! the retry cadence, and no error drops a resource for good.

use crate::store::StoreError;
use kube::Error as KubeError;
use thiserror::Error;
use vsphere_client::VSphereError;

/// Errors that can occur in the VMInfo Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Credentials or session rejected, after the single re-authentication
    #[error("Authentication failed: {0}")]
    Authentication(#[source] VSphereError),

    /// Inventory query failed
    #[error("Inventory fetch failed: {0}")]
    Fetch(#[source] VSphereError),

    /// Status write lost to a concurrent writer
    #[error("Status write conflict: {0}")]
    PersistenceConflict(String),

    /// Status write failed
    #[error("Status write failed: {0}")]
    Persistence(#[source] StoreError),

    /// Reading the resource failed
    #[error("Failed to load resource: {0}")]
    Load(#[source] StoreError),

    /// The reconcile was cancelled (shutdown or timeout)
    #[error("Reconcile cancelled")]
    Cancelled,

    /// Kubernetes client error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] KubeError),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Resource watch failed
    #[error("Resource watch failed: {0}")]
    Watch(String),
}

impl ControllerError {
    /// Whether the dispatcher should retry the reconcile.
    pub fn is_retryable(&self) -> bool {
        true
    }
}

impl From<VSphereError> for ControllerError {
    fn from(error: VSphereError) -> Self {
        match error {
            VSphereError::Cancelled => Self::Cancelled,
            e if e.is_authentication() => Self::Authentication(e),
            e => Self::Fetch(e),
        }
    }
}

impl From<StoreError> for ControllerError {
    fn from(error: StoreError) -> Self {
        match error {
            StoreError::Conflict(message) => Self::PersistenceConflict(message),
            e => Self::Persistence(e),
        }
    }
}
