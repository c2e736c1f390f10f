//! VMInfo resource store.
//!
//! The reconciler reads resources and writes their status through
//! [`VmInfoStore`], so it can be exercised without an API server.

use crds::{VMInfo, VMInfoStatus};
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, ResourceExt};
use std::fmt;
use thiserror::Error;
use tracing::debug;

/// Identity of a VMInfo resource
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
    pub namespace: String,
    pub name: String,
}

impl ResourceKey {
    /// Create a key from namespace and name
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of `resource`, if it carries a namespace and name
    pub fn from_resource(resource: &VMInfo) -> Option<Self> {
        Some(Self::new(resource.namespace()?, resource.metadata.name.clone()?))
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Errors returned by a [`VmInfoStore`]
#[derive(Debug, Error)]
pub enum StoreError {
    /// The resource changed since it was read
    #[error("{0} was modified concurrently")]
    Conflict(String),

    /// Kubernetes API error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// The resource lacks the metadata needed to address it
    #[error("Invalid resource: {0}")]
    InvalidResource(String),
}

/// Read and status-write access to VMInfo resources
#[async_trait::async_trait]
pub trait VmInfoStore: Send + Sync {
    /// Load the resource; `Ok(None)` when it no longer exists
    async fn get(&self, key: &ResourceKey) -> Result<Option<VMInfo>, StoreError>;

    /// Replace the status of `resource` with `status`.
    ///
    /// Fails with [`StoreError::Conflict`] if `resource` is no longer the
    /// latest version.
    async fn update_status(&self, resource: &VMInfo, status: &VMInfoStatus) -> Result<(), StoreError>;
}

/// [`VmInfoStore`] backed by the Kubernetes API server
#[derive(Clone)]
pub struct KubeVmInfoStore {
    client: Client,
}

impl fmt::Debug for KubeVmInfoStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KubeVmInfoStore").finish_non_exhaustive()
    }
}

impl KubeVmInfoStore {
    /// Create a store using `client`
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, namespace: &str) -> Api<VMInfo> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait::async_trait]
impl VmInfoStore for KubeVmInfoStore {
    async fn get(&self, key: &ResourceKey) -> Result<Option<VMInfo>, StoreError> {
        get_result(self.api(&key.namespace).get(&key.name).await, key)
    }

    async fn update_status(&self, resource: &VMInfo, status: &VMInfoStatus) -> Result<(), StoreError> {
        let key = ResourceKey::from_resource(resource)
            .ok_or_else(|| StoreError::InvalidResource("VMInfo without namespace or name".to_string()))?;

        // resourceVersion turns the merge patch into a compare-and-swap
        let status_patch = serde_json::json!({
            "metadata": { "resourceVersion": resource.metadata.resource_version },
            "status": status,
        });

        let pp = PatchParams::default();
        let result = self
            .api(&key.namespace)
            .patch_status(&key.name, &pp, &Patch::Merge(&status_patch))
            .await;
        patch_result(result, &key)
    }
}

/// A missing resource is not an error on read
fn get_result(result: Result<VMInfo, kube::Error>, key: &ResourceKey) -> Result<Option<VMInfo>, StoreError> {
    match result {
        Ok(resource) => Ok(Some(resource)),
        Err(kube::Error::Api(api_err)) if api_err.code == 404 => {
            debug!("VMInfo {} not found", key);
            Ok(None)
        }
        Err(e) => Err(e.into()),
    }
}

/// A stale resourceVersion on write is a conflict
fn patch_result<T>(result: Result<T, kube::Error>, key: &ResourceKey) -> Result<(), StoreError> {
    match result {
        Ok(_) => Ok(()),
        Err(kube::Error::Api(api_err)) if api_err.code == 409 => Err(StoreError::Conflict(key.to_string())),
        Err(e) => Err(e.into()),
    }
}
