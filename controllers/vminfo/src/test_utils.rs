//! Test utilities for unit testing the reconciler
//!
//! This module provides helpers for creating test data and an in-memory
//! [`VmInfoStore`].

use crate::store::{ResourceKey, StoreError, VmInfoStore};
use crds::{VMInfo, VMInfoSpec, VMInfoStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use vsphere_client::VmSummary;

/// Helper to create a test VMInfo without status
pub fn create_test_vm_info(name: &str, namespace: &str, node_name: &str) -> VMInfo {
    VMInfo {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            resource_version: Some("1".to_string()),
            ..Default::default()
        },
        spec: VMInfoSpec {
            node_name: node_name.to_string(),
        },
        status: None,
    }
}

/// Helper to create a powered-on VM summary
pub fn vm(name: &str, num_cpu: i64) -> VmSummary {
    VmSummary {
        name: name.to_string(),
        num_cpu,
        cpu_reservation: 0,
        memory_size_mb: 4096,
        memory_reservation: 0,
        power_state: "poweredOn".to_string(),
        guest_id: "ubuntu64Guest".to_string(),
        ip_address: "10.0.0.10".to_string(),
        hw_version: "vmx-19".to_string(),
        vm_path_name: format!("[datastore1] {name}/{name}.vmx"),
    }
}

#[derive(Debug, Default)]
struct FakeStoreState {
    resources: HashMap<ResourceKey, VMInfo>,
    status_writes: usize,
    conflict: bool,
}

/// In-memory [`VmInfoStore`] with optimistic concurrency on `resourceVersion`
///
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct FakeStore {
    state: Arc<Mutex<FakeStoreState>>,
}

impl FakeStore {
    /// Create a store holding `resources`
    pub fn with(resources: Vec<VMInfo>) -> Self {
        let store = Self::default();
        for resource in resources {
            store.insert(resource);
        }
        store
    }

    fn state(&self) -> MutexGuard<'_, FakeStoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Insert or replace a resource
    pub fn insert(&self, resource: VMInfo) {
        if let Some(key) = ResourceKey::from_resource(&resource) {
            self.state().resources.insert(key, resource);
        }
    }

    /// Delete a resource
    pub fn remove(&self, key: &ResourceKey) {
        self.state().resources.remove(key);
    }

    /// Current copy of a resource
    pub fn resource(&self, key: &ResourceKey) -> Option<VMInfo> {
        self.state().resources.get(key).cloned()
    }

    /// Current status of a resource, unset if none was ever written
    pub fn status(&self, key: &ResourceKey) -> VMInfoStatus {
        self.resource(key).and_then(|r| r.status).unwrap_or_default()
    }

    /// Number of successful status writes
    pub fn status_writes(&self) -> usize {
        self.state().status_writes
    }

    /// Make every status write fail with a conflict
    pub fn set_conflict(&self, conflict: bool) {
        self.state().conflict = conflict;
    }
}

#[async_trait::async_trait]
impl VmInfoStore for FakeStore {
    async fn get(&self, key: &ResourceKey) -> Result<Option<VMInfo>, StoreError> {
        Ok(self.resource(key))
    }

    async fn update_status(&self, resource: &VMInfo, status: &VMInfoStatus) -> Result<(), StoreError> {
        let key = ResourceKey::from_resource(resource)
            .ok_or_else(|| StoreError::InvalidResource("VMInfo without namespace or name".to_string()))?;

        let mut state = self.state();
        if state.conflict {
            return Err(StoreError::Conflict(key.to_string()));
        }

        let stored = state
            .resources
            .get_mut(&key)
            .ok_or_else(|| StoreError::InvalidResource(format!("{key} does not exist")))?;
        if stored.metadata.resource_version != resource.metadata.resource_version {
            return Err(StoreError::Conflict(key.to_string()));
        }

        let version = stored
            .metadata
            .resource_version
            .as_deref()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or_default();
        stored.status = Some(status.clone());
        stored.metadata.resource_version = Some((version + 1).to_string());
        state.status_writes += 1;
        Ok(())
    }
}
