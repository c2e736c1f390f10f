//! VMInfo CRD
//!
//! Mirrors the observed state of a vSphere virtual machine, selected by its
//! display name, into the status of a namespaced resource.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// API group of the VMInfo CRD
pub const VM_INFO_GROUP: &str = "topology.corinternal.com";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[kube(
    group = "topology.corinternal.com",
    version = "v1",
    kind = "VMInfo",
    plural = "vminfoes",
    shortname = "vminfo",
    namespaced,
    status = "VMInfoStatus",
    printcolumn = r#"{"name":"Node", "type":"string", "jsonPath":".spec.nodeName"}"#,
    printcolumn = r#"{"name":"Power", "type":"string", "jsonPath":".status.powerState"}"#,
    printcolumn = r#"{"name":"CPU", "type":"integer", "jsonPath":".status.totalCPU"}"#,
    printcolumn = r#"{"name":"Memory", "type":"integer", "jsonPath":".status.totalMemoryMB"}"#,
    printcolumn = r#"{"name":"IP", "type":"string", "jsonPath":".status.ipAddress"}"#
)]
pub struct VMInfoSpec {
    /// Display name of the virtual machine in the vSphere inventory.
    /// Matched exactly and case-sensitively.
    #[serde(rename = "nodeName")]
    pub node_name: String,
}

/// Observed state of the matched virtual machine.
///
/// Either every field is unset (the VM has never been found) or every field
/// reflects the most recent successful match. The controller always writes
/// the complete set.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
pub struct VMInfoStatus {
    /// Guest OS identifier reported by VMware Tools (e.g. `ubuntu64Guest`)
    #[serde(rename = "guestId", default, skip_serializing_if = "Option::is_none")]
    pub guest_id: Option<String>,

    /// Power state (`poweredOn`, `poweredOff`, `suspended`)
    #[serde(rename = "powerState", default, skip_serializing_if = "Option::is_none")]
    pub power_state: Option<String>,

    /// Virtual hardware version (e.g. `vmx-19`)
    #[serde(rename = "hwVersion", default, skip_serializing_if = "Option::is_none")]
    pub hw_version: Option<String>,

    /// Primary guest IP address
    #[serde(rename = "ipAddress", default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,

    /// Datastore path of the VM configuration file
    #[serde(rename = "pathToVM", default, skip_serializing_if = "Option::is_none")]
    pub path_to_vm: Option<String>,

    /// Number of virtual CPUs
    #[serde(rename = "totalCPU", default, skip_serializing_if = "Option::is_none")]
    pub total_cpu: Option<i64>,

    /// CPU reservation in MHz
    #[serde(rename = "reservedCPU", default, skip_serializing_if = "Option::is_none")]
    pub reserved_cpu: Option<i64>,

    /// Configured memory in MB
    #[serde(rename = "totalMemoryMB", default, skip_serializing_if = "Option::is_none")]
    pub total_memory_mb: Option<i64>,

    /// Memory reservation in MB
    #[serde(rename = "reservedMemoryMB", default, skip_serializing_if = "Option::is_none")]
    pub reserved_memory_mb: Option<i64>,
}

impl VMInfoStatus {
    /// True when no field has ever been written.
    pub fn is_unset(&self) -> bool {
        *self == Self::default()
    }

    /// True when every field is populated.
    pub fn is_complete(&self) -> bool {
        self.guest_id.is_some()
            && self.power_state.is_some()
            && self.hw_version.is_some()
            && self.ip_address.is_some()
            && self.path_to_vm.is_some()
            && self.total_cpu.is_some()
            && self.reserved_cpu.is_some()
            && self.total_memory_mb.is_some()
            && self.reserved_memory_mb.is_some()
    }
}
