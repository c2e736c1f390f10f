//! Matching inventory entries to a VMInfo resource.

use crds::{VMInfo, VMInfoStatus};
use vsphere_client::VmSummary;

/// Result of matching a resource against an inventory snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// At least one VM matched; `status` is built from the last one
    Updated {
        status: VMInfoStatus,
        /// Number of VMs that carried the name
        candidates: usize,
    },
    /// No VM carries the resource's node name
    NoMatch,
}

/// Match `resource` against `snapshot` by exact, case-sensitive name.
///
/// When several VMs share the name, the last one in snapshot order wins.
pub fn sync(resource: &VMInfo, snapshot: &[VmSummary]) -> SyncOutcome {
    let node_name = resource.spec.node_name.as_str();
    let mut matched = snapshot.iter().filter(|vm| vm.name == node_name);

    let Some(first) = matched.next() else {
        return SyncOutcome::NoMatch;
    };
    let (last, extra) = matched.fold((first, 0), |(_, n), vm| (vm, n + 1));

    SyncOutcome::Updated {
        status: status_from_summary(last),
        candidates: extra + 1,
    }
}

/// Full status for a matched VM. Every field is set.
pub fn status_from_summary(vm: &VmSummary) -> VMInfoStatus {
    VMInfoStatus {
        guest_id: Some(vm.guest_id.clone()),
        power_state: Some(vm.power_state.clone()),
        hw_version: Some(vm.hw_version.clone()),
        ip_address: Some(vm.ip_address.clone()),
        path_to_vm: Some(vm.vm_path_name.clone()),
        total_cpu: Some(vm.num_cpu),
        reserved_cpu: Some(vm.cpu_reservation),
        total_memory_mb: Some(vm.memory_size_mb),
        reserved_memory_mb: Some(vm.memory_reservation),
    }
}
