//! VMInfo CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the VMInfo controller.

pub mod vm_info;

pub use vm_info::*;
