//! Prints the VMInfo CustomResourceDefinition as YAML.
//!
//! Usage: `cargo run -p crds --bin crdgen > config/crd/vminfo.yaml`

use crds::VMInfo;
use kube::CustomResourceExt;

fn main() -> anyhow::Result<()> {
    print!("{}", serde_yaml::to_string(&VMInfo::crd())?);
    Ok(())
}
