//! Prints every BYOH CustomResourceDefinition as a multi-document YAML stream.
//!
//! Usage: `cargo run -p crds --bin crdgen > config/crd/bases/crds.yaml`

use crds::{
    BootstrapKubeconfig, ByoCluster, ByoHost, ByoMachine, ByoMachineTemplate, K8sInstallerConfig,
    K8sInstallerConfigTemplate,
};
use kube::CustomResourceExt;

fn main() -> Result<(), serde_yaml::Error> {
    let crds = [
        ByoHost::crd(),
        ByoMachine::crd(),
        ByoMachineTemplate::crd(),
        ByoCluster::crd(),
        K8sInstallerConfig::crd(),
        K8sInstallerConfigTemplate::crd(),
        BootstrapKubeconfig::crd(),
    ];
    for crd in &crds {
        println!("---");
        print!("{}", serde_yaml::to_string(crd)?);
    }
    Ok(())
}
