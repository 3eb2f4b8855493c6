//! BYOH CRD Definitions
//!
//! Kubernetes Custom Resource Definitions for the bring-your-own-host
//! infrastructure provider, plus the subset of Cluster API types the
//! controllers and the host agent consume.

pub mod bootstrap_kubeconfig;
pub mod byo_cluster;
pub mod byo_host;
pub mod byo_machine;
pub mod capi;
pub mod conditions;
pub mod constants;
pub mod error;
pub mod installer_config;
pub mod references;
pub mod selector;

pub use bootstrap_kubeconfig::*;
pub use byo_cluster::*;
pub use byo_host::*;
pub use byo_machine::*;
pub use conditions::*;
pub use constants::*;
pub use error::CrdError;
pub use installer_config::*;
pub use references::*;
pub use selector::*;
