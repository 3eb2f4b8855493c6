//! Installer script generation
//!
//! Produces the `install`/`uninstall` shell pair a host runs to add or remove
//! the Kubernetes runtime components, selected by the host's OS image and
//! architecture and parameterised by Kubernetes version and bundle location.

pub mod bundle;
pub mod error;
pub mod registry;

pub use bundle::{
    DEFAULT_BUNDLE_TAG, DOWNLOAD_PATH_PLACEHOLDER, IMGPKG_VERSION, bundle_address,
    normalize_arch, normalize_os, with_download_path,
};
pub use error::InstallerError;
pub use registry::{InstallRequest, InstallerScripts, Registry, RegistryEntry};
