//! Registry of install/uninstall script templates keyed by platform

use minijinja::{Environment, context};
use tracing::debug;

use crate::bundle::{
    DOWNLOAD_PATH_PLACEHOLDER, IMGPKG_VERSION, bundle_address, normalize_arch, normalize_os,
};
use crate::error::InstallerError;

const UBUNTU_INSTALL: &str = include_str!("templates/ubuntu_install.sh.j2");
const UBUNTU_UNINSTALL: &str = include_str!("templates/ubuntu_uninstall.sh.j2");

/// Scripts for one platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    /// Normalized OS image prefix this entry supports (e.g. `Ubuntu_20.04`)
    pub os_prefix: &'static str,
    /// Normalized architecture (e.g. `x86-64`)
    pub arch: &'static str,
    /// OS segment of the bundle image name
    pub bundle_os: &'static str,
    install_template: &'static str,
    uninstall_template: &'static str,
}

/// Inputs for script generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRequest<'a> {
    /// OS image as reported by the host (e.g. `Ubuntu 20.04.4 LTS`)
    pub os_image: &'a str,
    /// Architecture as reported by the host (e.g. `amd64`)
    pub arch: &'a str,
    /// Kubernetes version without build metadata (e.g. `v1.26.6`)
    pub k8s_version: &'a str,
    pub bundle_repo: &'a str,
    pub bundle_tag: &'a str,
}

/// Rendered install/uninstall pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallerScripts {
    pub install: String,
    pub uninstall: String,
}

#[derive(Debug, Clone)]
pub struct Registry {
    entries: Vec<RegistryEntry>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl Registry {
    /// Platforms with published bundles.
    pub fn builtin() -> Self {
        Self {
            entries: vec![
                RegistryEntry {
                    os_prefix: "Ubuntu_20.04",
                    arch: "x86-64",
                    bundle_os: "ubuntu_20.04.1_x86-64",
                    install_template: UBUNTU_INSTALL,
                    uninstall_template: UBUNTU_UNINSTALL,
                },
                RegistryEntry {
                    os_prefix: "Ubuntu_22.04",
                    arch: "x86-64",
                    bundle_os: "ubuntu_22.04.1_x86-64",
                    install_template: UBUNTU_INSTALL,
                    uninstall_template: UBUNTU_UNINSTALL,
                },
            ],
        }
    }

    /// Find the entry for an OS image and architecture.
    pub fn lookup(&self, os_image: &str, arch: &str) -> Result<&RegistryEntry, InstallerError> {
        let os = normalize_os(os_image);
        let arch_n = normalize_arch(arch);
        self.entries
            .iter()
            .find(|e| os.starts_with(e.os_prefix) && e.arch == arch_n)
            .ok_or_else(|| InstallerError::Unsupported {
                os: os_image.to_string(),
                arch: arch.to_string(),
            })
    }

    /// Render the script pair for a host.
    pub fn scripts(&self, request: &InstallRequest<'_>) -> Result<InstallerScripts, InstallerError> {
        for (field, value) in [
            ("k8s version", request.k8s_version),
            ("bundle repository", request.bundle_repo),
            ("bundle tag", request.bundle_tag),
        ] {
            if value.trim().is_empty() {
                return Err(InstallerError::InvalidInput(format!("{field} is empty")));
            }
        }

        let entry = self.lookup(request.os_image, request.arch)?;
        let address = bundle_address(
            request.bundle_repo,
            entry.bundle_os,
            request.k8s_version,
            request.bundle_tag,
        );
        debug!(bundle = %address, os = %request.os_image, arch = %request.arch, "Rendering installer scripts");

        let mut env = Environment::new();
        env.set_keep_trailing_newline(true);
        let ctx = context! {
            BundleAddrs => address,
            Arch => request.arch,
            ImgpkgVersion => IMGPKG_VERSION,
            BundleDownloadPath => DOWNLOAD_PATH_PLACEHOLDER,
        };
        let install = env
            .render_str(entry.install_template, &ctx)
            .map_err(|source| InstallerError::Template {
                script: "install",
                source,
            })?;
        let uninstall = env
            .render_str(entry.uninstall_template, &ctx)
            .map_err(|source| InstallerError::Template {
                script: "uninstall",
                source,
            })?;
        Ok(InstallerScripts { install, uninstall })
    }
}
