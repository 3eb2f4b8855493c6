//! Platform normalization and bundle addresses

/// Bundle tag used when the cluster does not name one
pub const DEFAULT_BUNDLE_TAG: &str = "v0.5.0";

/// imgpkg release the install scripts download when it is missing
pub const IMGPKG_VERSION: &str = "v0.36.0";

/// Literal left in rendered scripts; the agent replaces it with its download path
pub const DOWNLOAD_PATH_PLACEHOLDER: &str = "{{.BundleDownloadPath}}";

/// `Ubuntu 20.04.4 LTS` -> `Ubuntu_20.04.4_LTS`
pub fn normalize_os(os_image: &str) -> String {
    os_image.trim().replace(' ', "_")
}

/// Map Kubernetes architecture names onto bundle architecture names.
pub fn normalize_arch(arch: &str) -> String {
    match arch.trim() {
        "amd64" | "x86_64" => "x86-64".to_string(),
        "arm64" | "aarch64" => "arm64".to_string(),
        other => other.to_string(),
    }
}

/// `<repo>/byoh-bundle-<os>_k8s_<version>:<tag>`
pub fn bundle_address(repo: &str, bundle_os: &str, k8s_version: &str, tag: &str) -> String {
    format!(
        "{}/byoh-bundle-{}_k8s_{}:{}",
        repo.trim_end_matches('/'),
        bundle_os,
        k8s_version,
        tag
    )
}

/// Substitute the agent's download directory into a rendered script.
pub fn with_download_path(script: &str, download_path: &str) -> String {
    script.replace(DOWNLOAD_PATH_PLACEHOLDER, download_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        assert_eq!(normalize_os("Ubuntu 20.04.4 LTS"), "Ubuntu_20.04.4_LTS");
        assert_eq!(normalize_arch("amd64"), "x86-64");
        assert_eq!(normalize_arch("arm64"), "arm64");
    }

    #[test]
    fn test_bundle_address_layout() {
        assert_eq!(
            bundle_address(
                "projects.registry.vmware.com/cluster_api_provider_bringyourownhost/",
                "ubuntu_20.04.1_x86-64",
                "v1.26.6",
                "v0.5.0"
            ),
            "projects.registry.vmware.com/cluster_api_provider_bringyourownhost/byoh-bundle-ubuntu_20.04.1_x86-64_k8s_v1.26.6:v0.5.0"
        );
    }

    #[test]
    fn test_download_path_substitution() {
        let script = format!("BUNDLE_DOWNLOAD_PATH={DOWNLOAD_PATH_PLACEHOLDER}\n");
        assert_eq!(
            with_download_path(&script, "/var/lib/byoh/bundles"),
            "BUNDLE_DOWNLOAD_PATH=/var/lib/byoh/bundles\n"
        );
    }
}
