//! ByoHostClient trait for mocking
//!
//! Abstracts host-record access so the bind protocol and the agent can be unit
//! tested against an in-memory store.

use crds::{ByoHost, ByoHostStatus, LabelSelector};

use crate::error::ByohClientError;

/// Trait for ByoHost record operations
///
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ByoHostClientTrait: Send + Sync {
    /// List hosts in `namespace` matching `selector`, in server order
    async fn list_hosts(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ByoHost>, ByohClientError>;

    /// Get a host by name, `None` if it does not exist
    async fn get_host(&self, namespace: &str, name: &str)
    -> Result<Option<ByoHost>, ByohClientError>;

    /// Create a host; fails with `Conflict` if it already exists
    async fn create_host(&self, host: &ByoHost) -> Result<ByoHost, ByohClientError>;

    /// Replace metadata and spec of a host.
    ///
    /// The write is conditional on `metadata.resourceVersion`; a stale version
    /// fails with `Conflict`. Status is left untouched.
    async fn replace_host(&self, host: &ByoHost) -> Result<ByoHost, ByohClientError>;

    /// Replace the status of a host. Absent fields are cleared.
    async fn patch_host_status(
        &self,
        namespace: &str,
        name: &str,
        status: &ByoHostStatus,
    ) -> Result<ByoHost, ByohClientError>;
}
