//! ByoHost record client
//!
//! Host records are shared between the controller manager, which binds and
//! releases them, and the agent on each host, which reports status. Both go
//! through [`ByoHostClientTrait`] so the bind protocol and the agent reconcile
//! can be exercised against [`MockByoHostClient`] (feature `test-util`).
//!
//! # Example
//!
//! ```no_run
//! use byoh_client::{ByoHostClient, ByoHostClientTrait};
//! use crds::{LabelSelector, CLUSTER_NAME_LABEL};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = ByoHostClient::new(kube::Client::try_default().await?);
//!
//! // Unbound hosts in the default namespace
//! let selector = LabelSelector::default().without_label(CLUSTER_NAME_LABEL);
//! let hosts = client.list_hosts("default", &selector).await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod error;
#[path = "trait.rs"]
pub mod byoh_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use byoh_trait::ByoHostClientTrait;
pub use client::ByoHostClient;
pub use error::ByohClientError;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockByoHostClient;
