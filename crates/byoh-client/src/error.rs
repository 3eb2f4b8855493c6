//! ByoHost client errors

use thiserror::Error;

/// Errors that can occur when reading or writing host records
#[derive(Debug, Error)]
pub enum ByohClientError {
    /// Kubernetes API error not covered by a more specific variant
    #[error("Kubernetes API error: {0}")]
    Kube(#[source] kube::Error),

    /// Optimistic concurrency failure (resourceVersion mismatch or already exists)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Host record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Selector could not be evaluated or rendered
    #[error("Invalid selector: {0}")]
    Selector(#[from] crds::CrdError),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid request (e.g., object without name or namespace)
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl ByohClientError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, ByohClientError::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ByohClientError::NotFound(_))
    }
}

impl From<kube::Error> for ByohClientError {
    fn from(err: kube::Error) -> Self {
        match err {
            kube::Error::Api(ae) if ae.code == 409 => ByohClientError::Conflict(ae.message),
            kube::Error::Api(ae) if ae.code == 404 => ByohClientError::NotFound(ae.message),
            other => ByohClientError::Kube(other),
        }
    }
}
