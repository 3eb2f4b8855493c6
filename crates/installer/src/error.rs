//! Installer errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum InstallerError {
    /// No script pair is registered for this platform
    #[error("no installation support for OS {os:?} on architecture {arch:?}")]
    Unsupported { os: String, arch: String },

    /// A required input was empty
    #[error("invalid installer input: {0}")]
    InvalidInput(String),

    /// Script template failed to render
    #[error("failed to render {script} script: {source}")]
    Template {
        script: &'static str,
        #[source]
        source: minijinja::Error,
    },
}
