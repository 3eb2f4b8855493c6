//! Bootstrap adapter errors

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CloudInitError {
    /// Top-level key other than `write_files` or `runcmd`
    #[error("cloudinit: unsupported action {0:?}")]
    UnsupportedAction(String),

    /// Document is not valid YAML or has the wrong shape
    #[error("cloudinit: failed to parse bootstrap document: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// write_files entry with an encoding we cannot decode
    #[error("cloudinit: unknown encoding {encoding:?} for file {path}")]
    UnknownEncoding { path: String, encoding: String },

    /// Content could not be decoded with the declared encoding
    #[error("cloudinit: failed to decode {encoding} content for file {path}: {reason}")]
    Decode {
        path: String,
        encoding: String,
        reason: String,
    },

    /// Permissions are not a valid octal mode
    #[error("cloudinit: invalid permissions {value:?} for file {path}")]
    InvalidPermissions { path: String, value: String },

    /// Placeholder naming a field the agent does not provide
    #[error("cloudinit: unknown template field {field:?} in file {path}")]
    Template { path: String, field: String },

    /// Filesystem operation failed
    #[error("cloudinit: {op} {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// runcmd entry that is empty
    #[error("cloudinit: empty command at runcmd index {0}")]
    EmptyCommand(usize),

    /// Command could not be started
    #[error("cloudinit: failed to start {command:?}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Command exited with a non-zero status
    #[error("cloudinit: command {command:?} exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: String,
        stderr: String,
    },
}

impl CloudInitError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CloudInitError::Io {
            op,
            path: path.into(),
            source,
        }
    }
}
