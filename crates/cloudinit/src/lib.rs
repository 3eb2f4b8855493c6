//! Bootstrap adapter
//!
//! Executes the `write_files` and `runcmd` subset of cloud-init documents
//! produced by Cluster API bootstrap providers.
//!
//! # Example
//!
//! ```no_run
//! use cloudinit::{FileWriter, ProcessRunner, ScriptExecutor, TemplateContext};
//!
//! # async fn example() -> Result<(), cloudinit::CloudInitError> {
//! let executor = ScriptExecutor::new(
//!     FileWriter::new(),
//!     ProcessRunner::new(),
//!     TemplateContext {
//!         default_network_interface_name: "eth0".to_string(),
//!     },
//! );
//! executor
//!     .execute("write_files:\n  - path: /tmp/s\n    content: ok\n")
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod document;
pub mod encoding;
pub mod error;
pub mod executor;
pub mod runcmd;
pub mod template;
pub mod writer;

pub use document::{Action, BootstrapDocument, RunCommand, WriteFile};
pub use encoding::Encoding;
pub use error::CloudInitError;
pub use executor::ScriptExecutor;
pub use runcmd::{CommandRunner, IGNORE_PREFLIGHT_ERRORS, ProcessRunner, with_ignore_preflight};
pub use template::TemplateContext;
pub use writer::{FileWriter, WriteOutcome};
