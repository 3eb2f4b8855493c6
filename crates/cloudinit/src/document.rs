//! Bootstrap document model
//!
//! A document is a YAML mapping whose keys are actions. Actions are kept in
//! document order; only `write_files` and `runcmd` are recognised.

use std::fmt;

use serde::Deserialize;
use serde_yaml::{Mapping, Value};

use crate::encoding::Encoding;
use crate::error::CloudInitError;

pub const WRITE_FILES: &str = "write_files";
pub const RUNCMD: &str = "runcmd";

/// Parsed bootstrap document
#[derive(Debug, Clone, PartialEq)]
pub struct BootstrapDocument {
    pub actions: Vec<Action>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    WriteFiles(Vec<WriteFile>),
    RunCmd(Vec<RunCommand>),
}

/// One `write_files` entry
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WriteFile {
    pub path: String,

    #[serde(default)]
    pub content: String,

    #[serde(default, rename = "encoding")]
    raw_encoding: Option<String>,

    #[serde(default)]
    pub permissions: Option<Permissions>,

    #[serde(default)]
    pub append: bool,

    /// Accepted for compatibility, ownership changes are not applied
    #[serde(default)]
    pub owner: Option<String>,

    #[serde(skip)]
    pub encoding: Encoding,
}

/// File mode, written either as octal text (`'0640'`, `0640`, `'0o640'`) or
/// as a YAML integer (`0o640`).
///
/// The YAML parser has already decoded integer literals, so a number is the
/// mode itself. A bare `0640` is not a YAML 1.2 integer and arrives as text.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Permissions {
    Text(String),
    Number(u64),
}

impl Permissions {
    pub fn mode(&self, path: &str) -> Result<u32, CloudInitError> {
        let invalid = |value: String| CloudInitError::InvalidPermissions {
            path: path.to_string(),
            value,
        };
        let mode = match self {
            Permissions::Number(n) => u32::try_from(*n).ok(),
            Permissions::Text(s) => {
                let text = s.trim();
                let digits = text
                    .strip_prefix("0o")
                    .or_else(|| text.strip_prefix("0O"))
                    .unwrap_or(text);
                u32::from_str_radix(digits, 8).ok()
            }
        };
        mode.filter(|mode| *mode <= 0o7777).ok_or_else(|| {
            invalid(match self {
                Permissions::Text(s) => s.clone(),
                Permissions::Number(n) => format!("{n:#o}"),
            })
        })
    }
}

/// One `runcmd` entry: a shell string or an argv list
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RunCommand {
    Shell(String),
    Argv(Vec<String>),
}

impl fmt::Display for RunCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunCommand::Shell(cmd) => write!(f, "{cmd}"),
            RunCommand::Argv(argv) => write!(f, "{}", argv.join(" ")),
        }
    }
}

impl BootstrapDocument {
    /// Parse a bootstrap document.
    ///
    /// Fails before anything is executed if an action is unknown, an entry is
    /// malformed or a file declares an unknown encoding or bad permissions.
    pub fn parse(text: &str) -> Result<Self, CloudInitError> {
        if text
            .lines()
            .all(|line| line.trim().is_empty() || line.trim_start().starts_with('#'))
        {
            return Ok(Self {
                actions: Vec::new(),
            });
        }
        let value: Value = serde_yaml::from_str(text)?;
        let mapping = match value {
            Value::Null => Mapping::new(),
            Value::Mapping(mapping) => mapping,
            other => {
                return Err(CloudInitError::Parse(serde::de::Error::custom(format!(
                    "expected a mapping at the top level, found {}",
                    value_kind(&other)
                ))));
            }
        };

        let mut actions = Vec::with_capacity(mapping.len());
        for (key, value) in mapping {
            let key = match key {
                Value::String(key) => key,
                other => return Err(CloudInitError::UnsupportedAction(format!("{other:?}"))),
            };
            match key.as_str() {
                WRITE_FILES => {
                    let mut files: Vec<WriteFile> = serde_yaml::from_value(value)?;
                    for file in &mut files {
                        file.resolve()?;
                    }
                    actions.push(Action::WriteFiles(files));
                }
                RUNCMD => {
                    let commands: Vec<RunCommand> = serde_yaml::from_value(value)?;
                    actions.push(Action::RunCmd(commands));
                }
                _ => return Err(CloudInitError::UnsupportedAction(key)),
            }
        }
        Ok(Self { actions })
    }
}

impl WriteFile {
    fn resolve(&mut self) -> Result<(), CloudInitError> {
        self.encoding = match self.raw_encoding.as_deref() {
            None | Some("") => Encoding::PlainText,
            Some(name) => {
                Encoding::parse(name).ok_or_else(|| CloudInitError::UnknownEncoding {
                    path: self.path.clone(),
                    encoding: name.to_string(),
                })?
            }
        };
        if let Some(permissions) = &self.permissions {
            permissions.mode(&self.path)?;
        }
        Ok(())
    }

    /// Octal mode, if permissions were given.
    pub fn mode(&self) -> Result<Option<u32>, CloudInitError> {
        self.permissions
            .as_ref()
            .map(|p| p.mode(&self.path))
            .transpose()
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}
