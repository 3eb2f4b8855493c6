//! runcmd execution
//!
//! Commands run one at a time. Output is streamed line by line to the log and
//! a non-zero exit aborts the document.

use std::collections::VecDeque;
use std::process::Stdio;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{info, warn};

use crate::document::RunCommand;
use crate::error::CloudInitError;

/// Switch appended to kubeadm init/join so host-level preflight checks do not block
pub const IGNORE_PREFLIGHT_ERRORS: &str = "--ignore-preflight-errors=all";

/// Shell used for string-form commands
pub const SHELL: &str = "/bin/sh";

/// Stderr lines kept for the error message of a failed command
const STDERR_TAIL_LINES: usize = 20;

fn is_kubeadm_bootstrap<'a>(mut tokens: impl Iterator<Item = &'a str>) -> bool {
    let program = tokens.next().unwrap_or_default();
    let program = program.rsplit('/').next().unwrap_or(program);
    if program != "kubeadm" {
        return false;
    }
    matches!(tokens.next(), Some("init") | Some("join"))
}

fn has_ignore_preflight<'a>(mut tokens: impl Iterator<Item = &'a str>) -> bool {
    tokens.any(|t| t.starts_with("--ignore-preflight-errors"))
}

/// Append the ignore-preflight switch to `kubeadm init`/`kubeadm join`, once.
pub fn with_ignore_preflight(command: &RunCommand) -> RunCommand {
    match command {
        RunCommand::Shell(cmd) => {
            if is_kubeadm_bootstrap(cmd.split_whitespace())
                && !has_ignore_preflight(cmd.split_whitespace())
            {
                RunCommand::Shell(format!("{} {IGNORE_PREFLIGHT_ERRORS}", cmd.trim_end()))
            } else {
                command.clone()
            }
        }
        RunCommand::Argv(argv) => {
            let tokens = || argv.iter().map(String::as_str);
            if is_kubeadm_bootstrap(tokens()) && !has_ignore_preflight(tokens()) {
                let mut argv = argv.clone();
                argv.push(IGNORE_PREFLIGHT_ERRORS.to_string());
                RunCommand::Argv(argv)
            } else {
                command.clone()
            }
        }
    }
}

/// Runs commands on the host
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &RunCommand) -> Result<(), CloudInitError>;
}

#[async_trait]
impl<T: CommandRunner + ?Sized> CommandRunner for std::sync::Arc<T> {
    async fn run(&self, command: &RunCommand) -> Result<(), CloudInitError> {
        (**self).run(command).await
    }
}

/// Runs commands as child processes of the agent
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }

    fn build(command: &RunCommand) -> Option<Command> {
        match command {
            RunCommand::Shell(cmd) => {
                let mut c = Command::new(SHELL);
                c.arg("-c").arg(cmd);
                Some(c)
            }
            RunCommand::Argv(argv) => {
                let (program, args) = argv.split_first()?;
                let mut c = Command::new(program);
                c.args(args);
                Some(c)
            }
        }
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &RunCommand) -> Result<(), CloudInitError> {
        let shown = command.to_string();
        let mut cmd = Self::build(command).ok_or(CloudInitError::EmptyCommand(0))?;
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(command = %shown, "Running command");
        let mut child = cmd.spawn().map_err(|source| CloudInitError::Spawn {
            command: shown.clone(),
            source,
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stdout_task = async {
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    info!(target: "cloudinit::stdout", "{line}");
                }
            }
        };
        let stderr_task = async {
            let mut tail = VecDeque::with_capacity(STDERR_TAIL_LINES);
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!(target: "cloudinit::stderr", "{line}");
                    if tail.len() == STDERR_TAIL_LINES {
                        tail.pop_front();
                    }
                    tail.push_back(line);
                }
            }
            tail
        };

        let ((), tail) = tokio::join!(stdout_task, stderr_task);
        let status = child.wait().await.map_err(|source| CloudInitError::Spawn {
            command: shown.clone(),
            source,
        })?;

        if status.success() {
            Ok(())
        } else {
            Err(CloudInitError::CommandFailed {
                command: shown,
                status: status.to_string(),
                stderr: Vec::from(tail).join("\n"),
            })
        }
    }
}
