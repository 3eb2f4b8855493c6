//! Runs a parsed bootstrap document action by action

use tracing::info;

use crate::document::{Action, BootstrapDocument, RunCommand, WriteFile};
use crate::error::CloudInitError;
use crate::runcmd::{CommandRunner, with_ignore_preflight};
use crate::template::{TemplateContext, render};
use crate::writer::FileWriter;

/// Executes bootstrap documents against the host
#[derive(Debug)]
pub struct ScriptExecutor<R> {
    writer: FileWriter,
    runner: R,
    context: TemplateContext,
}

impl<R: CommandRunner> ScriptExecutor<R> {
    pub fn new(writer: FileWriter, runner: R, context: TemplateContext) -> Self {
        Self {
            writer,
            runner,
            context,
        }
    }

    /// Parse and execute a document in order, stopping at the first failure.
    pub async fn execute(&self, document: &str) -> Result<(), CloudInitError> {
        let document = BootstrapDocument::parse(document)?;
        self.execute_document(&document).await
    }

    pub async fn execute_document(&self, document: &BootstrapDocument) -> Result<(), CloudInitError> {
        for action in &document.actions {
            match action {
                Action::WriteFiles(files) => {
                    for file in files {
                        self.write_file(file).await?;
                    }
                }
                Action::RunCmd(commands) => {
                    for (index, command) in commands.iter().enumerate() {
                        self.run_command(index, command).await?;
                    }
                }
            }
        }
        Ok(())
    }

    async fn write_file(&self, file: &WriteFile) -> Result<(), CloudInitError> {
        let decoded = file.encoding.decode(&file.path, &file.content)?;
        // Templates only apply to textual content
        let data = match String::from_utf8(decoded) {
            Ok(text) => render(&file.path, &text, &self.context)?.into_bytes(),
            Err(raw) => raw.into_bytes(),
        };
        let outcome = self
            .writer
            .write(&file.path, &data, file.mode()?, file.append)
            .await?;
        info!(path = %file.path, ?outcome, "Wrote file");
        Ok(())
    }

    async fn run_command(&self, index: usize, command: &RunCommand) -> Result<(), CloudInitError> {
        let empty = match command {
            RunCommand::Shell(cmd) => cmd.trim().is_empty(),
            RunCommand::Argv(argv) => argv.is_empty(),
        };
        if empty {
            return Err(CloudInitError::EmptyCommand(index));
        }
        self.runner.run(&with_ignore_preflight(command)).await
    }
}
