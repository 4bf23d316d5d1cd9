//! Command-introspection collaborator.
//!
//! Adapters never spawn processes themselves; they hand a [`CommandOptions`]
//! to a [`CommandRunner`] and consume the captured standard output.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, instrument};

#[derive(Error, Debug)]
pub enum CommandError {
    #[error("Command not found: {program}")]
    NotFound { program: String },

    #[error("Command '{program}' failed with status {status}: {stderr}")]
    Failed {
        program: String,
        status: i32,
        stderr: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A command line to run in a working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOptions {
    pub name: String,
    pub args: Vec<String>,
    pub directory: PathBuf,
}

impl CommandOptions {
    pub fn new<I, S>(name: impl Into<String>, args: I, directory: impl Into<PathBuf>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            args: args.into_iter().map(Into::into).collect(),
            directory: directory.into(),
        }
    }

    /// Space-joined command line, used for logging and test scripting.
    pub fn command_line(&self) -> String {
        std::iter::once(self.name.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs the command to completion and returns its standard output.
    ///
    /// Blocks (asynchronously) until the process exits; no deadline is applied
    /// here.
    async fn output(&self, command: &CommandOptions) -> Result<String, CommandError>;
}

/// Runs commands as real child processes via `tokio::process`.
#[derive(Debug, Default, Clone)]
pub struct SystemCommandRunner;

impl SystemCommandRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    #[instrument(skip(self, command), fields(command = %command.command_line()))]
    async fn output(&self, command: &CommandOptions) -> Result<String, CommandError> {
        let output = tokio::process::Command::new(&command.name)
            .args(&command.args)
            .current_dir(&command.directory)
            .output()
            .await
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => CommandError::NotFound {
                    program: command.name.clone(),
                },
                _ => CommandError::Io(e),
            })?;

        if !output.status.success() {
            return Err(CommandError::Failed {
                program: command.name.clone(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        debug!(bytes = stdout.len(), "Command finished");
        Ok(stdout)
    }
}

/// In-memory runner returning canned output per command line.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub(crate) struct ScriptedRunner {
        responses: HashMap<String, String>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedRunner {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn respond(mut self, command_line: &str, stdout: &str) -> Self {
            self.responses
                .insert(command_line.to_string(), stdout.to_string());
            self
        }

        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().map(|c| c.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn output(&self, command: &CommandOptions) -> Result<String, CommandError> {
            let line = command.command_line();
            if let Ok(mut calls) = self.calls.lock() {
                calls.push(line.clone());
            }
            self.responses
                .get(&line)
                .cloned()
                .ok_or(CommandError::NotFound {
                    program: command.name.clone(),
                })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_line() {
        let cmd = CommandOptions::new("poetry", ["run", "pip", "list"], "/tmp");
        assert_eq!(cmd.command_line(), "poetry run pip list");
    }

    #[tokio::test]
    async fn test_missing_program_is_not_found() {
        let cmd = CommandOptions::new(
            "definitely-not-a-real-package-manager",
            Vec::<String>::new(),
            std::env::temp_dir(),
        );
        let result = SystemCommandRunner::new().output(&cmd).await;
        assert!(matches!(result, Err(CommandError::NotFound { .. })));
    }
}
