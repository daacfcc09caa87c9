//! Command execution.

use super::types::{CommandOutput, CommandSpec};
use log::{debug, trace, warn};
use std::process::{Child, Command, Stdio};

/// Errors raised while executing a command
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    #[error("Failed to start `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with status {status:?}: {stderr}")]
    Failed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
}

impl RunError {
    /// Standard error of a failed command, empty if it never started
    pub fn stderr(&self) -> &str {
        match self {
            RunError::Failed { stderr, .. } => stderr,
            RunError::Spawn { .. } => "",
        }
    }
}

/// Executes commands on the local host
pub trait CommandRunner: Send + Sync {
    /// Run to completion and capture output. A non-zero exit is reported
    /// through [`CommandOutput::status`], not as an error.
    fn output(&self, command: &CommandSpec) -> Result<CommandOutput, RunError>;

    /// Start a command in the background
    fn spawn(&self, command: &CommandSpec) -> Result<BackgroundProcess, RunError>;

    /// Run to completion, treating a non-zero exit as an error
    fn run(&self, command: &CommandSpec) -> Result<CommandOutput, RunError> {
        let output = self.output(command)?;
        if output.success() {
            Ok(output)
        } else {
            Err(RunError::Failed {
                command: command.command_line(),
                status: output.status,
                stderr: output.stderr.trim().to_string(),
            })
        }
    }
}

/// Handle on a command started with [`CommandRunner::spawn`]
#[derive(Debug)]
pub struct BackgroundProcess {
    command: String,
    child: Option<Child>,
}

impl BackgroundProcess {
    /// A handle with no process behind it, for runners that do not
    /// actually execute anything
    pub fn detached(command: &CommandSpec) -> Self {
        Self {
            command: command.command_line(),
            child: None,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().map(Child::id)
    }

    /// Kill the process if it is still running. Idempotent.
    pub fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        match child.try_wait() {
            Ok(Some(status)) => debug!("`{}` already exited with {}", self.command, status),
            _ => {
                if let Err(e) = child.kill() {
                    warn!("Failed to kill `{}`: {}", self.command, e);
                }
                let _ = child.wait();
                debug!("Stopped `{}`", self.command);
            }
        }
    }
}

impl Drop for BackgroundProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Runs commands with `std::process::Command`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    fn command(spec: &CommandSpec) -> Command {
        let mut command = Command::new(&spec.program);
        command.args(&spec.args);
        command
    }
}

impl CommandRunner for SystemRunner {
    fn output(&self, spec: &CommandSpec) -> Result<CommandOutput, RunError> {
        trace!("Running `{}`", spec);
        let output = Self::command(spec)
            .stdin(Stdio::null())
            .output()
            .map_err(|source| RunError::Spawn {
                command: spec.command_line(),
                source,
            })?;

        Ok(CommandOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn spawn(&self, spec: &CommandSpec) -> Result<BackgroundProcess, RunError> {
        trace!("Spawning `{}`", spec);
        let child = Self::command(spec)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| RunError::Spawn {
                command: spec.command_line(),
                source,
            })?;

        Ok(BackgroundProcess {
            command: spec.command_line(),
            child: Some(child),
        })
    }
}
