//! A command runner that records instead of executing.
//!
//! Used to exercise the emulator, routing and fleet code without root
//! privileges or remote hosts.

use super::runner::{BackgroundProcess, CommandRunner, RunError};
use super::types::{CommandOutput, CommandSpec};
use std::sync::{Mutex, PoisonError};

#[derive(Debug, Clone)]
struct Scripted {
    pattern: String,
    output: CommandOutput,
}

/// Records every command line and answers with scripted output.
///
/// Commands succeed with empty output unless a scripted pattern is a
/// substring of their command line; the most recently added match wins.
#[derive(Debug, Default)]
pub struct RecordingRunner {
    commands: Mutex<Vec<String>>,
    scripted: Mutex<Vec<Scripted>>,
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make matching commands exit with status 1 and `stderr`
    pub fn fail_matching(&self, pattern: &str, stderr: &str) {
        self.script(pattern, CommandOutput {
            status: Some(1),
            stdout: String::new(),
            stderr: stderr.to_string(),
        });
    }

    /// Make matching commands succeed with `stdout`
    pub fn respond_matching(&self, pattern: &str, stdout: &str) {
        self.script(pattern, CommandOutput {
            status: Some(0),
            stdout: stdout.to_string(),
            stderr: String::new(),
        });
    }

    /// Every command line seen so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count_matching(&self, pattern: &str) -> usize {
        self.commands().iter().filter(|c| c.contains(pattern)).count()
    }

    /// Index of the first command containing `pattern`
    pub fn position(&self, pattern: &str) -> Option<usize> {
        self.commands().iter().position(|c| c.contains(pattern))
    }

    fn script(&self, pattern: &str, output: CommandOutput) {
        self.scripted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Scripted {
                pattern: pattern.to_string(),
                output,
            });
    }

    fn record(&self, command: &CommandSpec) -> CommandOutput {
        let line = command.command_line();
        let output = self
            .scripted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .find(|s| line.contains(&s.pattern))
            .map(|s| s.output.clone())
            .unwrap_or(CommandOutput {
                status: Some(0),
                ..CommandOutput::default()
            });
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(line);
        output
    }
}

impl CommandRunner for RecordingRunner {
    fn output(&self, command: &CommandSpec) -> Result<CommandOutput, RunError> {
        Ok(self.record(command))
    }

    fn spawn(&self, command: &CommandSpec) -> Result<BackgroundProcess, RunError> {
        let output = self.record(command);
        if output.success() {
            Ok(BackgroundProcess::detached(command))
        } else {
            Err(RunError::Failed {
                command: command.command_line(),
                status: output.status,
                stderr: output.stderr,
            })
        }
    }
}
