//! Running external tools and capturing what they print.

use anyhow::{Context, Result};
use std::ffi::OsStr;
use std::process::Command;

/// Captured result of one external command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, `None` if the process was killed by a signal.
    pub code: Option<i32>,
}

impl CommandOutput {
    /// A successful run that printed `stdout`.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            code: Some(0),
        }
    }

    /// A run that exited with `code` and printed `stderr`.
    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
            code: Some(code),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Synchronous "run a program, capture stdout and exit status" primitive.
///
/// Implementations return `Err` only when the process could not be started.
/// A command that runs and exits non-zero is `Ok` with a non-zero `code`.
pub trait CommandRunner {
    fn run(&self, program: &str, args: &[&OsStr]) -> Result<CommandOutput>;
}

/// Runs commands directly with [`std::process::Command`] (no shell).
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, program: &str, args: &[&OsStr]) -> Result<CommandOutput> {
        let output = Command::new(program)
            .args(args)
            .output()
            .with_context(|| format!("Failed to start '{}' - is it installed?", program))?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            code: output.status.code(),
        })
    }
}

/// Render a command line for logs and dry-run descriptions.
///
/// Arguments containing whitespace, quotes or `$` are single-quoted so the
/// printed line can be pasted into a shell.
pub fn render_command(program: &str, args: &[&OsStr]) -> String {
    let mut line = program.to_string();
    for arg in args {
        let arg = arg.to_string_lossy();
        line.push(' ');
        if arg.is_empty() || arg.contains(|c: char| c.is_whitespace() || "'\"$".contains(c)) {
            line.push('\'');
            line.push_str(&arg.replace('\'', r"'\''"));
            line.push('\'');
        } else {
            line.push_str(&arg);
        }
    }
    line
}
