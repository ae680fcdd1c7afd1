//! Subprocess invocation.
//!
//! Export tools and generators run through [`ProcessRunner`] so that their
//! output is captured as data and tests can substitute canned results.

use std::path::PathBuf;
use std::process::Command;

use tracing::debug;

/// A program and its arguments. Never passed through a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            cwd: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// `program arg arg` for messages.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Captured result of a finished process.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// `None` when the process was terminated by a signal.
    pub status: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    /// Stderr if non-empty, stdout otherwise, trimmed.
    pub fn diagnostic(&self) -> &str {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim()
        } else {
            stderr
        }
    }
}

/// Runs commands to completion. An `Err` of kind `NotFound` means the
/// program is not installed.
pub trait ProcessRunner: Send + Sync {
    fn run(&self, command: &CommandSpec) -> std::io::Result<ProcessOutput>;
}

/// Runs commands with [`std::process::Command`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, command: &CommandSpec) -> std::io::Result<ProcessOutput> {
        debug!(command = %command.display(), "running");
        let mut process = Command::new(&command.program);
        process.args(&command.args);
        if let Some(dir) = &command.cwd {
            process.current_dir(dir);
        }
        let output = process.output()?;
        Ok(ProcessOutput {
            status: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_joins_program_and_args() {
        let command = CommandSpec::new("nm").args(["-D", "--defined-only"]).arg("libdemo.so");
        assert_eq!(command.display(), "nm -D --defined-only libdemo.so");
    }

    #[test]
    fn diagnostic_prefers_stderr() {
        let output = ProcessOutput {
            status: Some(1),
            stdout: "partial".into(),
            stderr: "  no such file \n".into(),
        };
        assert!(!output.success());
        assert_eq!(output.diagnostic(), "no such file");
    }

    #[test]
    fn missing_program_is_not_found() {
        let err = SystemRunner
            .run(&CommandSpec::new("abi-sign-definitely-not-installed"))
            .unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}
