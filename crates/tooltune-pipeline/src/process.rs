//! Child process execution for stage adapters.

use crate::stage::Diagnostic;
use async_trait::async_trait;
use std::fmt;
use tokio::process::Command;
use tracing::{debug, info};

/// One external invocation. Runs in the pipeline's working directory, which every
/// artifact path is relative to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self { program: program.into(), args: Vec::new() }
    }

    /// `<python> -m <module>`
    #[must_use]
    pub fn python_module(python: &str, module: &str) -> Self {
        Self::new(python).arg("-m").arg(module)
    }

    /// `<python> -c <code>`
    #[must_use]
    pub fn python_inline(python: &str, code: &str) -> Self {
        Self::new(python).arg("-c").arg(code)
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn path_arg(self, path: &std::path::Path) -> Self {
        self.arg(path.to_string_lossy().into_owned())
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// True when `needle` appears as a whole argument.
    pub fn has_arg(&self, needle: &str) -> bool {
        self.args.iter().any(|a| a == needle)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            if arg.contains(char::is_whitespace) {
                let first = arg.lines().next().unwrap_or_default();
                write!(f, " '{first}{}'", if arg.contains('\n') { " ..." } else { "" })?;
            } else {
                write!(f, " {arg}")?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    #[must_use]
    pub fn success(stdout: impl Into<String>) -> Self {
        Self { exit_code: Some(0), stdout: stdout.into(), stderr: String::new() }
    }

    #[must_use]
    pub fn failure(code: i32, stderr: impl Into<String>) -> Self {
        Self { exit_code: Some(code), stdout: String::new(), stderr: stderr.into() }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs the command to completion. `Err` only when it could not be spawned.
    async fn run(&self, command: &CommandSpec) -> std::io::Result<CommandOutput>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioCommandRunner;

#[async_trait]
impl CommandRunner for TokioCommandRunner {
    async fn run(&self, command: &CommandSpec) -> std::io::Result<CommandOutput> {
        info!(command = %command, "running");

        let output = Command::new(&command.program).args(&command.args).output().await?;
        let result = CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        };

        debug!(exit_code = ?result.exit_code, stdout = %result.stdout.trim_end(), "command finished");
        if !result.stderr.trim().is_empty() {
            debug!(stderr = %result.stderr.trim_end(), "command stderr");
        }
        Ok(result)
    }
}

/// Runs `command` and turns a spawn error or non-zero exit into a diagnostic.
pub async fn run_checked(runner: &dyn CommandRunner, command: &CommandSpec) -> Result<CommandOutput, Diagnostic> {
    let output = runner
        .run(command)
        .await
        .map_err(|e| Diagnostic::new(format!("failed to start `{}`: {e}", command.program)))?;

    if output.succeeded() {
        Ok(output)
    } else {
        Err(Diagnostic::from_output(format!("`{command}` failed"), &output))
    }
}
