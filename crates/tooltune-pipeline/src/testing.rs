//! Scripted command runner for adapter and orchestrator tests.

use crate::process::{CommandOutput, CommandRunner, CommandSpec};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Mutex;

type Matcher = Box<dyn Fn(&CommandSpec) -> bool + Send + Sync>;

struct Rule {
    matches: Matcher,
    /// `None` simulates a program that cannot be spawned.
    output: Option<CommandOutput>,
    creates: Vec<PathBuf>,
}

/// Answers commands from rules in insertion order; unmatched commands succeed with empty output.
#[derive(Default)]
pub(crate) struct ScriptedRunner {
    rules: Vec<Rule>,
    calls: Mutex<Vec<CommandSpec>>,
}

impl ScriptedRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Matches commands with `arg` as one of their arguments.
    pub(crate) fn on_arg(self, arg: &str, output: CommandOutput) -> Self {
        self.on_arg_creating(arg, output, Vec::new())
    }

    /// Like `on_arg`, and writes empty files at `creates` when it fires.
    pub(crate) fn on_arg_creating(mut self, arg: &str, output: CommandOutput, creates: Vec<PathBuf>) -> Self {
        let arg = arg.to_string();
        self.rules.push(Rule { matches: Box::new(move |command| command.has_arg(&arg)), output: Some(output), creates });
        self
    }

    /// Matches inline Python whose code contains `snippet`.
    pub(crate) fn on_code(mut self, snippet: &str, output: CommandOutput) -> Self {
        let snippet = snippet.to_string();
        self.rules.push(Rule {
            matches: Box::new(move |command| command.args.first().is_some_and(|a| a == "-c") && command.args.get(1).is_some_and(|c| c.contains(&snippet))),
            output: Some(output),
            creates: Vec::new(),
        });
        self
    }

    pub(crate) fn missing_program(mut self, program: &str) -> Self {
        let program = program.to_string();
        self.rules.push(Rule { matches: Box::new(move |command| command.program == program), output: None, creates: Vec::new() });
        self
    }

    pub(crate) fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub(crate) fn count_with_arg(&self, arg: &str) -> usize {
        self.calls().iter().filter(|c| c.has_arg(arg)).count()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, command: &CommandSpec) -> std::io::Result<CommandOutput> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(command.clone());
        }

        let Some(rule) = self.rules.iter().find(|r| (r.matches)(command)) else {
            return Ok(CommandOutput::success(""));
        };

        for path in &rule.creates {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, b"")?;
        }

        rule.output
            .clone()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, format!("{}: not found", command.program)))
    }
}

/// A completion that carries every protocol marker.
pub(crate) const GOOD_COMPLETION: &str =
    "<start_function_call>call:calculate{expression:<escape>5*12<escape>}<end_function_call>";
