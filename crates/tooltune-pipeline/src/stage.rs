//! Stage identity, results and the adapter contract shared by every stage.

use crate::artifacts::PipelineArtifact;
use crate::config::{GateSeverity, PipelineConfig};
use crate::fs::{FileSystem, NotFound};
use crate::layout::PipelineLayout;
use crate::process::{CommandOutput, CommandRunner};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of trailing output lines kept in a diagnostic.
const TAIL_LINES: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StageId {
    GenerateData,
    TrainAdapter,
    ValidateAdapter,
    FuseAdapter,
    ValidateFused,
    ExportOnnx,
    ExportMlc,
    ValidateOnnx,
}

impl StageId {
    pub const ALL: [StageId; 8] = [
        Self::GenerateData,
        Self::TrainAdapter,
        Self::ValidateAdapter,
        Self::FuseAdapter,
        Self::ValidateFused,
        Self::ExportOnnx,
        Self::ExportMlc,
        Self::ValidateOnnx,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::GenerateData => "generate-data",
            Self::TrainAdapter => "train-adapter",
            Self::ValidateAdapter => "validate-adapter",
            Self::FuseAdapter => "fuse-adapter",
            Self::ValidateFused => "validate-fused",
            Self::ExportOnnx => "export-onnx",
            Self::ExportMlc => "export-mlc",
            Self::ValidateOnnx => "validate-onnx",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of work an adapter performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    GenerateData,
    Train,
    Fuse,
    ExportOnnx,
    ExportMlc,
    Quantize,
    Compile,
    Validate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

/// What a failed stage does to the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    Halt,
    Tolerate,
}

impl From<GateSeverity> for FailurePolicy {
    fn from(severity: GateSeverity) -> Self {
        match severity {
            GateSeverity::Advisory => Self::Tolerate,
            GateSeverity::Blocking => Self::Halt,
        }
    }
}

/// Compact account of why an operation failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    /// Last lines of stderr, or of stdout when stderr was empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_tail: Option<String>,
}

impl Diagnostic {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), exit_code: None, output_tail: None }
    }

    #[must_use]
    pub fn from_output(message: impl Into<String>, output: &CommandOutput) -> Self {
        let source = if output.stderr.trim().is_empty() { &output.stdout } else { &output.stderr };
        Self { message: message.into(), exit_code: output.exit_code, output_tail: tail(source, TAIL_LINES) }
    }

    #[must_use]
    pub fn with_output_tail(mut self, text: &str) -> Self {
        self.output_tail = tail(text, TAIL_LINES);
        self
    }
}

fn tail(text: &str, lines: usize) -> Option<String> {
    let all: Vec<&str> = text.trim_end().lines().collect();
    if all.iter().all(|l| l.trim().is_empty()) {
        return None;
    }
    let start = all.len().saturating_sub(lines);
    Some(all[start..].join("\n"))
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        if let Some(code) = self.exit_code {
            write!(f, " (exit code {code})")?;
        }
        if let Some(ref tail) = self.output_tail {
            write!(f, "\n{tail}")?;
        }
        Ok(())
    }
}

impl From<std::io::Error> for Diagnostic {
    fn from(err: std::io::Error) -> Self {
        Self::new(format!("i/o error: {err}"))
    }
}

impl From<NotFound> for Diagnostic {
    fn from(err: NotFound) -> Self {
        Self::new(err.to_string())
    }
}

impl From<serde_json::Error> for Diagnostic {
    fn from(err: serde_json::Error) -> Self {
        Self::new(format!("json error: {err}"))
    }
}

/// Outcome of one stage in a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: StageId,
    pub status: StageStatus,
    #[serde(default)]
    pub artifacts: Vec<PipelineArtifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<Diagnostic>,
    /// Set on failures that did not halt the run.
    #[serde(default)]
    pub tolerated: bool,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StageResult {
    #[must_use]
    pub fn pending(stage: StageId) -> Self {
        Self {
            stage,
            status: StageStatus::Pending,
            artifacts: Vec::new(),
            diagnostic: None,
            tolerated: false,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = StageStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_succeeded(&mut self, artifacts: Vec<PipelineArtifact>) {
        self.status = StageStatus::Succeeded;
        self.finished_at = Some(Utc::now());
        self.artifacts = artifacts;
    }

    pub fn mark_failed(&mut self, diagnostic: Diagnostic, tolerated: bool) {
        self.status = StageStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.diagnostic = Some(diagnostic);
        self.tolerated = tolerated;
    }

    pub fn mark_skipped(&mut self) {
        self.status = StageStatus::Skipped;
        self.finished_at = Some(Utc::now());
    }

    /// A failure that ends the run.
    pub fn is_fatal(&self) -> bool {
        self.status == StageStatus::Failed && !self.tolerated
    }
}

/// Everything an adapter needs to run.
pub struct StageContext<'a> {
    pub config: &'a PipelineConfig,
    pub layout: &'a PipelineLayout,
    pub runner: &'a dyn CommandRunner,
    pub fs: &'a dyn FileSystem,
}

impl<'a> StageContext<'a> {
    #[must_use]
    pub fn new(
        config: &'a PipelineConfig,
        layout: &'a PipelineLayout,
        runner: &'a dyn CommandRunner,
        fs: &'a dyn FileSystem,
    ) -> Self {
        Self { config, layout, runner, fs }
    }

    /// Fails with a diagnostic naming `what` when `path` is not a directory.
    pub fn require_dir(&self, path: &std::path::Path, what: &str) -> Result<(), Diagnostic> {
        if self.fs.is_dir(path) {
            Ok(())
        } else {
            Err(Diagnostic::new(format!("{what} not found at {}", path.display())))
        }
    }

    /// Fails with a diagnostic naming `what` when `path` is not a file.
    pub fn require_file(&self, path: &std::path::Path, what: &str) -> Result<(), Diagnostic> {
        if self.fs.is_file(path) {
            Ok(())
        } else {
            Err(Diagnostic::new(format!("{what} not found at {}", path.display())))
        }
    }
}

/// One external operation: logical parameters in, artifacts or a diagnostic out.
#[async_trait]
pub trait ExternalOperation: Send + Sync {
    fn kind(&self) -> OperationKind;

    async fn invoke(&self, ctx: &StageContext<'_>) -> Result<Vec<PipelineArtifact>, Diagnostic>;
}
