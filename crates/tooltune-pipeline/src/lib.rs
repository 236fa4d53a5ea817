//! Tooltune Pipeline
//!
//! Sequences the fine-tuning run: dataset generation, LoRA training, fusion, ONNX and
//! MLC export, quantization and smoke-test gates. External tools are reached through
//! the `CommandRunner` seam; artifact paths come from `PipelineLayout`.

pub mod artifacts;
pub mod config;
pub mod error;
pub mod fs;
pub mod layout;
pub mod orchestrator;
pub mod process;
pub mod progress;
pub mod stage;
pub mod stages;

#[cfg(test)]
pub(crate) mod testing;

pub use artifacts::{ArtifactKind, PipelineArtifact, RecordedArtifact, RunId, RunManifest};
pub use config::{
    ConfigOverrides, ExportConfig, GatePolicy, GateSeverity, MlcConfig, PipelineConfig, QuantizationMode, SkipFlags,
    TrainingHyperParams, CONFIG_FILE_NAME,
};
pub use error::{PipelineError, PipelineResult};
pub use fs::{resolve_artifact_path, FileSystem, MemoryFileSystem, NotFound, StdFileSystem};
pub use layout::PipelineLayout;
pub use orchestrator::{Pipeline, PipelineReport, Stage};
pub use process::{CommandOutput, CommandRunner, CommandSpec, TokioCommandRunner};
pub use progress::{PipelineEvent, ProgressSink, RecordingProgressSink};
pub use stage::{Diagnostic, ExternalOperation, FailurePolicy, OperationKind, StageContext, StageId, StageResult, StageStatus};
