use crate::error::{PipelineError, PipelineResult};
use crate::stage::{StageId, StageResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use tooltune_dataset::DatasetId;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    DatasetDir,
    DatasetJsonl,
    TrainingConfig,
    AdapterDir,
    FusedModel,
    MergeInfo,
    OnnxModel,
    QuantizedModel,
    BrowserBundle,
    MlcModel,
    MlcLibrary,
}

/// A path produced by one stage for later stages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineArtifact {
    pub kind: ArtifactKind,
    pub path: PathBuf,
}

impl PipelineArtifact {
    #[must_use]
    pub fn new(kind: ArtifactKind, path: impl Into<PathBuf>) -> Self {
        Self { kind, path: path.into() }
    }
}

/// Artifact as recorded in the manifest. Only files carry a digest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedArtifact {
    pub stage: StageId,
    pub kind: ArtifactKind,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunManifest {
    pub run_id: RunId,
    pub created_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub base_model: String,
    pub output_dir: PathBuf,
    pub dataset_id: Option<DatasetId>,
    pub succeeded: bool,
    pub stages: Vec<StageResult>,
    pub artifacts: Vec<RecordedArtifact>,
}

impl RunManifest {
    pub fn write_to(&self, path: &Path) -> PipelineResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn read_from(path: &Path) -> PipelineResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

pub fn sha256_file(path: &Path) -> PipelineResult<String> {
    let bytes = std::fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

pub fn record_artifact(stage: StageId, artifact: &PipelineArtifact) -> PipelineResult<RecordedArtifact> {
    let path = &artifact.path;
    if !path.exists() {
        return Err(PipelineError::Artifact(format!("artifact path does not exist: {}", path.display())));
    }

    let sha256 = if path.is_file() { Some(sha256_file(path)?) } else { None };
    Ok(RecordedArtifact { stage, kind: artifact.kind, path: path.clone(), sha256 })
}
