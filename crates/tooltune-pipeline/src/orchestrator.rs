//! Runs the ordered stage list and records the outcome.

use crate::artifacts::{record_artifact, RunId, RunManifest};
use crate::config::PipelineConfig;
use crate::error::PipelineResult;
use crate::progress::{PipelineEvent, ProgressSink};
use crate::stage::{ExternalOperation, FailurePolicy, StageContext, StageId, StageResult, StageStatus};
use crate::stages::{
    ExportMlcOperation, ExportOnnxOperation, FuseAdapterOperation, GateBackend, GenerateDataOperation, SmokeGate,
    TrainAdapterOperation,
};
use chrono::Utc;
use std::path::{Path, PathBuf};
use tooltune_dataset::{compute_dataset_id, read_jsonl_samples, DatasetId, TRAIN_FILE, VALID_FILE};
use tracing::{error, info, warn};

pub struct Stage {
    pub id: StageId,
    pub skip: bool,
    pub policy: FailurePolicy,
    operation: Box<dyn ExternalOperation>,
}

impl Stage {
    #[must_use]
    pub fn new(id: StageId, operation: impl ExternalOperation + 'static) -> Self {
        Self { id, skip: false, policy: FailurePolicy::Halt, operation: Box::new(operation) }
    }

    #[must_use]
    pub fn skip_if(mut self, skip: bool) -> Self {
        self.skip = skip;
        self
    }

    #[must_use]
    pub fn with_policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }
}

impl std::fmt::Debug for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stage")
            .field("id", &self.id)
            .field("skip", &self.skip)
            .field("policy", &self.policy)
            .field("kind", &self.operation.kind())
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct PipelineReport {
    pub run_id: RunId,
    pub results: Vec<StageResult>,
    pub succeeded: bool,
    pub manifest_path: PathBuf,
}

impl PipelineReport {
    /// The stage that ended the run, if any.
    pub fn failed_stage(&self) -> Option<&StageResult> {
        self.results.iter().find(|r| r.is_fatal())
    }

    /// Failures that were reported but did not halt the run.
    pub fn warnings(&self) -> impl Iterator<Item = &StageResult> {
        self.results.iter().filter(|r| r.status == StageStatus::Failed && r.tolerated)
    }

    pub fn result(&self, stage: StageId) -> Option<&StageResult> {
        self.results.iter().find(|r| r.stage == stage)
    }
}

#[derive(Debug, Default)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard generate → train → fuse → export → validate sequence.
    #[must_use]
    pub fn from_config(config: &PipelineConfig) -> Self {
        let skip = &config.skip;
        let gates = &config.gates;

        Self::new()
            .with_stage(Stage::new(StageId::GenerateData, GenerateDataOperation).skip_if(skip.data))
            .with_stage(Stage::new(StageId::TrainAdapter, TrainAdapterOperation).skip_if(skip.training))
            .with_stage(
                Stage::new(StageId::ValidateAdapter, SmokeGate::new(GateBackend::Adapter))
                    .skip_if(skip.tests || skip.training)
                    .with_policy(gates.adapter.into()),
            )
            .with_stage(Stage::new(StageId::FuseAdapter, FuseAdapterOperation).skip_if(skip.training))
            .with_stage(
                Stage::new(StageId::ValidateFused, SmokeGate::new(GateBackend::Fused))
                    .skip_if(skip.tests || skip.training)
                    .with_policy(gates.fused.into()),
            )
            .with_stage(Stage::new(StageId::ExportOnnx, ExportOnnxOperation).skip_if(skip.onnx))
            .with_stage(Stage::new(StageId::ExportMlc, ExportMlcOperation).skip_if(skip.mlc))
            .with_stage(
                Stage::new(StageId::ValidateOnnx, SmokeGate::new(GateBackend::Onnx))
                    .skip_if(skip.tests || skip.onnx)
                    .with_policy(gates.onnx.into()),
            )
    }

    #[must_use]
    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Runs every stage in order, stopping at the first failure that is not tolerated.
    ///
    /// The manifest is written whether or not the run succeeds. `Err` means the manifest
    /// itself could not be written.
    pub async fn run(&self, ctx: &StageContext<'_>, progress: &dyn ProgressSink) -> PipelineResult<PipelineReport> {
        let run_id = RunId::new();
        let created_at = Utc::now();
        let total = self.stages.len();
        ctx.layout.ensure_root()?;

        info!(run_id = %run_id, stages = total, output = %ctx.layout.root().display(), "pipeline started");
        progress.on_event(PipelineEvent::RunStarted { run_id: run_id.clone(), stages: total });

        let mut results = Vec::with_capacity(total);
        for (idx, stage) in self.stages.iter().enumerate() {
            let mut result = StageResult::pending(stage.id);

            if stage.skip {
                info!(stage = %stage.id, "skipped");
                result.mark_skipped();
                progress.on_event(PipelineEvent::StageSkipped { stage: stage.id });
                results.push(result);
                continue;
            }

            result.mark_running();
            info!(stage = %stage.id, step = idx + 1, total, "stage started");
            progress.on_event(PipelineEvent::StageStarted { stage: stage.id, index: idx + 1, total });

            match stage.operation.invoke(ctx).await {
                Ok(artifacts) => {
                    info!(stage = %stage.id, artifacts = artifacts.len(), "stage succeeded");
                    progress.on_event(PipelineEvent::StageSucceeded { stage: stage.id, artifacts: artifacts.clone() });
                    result.mark_succeeded(artifacts);
                }
                Err(diagnostic) => {
                    let tolerated = stage.policy == FailurePolicy::Tolerate;
                    if tolerated {
                        warn!(stage = %stage.id, error = %diagnostic, "stage failed, continuing");
                    } else {
                        error!(stage = %stage.id, error = %diagnostic, "stage failed");
                    }
                    progress.on_event(PipelineEvent::StageFailed {
                        stage: stage.id,
                        diagnostic: diagnostic.clone(),
                        tolerated,
                    });
                    result.mark_failed(diagnostic, tolerated);
                }
            }

            let fatal = result.is_fatal();
            results.push(result);
            if fatal {
                break;
            }
        }

        let succeeded = !results.iter().any(StageResult::is_fatal);
        let manifest_path = ctx.layout.manifest_path();
        let manifest = RunManifest {
            run_id: run_id.clone(),
            created_at,
            finished_at: Utc::now(),
            base_model: ctx.config.base_model.clone(),
            output_dir: ctx.layout.root().to_path_buf(),
            dataset_id: dataset_id(&ctx.layout.data_dir()),
            succeeded,
            artifacts: results
                .iter()
                .flat_map(|r| r.artifacts.iter().map(move |a| (r.stage, a)))
                .filter_map(|(stage, artifact)| match record_artifact(stage, artifact) {
                    Ok(recorded) => Some(recorded),
                    Err(e) => {
                        warn!(stage = %stage, error = %e, "artifact not recorded");
                        None
                    }
                })
                .collect(),
            stages: results.clone(),
        };
        manifest.write_to(&manifest_path)?;

        info!(run_id = %run_id, succeeded, manifest = %manifest_path.display(), "pipeline finished");
        progress.on_event(PipelineEvent::RunFinished { run_id: run_id.clone(), succeeded });

        Ok(PipelineReport { run_id, results, succeeded, manifest_path })
    }
}

/// Identity of the persisted dataset, when both partitions are readable.
fn dataset_id(data_dir: &Path) -> Option<DatasetId> {
    let train = read_jsonl_samples(&data_dir.join(TRAIN_FILE)).ok()?;
    let valid = read_jsonl_samples(&data_dir.join(VALID_FILE)).ok()?;
    compute_dataset_id(train.iter().chain(&valid)).ok()
}
