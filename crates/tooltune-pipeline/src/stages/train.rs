use crate::artifacts::{ArtifactKind, PipelineArtifact};
use crate::config::PipelineConfig;
use crate::process::{run_checked, CommandSpec};
use crate::stage::{Diagnostic, ExternalOperation, OperationKind, StageContext};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path, PathBuf};
use tooltune_dataset::{count_jsonl_records, TRAIN_FILE, VALID_FILE};
use tracing::info;

pub const TRAINING_CONFIG_FILE: &str = "training_config.json";
/// Trainer config passed through `-c`. Written as JSON, which YAML loaders accept.
pub const LORA_CONFIG_FILE: &str = "lora_config.yaml";

/// Parameters of a training run, written next to the adapter weights.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingRunRecord {
    pub base_model: String,
    pub data_dir: PathBuf,
    pub adapter_dir: PathBuf,
    pub iters: u32,
    pub batch_size: u32,
    pub learning_rate: f64,
    pub steps_per_report: u32,
    pub steps_per_eval: u32,
    pub seed: u64,
    pub lora_rank: u32,
    pub lora_alpha: u32,
    pub lora_scale: f64,
    pub lora_layers: Option<u32>,
    pub max_seq_length: u32,
    pub grad_checkpoint: bool,
    pub weight_decay: f64,
    pub train_samples: usize,
    pub valid_samples: usize,
    pub created_at: DateTime<Utc>,
}

/// LoRA fine-tuning through `mlx_lm lora`.
#[derive(Debug, Default)]
pub struct TrainAdapterOperation;

pub fn lora_command(config: &PipelineConfig, data_dir: &Path, adapter_dir: &Path) -> CommandSpec {
    let hp = &config.training;
    let mut command = CommandSpec::python_module(&config.python, "mlx_lm")
        .arg("lora")
        .arg("-c")
        .path_arg(&adapter_dir.join(LORA_CONFIG_FILE))
        .args(["--model", config.base_model.as_str()])
        .arg("--data")
        .path_arg(data_dir)
        .arg("--train")
        .args(["--batch-size".to_string(), hp.batch_size.to_string()])
        .args(["--iters".to_string(), hp.iters.to_string()])
        .args(["--learning-rate".to_string(), hp.learning_rate.to_string()])
        .args(["--steps-per-report".to_string(), hp.steps_per_report.to_string()])
        .args(["--steps-per-eval".to_string(), hp.steps_per_eval.to_string()])
        .args(["--max-seq-length".to_string(), hp.max_seq_length.to_string()])
        .args(["--seed".to_string(), hp.seed.to_string()]);
    if let Some(layers) = hp.lora_layers {
        command = command.args(["--num-layers".to_string(), layers.to_string()]);
    }
    if hp.grad_checkpoint {
        command = command.arg("--grad-checkpoint");
    }
    command.arg("--adapter-path").path_arg(adapter_dir)
}

/// Settings `mlx_lm lora` only takes from a config file.
pub fn lora_config(config: &PipelineConfig) -> serde_json::Value {
    let hp = &config.training;
    json!({
        "lora_parameters": {
            "rank": hp.lora_rank,
            "scale": hp.lora_scale(),
            "dropout": 0.0,
        },
        "optimizer": "adamw",
        "optimizer_config": {
            "adamw": {"weight_decay": hp.weight_decay},
        },
    })
}

#[async_trait]
impl ExternalOperation for TrainAdapterOperation {
    fn kind(&self) -> OperationKind {
        OperationKind::Train
    }

    async fn invoke(&self, ctx: &StageContext<'_>) -> Result<Vec<PipelineArtifact>, Diagnostic> {
        let config = ctx.config;
        let data_dir = ctx.layout.data_dir();
        let train_path = data_dir.join(TRAIN_FILE);
        let valid_path = data_dir.join(VALID_FILE);
        ctx.require_file(&train_path, "training partition")?;
        ctx.require_file(&valid_path, "validation partition")?;

        let count = |path: &Path| count_jsonl_records(path).map_err(|e| Diagnostic::new(e.to_string()));
        let train_samples = count(&train_path)?;
        let valid_samples = count(&valid_path)?;
        if train_samples == 0 {
            return Err(Diagnostic::new(format!("training partition {} is empty", train_path.display())));
        }

        let adapter_dir = ctx.layout.adapter_dir();
        std::fs::create_dir_all(&adapter_dir)?;

        let hp = &config.training;
        let lora_path = adapter_dir.join(LORA_CONFIG_FILE);
        std::fs::write(&lora_path, serde_json::to_string_pretty(&lora_config(config))?)?;

        let record = TrainingRunRecord {
            base_model: config.base_model.clone(),
            data_dir: data_dir.clone(),
            adapter_dir: adapter_dir.clone(),
            iters: hp.iters,
            batch_size: hp.batch_size,
            learning_rate: hp.learning_rate,
            steps_per_report: hp.steps_per_report,
            steps_per_eval: hp.steps_per_eval,
            seed: hp.seed,
            lora_rank: hp.lora_rank,
            lora_alpha: hp.lora_alpha,
            lora_scale: hp.lora_scale(),
            lora_layers: hp.lora_layers,
            max_seq_length: hp.max_seq_length,
            grad_checkpoint: hp.grad_checkpoint,
            weight_decay: hp.weight_decay,
            train_samples,
            valid_samples,
            created_at: Utc::now(),
        };
        let record_path = adapter_dir.join(TRAINING_CONFIG_FILE);
        std::fs::write(&record_path, serde_json::to_string_pretty(&record)?)?;

        info!(
            model = %config.base_model,
            iters = hp.iters,
            batch_size = hp.batch_size,
            lora_rank = hp.lora_rank,
            train_samples,
            valid_samples,
            "training LoRA adapter"
        );
        run_checked(ctx.runner, &lora_command(config, &data_dir, &adapter_dir)).await?;

        Ok(vec![
            PipelineArtifact::new(ArtifactKind::AdapterDir, &adapter_dir),
            PipelineArtifact::new(ArtifactKind::TrainingConfig, record_path),
            PipelineArtifact::new(ArtifactKind::TrainingConfig, lora_path),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::StdFileSystem;
    use crate::layout::PipelineLayout;
    use crate::process::CommandOutput;
    use crate::testing::ScriptedRunner;
    use tempfile::TempDir;

    fn write_data(layout: &PipelineLayout, train: &str) {
        std::fs::create_dir_all(layout.data_dir()).unwrap();
        std::fs::write(layout.data_dir().join(TRAIN_FILE), train).unwrap();
        std::fs::write(layout.data_dir().join(VALID_FILE), "{\"text\":\"v\"}\n").unwrap();
    }

    #[test]
    fn test_lora_command_arguments() {
        let config = PipelineConfig::default();
        let command = lora_command(&config, Path::new("w/training-data"), Path::new("w/adapters"));
        let joined = command.args.join(" ");
        assert_eq!(command.program, "python3");
        assert!(joined.starts_with(
            "-m mlx_lm lora -c w/adapters/lora_config.yaml --model google/functiongemma-270m-it --data w/training-data --train"
        ));
        assert!(joined.contains("--batch-size 2 --iters 100"));
        assert!(joined.contains("--steps-per-report 30 --steps-per-eval 50 --max-seq-length 512"));
        assert!(!command.has_arg("--num-layers"));
        assert!(!command.has_arg("--grad-checkpoint"));
        assert!(joined.ends_with("--adapter-path w/adapters"));
    }

    #[test]
    fn test_lora_command_layer_and_checkpoint_flags() {
        let mut config = PipelineConfig::default();
        config.training.lora_layers = Some(4);
        config.training.grad_checkpoint = true;
        config.training.max_seq_length = 1024;
        let joined = lora_command(&config, Path::new("d"), Path::new("a")).args.join(" ");
        assert!(joined.contains("--max-seq-length 1024"));
        assert!(joined.contains("--num-layers 4 --grad-checkpoint --adapter-path a"));
    }

    #[test]
    fn test_lora_config_carries_rank_scale_and_weight_decay() {
        let mut config = PipelineConfig::default();
        config.training.lora_rank = 4;
        config.training.lora_alpha = 16;
        config.training.weight_decay = 0.05;
        let value = lora_config(&config);
        assert_eq!(value["lora_parameters"]["rank"], 4);
        assert_eq!(value["lora_parameters"]["scale"], 4.0);
        assert_eq!(value["optimizer_config"]["adamw"]["weight_decay"], 0.05);
    }

    #[tokio::test]
    async fn test_train_writes_config_and_runs_lora() {
        let temp = TempDir::new().unwrap();
        let config = PipelineConfig::default();
        let layout = PipelineLayout::new(temp.path().to_path_buf());
        write_data(&layout, "{\"text\":\"a\"}\n{\"text\":\"b\"}\n");
        let runner = ScriptedRunner::new();
        let ctx = StageContext::new(&config, &layout, &runner, &StdFileSystem);

        let artifacts = TrainAdapterOperation.invoke(&ctx).await.unwrap();
        assert_eq!(artifacts[0].kind, ArtifactKind::AdapterDir);
        assert_eq!(runner.count_with_arg("lora"), 1);

        let record: TrainingRunRecord =
            serde_json::from_str(&std::fs::read_to_string(layout.adapter_dir().join(TRAINING_CONFIG_FILE)).unwrap())
                .unwrap();
        assert_eq!(record.train_samples, 2);
        assert_eq!(record.valid_samples, 1);
        assert_eq!((record.lora_rank, record.lora_alpha, record.max_seq_length), (8, 16, 512));
        assert_eq!(record.lora_layers, None);
        assert!((record.weight_decay - 0.01).abs() < f64::EPSILON);

        let lora: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(layout.adapter_dir().join(LORA_CONFIG_FILE)).unwrap()).unwrap();
        assert_eq!(lora["lora_parameters"]["rank"], 8);
    }

    #[tokio::test]
    async fn test_missing_data_fails_before_running() {
        let temp = TempDir::new().unwrap();
        let config = PipelineConfig::default();
        let layout = PipelineLayout::new(temp.path().to_path_buf());
        let runner = ScriptedRunner::new();
        let ctx = StageContext::new(&config, &layout, &runner, &StdFileSystem);

        let diag = TrainAdapterOperation.invoke(&ctx).await.unwrap_err();
        assert!(diag.message.contains("training partition not found"));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_empty_training_partition_fails() {
        let temp = TempDir::new().unwrap();
        let config = PipelineConfig::default();
        let layout = PipelineLayout::new(temp.path().to_path_buf());
        write_data(&layout, "");
        let runner = ScriptedRunner::new();
        let ctx = StageContext::new(&config, &layout, &runner, &StdFileSystem);

        let diag = TrainAdapterOperation.invoke(&ctx).await.unwrap_err();
        assert!(diag.message.contains("is empty"));
    }

    #[tokio::test]
    async fn test_trainer_failure_carries_exit_code() {
        let temp = TempDir::new().unwrap();
        let config = PipelineConfig::default();
        let layout = PipelineLayout::new(temp.path().to_path_buf());
        write_data(&layout, "{\"text\":\"a\"}\n");
        let runner = ScriptedRunner::new().on_arg("lora", CommandOutput::failure(1, "out of memory"));
        let ctx = StageContext::new(&config, &layout, &runner, &StdFileSystem);

        let diag = TrainAdapterOperation.invoke(&ctx).await.unwrap_err();
        assert_eq!(diag.exit_code, Some(1));
        assert_eq!(diag.output_tail.as_deref(), Some("out of memory"));
    }
}
