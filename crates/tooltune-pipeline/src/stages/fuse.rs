use crate::artifacts::{ArtifactKind, PipelineArtifact};
use crate::config::PipelineConfig;
use crate::process::{run_checked, CommandSpec};
use crate::stage::{Diagnostic, ExternalOperation, OperationKind, StageContext};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

pub const ADAPTER_WEIGHTS_FILE: &str = "adapters.safetensors";
pub const MERGE_INFO_FILE: &str = "merge_info.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeInfo {
    pub base_model: String,
    pub adapter_path: PathBuf,
    pub fused_path: PathBuf,
    pub dequantized: bool,
    pub merged_at: DateTime<Utc>,
}

/// Merges the trained adapter into the base weights with `mlx_lm fuse`.
#[derive(Debug, Default)]
pub struct FuseAdapterOperation;

pub fn fuse_command(config: &PipelineConfig, adapter_dir: &Path, fused_dir: &Path) -> CommandSpec {
    CommandSpec::python_module(&config.python, "mlx_lm")
        .arg("fuse")
        .args(["--model", config.base_model.as_str()])
        .arg("--adapter-path")
        .path_arg(adapter_dir)
        .arg("--save-path")
        .path_arg(fused_dir)
        .arg("--dequantize")
}

#[async_trait]
impl ExternalOperation for FuseAdapterOperation {
    fn kind(&self) -> OperationKind {
        OperationKind::Fuse
    }

    async fn invoke(&self, ctx: &StageContext<'_>) -> Result<Vec<PipelineArtifact>, Diagnostic> {
        let adapter_dir = ctx.layout.adapter_dir();
        let fused_dir = ctx.layout.fused_dir();
        ctx.require_file(&adapter_dir.join(ADAPTER_WEIGHTS_FILE), "adapter weights")?;

        info!(adapter = %adapter_dir.display(), output = %fused_dir.display(), "fusing adapter into base model");
        run_checked(ctx.runner, &fuse_command(ctx.config, &adapter_dir, &fused_dir)).await?;

        std::fs::create_dir_all(&fused_dir)?;
        let info = MergeInfo {
            base_model: ctx.config.base_model.clone(),
            adapter_path: adapter_dir,
            fused_path: fused_dir.clone(),
            dequantized: true,
            merged_at: Utc::now(),
        };
        let info_path = fused_dir.join(MERGE_INFO_FILE);
        std::fs::write(&info_path, serde_json::to_string_pretty(&info)?)?;

        Ok(vec![
            PipelineArtifact::new(ArtifactKind::FusedModel, &fused_dir),
            PipelineArtifact::new(ArtifactKind::MergeInfo, info_path),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{MemoryFileSystem, StdFileSystem};
    use crate::layout::PipelineLayout;
    use crate::testing::ScriptedRunner;
    use tempfile::TempDir;

    #[test]
    fn test_fuse_command_dequantizes() {
        let command = fuse_command(&PipelineConfig::default(), Path::new("a"), Path::new("f"));
        assert_eq!(
            command.args.join(" "),
            "-m mlx_lm fuse --model google/functiongemma-270m-it --adapter-path a --save-path f --dequantize"
        );
    }

    #[tokio::test]
    async fn test_missing_adapter_weights_is_reported() {
        let config = PipelineConfig::default();
        let layout = PipelineLayout::new(PathBuf::from("w"));
        let runner = ScriptedRunner::new();
        let fs = MemoryFileSystem::new().with_file("w/adapters/training_config.json");
        let ctx = StageContext::new(&config, &layout, &runner, &fs);

        let diag = FuseAdapterOperation.invoke(&ctx).await.unwrap_err();
        assert!(diag.message.contains("adapter weights not found"));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn test_fuse_writes_merge_info() {
        let temp = TempDir::new().unwrap();
        let config = PipelineConfig::default();
        let layout = PipelineLayout::new(temp.path().to_path_buf());
        std::fs::create_dir_all(layout.adapter_dir()).unwrap();
        std::fs::write(layout.adapter_dir().join(ADAPTER_WEIGHTS_FILE), b"w").unwrap();
        let runner = ScriptedRunner::new();
        let ctx = StageContext::new(&config, &layout, &runner, &StdFileSystem);

        FuseAdapterOperation.invoke(&ctx).await.unwrap();
        assert_eq!(runner.count_with_arg("--dequantize"), 1);

        let info: MergeInfo =
            serde_json::from_str(&std::fs::read_to_string(layout.fused_dir().join(MERGE_INFO_FILE)).unwrap()).unwrap();
        assert_eq!(info.base_model, config.base_model);
        assert!(info.dequantized);
    }
}
