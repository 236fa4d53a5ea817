use crate::artifacts::{ArtifactKind, PipelineArtifact};
use crate::config::PipelineConfig;
use crate::fs::resolve_model_file;
use crate::process::{run_checked, CommandSpec};
use crate::stage::{Diagnostic, ExternalOperation, OperationKind, StageContext};
use crate::stages::browser::{normalize_browser_layout, BrowserLayoutOptions};
use crate::stages::quantize::QuantizeOperation;
use async_trait::async_trait;
use std::path::Path;
use tracing::info;

/// Exports the fused model to ONNX, then optionally quantizes and prepares a browser bundle.
#[derive(Debug, Default)]
pub struct ExportOnnxOperation;

pub fn export_command(config: &PipelineConfig, fused_dir: &Path, onnx_dir: &Path) -> CommandSpec {
    CommandSpec::new(&config.optimum_cli)
        .args(["export", "onnx", "--model"])
        .path_arg(fused_dir)
        .args(["--task", "text-generation-with-past"])
        .path_arg(onnx_dir)
}

#[async_trait]
impl ExternalOperation for ExportOnnxOperation {
    fn kind(&self) -> OperationKind {
        OperationKind::ExportOnnx
    }

    async fn invoke(&self, ctx: &StageContext<'_>) -> Result<Vec<PipelineArtifact>, Diagnostic> {
        let config = ctx.config;
        let fused_dir = ctx.layout.fused_dir();
        let onnx_dir = ctx.layout.onnx_dir();
        ctx.require_dir(&fused_dir, "fused model")?;

        run_checked(ctx.runner, &export_command(config, &fused_dir, &onnx_dir)).await?;
        let model = resolve_model_file(ctx.fs, &onnx_dir)?;
        info!(model = %model.display(), "exported ONNX model");

        let mut artifacts = vec![PipelineArtifact::new(ArtifactKind::OnnxModel, &onnx_dir)];
        let mut final_dir = onnx_dir.clone();

        if config.export.quantize {
            let mode = config.export.quantize_type;
            let quantized_dir = ctx.layout.quantized_dir(mode);
            QuantizeOperation::new(mode).quantize(ctx, &onnx_dir, &quantized_dir).await?;
            artifacts.push(PipelineArtifact::new(ArtifactKind::QuantizedModel, &quantized_dir));
            final_dir = quantized_dir;
        }

        if config.export.prepare_browser {
            let options = BrowserLayoutOptions::from(&config.export);
            normalize_browser_layout(ctx.fs, &final_dir, &options)?;
            artifacts.push(PipelineArtifact::new(ArtifactKind::BrowserBundle, &final_dir));
        }

        Ok(artifacts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuantizationMode;
    use crate::fs::StdFileSystem;
    use crate::layout::PipelineLayout;
    use crate::process::CommandOutput;
    use crate::testing::ScriptedRunner;
    use tempfile::TempDir;

    fn fused(layout: &PipelineLayout) {
        std::fs::create_dir_all(layout.fused_dir()).unwrap();
        std::fs::write(layout.fused_dir().join("config.json"), b"{}").unwrap();
    }

    #[test]
    fn test_export_command() {
        let command = export_command(&PipelineConfig::default(), Path::new("f"), Path::new("o"));
        assert_eq!(command.program, "optimum-cli");
        assert_eq!(command.args.join(" "), "export onnx --model f --task text-generation-with-past o");
    }

    #[tokio::test]
    async fn test_export_quantize_and_prepare() {
        let temp = TempDir::new().unwrap();
        let mut config = PipelineConfig::default();
        config.export.quantize = true;
        config.export.quantize_type = QuantizationMode::Int8;
        let layout = PipelineLayout::new(temp.path().to_path_buf());
        fused(&layout);
        std::fs::create_dir_all(layout.onnx_dir()).unwrap();
        std::fs::write(layout.onnx_dir().join("config.json"), r#"{"quantization_config":{}}"#).unwrap();

        let runner = ScriptedRunner::new()
            .on_arg_creating(
                "text-generation-with-past",
                CommandOutput::success(""),
                vec![layout.onnx_dir().join("model.onnx")],
            )
            .on_arg_creating(
                layout.quantized_dir(QuantizationMode::Int8).join("model.onnx").to_str().unwrap(),
                CommandOutput::success(""),
                vec![layout.quantized_dir(QuantizationMode::Int8).join("model.onnx")],
            );
        let ctx = StageContext::new(&config, &layout, &runner, &StdFileSystem);

        let artifacts = ExportOnnxOperation.invoke(&ctx).await.unwrap();
        let kinds: Vec<_> = artifacts.iter().map(|a| a.kind).collect();
        assert_eq!(kinds, vec![ArtifactKind::OnnxModel, ArtifactKind::QuantizedModel, ArtifactKind::BrowserBundle]);

        let quantized = layout.quantized_dir(QuantizationMode::Int8);
        assert!(quantized.join("onnx/model.onnx").is_file());
        assert_eq!(std::fs::read_to_string(quantized.join("config.json")).unwrap().trim(), "{}");
        assert!(layout.onnx_dir().join("model.onnx").is_file());
    }

    #[tokio::test]
    async fn test_export_without_model_file_fails() {
        let temp = TempDir::new().unwrap();
        let config = PipelineConfig::default();
        let layout = PipelineLayout::new(temp.path().to_path_buf());
        fused(&layout);
        let runner = ScriptedRunner::new();
        let ctx = StageContext::new(&config, &layout, &runner, &StdFileSystem);

        let diag = ExportOnnxOperation.invoke(&ctx).await.unwrap_err();
        assert!(diag.message.contains("decoder_model.onnx"));
    }

    #[tokio::test]
    async fn test_export_requires_fused_model() {
        let temp = TempDir::new().unwrap();
        let config = PipelineConfig::default();
        let layout = PipelineLayout::new(temp.path().to_path_buf());
        let runner = ScriptedRunner::new();
        let ctx = StageContext::new(&config, &layout, &runner, &StdFileSystem);

        let diag = ExportOnnxOperation.invoke(&ctx).await.unwrap_err();
        assert!(diag.message.contains("fused model not found"));
        assert!(runner.calls().is_empty());
    }
}
